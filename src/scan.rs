use anyhow::{Context, Result};

use crate::cli::ScanOpts;
use crate::clock::ThreadSleeper;
use crate::link::SerialLink;
use crate::session::Session;

pub fn run(opts: ScanOpts) -> Result<()> {
    let link = SerialLink::open(&opts.link)?;
    let mut session = Session::new(link, opts.link.crc_policy()?);
    let sleeper = ThreadSleeper;
    session
        .ping(&sleeper)
        .context("device did not answer ping")?;
    session.scan_cases(&sleeper).context("scan failed")?;
    eprintln!("[scan] {} cases", session.registry().len());
    for (name, id) in session.registry().entries() {
        eprintln!("[scan] case{} {}", u16::from_be_bytes(id), name);
    }
    Ok(())
}
