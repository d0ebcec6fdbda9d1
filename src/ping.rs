use anyhow::{Context, Result};

use crate::cli::PingOpts;
use crate::clock::ThreadSleeper;
use crate::link::SerialLink;
use crate::session::Session;

pub fn run(opts: PingOpts) -> Result<()> {
    let link = SerialLink::open(&opts.link)?;
    let mut session = Session::new(link, opts.link.crc_policy()?);
    session
        .ping(&ThreadSleeper)
        .context("device did not answer ping")?;
    eprintln!("[ping] device acknowledged");
    Ok(())
}
