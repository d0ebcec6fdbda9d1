use anyhow::{Context, Result, bail};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::cli::{RunOpts, parse_decimal_payload};
use crate::clock::ThreadSleeper;
use crate::link::SerialLink;
use crate::report::ResultLedger;
use crate::sched::{self, CaseEntry, Config, Mode};
use crate::session::Session;
use crate::transport::Transport;

pub fn run(opts: RunOpts) -> Result<()> {
    let mode = Mode::from_cli(&opts.mode)?;
    let payload = parse_decimal_payload(&opts.payload)?;
    let cfg = Config {
        mode,
        round_limit: if opts.endless { 0 } else { opts.rounds },
        settle: Duration::from_millis(opts.settle_ms),
        seed: opts.seed,
    };

    let link = SerialLink::open(&opts.link)?;
    let mut session = Session::new(link, opts.link.crc_policy()?);
    let sleeper = ThreadSleeper;

    session
        .ping(&sleeper)
        .context("device did not answer ping")?;
    let names = session.scan_cases(&sleeper).context("scan failed")?;
    eprintln!("[run] {} cases on the device", names.len());

    let entries = build_entries(&session, &opts.cases, &payload)?;
    let stop = AtomicBool::new(false);
    let mut ledger = ResultLedger::new();
    let summary = sched::run(&mut session, &entries, &cfg, &stop, &mut ledger, &sleeper)?;

    let stats = ledger.statistics();
    eprintln!(
        "[run] {} after {}: {} executed, {} passed, {} failed ({:.1}% pass)",
        if summary.user_stopped {
            "stopped by user"
        } else {
            "finished"
        },
        format_elapsed(summary.elapsed),
        summary.executed,
        stats.passed,
        stats.failed,
        stats.pass_rate(),
    );
    for f in ledger.failures() {
        eprintln!("[run] FAIL {} {}: {}", f.timestamp, f.case_name, f.log);
    }
    Ok(())
}

/// Run list snapshot: registry order, optionally filtered to the names the
/// user asked for. Asking for a case the device does not have is an error,
/// not a silent skip.
fn build_entries<T: Transport>(
    session: &Session<T>,
    requested: &[String],
    payload: &[u8],
) -> Result<Vec<CaseEntry>> {
    for want in requested {
        if session.registry().id_of(want).is_none() {
            bail!("case {want:?} is not present on the device");
        }
    }
    let entries: Vec<CaseEntry> = session
        .registry()
        .entries()
        .filter(|(name, _)| requested.is_empty() || requested.iter().any(|w| w == name))
        .map(|(name, id)| CaseEntry {
            name: name.to_string(),
            id,
            payload: payload.to_vec(),
        })
        .collect();
    Ok(entries)
}

fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 3600.0 {
        format!("{}h{}m{:.0}s", secs as u64 / 3600, secs as u64 % 3600 / 60, secs % 60.0)
    } else if secs >= 60.0 {
        format!("{}m{:.1}s", secs as u64 / 60, secs % 60.0)
    } else {
        format!("{secs:.1}s")
    }
}
