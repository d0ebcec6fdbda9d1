use std::fmt;
use std::time::Duration;

use crate::clock::Sleeper;
use crate::frame::{Command, decode_text};
use crate::session::{ACK_WINDOW, LOG_WINDOW, RESULT_WINDOW, Session};
use crate::transport::Transport;

/// Delay between sending a request and reading its reply.
const REPLY_SETTLE: Duration = Duration::from_secs(1);
/// Backoff between result polls; with the 40-poll cap this gives a slow
/// case roughly 200 s to finish.
const RESULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const LOG_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Malformed or negative result replies tolerated before giving up.
const RESULT_ATTEMPT_LIMIT: u32 = 3;
/// "Still running" polls tolerated. Far larger than the attempt limit:
/// a busy device is expected, a garbled one is not.
const RUNNING_POLL_LIMIT: u32 = 40;
const LOG_ATTEMPT_LIMIT: u32 = 3;

/// Terminal outcome of one case execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Pass,
    /// Case ran and failed; carries the device log.
    Fail(String),
    /// The exchange itself broke down.
    ProtocolError(String),
    /// Device stayed busy past the poll budget.
    Timeout,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Pass => write!(f, "pass"),
            RunOutcome::Fail(_) => write!(f, "fail"),
            RunOutcome::ProtocolError(reason) => write!(f, "protocol error: {reason}"),
            RunOutcome::Timeout => write!(f, "execution timeout"),
        }
    }
}

/// Outcome plus the case name as resolved from the result frame (the device
/// reports which case a result belongs to; the caller's name is a fallback).
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub case_name: String,
    pub outcome: RunOutcome,
}

/// Drive one case through the full exchange:
/// RunCase -> Ack -> GetCaseResult (polled) -> [GetLog (chunked)] -> outcome.
///
/// Steps run in strict order with at most one exchange in flight. Exactly
/// one outcome comes back per call; transport failures become
/// `ProtocolError` rather than propagating.
pub fn run_case<T: Transport>(
    session: &mut Session<T>,
    case_name: &str,
    case_id: [u8; 2],
    user_payload: &[u8],
    sleeper: &dyn Sleeper,
) -> CaseReport {
    let report = |name: &str, outcome: RunOutcome| CaseReport {
        case_name: name.to_string(),
        outcome,
    };

    // RunCase payload: case id, then the caller's bytes.
    let mut payload = Vec::with_capacity(2 + user_payload.len());
    payload.extend_from_slice(&case_id);
    payload.extend_from_slice(user_payload);
    if let Err(e) = session.send_frame(Command::RunCase, &payload) {
        return report(case_name, RunOutcome::ProtocolError(format!("sending run request: {e}")));
    }
    sleeper.sleep(REPLY_SETTLE);

    // A missing or negative Ack is terminal; only result polling retries.
    if let Err(reason) = await_ack(session) {
        return report(case_name, RunOutcome::ProtocolError(reason));
    }
    eprintln!("[case] {case_name}: started");

    let (resolved, result_byte) = match poll_result(session, case_name, sleeper) {
        Ok(parsed) => parsed,
        Err(outcome) => return report(case_name, outcome),
    };

    match result_byte {
        0 => {
            eprintln!("[case] {resolved}: passed");
            report(&resolved, RunOutcome::Pass)
        }
        1 => {
            eprintln!("[case] {resolved}: failed, pulling log");
            match fetch_log(session, sleeper) {
                Ok(log) => report(&resolved, RunOutcome::Fail(log)),
                Err(reason) => report(&resolved, RunOutcome::ProtocolError(reason)),
            }
        }
        other => report(
            &resolved,
            RunOutcome::ProtocolError(format!("unknown result code 0x{other:02X}")),
        ),
    }
}

fn await_ack<T: Transport>(session: &mut Session<T>) -> Result<(), String> {
    let raw = session
        .receive(ACK_WINDOW)
        .map_err(|e| format!("receiving ack: {e}"))?;
    let decoded = session.decode(&raw).map_err(|e| format!("ack reply: {e}"))?;
    match decoded.command {
        Some(Command::Ack) => Ok(()),
        _ => Err(format!(
            "expected ack, got 0x{:04X}",
            decoded.raw_command
        )),
    }
}

/// Poll GetCaseResult until the device hands over a result. One attempt
/// counter covers every reply kind; only the cap differs (40 for "still
/// running", 3 for anything malformed or negative).
fn poll_result<T: Transport>(
    session: &mut Session<T>,
    case_name: &str,
    sleeper: &dyn Sleeper,
) -> Result<(String, u8), RunOutcome> {
    let mut attempts: u32 = 0;
    loop {
        session
            .send_frame(Command::GetCaseResult, &[])
            .map_err(|e| RunOutcome::ProtocolError(format!("requesting result: {e}")))?;
        sleeper.sleep(REPLY_SETTLE);
        let raw = session
            .receive(RESULT_WINDOW)
            .map_err(|e| RunOutcome::ProtocolError(format!("receiving result: {e}")))?;

        match session.decode(&raw) {
            Err(e) => {
                eprintln!("[case] {case_name}: bad result frame: {e}");
                attempts += 1;
                if attempts >= RESULT_ATTEMPT_LIMIT {
                    return Err(RunOutcome::ProtocolError(
                        "no result after 3 attempts".into(),
                    ));
                }
            }
            Ok(decoded) => match decoded.command {
                Some(Command::CaseResult) => {
                    if decoded.payload.len() != 3 {
                        return Err(RunOutcome::ProtocolError(format!(
                            "case result payload is {} bytes, expected 3",
                            decoded.payload.len()
                        )));
                    }
                    let id = [decoded.payload[0], decoded.payload[1]];
                    // The device names the case; fall back to what we ran.
                    let name = session
                        .registry()
                        .lookup_by_id(&id)
                        .unwrap_or(case_name)
                        .to_string();
                    return Ok((name, decoded.payload[2]));
                }
                Some(Command::CaseRunning) => {
                    eprintln!("[case] {case_name}: still running");
                    attempts += 1;
                    if attempts >= RUNNING_POLL_LIMIT {
                        return Err(RunOutcome::Timeout);
                    }
                }
                Some(Command::Nack) => {
                    eprintln!("[case] {case_name}: nack while polling result");
                    attempts += 1;
                    if attempts >= RESULT_ATTEMPT_LIMIT {
                        return Err(RunOutcome::ProtocolError(
                            "no result after 3 attempts".into(),
                        ));
                    }
                }
                _ => {
                    eprintln!(
                        "[case] {case_name}: unexpected command 0x{:04X} while polling result",
                        decoded.raw_command
                    );
                    attempts += 1;
                    if attempts >= RESULT_ATTEMPT_LIMIT {
                        return Err(RunOutcome::ProtocolError(
                            "no result after 3 attempts".into(),
                        ));
                    }
                }
            },
        }
        sleeper.sleep(RESULT_RETRY_DELAY);
    }
}

/// Pull the failure log chunk by chunk. Chunk count is unbounded; only
/// malformed or unexpected replies count against the retry cap.
fn fetch_log<T: Transport>(
    session: &mut Session<T>,
    sleeper: &dyn Sleeper,
) -> Result<String, String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut attempts: u32 = 0;
    loop {
        session
            .send_frame(Command::GetLog, &[])
            .map_err(|e| format!("requesting log: {e}"))?;
        sleeper.sleep(REPLY_SETTLE);
        let raw = session
            .receive(LOG_WINDOW)
            .map_err(|e| format!("receiving log: {e}"))?;

        match session.decode(&raw) {
            Err(e) => {
                eprintln!("[case] bad log frame: {e}");
                attempts += 1;
                if attempts >= LOG_ATTEMPT_LIMIT {
                    return Err("no log after 3 attempts".into());
                }
                sleeper.sleep(LOG_RETRY_DELAY);
            }
            Ok(decoded) => match decoded.command {
                Some(Command::LogSending) => {
                    chunks.push(decode_text(&decoded.payload));
                }
                Some(Command::LogFinished) => {
                    chunks.push(decode_text(&decoded.payload));
                    return Ok(chunks.concat());
                }
                _ => {
                    eprintln!(
                        "[case] unexpected command 0x{:04X} while pulling log",
                        decoded.raw_command
                    );
                    attempts += 1;
                    if attempts >= LOG_ATTEMPT_LIMIT {
                        return Err("no log after 3 attempts".into());
                    }
                    sleeper.sleep(LOG_RETRY_DELAY);
                }
            },
        }
    }
}
