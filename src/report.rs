use chrono::Local;

use crate::exec::RunOutcome;

/// A case that reached a passing result.
#[derive(Debug, Clone)]
pub struct SuccessRecord {
    pub timestamp: String,
    pub case_name: String,
    pub note: String,
}

/// A case that failed or never produced a result; `log` carries the device
/// log when one was retrieved, otherwise the failure reason.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub timestamp: String,
    pub case_name: String,
    pub log: String,
}

#[derive(Debug, Clone, Copy)]
pub struct LedgerStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl LedgerStats {
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Append-only result ledger, consumed externally for export. Exactly one
/// record lands here per terminal case outcome; engine errors and timeouts
/// are failures too, never dropped.
#[derive(Debug, Default)]
pub struct ResultLedger {
    successes: Vec<SuccessRecord>,
    failures: Vec<FailureRecord>,
}

impl ResultLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, case_name: &str, outcome: &RunOutcome) {
        let timestamp = Local::now().format("%H:%M:%S").to_string();
        match outcome {
            RunOutcome::Pass => self.successes.push(SuccessRecord {
                timestamp,
                case_name: case_name.to_string(),
                note: "result ok".to_string(),
            }),
            RunOutcome::Fail(log) => self.failures.push(FailureRecord {
                timestamp,
                case_name: case_name.to_string(),
                log: log.clone(),
            }),
            RunOutcome::ProtocolError(_) | RunOutcome::Timeout => {
                self.failures.push(FailureRecord {
                    timestamp,
                    case_name: case_name.to_string(),
                    log: outcome.to_string(),
                })
            }
        }
    }

    pub fn successes(&self) -> &[SuccessRecord] {
        &self.successes
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn statistics(&self) -> LedgerStats {
        LedgerStats {
            total: self.successes.len() + self.failures.len(),
            passed: self.successes.len(),
            failed: self.failures.len(),
        }
    }
}
