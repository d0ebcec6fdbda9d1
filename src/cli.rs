use anyhow::{Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};

use crate::frame::CrcPolicy;

#[derive(Parser, Debug, Clone)]
#[command(name = "spi-bench", about = "SPI test-case bench (scan/run) with framing & retries")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Check the link with a Ping exchange
    Ping(PingOpts),
    /// Enumerate the test cases resident on the device
    Scan(ScanOpts),
    /// Scan, then execute cases under the scheduler
    Run(RunOpts),
}

#[derive(Args, Debug, Clone)]
pub struct LinkOpts {
    /// Device path of the SPI bridge
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub dev: String,
    /// Baud rate of the bridge port
    #[arg(long, default_value_t = 1_000_000)]
    pub baud: u32,
    /// CRC handling: "off", "ignore" (log mismatches, accept) or "enforce"
    #[arg(long, default_value = "ignore")]
    pub crc: String,
}

impl LinkOpts {
    pub fn crc_policy(&self) -> Result<CrcPolicy> {
        match self.crc.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(CrcPolicy::Off),
            "ignore" => Ok(CrcPolicy::Ignore),
            "enforce" => Ok(CrcPolicy::Enforce),
            other => Err(anyhow!("crc must be off, ignore or enforce (got {other:?})")),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PingOpts {
    #[command(flatten)]
    pub link: LinkOpts,
}

#[derive(Args, Debug, Clone)]
pub struct ScanOpts {
    #[command(flatten)]
    pub link: LinkOpts,
}

#[derive(Args, Debug, Clone)]
pub struct RunOpts {
    #[command(flatten)]
    pub link: LinkOpts,
    /// "sequential" or "random"
    #[arg(long, default_value = "sequential")]
    pub mode: String,
    /// Rounds to run; 0 = until stopped
    #[arg(long, default_value_t = 1)]
    pub rounds: u32,
    /// Run until stopped (same as --rounds 0)
    #[arg(long, default_value_t = false)]
    pub endless: bool,
    /// Pause between cases in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub settle_ms: u64,
    /// RNG seed for random mode (reproducible order)
    #[arg(long)]
    pub seed: Option<u64>,
    /// Per-case payload as a decimal number
    #[arg(long, default_value = "1")]
    pub payload: String,
    /// Case names to run (default: every scanned case)
    pub cases: Vec<String>,
}

/// User payload entry: a decimal number, sent as its minimal big-endian
/// byte string ("1" -> 01, "256" -> 01 00).
pub fn parse_decimal_payload(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        bail!("payload must be a decimal number, got {s:?}");
    }
    let value: u128 = s
        .parse()
        .map_err(|_| anyhow!("payload {s:?} does not fit in 128 bits"))?;
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    Ok(bytes[first..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_payload_minimal_big_endian() {
        assert_eq!(parse_decimal_payload("1").unwrap(), vec![0x01]);
        assert_eq!(parse_decimal_payload("0").unwrap(), vec![0x00]);
        assert_eq!(parse_decimal_payload("255").unwrap(), vec![0xFF]);
        assert_eq!(parse_decimal_payload("256").unwrap(), vec![0x01, 0x00]);
        assert_eq!(
            parse_decimal_payload("65536").unwrap(),
            vec![0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn decimal_payload_rejects_non_digits() {
        assert!(parse_decimal_payload("").is_err());
        assert!(parse_decimal_payload("0x10").is_err());
        assert!(parse_decimal_payload("-1").is_err());
        assert!(parse_decimal_payload("ten").is_err());
    }

    #[test]
    fn crc_policy_parsing() {
        let mut opts = LinkOpts {
            dev: String::new(),
            baud: 0,
            crc: "enforce".into(),
        };
        assert_eq!(opts.crc_policy().unwrap(), CrcPolicy::Enforce);
        opts.crc = "OFF".into();
        assert_eq!(opts.crc_policy().unwrap(), CrcPolicy::Off);
        opts.crc = "strict".into();
        assert!(opts.crc_policy().is_err());
    }
}
