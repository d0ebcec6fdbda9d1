use anyhow::{Context, Result, bail};
use std::time::Duration;

use crate::clock::Sleeper;
use crate::frame::{self, Command, CrcPolicy, Decoded, DecodeError, FrameCodec};
use crate::registry::CaseRegistry;
use crate::transport::{Transport, TransportError};

// Fixed receive windows per exchange, matching what the device can push in
// one transaction.
const PING_WINDOW: usize = 20;
const SCAN_WINDOW: usize = 1024;
pub(crate) const ACK_WINDOW: usize = 128;
pub(crate) const RESULT_WINDOW: usize = 1024;
pub(crate) const LOG_WINDOW: usize = 512;

/// Pause between a request and reading its reply; the device needs one
/// window to prepare the response.
const REPLY_SETTLE: Duration = Duration::from_secs(1);

/// One connected exchange with a device: transport, frame codec (owner of
/// the message-id counter), CRC policy, and the case registry built by the
/// latest scan. The device cannot multiplex transactions, so everything that
/// talks to it goes through one session.
pub struct Session<T: Transport> {
    transport: T,
    codec: FrameCodec,
    crc: CrcPolicy,
    registry: CaseRegistry,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, crc: CrcPolicy) -> Self {
        Self {
            transport,
            codec: FrameCodec::new(),
            crc,
            registry: CaseRegistry::new(),
        }
    }

    pub fn registry(&self) -> &CaseRegistry {
        &self.registry
    }

    /// Encode, seal with CRC when the session policy is active, send.
    pub(crate) fn send_frame(
        &mut self,
        command: Command,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut buf = self.codec.encode(command, payload);
        if self.crc.is_active() {
            let crc = crate::crc::crc16(&buf);
            buf.extend_from_slice(&crc.to_be_bytes());
        }
        self.transport.send(&buf)
    }

    pub(crate) fn receive(&mut self, window: usize) -> Result<Vec<u8>, TransportError> {
        self.transport.receive(window)
    }

    /// Decode under the session CRC policy. Under `Ignore` a checksum
    /// mismatch is logged here and the frame still accepted.
    pub(crate) fn decode(&self, bytes: &[u8]) -> Result<Decoded, DecodeError> {
        let decoded = frame::decode(bytes, self.crc)?;
        if let Some((computed, received)) = decoded.crc_mismatch {
            eprintln!(
                "[frame] crc mismatch: computed 0x{computed:04X}, received 0x{received:04X} (accepting)"
            );
        }
        Ok(decoded)
    }

    /// Connectivity check: Ping must come back as Ack.
    pub fn ping(&mut self, sleeper: &dyn Sleeper) -> Result<()> {
        self.send_frame(Command::Ping, &[]).context("sending ping")?;
        sleeper.sleep(REPLY_SETTLE);
        let raw = self.receive(PING_WINDOW).context("receiving ping reply")?;
        let decoded = self
            .decode(&raw)
            .map_err(|e| anyhow::anyhow!("ping reply: {e}"))?;
        match decoded.command {
            Some(Command::Ack) => Ok(()),
            Some(Command::Nack) => bail!("device refused the connection"),
            _ => bail!(
                "unexpected command 0x{:04X} in ping reply",
                decoded.raw_command
            ),
        }
    }

    /// Enumerate the cases resident on the device and rebuild the registry.
    /// Every id issued by a previous scan is invalid afterwards.
    pub fn scan_cases(&mut self, sleeper: &dyn Sleeper) -> Result<Vec<String>> {
        self.send_frame(Command::GetCaseList, &[])
            .context("requesting case list")?;
        sleeper.sleep(REPLY_SETTLE);
        let raw = self.receive(SCAN_WINDOW).context("receiving case list")?;
        let decoded = self
            .decode(&raw)
            .map_err(|e| anyhow::anyhow!("case list reply: {e}"))?;
        if decoded.command == Some(Command::Nack) {
            bail!("device refused the case list request");
        }
        let names = frame::parse_case_list(&decoded.payload);
        if names.is_empty() {
            bail!("device reported no cases");
        }
        self.registry.assign_ids(&names);
        Ok(names)
    }

    #[cfg(test)]
    pub(crate) fn registry_mut(&mut self) -> &mut CaseRegistry {
        &mut self.registry
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::NoSleep;
    use crate::frame::testing::{raw_frame, raw_frame_crc};
    use crate::frame::HEADER_LEN;
    use crate::transport::testing::MockTransport;

    fn session(crc: CrcPolicy) -> Session<MockTransport> {
        Session::new(MockTransport::new(), crc)
    }

    #[test]
    fn ping_accepts_ack() {
        let mut s = session(CrcPolicy::Off);
        s.transport_mut()
            .push_response(raw_frame(0, Command::Ack.code(), &[]));
        s.ping(&NoSleep::new()).unwrap();
    }

    #[test]
    fn ping_rejects_nack() {
        let mut s = session(CrcPolicy::Off);
        s.transport_mut()
            .push_response(raw_frame(0, Command::Nack.code(), &[]));
        assert!(s.ping(&NoSleep::new()).is_err());
    }

    #[test]
    fn ping_rejects_garbage() {
        let mut s = session(CrcPolicy::Off);
        s.transport_mut().push_response(vec![0x00, 0x01, 0x02]);
        assert!(s.ping(&NoSleep::new()).is_err());
    }

    #[test]
    fn send_frame_without_crc_is_bare() {
        let mut s = session(CrcPolicy::Off);
        s.send_frame(Command::Ping, &[]).unwrap();
        assert_eq!(s.transport_mut().sent[0].len(), HEADER_LEN);
    }

    #[test]
    fn send_frame_appends_crc_when_active() {
        for policy in [CrcPolicy::Ignore, CrcPolicy::Enforce] {
            let mut s = session(policy);
            s.send_frame(Command::Ping, &[]).unwrap();
            let sent = &s.transport_mut().sent[0];
            assert_eq!(sent.len(), HEADER_LEN + 2);
            let crc = crate::crc::crc16(&sent[..HEADER_LEN]);
            assert_eq!(&sent[HEADER_LEN..], &crc.to_be_bytes());
        }
    }

    #[test]
    fn scan_builds_registry() {
        let mut s = session(CrcPolicy::Off);
        s.transport_mut()
            .push_response(raw_frame(0, Command::CaseList.code(), b"alpha;beta;gamma;"));
        let names = s.scan_cases(&NoSleep::new()).unwrap();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert_eq!(s.registry().id_of("beta"), Some([0x00, 0x02]));
    }

    #[test]
    fn scan_replaces_previous_registry() {
        let mut s = session(CrcPolicy::Off);
        s.transport_mut()
            .push_response(raw_frame(0, Command::CaseList.code(), b"a;b;c"));
        s.scan_cases(&NoSleep::new()).unwrap();
        s.transport_mut()
            .push_response(raw_frame(1, Command::CaseList.code(), b"c"));
        s.scan_cases(&NoSleep::new()).unwrap();
        assert_eq!(s.registry().len(), 1);
        assert_eq!(s.registry().id_of("a"), None);
        assert_eq!(s.registry().id_of("c"), Some([0x00, 0x01]));
    }

    #[test]
    fn scan_rejects_nack_and_empty_list() {
        let mut s = session(CrcPolicy::Off);
        s.transport_mut()
            .push_response(raw_frame(0, Command::Nack.code(), &[]));
        assert!(s.scan_cases(&NoSleep::new()).is_err());

        s.transport_mut()
            .push_response(raw_frame(1, Command::CaseList.code(), b";;"));
        assert!(s.scan_cases(&NoSleep::new()).is_err());
    }

    #[test]
    fn crc_session_roundtrip() {
        let mut s = session(CrcPolicy::Enforce);
        s.transport_mut()
            .push_response(raw_frame_crc(0, Command::Ack.code(), &[]));
        s.ping(&NoSleep::new()).unwrap();
    }
}
