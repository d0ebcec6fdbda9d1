use thiserror::Error;

use crate::crc::crc16;

/// First two bytes of every frame.
pub const HEADER: u16 = 0x5AA5;

/// header(2) + msg_id(2) + command(2) + payload_len(4).
pub const HEADER_LEN: usize = 10;

/// Command codes shared by both directions of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    // host -> device
    Ping = 0x0001,
    GetCaseList = 0x0002,
    RunCase = 0x1001,
    Stop = 0x1002,
    GetCaseResult = 0x1004,
    GetLog = 0x1005,
    // device -> host
    Ack = 0x8001,
    Nack = 0x8002,
    CaseList = 0x8003,
    CaseRunning = 0x8004,
    CaseResult = 0x9001,
    LogSending = 0x9002,
    LogFinished = 0x9003,
}

impl Command {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        use Command::*;
        Some(match raw {
            0x0001 => Ping,
            0x0002 => GetCaseList,
            0x1001 => RunCase,
            0x1002 => Stop,
            0x1004 => GetCaseResult,
            0x1005 => GetLog,
            0x8001 => Ack,
            0x8002 => Nack,
            0x8003 => CaseList,
            0x8004 => CaseRunning,
            0x9001 => CaseResult,
            0x9002 => LogSending,
            0x9003 => LogFinished,
            _ => return None,
        })
    }
}

/// CRC handling for a session. `Ignore` computes and reports mismatches but
/// still accepts the frame, which is what the deployed devices expect today;
/// `Enforce` rejects. The toggle lives here and not in the frame because the
/// checksum is a session property, not a frame property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcPolicy {
    Off,
    Ignore,
    Enforce,
}

impl CrcPolicy {
    pub fn is_active(self) -> bool {
        !matches!(self, CrcPolicy::Off)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: got {got} bytes, need {need}")]
    TooShort { got: usize, need: usize },
    #[error("bad frame header 0x{0:04X}")]
    BadHeader(u16),
    #[error("crc mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    CrcMismatch { computed: u16, received: u16 },
}

/// One parsed frame. `command` is `None` for opcodes outside the table;
/// `raw_command` always carries what was on the wire. `crc_mismatch` is set
/// only under `CrcPolicy::Ignore` when the trailing checksum did not match.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub msg_id: u16,
    pub raw_command: u16,
    pub command: Option<Command>,
    pub payload: Vec<u8>,
    pub crc_mismatch: Option<(u16, u16)>,
}

/// Owns the outgoing message-id counter. One instance per session; the id
/// sequence is what lets a trace be lined up against device logs, so every
/// encoded frame must come through the same codec.
#[derive(Debug, Default)]
pub struct FrameCodec {
    next_msg_id: u16,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next `encode` call will stamp.
    pub fn next_msg_id(&self) -> u16 {
        self.next_msg_id
    }

    /// Serialize a frame. Does not append a CRC; the sender seals the frame
    /// when the session policy asks for it.
    pub fn encode(&mut self, command: Command, payload: &[u8]) -> Vec<u8> {
        let msg_id = self.next_msg_id;
        self.next_msg_id = self.next_msg_id.wrapping_add(1);

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&HEADER.to_be_bytes());
        frame.extend_from_slice(&msg_id.to_be_bytes());
        frame.extend_from_slice(&command.code().to_be_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }
}

/// Parse one received buffer. Receive windows are fixed-size, so trailing
/// bytes beyond the declared payload (and checksum) are ignored.
pub fn decode(bytes: &[u8], policy: CrcPolicy) -> Result<Decoded, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::TooShort {
            got: bytes.len(),
            need: HEADER_LEN,
        });
    }

    let header = u16::from_be_bytes([bytes[0], bytes[1]]);
    if header != HEADER {
        return Err(DecodeError::BadHeader(header));
    }

    let msg_id = u16::from_be_bytes([bytes[2], bytes[3]]);
    let raw_command = u16::from_be_bytes([bytes[4], bytes[5]]);
    let payload_len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;

    let mut expected = HEADER_LEN + payload_len;
    if policy.is_active() {
        expected += 2;
    }
    if bytes.len() < expected {
        return Err(DecodeError::TooShort {
            got: bytes.len(),
            need: expected,
        });
    }

    let payload = bytes[HEADER_LEN..HEADER_LEN + payload_len].to_vec();

    let mut crc_mismatch = None;
    if policy.is_active() {
        let computed = crc16(&bytes[..HEADER_LEN + payload_len]);
        let received = u16::from_be_bytes([bytes[expected - 2], bytes[expected - 1]]);
        if computed != received {
            match policy {
                CrcPolicy::Enforce => {
                    return Err(DecodeError::CrcMismatch { computed, received });
                }
                _ => crc_mismatch = Some((computed, received)),
            }
        }
    }

    Ok(Decoded {
        msg_id,
        raw_command,
        command: Command::from_u16(raw_command),
        payload,
        crc_mismatch,
    })
}

/// Case-list payload: ASCII names separated by `;`, empty segments dropped.
pub fn parse_case_list(payload: &[u8]) -> Vec<String> {
    decode_text(payload)
        .split(';')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Byte-per-character decode so free-form log payloads never fail, whatever
/// bytes the firmware emits.
pub fn decode_text(payload: &[u8]) -> String {
    payload.iter().map(|&b| char::from(b)).collect()
}
