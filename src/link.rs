use anyhow::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::cli::LinkOpts;
use crate::transport::{Transport, TransportError};

/// The SPI bridge enumerates as a CDC serial device; one read or write on it
/// is one half-duplex transaction window.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn open(opts: &LinkOpts) -> Result<Self> {
        let port = serialport::new(&opts.dev, opts.baud)
            .timeout(Duration::from_millis(500))
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| anyhow::anyhow!("open {}: {}", opts.dev, e))?;
        Ok(Self { port })
    }
}

impl Transport for SerialLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes).map_err(map_io)?;
        self.port.flush().map_err(map_io)
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if max_len == 0 {
            return Err(TransportError::Parameter);
        }
        let mut buf = vec![0u8; max_len];
        let n = self.port.read(&mut buf).map_err(map_io)?;
        if n == 0 {
            return Err(TransportError::Timeout);
        }
        buf.truncate(n);
        Ok(buf)
    }
}

fn map_io(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::TimedOut => TransportError::Timeout,
        io::ErrorKind::WouldBlock => TransportError::Busy,
        io::ErrorKind::InvalidData => TransportError::Data,
        io::ErrorKind::InvalidInput => TransportError::Parameter,
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::UnexpectedEof => {
            TransportError::Disconnected
        }
        _ => TransportError::Io(e),
    }
}
