use thiserror::Error;

/// Errors a link adapter can report, mirroring the bridge's status table.
/// The protocol layer does not interpret these beyond "step failed".
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("parameter error")]
    Parameter,
    #[error("link disconnected")]
    Disconnected,
    #[error("link busy")]
    Busy,
    #[error("transaction timeout")]
    Timeout,
    #[error("data error on the link")]
    Data,
    #[error("negative response from the bridge")]
    BadResponse,
    #[error("link i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Half-duplex synchronous byte channel to the device. One call is one
/// transaction window; the device never pushes data outside a `receive`.
pub trait Transport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read up to `max_len` bytes from one transaction window. Frames are
    /// never split across calls.
    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;
}
