//! Error types for the transport layer.

/// Errors that can occur in the beacon, mailbox, and link transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("invalid frame flags: 0x{0:02x}")]
    InvalidFlags(u8),
    #[error("no free port in the dynamic range")]
    NoFreePort,
}
