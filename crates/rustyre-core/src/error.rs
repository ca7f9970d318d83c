//! Error types for the rustyre-core crate.

/// Errors from parsing or constructing node identities.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid identity length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid hex identity: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Errors from decoding a beacon signature.
#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    #[error("beacon too short: need {min} bytes, got {actual}")]
    TooShort { min: usize, actual: usize },
    #[error("unknown beacon protocol tag")]
    BadProtocol,
    #[error("unsupported beacon version: {0}")]
    BadVersion(u8),
    #[error("beacon identity: {0}")]
    Identity(#[from] IdentityError),
}

/// Errors from decoding a peer-to-peer message.
#[derive(Debug, thiserror::Error)]
pub enum MsgError {
    #[error("too few frames: need {min}, got {actual}")]
    TooFewFrames { min: usize, actual: usize },
    #[error("bad protocol signature: 0x{0:02x}")]
    BadSignature(u8),
    #[error("unknown message kind: {0}")]
    UnknownKind(u8),
    #[error("frame {frame} truncated")]
    Truncated { frame: usize },
    #[error("frame {frame} has {extra} trailing bytes")]
    TrailingBytes { frame: usize, extra: usize },
    #[error("invalid UTF-8 in string field")]
    InvalidString(#[from] std::string::FromUtf8Error),
}
