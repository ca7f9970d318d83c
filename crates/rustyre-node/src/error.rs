//! Error types for the node runtime.

use rustyre_net::TransportError;

/// Errors that can occur constructing or driving a node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("node stopped")]
    Stopped,
}
