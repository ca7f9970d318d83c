//! Tokio transports for the rustyre clustering protocol.
//!
//! Three building blocks, each owned by the node runtime:
//!
//! - [`BeaconDriver`]: periodic UDP broadcast of this node's signature and a
//!   filtered stream of signatures received from peers.
//! - [`Mailbox`]: the inbound socket: a TCP listener on a dynamic-range port
//!   whose connections deliver identity-prefixed framed messages.
//! - [`PeerLink`]: one outbound framed TCP connection per peer, tagging every
//!   message with the local node's wire identity.

pub mod beacon;
pub mod error;
pub mod framing;
pub mod link;
pub mod mailbox;
pub mod shutdown;

pub use beacon::{BeaconConfig, BeaconDriver, BeaconSignal};
pub use error::TransportError;
pub use framing::{FrameAccumulator, Frames, encode_message};
pub use link::PeerLink;
pub use mailbox::{Mailbox, MailboxEvent};
pub use shutdown::ShutdownToken;
