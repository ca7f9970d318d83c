//! Core protocol types for the rustyre clustering protocol.
//!
//! This crate defines the node identity, the UDP beacon signature format, and
//! the codec for peer-to-peer messages. It performs no I/O; transports live in
//! `rustyre-net` and the node runtime in `rustyre-node`.

pub mod beacon;
pub mod constants;
pub mod error;
pub mod identity;
pub mod msg;

pub use beacon::BeaconFrame;
pub use error::{BeaconError, IdentityError, MsgError};
pub use identity::Identity;
pub use msg::{MsgBody, ZreMsg};
