//! Node identity: a 16-byte random UUID, rendered externally as uppercase hex.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::IdentityError;

/// Length of a raw node identity in bytes.
pub const IDENTITY_LEN: usize = 16;

/// Length of an identity as carried on the wire (routing marker + UUID).
pub const WIRE_IDENTITY_LEN: usize = IDENTITY_LEN + 1;

/// Marker byte prepended to the identity on the wire. Router-style sockets
/// reserve identities with a leading zero byte, so the marker keeps peer
/// identities out of that space.
pub const ROUTING_MARKER: u8 = 0x01;

/// A node's unique identity.
///
/// Chosen once at node construction by reading 16 random bytes; never reused.
/// The external identifier is the uppercase hex rendering ([`fmt::Display`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut bytes = [0u8; IDENTITY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Construct an identity from exactly 16 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let raw: [u8; IDENTITY_LEN] =
            bytes.try_into().map_err(|_| IdentityError::InvalidLength {
                expected: IDENTITY_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(raw))
    }

    /// The raw identity bytes.
    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// Encode for the wire: routing marker followed by the UUID.
    pub fn to_wire(&self) -> [u8; WIRE_IDENTITY_LEN] {
        let mut wire = [0u8; WIRE_IDENTITY_LEN];
        wire[0] = ROUTING_MARKER;
        wire[1..].copy_from_slice(&self.0);
        wire
    }

    /// Decode a wire identity, stripping the routing marker.
    ///
    /// The marker byte is not validated beyond its presence; the remaining 16
    /// bytes are the peer's UUID.
    pub fn from_wire(wire: &[u8]) -> Result<Self, IdentityError> {
        if wire.len() != WIRE_IDENTITY_LEN {
            return Err(IdentityError::InvalidLength {
                expected: WIRE_IDENTITY_LEN,
                actual: wire.len(),
            });
        }
        Self::from_bytes(&wire[1..])
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_bytes(&bytes)
    }
}
