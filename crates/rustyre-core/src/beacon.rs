//! Beacon signature wire format.
//!
//! A node advertises itself by broadcasting a fixed 22-byte signature over
//! UDP: a 3-byte protocol tag, a 1-byte version, the 16-byte node UUID, and
//! the node's inbound TCP port in big-endian.

use crate::constants::{BEACON_PROTOCOL, BEACON_SIZE, BEACON_VERSION};
use crate::error::BeaconError;
use crate::identity::Identity;

/// A parsed beacon signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFrame {
    pub protocol: [u8; 3],
    pub version: u8,
    pub uuid: Identity,
    pub port: u16,
}

impl BeaconFrame {
    /// Build a signature for this node's UUID and mailbox port, using the
    /// current protocol tag and version.
    pub fn new(uuid: Identity, port: u16) -> Self {
        Self {
            protocol: BEACON_PROTOCOL,
            version: BEACON_VERSION,
            uuid,
            port,
        }
    }

    /// Encode to the 22-byte wire form, big-endian throughout.
    pub fn encode(&self) -> [u8; BEACON_SIZE] {
        let mut raw = [0u8; BEACON_SIZE];
        raw[0..3].copy_from_slice(&self.protocol);
        raw[3] = self.version;
        raw[4..20].copy_from_slice(self.uuid.as_bytes());
        raw[20..22].copy_from_slice(&self.port.to_be_bytes());
        raw
    }

    /// Decode a received signature, rejecting anything that is not a valid
    /// beacon of the version we speak.
    pub fn decode(raw: &[u8]) -> Result<Self, BeaconError> {
        if raw.len() < BEACON_SIZE {
            return Err(BeaconError::TooShort {
                min: BEACON_SIZE,
                actual: raw.len(),
            });
        }
        if raw[0..3] != BEACON_PROTOCOL {
            return Err(BeaconError::BadProtocol);
        }
        let version = raw[3];
        if version != BEACON_VERSION {
            return Err(BeaconError::BadVersion(version));
        }
        let uuid = Identity::from_bytes(&raw[4..20])?;
        let port = u16::from_be_bytes([raw[20], raw[21]]);

        Ok(Self {
            protocol: BEACON_PROTOCOL,
            version,
            uuid,
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let uuid = Identity::from_bytes(&[0x11; 16]).unwrap();
        let raw = BeaconFrame::new(uuid, 0xC123).encode();

        assert_eq!(&raw[0..3], b"ZRE");
        assert_eq!(raw[3], 0x01);
        assert_eq!(&raw[4..20], &[0x11; 16]);
        assert_eq!(&raw[20..22], &[0xC1, 0x23]);
    }

    #[test]
    fn roundtrip() {
        let sig = BeaconFrame::new(Identity::generate(), 49200);
        let decoded = BeaconFrame::decode(&sig.encode()).unwrap();
        assert_eq!(decoded, sig);
    }

    #[test]
    fn rejects_short_payload() {
        assert!(matches!(
            BeaconFrame::decode(&[0u8; 10]),
            Err(BeaconError::TooShort { min: 22, actual: 10 })
        ));
    }

    #[test]
    fn rejects_wrong_protocol() {
        let mut raw = BeaconFrame::new(Identity::generate(), 49200).encode();
        raw[0] = b'X';
        assert!(matches!(
            BeaconFrame::decode(&raw),
            Err(BeaconError::BadProtocol)
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut raw = BeaconFrame::new(Identity::generate(), 49200).encode();
        raw[3] = 0x02;
        assert!(matches!(
            BeaconFrame::decode(&raw),
            Err(BeaconError::BadVersion(0x02))
        ));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        // A datagram may be read into an oversized buffer; only the first 22
        // bytes are the signature.
        let sig = BeaconFrame::new(Identity::generate(), 51000);
        let mut raw = sig.encode().to_vec();
        raw.extend_from_slice(&[0xFF; 8]);
        assert_eq!(BeaconFrame::decode(&raw).unwrap(), sig);
    }
}
