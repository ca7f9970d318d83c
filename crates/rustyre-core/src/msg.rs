//! Peer-to-peer message codec.
//!
//! Every message is a sequence of frames: a single-byte protocol signature, a
//! single-byte kind discriminator, a 16-bit big-endian sequence number, then
//! kind-specific frames. Strings inside composite frames are length-prefixed
//! and lists are count-prefixed, all big-endian.
//!
//! The codec never assigns sequence numbers; the peer record stamps `seq` at
//! send time. Messages are `Clone` so the same logical JOIN or LEAVE can be
//! fanned out to many peers, each clone getting its own sequence.

use std::collections::HashMap;

use crate::constants::MSG_SIGNATURE;
use crate::error::MsgError;

/// Message kind discriminators. Peers must agree on this numbering.
pub const KIND_HELLO: u8 = 1;
pub const KIND_WHISPER: u8 = 2;
pub const KIND_SHOUT: u8 = 3;
pub const KIND_JOIN: u8 = 4;
pub const KIND_LEAVE: u8 = 5;
pub const KIND_PING: u8 = 6;
pub const KIND_PING_OK: u8 = 7;

/// The kind-specific payload of a peer-to-peer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgBody {
    /// Handshake: sent as the first message on every outbound connection.
    Hello {
        ipaddress: String,
        mailbox: u16,
        status: u8,
        groups: Vec<String>,
        headers: HashMap<String, String>,
    },
    /// Unicast content to one peer.
    Whisper { content: Vec<u8> },
    /// Multicast content to every member of a group.
    Shout { group: String, content: Vec<u8> },
    /// The sender joined a group.
    Join { group: String, status: u8 },
    /// The sender left a group.
    Leave { group: String, status: u8 },
    /// Liveness probe.
    Ping,
    /// Liveness probe reply.
    PingOk,
}

impl MsgBody {
    /// The wire discriminator for this kind.
    pub fn kind(&self) -> u8 {
        match self {
            MsgBody::Hello { .. } => KIND_HELLO,
            MsgBody::Whisper { .. } => KIND_WHISPER,
            MsgBody::Shout { .. } => KIND_SHOUT,
            MsgBody::Join { .. } => KIND_JOIN,
            MsgBody::Leave { .. } => KIND_LEAVE,
            MsgBody::Ping => KIND_PING,
            MsgBody::PingOk => KIND_PING_OK,
        }
    }

    /// Human-readable kind name, for log messages.
    pub fn name(&self) -> &'static str {
        match self {
            MsgBody::Hello { .. } => "HELLO",
            MsgBody::Whisper { .. } => "WHISPER",
            MsgBody::Shout { .. } => "SHOUT",
            MsgBody::Join { .. } => "JOIN",
            MsgBody::Leave { .. } => "LEAVE",
            MsgBody::Ping => "PING",
            MsgBody::PingOk => "PING-OK",
        }
    }
}

/// A peer-to-peer message: sequence number plus kind-specific body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZreMsg {
    pub seq: u16,
    pub body: MsgBody,
}

impl ZreMsg {
    /// Wrap a body with sequence 0; the real sequence is stamped at send time.
    pub fn new(body: MsgBody) -> Self {
        Self { seq: 0, body }
    }

    /// Encode to wire frames.
    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        let mut frames = vec![
            vec![MSG_SIGNATURE],
            vec![self.body.kind()],
            self.seq.to_be_bytes().to_vec(),
        ];

        match &self.body {
            MsgBody::Hello {
                ipaddress,
                mailbox,
                status,
                groups,
                headers,
            } => {
                frames.push(ipaddress.as_bytes().to_vec());
                frames.push(mailbox.to_be_bytes().to_vec());
                frames.push(vec![*status]);
                frames.push(encode_strings(groups));
                frames.push(encode_headers(headers));
            }
            MsgBody::Whisper { content } => {
                frames.push(content.clone());
            }
            MsgBody::Shout { group, content } => {
                frames.push(group.as_bytes().to_vec());
                frames.push(content.clone());
            }
            MsgBody::Join { group, status } | MsgBody::Leave { group, status } => {
                frames.push(group.as_bytes().to_vec());
                frames.push(vec![*status]);
            }
            MsgBody::Ping | MsgBody::PingOk => {}
        }

        frames
    }

    /// Decode from wire frames.
    ///
    /// Extra trailing frames are ignored; missing frames, a wrong signature,
    /// or an unknown kind are errors.
    pub fn from_frames(frames: &[Vec<u8>]) -> Result<Self, MsgError> {
        if frames.len() < 3 {
            return Err(MsgError::TooFewFrames {
                min: 3,
                actual: frames.len(),
            });
        }

        let signature = single_byte(frames, 0)?;
        if signature != MSG_SIGNATURE {
            return Err(MsgError::BadSignature(signature));
        }
        let kind = single_byte(frames, 1)?;

        if frames[2].len() != 2 {
            return Err(MsgError::Truncated { frame: 2 });
        }
        let seq = u16::from_be_bytes([frames[2][0], frames[2][1]]);

        let body = match kind {
            KIND_HELLO => {
                require(frames, 8)?;
                MsgBody::Hello {
                    ipaddress: string_frame(frames, 3)?,
                    mailbox: u16_frame(frames, 4)?,
                    status: single_byte(frames, 5)?,
                    groups: decode_strings(&frames[6], 6)?,
                    headers: decode_headers(&frames[7], 7)?,
                }
            }
            KIND_WHISPER => {
                require(frames, 4)?;
                MsgBody::Whisper {
                    content: frames[3].clone(),
                }
            }
            KIND_SHOUT => {
                require(frames, 5)?;
                MsgBody::Shout {
                    group: string_frame(frames, 3)?,
                    content: frames[4].clone(),
                }
            }
            KIND_JOIN => {
                require(frames, 5)?;
                MsgBody::Join {
                    group: string_frame(frames, 3)?,
                    status: single_byte(frames, 4)?,
                }
            }
            KIND_LEAVE => {
                require(frames, 5)?;
                MsgBody::Leave {
                    group: string_frame(frames, 3)?,
                    status: single_byte(frames, 4)?,
                }
            }
            KIND_PING => MsgBody::Ping,
            KIND_PING_OK => MsgBody::PingOk,
            other => return Err(MsgError::UnknownKind(other)),
        };

        Ok(ZreMsg { seq, body })
    }
}

// ---------------------------------------------------------------------------
// Frame helpers
// ---------------------------------------------------------------------------

fn require(frames: &[Vec<u8>], min: usize) -> Result<(), MsgError> {
    if frames.len() < min {
        return Err(MsgError::TooFewFrames {
            min,
            actual: frames.len(),
        });
    }
    Ok(())
}

fn single_byte(frames: &[Vec<u8>], idx: usize) -> Result<u8, MsgError> {
    match frames[idx].as_slice() {
        [b] => Ok(*b),
        _ => Err(MsgError::Truncated { frame: idx }),
    }
}

fn u16_frame(frames: &[Vec<u8>], idx: usize) -> Result<u16, MsgError> {
    match frames[idx].as_slice() {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(MsgError::Truncated { frame: idx }),
    }
}

fn string_frame(frames: &[Vec<u8>], idx: usize) -> Result<String, MsgError> {
    Ok(String::from_utf8(frames[idx].clone())?)
}

/// Encode a list of strings: u32 count, then each string u32-length-prefixed.
fn encode_strings(strings: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(strings.len() as u32).to_be_bytes());
    for s in strings {
        put_string(&mut buf, s);
    }
    buf
}

/// Encode a header map: u32 pair count, then key/value strings, each
/// u32-length-prefixed. Pairs are sorted by key so encoding is deterministic.
fn encode_headers(headers: &HashMap<String, String>) -> Vec<u8> {
    let mut pairs: Vec<(&String, &String)> = headers.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut buf = Vec::new();
    buf.extend_from_slice(&(pairs.len() as u32).to_be_bytes());
    for (key, value) in pairs {
        put_string(&mut buf, key);
        put_string(&mut buf, value);
    }
    buf
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn decode_strings(frame: &[u8], idx: usize) -> Result<Vec<String>, MsgError> {
    let mut cursor = Cursor::new(frame, idx);
    let count = cursor.u32()?;
    let mut strings = Vec::with_capacity(count.min(256) as usize);
    for _ in 0..count {
        strings.push(cursor.string()?);
    }
    cursor.finish()?;
    Ok(strings)
}

fn decode_headers(frame: &[u8], idx: usize) -> Result<HashMap<String, String>, MsgError> {
    let mut cursor = Cursor::new(frame, idx);
    let count = cursor.u32()?;
    let mut headers = HashMap::with_capacity(count.min(256) as usize);
    for _ in 0..count {
        let key = cursor.string()?;
        let value = cursor.string()?;
        headers.insert(key, value);
    }
    cursor.finish()?;
    Ok(headers)
}

/// Byte cursor over a single composite frame.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    frame: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], frame: usize) -> Self {
        Self { buf, pos: 0, frame }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MsgError> {
        if self.buf.len() - self.pos < n {
            return Err(MsgError::Truncated { frame: self.frame });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, MsgError> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn string(&mut self) -> Result<String, MsgError> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        Ok(String::from_utf8(raw.to_vec())?)
    }

    fn finish(self) -> Result<(), MsgError> {
        if self.pos != self.buf.len() {
            return Err(MsgError::TrailingBytes {
                frame: self.frame,
                extra: self.buf.len() - self.pos,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &ZreMsg) -> ZreMsg {
        ZreMsg::from_frames(&msg.to_frames()).expect("decode failed")
    }

    #[test]
    fn hello_roundtrip() {
        let mut headers = HashMap::new();
        headers.insert("X-NAME".to_string(), "alice".to_string());
        headers.insert("X-ROLE".to_string(), "operator".to_string());

        let msg = ZreMsg {
            seq: 1,
            body: MsgBody::Hello {
                ipaddress: "192.168.1.10".to_string(),
                mailbox: 0xC001,
                status: 3,
                groups: vec!["chat".to_string(), "ops".to_string()],
                headers,
            },
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn hello_empty_groups_and_headers() {
        let msg = ZreMsg {
            seq: 1,
            body: MsgBody::Hello {
                ipaddress: "10.0.0.1".to_string(),
                mailbox: 50000,
                status: 0,
                groups: vec![],
                headers: HashMap::new(),
            },
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn whisper_roundtrip() {
        let msg = ZreMsg {
            seq: 42,
            body: MsgBody::Whisper {
                content: b"hello there".to_vec(),
            },
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn shout_roundtrip() {
        let msg = ZreMsg {
            seq: 7,
            body: MsgBody::Shout {
                group: "chat".to_string(),
                content: vec![0x00, 0xFF, 0x7E],
            },
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn join_leave_ping_roundtrip() {
        for body in [
            MsgBody::Join {
                group: "chat".to_string(),
                status: 1,
            },
            MsgBody::Leave {
                group: "chat".to_string(),
                status: 2,
            },
            MsgBody::Ping,
            MsgBody::PingOk,
        ] {
            let msg = ZreMsg { seq: 9, body };
            assert_eq!(roundtrip(&msg), msg);
        }
    }

    #[test]
    fn seq_survives_roundtrip_at_boundaries() {
        for seq in [0u16, 1, 0x7FFF, 0xFFFF] {
            let msg = ZreMsg {
                seq,
                body: MsgBody::Ping,
            };
            assert_eq!(roundtrip(&msg).seq, seq);
        }
    }

    #[test]
    fn rejects_bad_signature() {
        let mut frames = ZreMsg::new(MsgBody::Ping).to_frames();
        frames[0] = vec![0x55];
        assert!(matches!(
            ZreMsg::from_frames(&frames),
            Err(MsgError::BadSignature(0x55))
        ));
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut frames = ZreMsg::new(MsgBody::Ping).to_frames();
        frames[1] = vec![99];
        assert!(matches!(
            ZreMsg::from_frames(&frames),
            Err(MsgError::UnknownKind(99))
        ));
    }

    #[test]
    fn rejects_too_few_frames() {
        let frames = vec![vec![MSG_SIGNATURE], vec![KIND_PING]];
        assert!(matches!(
            ZreMsg::from_frames(&frames),
            Err(MsgError::TooFewFrames { min: 3, actual: 2 })
        ));

        // WHISPER without its content frame.
        let frames = vec![vec![MSG_SIGNATURE], vec![KIND_WHISPER], vec![0, 1]];
        assert!(matches!(
            ZreMsg::from_frames(&frames),
            Err(MsgError::TooFewFrames { min: 4, actual: 3 })
        ));
    }

    #[test]
    fn rejects_truncated_sequence() {
        let frames = vec![vec![MSG_SIGNATURE], vec![KIND_PING], vec![0x01]];
        assert!(matches!(
            ZreMsg::from_frames(&frames),
            Err(MsgError::Truncated { frame: 2 })
        ));
    }

    #[test]
    fn rejects_trailing_bytes_in_groups() {
        let mut frames = ZreMsg {
            seq: 1,
            body: MsgBody::Hello {
                ipaddress: "10.0.0.1".to_string(),
                mailbox: 50000,
                status: 0,
                groups: vec![],
                headers: HashMap::new(),
            },
        }
        .to_frames();
        frames[6].push(0xAB);
        assert!(matches!(
            ZreMsg::from_frames(&frames),
            Err(MsgError::TrailingBytes { frame: 6, extra: 1 })
        ));
    }

    #[test]
    fn rejects_invalid_utf8_group() {
        let mut frames = ZreMsg {
            seq: 1,
            body: MsgBody::Join {
                group: "chat".to_string(),
                status: 1,
            },
        }
        .to_frames();
        frames[3] = vec![0xFF, 0xFE];
        assert!(matches!(
            ZreMsg::from_frames(&frames),
            Err(MsgError::InvalidString(_))
        ));
    }

    #[test]
    fn clones_encode_identically() {
        let msg = ZreMsg {
            seq: 5,
            body: MsgBody::Join {
                group: "ops".to_string(),
                status: 9,
            },
        };
        let mut cloned = msg.clone();
        assert_eq!(cloned.to_frames(), msg.to_frames());

        // Restamping the clone's sequence must not touch the original.
        cloned.seq = 6;
        assert_eq!(msg.seq, 5);
    }

    #[test]
    fn extra_frames_are_ignored() {
        let mut frames = ZreMsg::new(MsgBody::Ping).to_frames();
        frames.push(b"future extension".to_vec());
        assert!(ZreMsg::from_frames(&frames).is_ok());
    }
}
