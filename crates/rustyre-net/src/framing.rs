//! Streaming frame accumulator for the peer-to-peer TCP transport.
//!
//! A message on the stream is a sequence of length-prefixed frames. Each frame
//! is `flags(u8) | length(u32 BE) | bytes`; flag bit 0 (MORE) is set on every
//! frame except the last one of a message. The accumulator buffers stream data
//! and yields complete messages as they become available, tolerating frames
//! split across reads and multiple messages per read.

use crate::error::TransportError;

/// One decoded message: its frames in order.
pub type Frames = Vec<Vec<u8>>;

/// MORE flag: another frame of the same message follows.
pub const FLAG_MORE: u8 = 0x01;

/// Upper bound on a single frame's payload. Anything larger is treated as a
/// protocol violation and kills the connection.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Frame header size on the stream: flags(1) + length(4).
const FRAME_HEADER_LEN: usize = 5;

/// Encode a message as a byte stream of flagged, length-prefixed frames.
pub fn encode_message(frames: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = frames.iter().map(|f| FRAME_HEADER_LEN + f.len()).sum();
    let mut out = Vec::with_capacity(total);

    for (i, frame) in frames.iter().enumerate() {
        let more = i + 1 < frames.len();
        out.push(if more { FLAG_MORE } else { 0 });
        out.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        out.extend_from_slice(frame);
    }
    out
}

/// Stateful accumulator that buffers stream data and extracts complete
/// messages.
pub struct FrameAccumulator {
    buffer: Vec<u8>,
    partial: Frames,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            partial: Vec::new(),
        }
    }

    /// Feed new data from the stream and extract all complete messages.
    ///
    /// Oversized frames and unknown flag bits are protocol violations; the
    /// caller is expected to drop the connection on error.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frames>, TransportError> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        let mut pos = 0;

        loop {
            if self.buffer.len() - pos < FRAME_HEADER_LEN {
                break;
            }
            let flags = self.buffer[pos];
            if flags & !FLAG_MORE != 0 {
                return Err(TransportError::InvalidFlags(flags));
            }
            let len = u32::from_be_bytes(
                self.buffer[pos + 1..pos + 5]
                    .try_into()
                    .expect("slice is exactly 4 bytes"),
            ) as usize;
            if len > MAX_FRAME_LEN {
                return Err(TransportError::FrameTooLarge(len));
            }
            if self.buffer.len() - pos < FRAME_HEADER_LEN + len {
                break;
            }

            let start = pos + FRAME_HEADER_LEN;
            self.partial.push(self.buffer[start..start + len].to_vec());
            pos = start + len;

            if flags & FLAG_MORE == 0 {
                messages.push(std::mem::take(&mut self.partial));
            }
        }

        self.buffer.drain(..pos);
        Ok(messages)
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(frames: &[&[u8]]) -> Frames {
        frames.iter().map(|f| f.to_vec()).collect()
    }

    #[test]
    fn single_message_roundtrip() {
        let mut acc = FrameAccumulator::new();
        let m = msg(&[b"\x01", b"hello", b""]);

        let out = acc.feed(&encode_message(&m)).unwrap();
        assert_eq!(out, vec![m]);
    }

    #[test]
    fn single_frame_message() {
        let mut acc = FrameAccumulator::new();
        let m = msg(&[b"lonely"]);

        let out = acc.feed(&encode_message(&m)).unwrap();
        assert_eq!(out, vec![m]);
    }

    #[test]
    fn message_split_across_reads() {
        let mut acc = FrameAccumulator::new();
        let m = msg(&[b"abc", b"defgh"]);
        let wire = encode_message(&m);

        for split in 1..wire.len() {
            let mut acc2 = FrameAccumulator::new();
            assert!(acc2.feed(&wire[..split]).unwrap().is_empty());
            assert_eq!(acc2.feed(&wire[split..]).unwrap(), vec![m.clone()]);
        }

        // Byte-at-a-time feeding as well.
        let mut out = Vec::new();
        for b in &wire {
            out.extend(acc.feed(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(out, vec![m]);
    }

    #[test]
    fn multiple_messages_in_one_read() {
        let mut acc = FrameAccumulator::new();
        let m1 = msg(&[b"first"]);
        let m2 = msg(&[b"second", b"part"]);

        let mut wire = encode_message(&m1);
        wire.extend_from_slice(&encode_message(&m2));

        assert_eq!(acc.feed(&wire).unwrap(), vec![m1, m2]);
    }

    #[test]
    fn partial_message_retained_across_feeds() {
        let mut acc = FrameAccumulator::new();
        let m1 = msg(&[b"one", b"two"]);
        let m2 = msg(&[b"three"]);

        // First frame of m1 only.
        let wire1 = encode_message(&m1);
        let first_frame_len = FRAME_HEADER_LEN + 3;
        assert!(acc.feed(&wire1[..first_frame_len]).unwrap().is_empty());

        let mut rest = wire1[first_frame_len..].to_vec();
        rest.extend_from_slice(&encode_message(&m2));
        assert_eq!(acc.feed(&rest).unwrap(), vec![m1, m2]);
    }

    #[test]
    fn empty_frames_preserved() {
        let mut acc = FrameAccumulator::new();
        let m = msg(&[b"", b"", b"x"]);
        assert_eq!(acc.feed(&encode_message(&m)).unwrap(), vec![m]);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut acc = FrameAccumulator::new();
        let mut wire = vec![0u8];
        wire.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());

        assert!(matches!(
            acc.feed(&wire),
            Err(TransportError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn garbage_flags_rejected() {
        let mut acc = FrameAccumulator::new();
        let wire = [0xFFu8, 0, 0, 0, 1, b'x'];

        assert!(matches!(
            acc.feed(&wire),
            Err(TransportError::InvalidFlags(0xFF))
        ));
    }
}
