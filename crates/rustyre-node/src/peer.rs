//! Per-peer state: the outbound link, sequence counters, and liveness
//! deadlines.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rustyre_core::{Identity, ZreMsg};
use rustyre_net::PeerLink;

/// Liveness deadlines applied on every refresh.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Quiet time after which the peer gets a PING.
    pub evasive: Duration,
    /// Quiet time after which the peer is expired and removed.
    pub expired: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            evasive: Duration::from_secs(5),
            expired: Duration::from_secs(30),
        }
    }
}

/// One known remote peer.
///
/// The peer record is the only place that knows per-peer sequence state:
/// [`send`](Self::send) stamps outbound sequence numbers and
/// [`check_message`](Self::check_message) validates inbound ones.
pub struct Peer {
    identity: Identity,
    endpoint: String,
    link: PeerLink,
    /// False until a HELLO has been received from the peer. Peers that are
    /// not ready take no part in group membership and receive no SHOUTs.
    pub ready: bool,
    /// Change counter last reported by the peer.
    pub status: u8,
    /// Headers reported in the peer's HELLO.
    pub headers: HashMap<String, String>,
    sent_seq: u16,
    want_seq: u16,
    evasive_at: Instant,
    expired_at: Instant,
}

impl Peer {
    /// Create the record and open its outbound link, tagging outgoing
    /// messages with `local` so the far side knows who is talking.
    pub fn connect(local: &Identity, identity: Identity, endpoint: String, timing: &Timing) -> Self {
        let link = PeerLink::connect(local.to_wire().to_vec(), endpoint.clone());
        let now = Instant::now();

        Self {
            identity,
            endpoint,
            link,
            ready: false,
            status: 0,
            headers: HashMap::new(),
            sent_seq: 0,
            want_seq: 1,
            evasive_at: now + timing.evasive,
            expired_at: now + timing.expired,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// The `host:port` of the peer's mailbox.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stamp the next sequence number onto `msg` and queue it on the link.
    ///
    /// Returns `false` if the link is gone and the message was dropped; the
    /// sequence still advances, mirroring a send into a dead socket.
    pub fn send(&mut self, mut msg: ZreMsg) -> bool {
        self.sent_seq = self.sent_seq.wrapping_add(1);
        msg.seq = self.sent_seq;
        self.link.send(msg.to_frames())
    }

    /// Validate an inbound sequence number, advancing the expectation only on
    /// a match. A mismatch means loss or reordering; the caller drops the
    /// message but keeps the peer.
    pub fn check_message(&mut self, msg: &ZreMsg) -> bool {
        if msg.seq == self.want_seq {
            self.want_seq = self.want_seq.wrapping_add(1);
            true
        } else {
            false
        }
    }

    /// Push both liveness deadlines out from now. Called on every observed
    /// activity from the peer.
    pub fn refresh(&mut self, timing: &Timing) {
        let now = Instant::now();
        self.evasive_at = now + timing.evasive;
        self.expired_at = now + timing.expired;
    }

    pub fn is_evasive(&self, now: Instant) -> bool {
        now >= self.evasive_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expired_at
    }

    /// Close the outbound socket. Must happen before the record is dropped
    /// from the peer table so a later reconnect to the same endpoint cannot
    /// race the old socket.
    pub fn disconnect(&self) {
        self.link.close();
    }
}
