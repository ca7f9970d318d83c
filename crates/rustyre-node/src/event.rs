//! Events delivered from the node runtime to its owner.

/// Something happened on the network.
///
/// For every peer, `Enter` is delivered exactly once before any other event
/// mentioning that peer, and `Exit` at most once after the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new peer was discovered. Headers become available via
    /// [`Node::peer_headers`](crate::Node::peer_headers) once the peer's
    /// HELLO has arrived.
    Enter { peer: String, endpoint: String },
    /// A peer expired or was replaced.
    Exit { peer: String },
    /// A peer sent content directly to this node.
    Whisper { peer: String, content: Vec<u8> },
    /// A peer sent content to a group this node observes.
    Shout {
        peer: String,
        group: String,
        content: Vec<u8>,
    },
    /// A peer joined a group.
    Join { peer: String, group: String },
    /// A peer left a group.
    Leave { peer: String, group: String },
}

impl Event {
    /// The identity of the peer this event concerns.
    pub fn peer(&self) -> &str {
        match self {
            Event::Enter { peer, .. }
            | Event::Exit { peer }
            | Event::Whisper { peer, .. }
            | Event::Shout { peer, .. }
            | Event::Join { peer, .. }
            | Event::Leave { peer, .. } => peer,
        }
    }
}
