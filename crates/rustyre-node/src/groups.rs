//! Group membership observed on the network.
//!
//! Membership is stored as sets of peer identity strings rather than peer
//! references; the runtime dereferences them through its peer table when
//! fanning out a SHOUT. This keeps the peer/group relationship acyclic.

use std::collections::{BTreeSet, HashMap};

/// Groups that known peers participate in, keyed by group name.
///
/// Distinct from the set of groups this node itself has joined, which the
/// runtime tracks separately; the two share no state.
#[derive(Debug, Default)]
pub struct PeerGroups {
    groups: HashMap<String, BTreeSet<String>>,
}

impl PeerGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to a group, creating the group on first sight. Idempotent.
    pub fn join(&mut self, group: &str, peer: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(peer.to_string());
    }

    /// Remove a peer from a group. Idempotent; the group entry itself
    /// persists so a later SHOUT to it is still addressable.
    pub fn leave(&mut self, group: &str, peer: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .remove(peer);
    }

    /// Whether this group has ever been observed.
    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Current members of a group.
    pub fn members(&self, group: &str) -> impl Iterator<Item = &String> {
        self.groups.get(group).into_iter().flatten()
    }

    /// Remove a peer from every group it is in. Used when the peer expires
    /// or is purged.
    pub fn drop_peer(&mut self, peer: &str) {
        for members in self.groups.values_mut() {
            members.remove(peer);
        }
    }

    /// All observed group names.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.groups.keys()
    }
}
