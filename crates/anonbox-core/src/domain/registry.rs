//! PeerRegistry: the table of peers discovered on the local network.
//!
//! Entries are created and refreshed from discovery add/update events and
//! removed on discovery remove events.  Each entry is keyed by its
//! *discovery name* (the advertised service instance name), which is unique
//! on the network.
//!
//! # Self-filtering
//!
//! A node hears its own advertisement like any other.  The registry knows the
//! local [`PeerId`] and silently drops any record whose advertised id equals
//! it, so the local node never appears as its own peer.  The comparison is an
//! exact string match on the transmitted id.
//!
//! # Iteration order
//!
//! The table is a `BTreeMap`, so [`PeerRegistry::snapshot`] and the partial
//! match in [`PeerRegistry::find`] walk entries in discovery-name order.  This
//! keeps `find` deterministic when a token matches several peers.
//!
//! The registry itself is not synchronised.  Callers that share it between
//! tasks wrap it in a mutex and only expose the operations defined here.

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::domain::identity::PeerId;

/// A peer learned from discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Service instance name from discovery; the unique registry key.
    pub discovery_name: String,
    /// Address the peer's listener is reachable on.
    pub address: IpAddr,
    /// TCP port of the peer's listener.
    pub port: u16,
    /// The peer's advertised identity (`id` property).
    pub peer_id: PeerId,
    /// The peer's advertised display name (`user` property).
    pub username: String,
}

/// In-memory table of known peers, keyed by discovery name.
#[derive(Debug)]
pub struct PeerRegistry {
    local_id: PeerId,
    peers: BTreeMap<String, PeerRecord>,
}

impl PeerRegistry {
    /// Creates an empty registry that filters out records carrying `local_id`.
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            peers: BTreeMap::new(),
        }
    }

    /// Inserts `record`, replacing any entry with the same discovery name.
    ///
    /// Returns `false` (and stores nothing) when the record advertises the
    /// local node's own id.
    pub fn upsert(&mut self, record: PeerRecord) -> bool {
        if record.peer_id == self.local_id {
            return false;
        }
        self.peers.insert(record.discovery_name.clone(), record);
        true
    }

    /// Removes the entry for `discovery_name`, returning it if present.
    pub fn remove(&mut self, discovery_name: &str) -> Option<PeerRecord> {
        self.peers.remove(discovery_name)
    }

    /// Returns the entry for an exact discovery name.
    pub fn get(&self, discovery_name: &str) -> Option<&PeerRecord> {
        self.peers.get(discovery_name)
    }

    /// Resolves a user-supplied token to a peer.
    ///
    /// An exact discovery-name match wins.  Otherwise the first record (in
    /// discovery-name order) whose discovery name or username contains
    /// `token` as a substring is returned.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use anonbox_core::{PeerId, PeerRecord, PeerRegistry};
    ///
    /// let mut registry = PeerRegistry::new(PeerId::from_string("me"));
    /// registry.upsert(PeerRecord {
    ///     discovery_name: "AnonPeer-1234.x".to_string(),
    ///     address: "192.168.1.20".parse().unwrap(),
    ///     port: 40000,
    ///     peer_id: PeerId::from_string("bob-id"),
    ///     username: "Bob".to_string(),
    /// });
    ///
    /// assert_eq!(registry.find("Bob").unwrap().username, "Bob");
    /// assert_eq!(registry.find("1234").unwrap().username, "Bob");
    /// assert!(registry.find("zzz").is_none());
    /// ```
    pub fn find(&self, token: &str) -> Option<&PeerRecord> {
        if let Some(exact) = self.peers.get(token) {
            return Some(exact);
        }
        self.peers
            .values()
            .find(|peer| peer.discovery_name.contains(token) || peer.username.contains(token))
    }

    /// Returns a copy of every entry in discovery-name order.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
