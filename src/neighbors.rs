//! Live-peer table with last-seen tracking and stale eviction.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::timestamp::Timestamp;
use crate::types::{Address, NodeId, PeerInfo};

/// Concurrent neighbor table keyed by `node_id`.
///
/// Read-mostly: the relay engine snapshots it on every flood while the
/// discovery loops insert, touch, and evict. Entries whose `last_seen`
/// is older than the configured timeout are pruned lazily whenever a
/// snapshot is taken, so a peer that stops beaconing disappears within
/// one flood or beacon cycle.
///
/// Clones share the same underlying table.
#[derive(Debug, Clone)]
pub struct NeighborTable {
    peers: Arc<DashMap<NodeId, PeerInfo>>,
    timeout_seconds: f64,
}

impl NeighborTable {
    pub fn new(timeout_seconds: f64) -> Self {
        NeighborTable {
            peers: Arc::new(DashMap::new()),
            timeout_seconds,
        }
    }

    pub fn insert(&self, node_id: impl Into<NodeId>, address: Address) {
        self.insert_at(node_id, address, Timestamp::now());
    }

    pub fn insert_at(&self, node_id: impl Into<NodeId>, address: Address, now: Timestamp) {
        self.peers
            .insert(node_id.into(), PeerInfo::new(address, now));
    }

    /// Refresh `last_seen` for a known peer; unknown ids are a no-op.
    pub fn touch(&self, node_id: &str) {
        self.touch_at(node_id, Timestamp::now());
    }

    pub fn touch_at(&self, node_id: &str, now: Timestamp) {
        if let Some(mut peer) = self.peers.get_mut(node_id) {
            peer.last_seen = now;
        }
    }

    pub fn remove(&self, node_id: &str) {
        self.peers.remove(node_id);
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.peers.contains_key(node_id)
    }

    pub fn last_seen(&self, node_id: &str) -> Option<Timestamp> {
        self.peers.get(node_id).map(|peer| peer.last_seen)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Current live peers, pruning stale entries first.
    pub fn snapshot(&self) -> HashMap<NodeId, Address> {
        self.snapshot_at(Timestamp::now())
    }

    pub fn snapshot_at(&self, now: Timestamp) -> HashMap<NodeId, Address> {
        self.prune_at(now);
        self.peers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().address.clone()))
            .collect()
    }

    fn prune_at(&self, now: Timestamp) {
        let timeout = self.timeout_seconds;
        self.peers.retain(|node_id, peer| {
            let live = now.elapsed_since(peer.last_seen) <= timeout;
            if !live {
                tracing::debug!(neighbor = %node_id, "evicting stale neighbor");
            }
            live
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeRole;
    use std::net::{IpAddr, Ipv4Addr};

    fn address(node_id: &str) -> Address {
        Address::new(
            node_id,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            9000,
            NodeRole::Gateway,
        )
    }

    #[test]
    fn snapshot_prunes_stale_entries() {
        let table = NeighborTable::new(15.0);
        table.insert_at("n1", address("n1"), Timestamp(100.0));
        table.insert_at("n2", address("n2"), Timestamp(100.0));

        // Within the timeout both survive.
        let live = table.snapshot_at(Timestamp(114.9));
        assert_eq!(live.len(), 2);

        // n2 beacons again, n1 goes silent past the timeout.
        table.touch_at("n2", Timestamp(116.0));
        let live = table.snapshot_at(Timestamp(116.0));
        assert!(!live.contains_key("n1"));
        assert!(live.contains_key("n2"));
        assert!(!table.contains("n1"));
    }

    #[test]
    fn touch_refreshes_last_seen() {
        let table = NeighborTable::new(15.0);
        table.insert_at("n1", address("n1"), Timestamp(100.0));
        table.touch_at("n1", Timestamp(110.0));
        assert_eq!(table.last_seen("n1"), Some(Timestamp(110.0)));
        // Touching an unknown peer does not create it.
        table.touch_at("ghost", Timestamp(110.0));
        assert!(!table.contains("ghost"));
    }

    #[test]
    fn remove_is_immediate() {
        let table = NeighborTable::new(15.0);
        table.insert_at("n1", address("n1"), Timestamp(100.0));
        table.remove("n1");
        assert!(table.is_empty());
        assert_eq!(table.last_seen("n1"), None);
    }
}
