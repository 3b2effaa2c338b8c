//! # Consistent Hash Ring
//!
//! A ring of virtual points used by [`crate::gossip::ring::GossipRing`] for
//! membership and by consumers (the DLM) to compute a replica set for a key.
//!
//! Each inserted [`Node`](crate::identity::Node) gets `rfactor * pfactor`
//! virtual points placed at `hash(node.id || i)` for `i` in
//! `0..rfactor*pfactor`. A node is either present with all of its virtual
//! points or absent entirely — there is no partial membership state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::blake3_hash_multi;
use crate::identity::Node;

/// A 256-bit ring position, represented as the first 8 bytes of a BLAKE3
/// digest interpreted as a big-endian integer. That's plenty of entropy to
/// make collisions between distinct `(node, i)` pairs practically impossible
/// while keeping the ring ordered on a `u64` `BTreeMap` key.
fn ring_point(node_id: &str, i: usize) -> u64 {
    let digest = blake3_hash_multi(&[node_id.as_bytes(), i.to_string().as_bytes()]);
    u64::from_be_bytes(digest[0..8].try_into().unwrap())
}

fn key_point(key: &str) -> u64 {
    let digest = blake3_hash_multi(&[key.as_bytes()]);
    u64::from_be_bytes(digest[0..8].try_into().unwrap())
}

/// Consistent hash ring with weighted virtual nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CHash {
    rfactor: usize,
    pfactor: usize,
    /// Ring point -> node id. Kept ordered so lookups are a single
    /// `range` scan with wraparound.
    ring: BTreeMap<u64, String>,
    /// node id -> full Node, so `ring` doesn't need to duplicate host/port.
    nodes: BTreeMap<String, Node>,
}

impl CHash {
    pub fn new(rfactor: usize, pfactor: usize) -> Self {
        assert!(rfactor >= 1, "rfactor must be >= 1");
        assert!(pfactor >= 1, "pfactor must be >= 1");
        Self {
            rfactor,
            pfactor,
            ring: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn rfactor(&self) -> usize {
        self.rfactor
    }

    pub fn points_per_node(&self) -> usize {
        self.rfactor * self.pfactor
    }

    /// Number of distinct nodes on the ring (not virtual points).
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_defined(&self, node: &Node) -> bool {
        self.nodes.contains_key(&node.id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Inserts `node`'s full set of virtual points. No-op if already present.
    pub fn insert(&mut self, node: Node) {
        if self.nodes.contains_key(&node.id) {
            return;
        }
        for i in 0..self.points_per_node() {
            let point = ring_point(&node.id, i);
            self.ring.insert(point, node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    /// Removes every virtual point belonging to `node`. No-op if absent.
    pub fn remove(&mut self, node: &Node) {
        if self.nodes.remove(&node.id).is_none() {
            return;
        }
        self.ring.retain(|_, id| id != &node.id);
    }

    /// The node owning the first virtual point with ring-position >=
    /// `hash(key)`, wrapping around to the smallest point if `key` hashes
    /// past every existing point.
    pub fn find_primary(&self, key: &str) -> Option<&Node> {
        let point = key_point(key);
        let owner_id = self
            .ring
            .range(point..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, id)| id)?;
        self.nodes.get(owner_id)
    }

    /// `[primary, successor_1, successor_2, ...]` — the full replica set
    /// for `key`, one entry per distinct node, in ring order. Used by
    /// consumers (the DLM) to compute a quorum target.
    pub fn find(&self, key: &str) -> Vec<&Node> {
        let Some(primary) = self.find_primary(key) else {
            return Vec::new();
        };
        let mut out = vec![primary];
        out.extend(self.next(primary));
        out
    }

    /// The distinct nodes that follow `node` around the ring, in order,
    /// excluding `node` itself. Stops once every other node has been seen
    /// once (a node may own several consecutive virtual points).
    pub fn next(&self, node: &Node) -> Vec<&Node> {
        if self.nodes.len() <= 1 {
            return Vec::new();
        }
        // Anchor on node's first virtual point so we walk forward from a
        // position actually on the ring, not an arbitrary hash of its id.
        let Some(anchor) = ring_point_of(self, &node.id) else {
            return Vec::new();
        };

        let mut seen = std::collections::HashSet::new();
        seen.insert(node.id.clone());
        let mut out = Vec::new();

        let after = self.ring.range((anchor + 1)..).chain(self.ring.iter());
        for (_, id) in after {
            if seen.insert(id.clone()) {
                out.push(self.nodes.get(id).expect("ring/nodes invariant"));
            }
            if out.len() == self.nodes.len() - 1 {
                break;
            }
        }
        out
    }
}

fn ring_point_of(chash: &CHash, node_id: &str) -> Option<u64> {
    chash
        .ring
        .iter()
        .find(|(_, id)| *id == node_id)
        .map(|(point, _)| *point)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, port: u16) -> Node {
        Node::new(id, "127.0.0.1", port)
    }

    #[test]
    fn size_counts_distinct_nodes_not_virtual_points() {
        let mut ring = CHash::new(3, 2);
        ring.insert(node("a", 1));
        ring.insert(node("b", 2));
        ring.insert(node("a", 1)); // duplicate insert is a no-op
        assert_eq!(ring.size(), 2);
    }

    #[test]
    fn node_present_with_all_points_or_none() {
        let mut ring = CHash::new(3, 2);
        let a = node("a", 1);
        ring.insert(a.clone());
        assert!(ring.is_defined(&a));
        assert_eq!(ring.ring.len(), ring.points_per_node());

        ring.remove(&a);
        assert!(!ring.is_defined(&a));
        assert_eq!(ring.ring.len(), 0);
    }

    #[test]
    fn find_returns_something_for_nonempty_ring() {
        let mut ring = CHash::new(3, 2);
        ring.insert(node("a", 1));
        ring.insert(node("b", 2));
        ring.insert(node("c", 3));

        let replicas = ring.find("some-key");
        assert!(!replicas.is_empty());
        assert!(replicas.len() <= ring.size());
        // No duplicate nodes in a replica set.
        let mut ids: Vec<&str> = replicas.iter().map(|n| n.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), replicas.len());
    }

    #[test]
    fn find_is_deterministic_for_the_same_ring() {
        let mut ring = CHash::new(3, 2);
        ring.insert(node("a", 1));
        ring.insert(node("b", 2));
        ring.insert(node("c", 3));

        let first: Vec<&str> = ring.find("key").iter().map(|n| n.id.as_str()).collect();
        let second: Vec<&str> = ring.find("key").iter().map(|n| n.id.as_str()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn next_visits_every_other_node_exactly_once() {
        let mut ring = CHash::new(3, 2);
        ring.insert(node("a", 1));
        ring.insert(node("b", 2));
        ring.insert(node("c", 3));

        let a = node("a", 1);
        let successors = ring.next(&a);
        assert_eq!(successors.len(), 2);
        let mut ids: Vec<&str> = successors.iter().map(|n| n.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn next_on_single_node_ring_is_empty() {
        let mut ring = CHash::new(3, 2);
        let a = node("a", 1);
        ring.insert(a.clone());
        assert!(ring.next(&a).is_empty());
    }

    #[test]
    fn empty_ring_find_returns_empty() {
        let ring = CHash::new(3, 2);
        assert!(ring.find("anything").is_empty());
        assert_eq!(ring.size(), 0);
    }
}
