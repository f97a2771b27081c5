//! Consistent hashing on a Chord ring
//!
//! The ring has `2^bits` positions. Servers sit on some of them and each owns
//! the key positions in `(predecessor, position]`. A key lands on
//! `crc32(key) mod 2^bits`. Finger `i` of a node points at the owner of
//! `node + 2^i`, so a lookup routed through finger tables reaches the owner
//! in O(log n) hops. Joining or leaving only moves the keys between a node
//! and its predecessor.

use crate::sharding::key_hash;
use crate::{config, CostError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tracing::debug;

/// Servers on a ring of `2^bits` positions, and the keys stored on it
#[derive(Debug, Clone)]
pub struct ChordRing {
    bits: u32,
    /// Predecessors holding a copy of each key
    replication: usize,
    nodes: BTreeSet<u64>,
    /// Stored keys by ring position
    keys: BTreeMap<u64, BTreeSet<u64>>,
}

/// One finger table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Finger {
    /// `node + 2^i` on the ring
    pub start: u64,
    /// Owner of `start`
    pub node: u64,
}

/// Nodes visited by a lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub owner: u64,
    /// Starting node first, owner last
    pub path: Vec<u64>,
}

impl Route {
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

impl ChordRing {
    pub fn new(bits: u32, replication: usize) -> Result<Self> {
        if bits == 0 || bits > config::MAX_RING_BITS {
            return Err(CostError::invalid_input(
                "bits",
                format!("must be between 1 and {}", config::MAX_RING_BITS),
            ));
        }
        Ok(Self {
            bits,
            replication,
            nodes: BTreeSet::new(),
            keys: BTreeMap::new(),
        })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of positions on the ring
    pub fn size(&self) -> u64 {
        1u64 << self.bits
    }

    pub fn replication(&self) -> usize {
        self.replication
    }

    pub fn nodes(&self) -> impl Iterator<Item = u64> + '_ {
        self.nodes.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of stored keys
    pub fn key_count(&self) -> u64 {
        self.keys.values().map(|k| k.len() as u64).sum()
    }

    /// Ring position of `key`
    pub fn position_of(&self, key: u64) -> u64 {
        key_hash(key) % self.size()
    }

    /// Node owning `position`: the first node at or after it, wrapping around
    pub fn owner(&self, position: u64) -> Option<u64> {
        self.nodes
            .range(position..)
            .next()
            .or_else(|| self.nodes.first())
            .copied()
    }

    pub fn owner_of(&self, key: u64) -> Option<u64> {
        self.owner(self.position_of(key))
    }

    /// Node after `node`; a lone node is its own successor
    pub fn successor(&self, node: u64) -> Option<u64> {
        self.nodes
            .range((Bound::Excluded(node), Bound::Unbounded))
            .next()
            .or_else(|| self.nodes.first())
            .copied()
    }

    /// Node before `node`; a lone node is its own predecessor
    pub fn predecessor(&self, node: u64) -> Option<u64> {
        self.nodes
            .range(..node)
            .next_back()
            .or_else(|| self.nodes.last())
            .copied()
    }

    /// Store `key`, returning the node that owns it
    pub fn insert(&mut self, key: u64) -> Option<u64> {
        let position = self.position_of(key);
        self.keys.entry(position).or_default().insert(key);
        self.owner(position)
    }

    /// Keys owned by `node`
    pub fn keys_on(&self, node: u64) -> Vec<u64> {
        if !self.nodes.contains(&node) {
            return Vec::new();
        }
        match self.predecessor(node) {
            Some(pred) => self.keys_between(pred, node),
            None => Vec::new(),
        }
    }

    /// Keys on positions `(after, upto]`; the whole ring when `after == upto`
    fn keys_between(&self, after: u64, upto: u64) -> Vec<u64> {
        let tail = self.keys.range((Bound::Excluded(after), Bound::Unbounded));
        let sets: Vec<&BTreeSet<u64>> = if after < upto {
            tail.take_while(|(position, _)| **position <= upto)
                .map(|(_, keys)| keys)
                .collect()
        } else {
            tail.chain(self.keys.range(..=upto))
                .map(|(_, keys)| keys)
                .collect()
        };
        sets.into_iter().flat_map(|keys| keys.iter().copied()).collect()
    }

    /// Add a server at `position`, returning the keys it takes over
    pub fn add_node(&mut self, position: u64) -> Result<Vec<u64>> {
        if position >= self.size() {
            return Err(CostError::invalid_input(
                "position",
                format!("{} is outside the ring [0, {})", position, self.size()),
            ));
        }
        if !self.nodes.insert(position) {
            return Err(CostError::invalid_input(
                "position",
                format!("{} is already occupied", position),
            ));
        }
        let moved = self.keys_on(position);
        debug!(position, moved = moved.len(), "node joined ring");
        Ok(moved)
    }

    /// Remove the server at `position`, returning the keys handed to its successor
    pub fn remove_node(&mut self, position: u64) -> Result<Vec<u64>> {
        if !self.nodes.contains(&position) {
            return Err(CostError::invalid_input(
                "position",
                format!("no node at {}", position),
            ));
        }
        let moved = self.keys_on(position);
        self.nodes.remove(&position);
        debug!(position, moved = moved.len(), "node left ring");
        Ok(moved)
    }

    /// Finger `i` of `node` is the owner of `node + 2^i`
    pub fn finger_table(&self, node: u64) -> Vec<Finger> {
        (0..self.bits)
            .filter_map(|i| {
                let start = (node + (1u64 << i)) % self.size();
                self.owner(start).map(|owner| Finger { start, node: owner })
            })
            .collect()
    }

    /// Route a lookup of `position` from `from` through finger tables
    pub fn route(&self, from: u64, position: u64) -> Result<Route> {
        if !self.nodes.contains(&from) {
            return Err(CostError::invalid_input("from", format!("no node at {}", from)));
        }
        if position >= self.size() {
            return Err(CostError::invalid_input(
                "position",
                format!("{} is outside the ring [0, {})", position, self.size()),
            ));
        }

        let mut path = vec![from];
        let mut current = from;
        for _ in 0..self.nodes.len() {
            let (Some(pred), Some(next)) = (self.predecessor(current), self.successor(current)) else {
                break;
            };
            if in_arc(position, pred, current, true) {
                break;
            }
            if in_arc(position, current, next, true) {
                path.push(next);
                break;
            }
            let closest = self.closest_preceding(current, position);
            if closest == current {
                path.push(next);
                break;
            }
            path.push(closest);
            current = closest;
        }

        let owner = path.last().copied().unwrap_or(from);
        Ok(Route { owner, path })
    }

    /// Route a lookup of a stored key from `from`
    pub fn lookup(&self, from: u64, key: u64) -> Result<Route> {
        self.route(from, self.position_of(key))
    }

    /// Finger of `node` closest before `position`, or `node` itself
    fn closest_preceding(&self, node: u64, position: u64) -> u64 {
        self.finger_table(node)
            .iter()
            .rev()
            .map(|f| f.node)
            .find(|&finger| in_arc(finger, node, position, false))
            .unwrap_or(node)
    }

    /// Nodes holding `key`: its owner, then up to `replication` predecessors
    pub fn replicas_of(&self, key: u64) -> Vec<u64> {
        let Some(owner) = self.owner_of(key) else {
            return Vec::new();
        };
        let mut holders = vec![owner];
        let mut current = owner;
        for _ in 0..self.replication {
            match self.predecessor(current) {
                Some(pred) if !holders.contains(&pred) => {
                    holders.push(pred);
                    current = pred;
                }
                _ => break,
            }
        }
        holders
    }

    /// Hop counts of looking up every stored key, starting from each node in turn
    pub fn hop_stats(&self) -> HopStats {
        let nodes: Vec<u64> = self.nodes().collect();
        if nodes.is_empty() {
            return HopStats::default();
        }

        let mut stats = HopStats::default();
        let mut total = 0u64;
        for (i, position) in self
            .keys
            .iter()
            .flat_map(|(position, keys)| std::iter::repeat(*position).take(keys.len()))
            .enumerate()
        {
            let from = nodes[i % nodes.len()];
            let Ok(route) = self.route(from, position) else {
                continue;
            };
            let hops = route.hops() as u64;
            total += hops;
            stats.max_hops = stats.max_hops.max(hops);
            stats.lookups += 1;
        }
        if stats.lookups > 0 {
            stats.mean_hops = total as f64 / stats.lookups as f64;
        }
        stats
    }

    /// Per-node ownership, replicas and lookup cost
    pub fn report(&self) -> RingReport {
        let owned: BTreeMap<u64, u64> = self
            .nodes()
            .map(|node| (node, self.keys_on(node).len() as u64))
            .collect();

        let nodes = self
            .nodes()
            .map(|node| {
                // this node holds copies of its successors' keys
                let mut replicas = 0;
                let mut current = node;
                for _ in 0..self.replication {
                    match self.successor(current) {
                        Some(next) if next != node => {
                            replicas += owned.get(&next).copied().unwrap_or(0);
                            current = next;
                        }
                        _ => break,
                    }
                }
                NodeLoad {
                    position: node,
                    predecessor: self.predecessor(node).unwrap_or(node),
                    keys: owned.get(&node).copied().unwrap_or(0),
                    replicas,
                }
            })
            .collect();

        RingReport {
            bits: self.bits,
            positions: self.size(),
            replication: self.replication,
            keys: self.key_count(),
            nodes,
            hops: self.hop_stats(),
        }
    }
}

/// Whether `value` lies on the arc from `start` to `end`, clockwise, `start`
/// excluded; the full ring when `start == end`
fn in_arc(value: u64, start: u64, end: u64, inclusive_end: bool) -> bool {
    if start == end {
        return true;
    }
    let after_start = |v: u64| v > start;
    let before_end = |v: u64| if inclusive_end { v <= end } else { v < end };
    if start < end {
        after_start(value) && before_end(value)
    } else {
        after_start(value) || before_end(value)
    }
}

/// Lookup cost over the stored keys
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct HopStats {
    pub lookups: u64,
    pub mean_hops: f64,
    pub max_hops: u64,
}

/// Keys owned and replicated by one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeLoad {
    pub position: u64,
    /// Owned positions are `(predecessor, position]`
    pub predecessor: u64,
    pub keys: u64,
    /// Copies held for the next `replication` nodes
    pub replicas: u64,
}

/// State of a ring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RingReport {
    pub bits: u32,
    pub positions: u64,
    pub replication: usize,
    pub keys: u64,
    pub nodes: Vec<NodeLoad>,
    pub hops: HopStats,
}

fn default_replication() -> usize {
    config::DEFAULT_REPLICATION
}

/// Lookup to route once the ring is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingLookup {
    pub from: u64,
    pub key: u64,
}

/// Ring to build, keys to store and membership changes to apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingParams {
    pub bits: u32,
    /// Initial node positions
    pub nodes: Vec<u64>,
    /// Keys `0..keys` are stored before any change
    #[serde(default)]
    pub keys: u64,
    #[serde(default = "default_replication")]
    pub replication: usize,
    /// Nodes joining, in order, after the keys are stored
    #[serde(default)]
    pub join: Vec<u64>,
    /// Nodes leaving, after the joins
    #[serde(default)]
    pub leave: Vec<u64>,
    #[serde(default)]
    pub lookup: Option<RingLookup>,
}

/// A node joining or leaving and the keys that moved with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipChange {
    pub node: u64,
    pub joined: bool,
    pub moved_keys: u64,
}

/// Outcome of [`simulate_ring`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RingSimulation {
    pub changes: Vec<MembershipChange>,
    pub ring: RingReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
}

/// Build a ring, store keys, apply joins then leaves and report the result
pub fn simulate_ring(params: &RingParams) -> Result<RingSimulation> {
    if params.nodes.len() + params.join.len() > config::MAX_RING_NODES {
        return Err(CostError::invalid_input(
            "nodes",
            format!("at most {} nodes", config::MAX_RING_NODES),
        ));
    }
    if params.keys > config::MAX_RING_KEYS {
        return Err(CostError::invalid_input(
            "keys",
            format!("at most {} keys", config::MAX_RING_KEYS),
        ));
    }

    let mut ring = ChordRing::new(params.bits, params.replication)?;
    for &node in &params.nodes {
        ring.add_node(node)?;
    }
    for key in 0..params.keys {
        ring.insert(key);
    }

    let mut changes = Vec::with_capacity(params.join.len() + params.leave.len());
    for &node in &params.join {
        let moved = ring.add_node(node)?;
        changes.push(MembershipChange {
            node,
            joined: true,
            moved_keys: moved.len() as u64,
        });
    }
    for &node in &params.leave {
        let moved = ring.remove_node(node)?;
        changes.push(MembershipChange {
            node,
            joined: false,
            moved_keys: moved.len() as u64,
        });
    }

    let route = params
        .lookup
        .map(|lookup| ring.lookup(lookup.from, lookup.key))
        .transpose()?;

    Ok(RingSimulation {
        changes,
        ring: ring.report(),
        route,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    /// 16 positions with servers at 0, 4, 7, 11 and 14
    fn small_ring() -> ChordRing {
        let mut ring = ChordRing::new(4, 3).unwrap();
        for position in [0, 4, 7, 11, 14] {
            ring.add_node(position).unwrap();
        }
        ring
    }

    #[test]
    fn test_ring_creation() {
        let ring = small_ring();
        assert_eq!(ring.size(), 16);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.predecessor(0), Some(14));
        assert_eq!(ring.successor(0), Some(4));
        assert_eq!(ring.successor(14), Some(0));
        assert_eq!(ring.owner(6), Some(7));
        assert_eq!(ring.owner(15), Some(0));
        assert_eq!(ring.owner(11), Some(11));
    }

    #[test]
    fn test_finger_table() {
        let ring = small_ring();
        let fingers = ring.finger_table(11);
        let starts: Vec<u64> = fingers.iter().map(|f| f.start).collect();
        let nodes: Vec<u64> = fingers.iter().map(|f| f.node).collect();
        assert_eq!(starts, [12, 13, 15, 3]);
        assert_eq!(nodes, [14, 14, 0, 4]);
    }

    #[test]
    fn test_routing() {
        let ring = small_ring();
        // 11 jumps to its finger 4, whose successor 7 owns position 6
        let route = ring.route(11, 6).unwrap();
        assert_eq!(route.owner, 7);
        assert_eq!(route.path, [11, 4, 7]);
        assert_eq!(route.hops(), 2);

        // the starting node owns the position
        let route = ring.route(7, 5).unwrap();
        assert_eq!(route.path, [7]);
        assert_eq!(route.hops(), 0);

        assert!(ring.route(3, 6).is_err());
        assert!(ring.route(11, 16).is_err());
    }

    #[test]
    fn test_lookup_reaches_owner() {
        let mut ring = small_ring();
        for key in 0..200 {
            ring.insert(key);
        }
        for key in 0..200 {
            let owner = ring.owner_of(key).unwrap();
            for from in [0, 4, 7, 11, 14] {
                assert_eq!(ring.lookup(from, key).unwrap().owner, owner);
            }
        }
    }

    #[test]
    fn test_node_join_takes_keys_from_successor() {
        let mut ring = small_ring();
        for key in 0..500 {
            ring.insert(key);
        }
        let before_4: BTreeSet<u64> = ring.keys_on(4).into_iter().collect();

        let moved = ring.add_node(2).unwrap();
        assert_eq!(ring.predecessor(2), Some(0));
        assert_eq!(ring.successor(2), Some(4));

        // everything on positions 1 and 2 moved from 4 to the new node
        for key in &moved {
            assert!(before_4.contains(key));
            assert!((1..=2).contains(&ring.position_of(*key)));
            assert_eq!(ring.owner_of(*key), Some(2));
        }
        assert_eq!(ring.keys_on(4).len() + moved.len(), before_4.len());

        let total: usize = ring.nodes().map(|n| ring.keys_on(n).len()).sum();
        assert_eq!(total, 500);
    }

    #[test]
    fn test_node_leave_hands_keys_to_successor() {
        let mut ring = small_ring();
        for key in 0..500 {
            ring.insert(key);
        }
        let on_7 = ring.keys_on(7);
        let on_11 = ring.keys_on(11).len();

        let moved = ring.remove_node(7).unwrap();
        assert_eq!(moved, on_7);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.keys_on(11).len(), on_11 + moved.len());
        for key in moved {
            assert_eq!(ring.owner_of(key), Some(11));
        }

        assert!(ring.remove_node(7).is_err());
    }

    #[test]
    fn test_first_node_owns_everything() {
        let mut ring = ChordRing::new(4, 1).unwrap();
        for key in 0..20 {
            assert_eq!(ring.insert(key), None);
        }
        let moved = ring.add_node(9).unwrap();
        assert_eq!(moved.len(), 20);
        assert_eq!(ring.predecessor(9), Some(9));
        assert_eq!(ring.route(9, 3).unwrap().path, [9]);
    }

    #[test]
    fn test_replication() {
        let ring = small_ring();
        let key = 42;
        let holders = ring.replicas_of(key);
        let owner = ring.owner_of(key).unwrap();

        assert_eq!(holders.len(), 4);
        assert_eq!(holders[0], owner);
        let mut expected = owner;
        for holder in &holders[1..] {
            expected = ring.predecessor(expected).unwrap();
            assert_eq!(*holder, expected);
        }

        // never more copies than nodes
        let mut wide = ChordRing::new(4, 10).unwrap();
        for position in [0, 4, 7, 11, 14] {
            wide.add_node(position).unwrap();
        }
        assert_eq!(wide.replicas_of(key).len(), 5);
    }

    #[test]
    fn test_lookup_hops_logarithmic() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut positions: Vec<u64> = (0..256).collect();
        positions.shuffle(&mut rng);

        let mut ring = ChordRing::new(8, 3).unwrap();
        for &position in &positions[..32] {
            ring.add_node(position).unwrap();
        }
        let nodes: Vec<u64> = ring.nodes().collect();

        let mut total = 0;
        for _ in 0..50 {
            let from = nodes[rng.gen_range(0..nodes.len())];
            let target = rng.gen_range(0..256);
            let route = ring.route(from, target).unwrap();
            assert_eq!(Some(route.owner), ring.owner(target));
            assert!(route.hops() <= 9, "{} hops to {}", route.hops(), target);
            total += route.hops();
        }
        assert!((total as f64 / 50.0) < 6.0);
    }

    #[test]
    fn test_invalid_rings() {
        assert!(ChordRing::new(0, 3).is_err());
        assert!(ChordRing::new(config::MAX_RING_BITS + 1, 3).is_err());

        let mut ring = small_ring();
        assert!(matches!(ring.add_node(4), Err(CostError::InvalidInput { .. })));
        assert!(matches!(ring.add_node(16), Err(CostError::InvalidInput { .. })));
    }

    #[test]
    fn test_report() {
        let mut ring = small_ring();
        for key in 0..1_000 {
            ring.insert(key);
        }
        let report = ring.report();
        assert_eq!(report.positions, 16);
        assert_eq!(report.keys, 1_000);
        assert_eq!(report.nodes.iter().map(|n| n.keys).sum::<u64>(), 1_000);
        // each key is copied onto `replication` other nodes
        assert_eq!(report.nodes.iter().map(|n| n.replicas).sum::<u64>(), 3_000);
        assert_eq!(report.nodes[0].predecessor, 14);
        assert_eq!(report.hops.lookups, 1_000);
        assert!(report.hops.max_hops <= 5);
    }

    #[test]
    fn test_simulate_ring() {
        let params = RingParams {
            bits: 4,
            nodes: vec![0, 4, 7, 11, 14],
            keys: 500,
            replication: 3,
            join: vec![2],
            leave: vec![7],
            lookup: Some(RingLookup { from: 11, key: 1 }),
        };
        let simulation = simulate_ring(&params).unwrap();
        assert_eq!(simulation.changes.len(), 2);
        assert!(simulation.changes[0].joined);
        assert!(!simulation.changes[1].joined);
        assert_eq!(simulation.ring.nodes.len(), 5);
        assert_eq!(simulation.ring.keys, 500);

        let route = simulation.route.unwrap();
        assert_eq!(route.path.first(), Some(&11));

        let too_many = RingParams {
            keys: config::MAX_RING_KEYS + 1,
            ..params
        };
        assert!(simulate_ring(&too_many).is_err());
    }
}
