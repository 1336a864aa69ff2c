// Per-instance adjacency graph.
//
// Undirected edges between building instances, stored as bidirectional
// neighbor lists keyed by `InstanceId`. Lists are `SmallVec`s with inline
// storage sized for typical wall junctions; a hard per-instance capacity
// (from `AdjacencyParams`) bounds growth. Registering past capacity is a
// logged no-op: connectivity degrades (the proximity fallback in
// `connectivity.rs` often still bridges the gap) but nothing fails.
//
// Every mutation bumps `revision`. Room candidates record the revision they
// were evaluated against, and the registry refuses to commit a candidate
// whose snapshot has moved on (see `registry.rs`).
//
// See also: `connectivity.rs` for the Union-Find / BFS passes that read this
// graph, `sim.rs` for the event handlers that mutate it.
//
// **Critical constraint: determinism.** Neighbor lists keep insertion
// order, and BFS tie-breaking in cycle search follows that order.

use crate::types::InstanceId;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Inline neighbor storage; spills to the heap past this count.
pub type NeighborList = SmallVec<[InstanceId; 8]>;

/// Outcome of `register_connection`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Added,
    AlreadyConnected,
    /// `a == b`; self edges are never stored.
    SelfLoop,
    /// The named endpoint's neighbor list is full. Nothing was changed.
    CapacityExceeded { instance: InstanceId },
}

impl ConnectionOutcome {
    /// True when the edge exists after the call.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionOutcome::Added | ConnectionOutcome::AlreadyConnected
        )
    }
}

impl fmt::Display for ConnectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionOutcome::Added => write!(f, "connection added"),
            ConnectionOutcome::AlreadyConnected => write!(f, "already connected"),
            ConnectionOutcome::SelfLoop => write!(f, "self connection rejected"),
            ConnectionOutcome::CapacityExceeded { instance } => {
                write!(f, "{instance} has no free connection slots")
            }
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdjacencyGraph {
    neighbors: BTreeMap<InstanceId, NeighborList>,
    capacity: usize,
    revision: u64,
}

impl AdjacencyGraph {
    pub fn new(capacity: usize) -> Self {
        Self {
            neighbors: BTreeMap::new(),
            capacity,
            revision: 0,
        }
    }

    /// Mutation counter. Equal revisions mean identical edge sets.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Add the undirected edge `a`–`b`. Idempotent; bounded by capacity on
    /// both endpoints.
    pub fn register_connection(&mut self, a: InstanceId, b: InstanceId) -> ConnectionOutcome {
        if a == b {
            debug!(instance = %a, "ignoring self connection");
            return ConnectionOutcome::SelfLoop;
        }
        if self.is_connected(a, b) {
            debug!(%a, %b, "connection already registered");
            return ConnectionOutcome::AlreadyConnected;
        }
        for endpoint in [a, b] {
            if self.degree(endpoint) >= self.capacity {
                warn!(
                    instance = %endpoint,
                    capacity = self.capacity,
                    "adjacency list full, skipping connection"
                );
                return ConnectionOutcome::CapacityExceeded { instance: endpoint };
            }
        }
        self.neighbors.entry(a).or_default().push(b);
        self.neighbors.entry(b).or_default().push(a);
        self.revision += 1;
        ConnectionOutcome::Added
    }

    /// Remove the single edge `a`–`b`. Returns whether it existed.
    pub fn disconnect(&mut self, a: InstanceId, b: InstanceId) -> bool {
        let removed_ab = self.remove_directed(a, b);
        let removed_ba = self.remove_directed(b, a);
        if removed_ab || removed_ba {
            self.revision += 1;
        }
        removed_ab || removed_ba
    }

    /// Remove `a` and every edge touching it. `former_neighbors` are
    /// scrubbed too, healing one-sided entries left by an earlier capacity
    /// or replication mismatch. Returns the union of neighbors that lost an
    /// edge, in ascending id order.
    pub fn unregister(
        &mut self,
        a: InstanceId,
        former_neighbors: &[InstanceId],
    ) -> Vec<InstanceId> {
        let own = self.neighbors.remove(&a);
        let mut changed = own.is_some();
        let mut touched: Vec<InstanceId> = own.map(|list| list.into_vec()).unwrap_or_default();
        touched.extend(former_neighbors.iter().copied().filter(|&n| n != a));
        touched.sort();
        touched.dedup();

        touched.retain(|&n| self.remove_directed(n, a));
        changed |= !touched.is_empty();
        if changed {
            self.revision += 1;
        }
        touched
    }

    /// Direct-neighbor test. Symmetric by construction.
    pub fn is_connected(&self, a: InstanceId, b: InstanceId) -> bool {
        self.neighbors
            .get(&a)
            .is_some_and(|list| list.contains(&b))
    }

    pub fn neighbors(&self, a: InstanceId) -> &[InstanceId] {
        self.neighbors.get(&a).map(|l| l.as_slice()).unwrap_or(&[])
    }

    pub fn degree(&self, a: InstanceId) -> usize {
        self.neighbors.get(&a).map_or(0, |l| l.len())
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.neighbors.values().map(|l| l.len()).sum::<usize>() / 2
    }

    fn remove_directed(&mut self, from: InstanceId, to: InstanceId) -> bool {
        let Some(list) = self.neighbors.get_mut(&from) else {
            return false;
        };
        let Some(pos) = list.iter().position(|&n| n == to) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.neighbors.remove(&from);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: InstanceId = InstanceId(1);
    const B: InstanceId = InstanceId(2);
    const C: InstanceId = InstanceId(3);

    #[test]
    fn registration_is_symmetric() {
        let mut g = AdjacencyGraph::new(32);
        assert_eq!(g.register_connection(A, B), ConnectionOutcome::Added);
        assert!(g.is_connected(A, B));
        assert!(g.is_connected(B, A));
        assert!(!g.is_connected(A, C));
    }

    #[test]
    fn registration_is_idempotent() {
        let mut g = AdjacencyGraph::new(32);
        g.register_connection(A, B);
        let before = g.revision();
        assert_eq!(g.register_connection(A, B), ConnectionOutcome::AlreadyConnected);
        assert_eq!(g.register_connection(B, A), ConnectionOutcome::AlreadyConnected);
        assert_eq!(g.neighbors(A), &[B]);
        assert_eq!(g.neighbors(B), &[A]);
        assert_eq!(g.revision(), before);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn self_loop_is_rejected() {
        let mut g = AdjacencyGraph::new(32);
        assert_eq!(g.register_connection(A, A), ConnectionOutcome::SelfLoop);
        assert!(!g.is_connected(A, A));
        assert_eq!(g.revision(), 0);
    }

    #[test]
    fn capacity_overflow_is_a_no_op() {
        let mut g = AdjacencyGraph::new(2);
        g.register_connection(A, B);
        g.register_connection(A, C);
        let outcome = g.register_connection(A, InstanceId(4));
        assert_eq!(outcome, ConnectionOutcome::CapacityExceeded { instance: A });
        assert!(!outcome.is_connected());
        assert_eq!(g.degree(A), 2);
        // The far endpoint must not hold a one-sided entry.
        assert_eq!(g.degree(InstanceId(4)), 0);
    }

    #[test]
    fn capacity_is_checked_on_both_endpoints() {
        let mut g = AdjacencyGraph::new(1);
        g.register_connection(B, C);
        let outcome = g.register_connection(A, B);
        assert_eq!(outcome, ConnectionOutcome::CapacityExceeded { instance: B });
        assert_eq!(g.degree(A), 0);
    }

    #[test]
    fn unregister_removes_every_edge() {
        let mut g = AdjacencyGraph::new(32);
        g.register_connection(A, B);
        g.register_connection(A, C);
        g.register_connection(B, C);
        let touched = g.unregister(A, &[]);
        assert_eq!(touched, vec![B, C]);
        assert!(!g.is_connected(B, A));
        assert!(!g.is_connected(C, A));
        assert!(g.is_connected(B, C));
        assert_eq!(g.degree(A), 0);
    }

    #[test]
    fn unregister_heals_one_sided_former_neighbors() {
        let mut g = AdjacencyGraph::new(32);
        g.register_connection(A, B);
        // Simulate a one-sided entry C -> A that A itself does not list.
        g.neighbors.entry(C).or_default().push(A);
        let touched = g.unregister(A, &[C]);
        assert_eq!(touched, vec![B, C]);
        assert_eq!(g.degree(C), 0);
    }

    #[test]
    fn disconnect_removes_only_that_edge() {
        let mut g = AdjacencyGraph::new(32);
        g.register_connection(A, B);
        g.register_connection(B, C);
        let rev = g.revision();
        assert!(g.disconnect(B, A));
        assert!(!g.is_connected(A, B));
        assert!(g.is_connected(B, C));
        assert!(g.revision() > rev);
        assert!(!g.disconnect(A, B));
    }

    #[test]
    fn graph_survives_json_roundtrip() {
        let mut g = AdjacencyGraph::new(32);
        g.register_connection(A, B);
        g.register_connection(B, C);
        let json = serde_json::to_string(&g).unwrap();
        let restored: AdjacencyGraph = serde_json::from_str(&json).unwrap();
        assert!(restored.is_connected(C, B));
        assert_eq!(restored.revision(), g.revision());
    }
}
