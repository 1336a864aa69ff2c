// Connectivity analysis: Union-Find components and minimal cycles.
//
// Works over an immutable slice of `MemberSnapshot`s (id, kind, position)
// plus a shared borrow of the adjacency graph, so a whole analysis can run
// on a rayon worker while the authority keeps serving queries.
//
// Edge rule: A and B are connected if the adjacency graph has the edge, or,
// as a fallback for registration lag, if their centers are within
// `fallback_edge_distance`. The edge list is undirected and deduplicated
// (each unordered pair is visited once).
//
// Three passes build on that rule:
// - `components`: Union-Find (iterative find with path compression, union
//   by rank). Components below `min_room_members` are dropped.
// - `find_minimal_cycles`: for every pair of the trigger's neighbors, BFS
//   from one to the other with the trigger removed; trigger + path is a
//   candidate. If the trigger is outside the component (a floor or fixture
//   placed against walls), every component member adjacent to it acts as
//   a trigger instead; `components_touching` finds those components. Candidates are
//   deduplicated by member set.
// - `has_cycle`: union edges in order; an edge whose endpoints already
//   share a root closes a cycle. Cheap pre-filter and re-validation test.
//
// BFS visits neighbors in component order, so among equal-length paths the
// first discovered wins. That choice is stable for a given input but not
// guaranteed to be the globally smallest cycle.
//
// See also: `adjacency.rs` for the edges, `geometry.rs` for what happens to
// each candidate next, `sim.rs` for where components are gathered.

use crate::adjacency::AdjacencyGraph;
use crate::instance::BuildingInstance;
use crate::types::{InstanceId, StructuralKind};
use glam::Vec3;
use std::collections::{BTreeSet, VecDeque};

/// The parts of an instance connectivity needs, copied out so analysis can
/// run off the owning thread.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemberSnapshot {
    pub id: InstanceId,
    pub kind: StructuralKind,
    pub position: Vec3,
}

impl MemberSnapshot {
    pub fn of(instance: &BuildingInstance) -> Self {
        Self {
            id: instance.id,
            kind: instance.kind,
            position: instance.position(),
        }
    }
}

// ---------------------------------------------------------------------------
// Union-Find
// ---------------------------------------------------------------------------

/// Disjoint sets over `0..n`.
#[derive(Clone, Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Root of `x`'s set. Iterative, compresses the whole path.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Merge the sets of `a` and `b`. Returns false if they were already
    /// one set.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
        true
    }

    pub fn same_set(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct ConnectivityAnalyzer<'a> {
    adjacency: &'a AdjacencyGraph,
    fallback_distance: f32,
    min_members: usize,
}

impl<'a> ConnectivityAnalyzer<'a> {
    pub fn new(adjacency: &'a AdjacencyGraph, fallback_distance: f32, min_members: usize) -> Self {
        Self {
            adjacency,
            fallback_distance,
            min_members,
        }
    }

    /// The edge rule: registered adjacency, or centers within the fallback
    /// distance.
    pub fn connected(&self, a: &MemberSnapshot, b: &MemberSnapshot) -> bool {
        a.id != b.id
            && (self.adjacency.is_connected(a.id, b.id)
                || a.position.distance(b.position) <= self.fallback_distance)
    }

    /// Undirected edges as index pairs `(i, j)` with `i < j`.
    pub fn edges(&self, members: &[MemberSnapshot]) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                if self.connected(&members[i], &members[j]) {
                    edges.push((i, j));
                }
            }
        }
        edges
    }

    /// Connected components with at least `min_members` members, each in
    /// input order; components ordered by their first member.
    pub fn components(&self, members: &[MemberSnapshot]) -> Vec<Vec<MemberSnapshot>> {
        let mut uf = UnionFind::new(members.len());
        for (i, j) in self.edges(members) {
            uf.union(i, j);
        }

        let mut root_slot: Vec<Option<usize>> = vec![None; members.len()];
        let mut groups: Vec<Vec<MemberSnapshot>> = Vec::new();
        for (i, member) in members.iter().enumerate() {
            let root = uf.find(i);
            let slot = *root_slot[root].get_or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(*member);
        }
        groups.retain(|g| g.len() >= self.min_members);
        groups
    }

    /// The qualifying component that contains `trigger`, if any.
    pub fn component_containing(
        &self,
        members: &[MemberSnapshot],
        trigger: InstanceId,
    ) -> Option<Vec<MemberSnapshot>> {
        self.components(members)
            .into_iter()
            .find(|c| c.iter().any(|m| m.id == trigger))
    }

    /// Qualifying components with at least one member connected to
    /// `trigger`, for a trigger that is not itself a member.
    pub fn components_touching(
        &self,
        members: &[MemberSnapshot],
        trigger: &MemberSnapshot,
    ) -> Vec<Vec<MemberSnapshot>> {
        self.components(members)
            .into_iter()
            .filter(|c| c.iter().any(|m| self.connected(trigger, m)))
            .collect()
    }

    /// Whether the vertex set contains any cycle under the edge rule. Sets
    /// below `min_members` never count.
    pub fn has_cycle(&self, members: &[MemberSnapshot]) -> bool {
        if members.len() < self.min_members {
            return false;
        }
        let mut uf = UnionFind::new(members.len());
        self.edges(members).into_iter().any(|(i, j)| !uf.union(i, j))
    }

    /// Minimal cycles through `trigger` inside `component`, as member id
    /// lists (trigger first, then the path). Distinct by member set.
    pub fn find_minimal_cycles(
        &self,
        component: &[MemberSnapshot],
        trigger: &MemberSnapshot,
    ) -> Vec<Vec<InstanceId>> {
        let adj = self.adjacency_lists(component);
        let pivots: Vec<usize> = match component.iter().position(|m| m.id == trigger.id) {
            Some(t) => vec![t],
            None => component
                .iter()
                .enumerate()
                .filter(|(_, m)| self.connected(trigger, m))
                .map(|(i, _)| i)
                .collect(),
        };

        let mut seen: BTreeSet<Vec<InstanceId>> = BTreeSet::new();
        let mut cycles = Vec::new();
        for pivot in pivots {
            let around = &adj[pivot];
            for (k, &a) in around.iter().enumerate() {
                for &b in &around[k + 1..] {
                    let Some(path) = shortest_path(&adj, a, b, pivot) else {
                        continue;
                    };
                    let mut cycle: Vec<InstanceId> = Vec::with_capacity(path.len() + 1);
                    cycle.push(component[pivot].id);
                    cycle.extend(path.iter().map(|&i| component[i].id));

                    let mut key = cycle.clone();
                    key.sort();
                    if seen.insert(key) {
                        cycles.push(cycle);
                    }
                }
            }
        }
        cycles
    }

    fn adjacency_lists(&self, members: &[MemberSnapshot]) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); members.len()];
        for (i, j) in self.edges(members) {
            adj[i].push(j);
            adj[j].push(i);
        }
        for list in &mut adj {
            list.sort_unstable();
        }
        adj
    }
}

/// BFS shortest path `start → goal` never entering `excluded`. Returns the
/// node sequence including both ends.
fn shortest_path(
    adj: &[Vec<usize>],
    start: usize,
    goal: usize,
    excluded: usize,
) -> Option<Vec<usize>> {
    let mut parent: Vec<Option<usize>> = vec![None; adj.len()];
    let mut visited = vec![false; adj.len()];
    visited[excluded] = true;
    visited[start] = true;
    let mut queue = VecDeque::from([start]);

    while let Some(cur) = queue.pop_front() {
        if cur == goal {
            let mut path = vec![goal];
            let mut node = goal;
            while let Some(p) = parent[node] {
                path.push(p);
                node = p;
            }
            path.reverse();
            return Some(path);
        }
        for &next in &adj[cur] {
            if !visited[next] {
                visited[next] = true;
                parent[next] = Some(cur);
                queue.push_back(next);
            }
        }
    }
    None
}
