// Rooms, room candidates and derived environment attributes.
//
// A `Room` is a committed enclosure: its ordered member ids, owning chunk,
// geometry (oriented + axis-aligned boxes), counts of door and window
// members, the derived environment attributes and the per-member snap
// snapshot taken when it formed.
//
// A `RoomCandidate` is the pure, thread-safe evaluation of one member list
// against an immutable view of the world (`EvaluationContext`): cycle test,
// geometry, snap snapshot, and the adjacency revision it was computed
// against. It also records the distinct corners the member loop turns
// through: for each consecutive pair (wrapping around), the midpoint of
// their closest snap pair, or failing that the closest points between
// their center lines. Three walls meeting at one T-junction form a cycle
// but only one corner, and never enclose anything.
//
// Candidates are evaluated in parallel (see `evaluate_all`) and committed
// serially by the registry, which rejects any candidate whose revision is
// stale.
//
// Environment attributes are pure functions of membership:
//   light_level     = clamp01(0.2 + 0.4 * windows + 0.2 * doors)
//   has_ventilation = windows > 0 || doors > 0
//
// See also: `registry.rs` for commit/re-evaluation, `geometry.rs` for the
// box computation, `replica.rs` for the read-only `RoomSnapshot` consumer.

use crate::adjacency::AdjacencyGraph;
use crate::config::RoomConfig;
use crate::connectivity::{ConnectivityAnalyzer, MemberSnapshot};
use crate::geometry::{
    GeometryError, RoomGeometry, center_line, closest_points_on_segments, compute_room_geometry,
    dedup_points,
};
use crate::instance::{BuildingInstance, InstanceTable};
use crate::snap::{SnapCandidate, SnapMatcher};
use crate::types::{ChunkCoord, InstanceId, KindMask, RoomId, StructuralKind, flatten};
use glam::{Quat, Vec2, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Attributes consumed by environment-effect collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentAttributes {
    pub light_level: f32,
    pub has_ventilation: bool,
}

impl EnvironmentAttributes {
    pub fn from_counts(window_count: usize, door_count: usize) -> Self {
        let light = 0.2 + 0.4 * window_count as f32 + 0.2 * door_count as f32;
        Self {
            light_level: light.clamp(0.0, 1.0),
            has_ventilation: window_count > 0 || door_count > 0,
        }
    }
}

/// `(windows, doors)` among `kinds`.
pub fn opening_counts(kinds: &[StructuralKind]) -> (usize, usize) {
    kinds.iter().fold((0, 0), |(w, d), k| match k {
        StructuralKind::Window => (w + 1, d),
        StructuralKind::Door => (w, d + 1),
        _ => (w, d),
    })
}

/// Per-member snap pairs toward other members, taken at formation time.
pub type AdjacencySnapshot = BTreeMap<InstanceId, Vec<SnapCandidate>>;

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    /// Members in cycle order, starting at the instance that closed it.
    pub members: Vec<InstanceId>,
    pub chunk: ChunkCoord,
    pub geometry: RoomGeometry,
    pub enclosed: bool,
    pub window_count: usize,
    pub door_count: usize,
    pub environment: EnvironmentAttributes,
    pub adjacency_snapshot: AdjacencySnapshot,
    /// Whether the collaborator currently holds a live representation.
    pub materialized: bool,
    pub created_tick: u64,
    pub updated_tick: u64,
}

impl Room {
    pub fn center(&self) -> Vec3 {
        self.geometry.obb.center
    }

    pub fn rotation(&self) -> Quat {
        self.geometry.obb.rotation()
    }

    pub fn size(&self) -> Vec3 {
        self.geometry.obb.size
    }

    pub fn member_set(&self) -> BTreeSet<InstanceId> {
        self.members.iter().copied().collect()
    }

    pub fn has_member(&self, id: InstanceId) -> bool {
        self.members.contains(&id)
    }

    /// Exact containment: axis-aligned reject, then the oriented box.
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.geometry.aabb.contains(point) && self.geometry.obb.contains(point)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id,
            members: self.members.clone(),
            chunk: self.chunk,
            center: self.center(),
            rotation: self.rotation(),
            size: self.size(),
            geometry: self.geometry.clone(),
            enclosed: self.enclosed,
            environment: self.environment,
        }
    }
}

/// Read-only copy of a committed room, as exported to replicas and
/// environment/UI collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub members: Vec<InstanceId>,
    pub chunk: ChunkCoord,
    pub center: Vec3,
    pub rotation: Quat,
    pub size: Vec3,
    pub geometry: RoomGeometry,
    pub enclosed: bool,
    pub environment: EnvironmentAttributes,
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Immutable view a candidate is evaluated against.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub instances: &'a InstanceTable,
    pub adjacency: &'a AdjacencyGraph,
    pub config: &'a RoomConfig,
}

impl<'a> EvaluationContext<'a> {
    pub fn analyzer(&self) -> ConnectivityAnalyzer<'a> {
        ConnectivityAnalyzer::new(
            self.adjacency,
            self.config.connectivity.fallback_edge_distance,
            self.config.connectivity.min_room_members,
        )
    }

    pub fn matcher(&self) -> SnapMatcher<'a> {
        SnapMatcher::new(&self.config.snap.compatibility, self.config.snap.group_radius)
    }
}

/// Evaluated member list awaiting commit.
#[derive(Clone, Debug)]
pub struct RoomCandidate {
    /// Resolved members, in the order given.
    pub members: Vec<InstanceId>,
    pub kinds: Vec<StructuralKind>,
    /// Requested ids that no longer exist.
    pub missing: Vec<InstanceId>,
    pub cyclic: bool,
    /// Distinct plan-view corners between consecutive members.
    pub junctions: Vec<Vec2>,
    pub geometry: Result<RoomGeometry, GeometryError>,
    pub adjacency_snapshot: AdjacencySnapshot,
    /// Adjacency revision the evaluation saw.
    pub revision: u64,
}

impl RoomCandidate {
    pub fn evaluate(member_ids: &[InstanceId], ctx: &EvaluationContext<'_>) -> Self {
        let mut resolved: Vec<&BuildingInstance> = Vec::with_capacity(member_ids.len());
        let mut missing = Vec::new();
        for &id in member_ids {
            match ctx.instances.get(id) {
                Some(inst) => resolved.push(inst),
                None => missing.push(id),
            }
        }

        let snapshots: Vec<MemberSnapshot> =
            resolved.iter().map(|i| MemberSnapshot::of(i)).collect();
        let cyclic = ctx.analyzer().has_cycle(&snapshots);
        let junctions = member_junctions(&resolved, ctx);
        let geometry = compute_room_geometry(&resolved, &ctx.config.geometry);

        Self {
            members: resolved.iter().map(|i| i.id).collect(),
            kinds: resolved.iter().map(|i| i.kind).collect(),
            missing,
            cyclic,
            junctions,
            geometry,
            adjacency_snapshot: snapshot_member_snaps(&resolved, ctx),
            revision: ctx.adjacency.revision(),
        }
    }

    pub fn member_set(&self) -> BTreeSet<InstanceId> {
        self.members.iter().copied().collect()
    }

    pub fn opening_counts(&self) -> (usize, usize) {
        opening_counts(&self.kinds)
    }
}

/// Evaluate many candidates at once on the rayon pool. Output order matches
/// input order.
pub fn evaluate_all(
    candidates: &[Vec<InstanceId>],
    ctx: &EvaluationContext<'_>,
) -> Vec<RoomCandidate> {
    candidates
        .par_iter()
        .map(|members| RoomCandidate::evaluate(members, ctx))
        .collect()
}

/// Where each member meets the next one around the loop, merged within
/// `junction_merge_distance`.
fn member_junctions(members: &[&BuildingInstance], ctx: &EvaluationContext<'_>) -> Vec<Vec2> {
    if members.len() < 2 {
        return Vec::new();
    }
    let matcher = ctx.matcher();
    let geometry = &ctx.config.geometry;
    let points: Vec<Vec2> = members
        .iter()
        .zip(members.iter().cycle().skip(1))
        .map(|(a, b)| match matcher.contact_point(a, b, ctx.config.snap.contact_slack) {
            Some(point) => flatten(point),
            None => {
                let (a0, a1) = center_line(a, geometry);
                let (b0, b1) = center_line(b, geometry);
                let (pa, pb) = closest_points_on_segments(a0, a1, b0, b1);
                (pa + pb) * 0.5
            }
        })
        .collect();
    dedup_points(&points, geometry.junction_merge_distance)
}

fn snapshot_member_snaps(
    members: &[&BuildingInstance],
    ctx: &EvaluationContext<'_>,
) -> AdjacencySnapshot {
    let member_ids: BTreeSet<InstanceId> = members.iter().map(|m| m.id).collect();
    let matcher = ctx.matcher();
    members
        .iter()
        .map(|m| {
            let snaps: Vec<SnapCandidate> = matcher
                .find_candidates(
                    *m,
                    &m.pose,
                    m.position(),
                    ctx.config.snap.member_search_radius,
                    KindMask::WALL_LIKE,
                    ctx.instances,
                    ctx.instances,
                )
                .into_iter()
                .filter(|c| member_ids.contains(&c.target))
                .collect();
            (m.id, snaps)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Footprint;
    use crate::snap::SnapPoint;
    use crate::types::{Pose, SnapType};
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn light_level_follows_openings() {
        let closed = EnvironmentAttributes::from_counts(0, 0);
        assert!((closed.light_level - 0.2).abs() < 1e-6);
        assert!(!closed.has_ventilation);

        let one_door = EnvironmentAttributes::from_counts(0, 1);
        assert!((one_door.light_level - 0.4).abs() < 1e-6);
        assert!(one_door.has_ventilation);

        let bright = EnvironmentAttributes::from_counts(3, 2);
        assert_eq!(bright.light_level, 1.0);
    }

    #[test]
    fn opening_counts_ignore_plain_walls() {
        let kinds = [
            StructuralKind::Wall,
            StructuralKind::Window,
            StructuralKind::Door,
            StructuralKind::Window,
        ];
        assert_eq!(opening_counts(&kinds), (2, 1));
    }

    fn wall(id: u64, x: f32, z: f32, yaw: f32, kind: StructuralKind) -> BuildingInstance {
        BuildingInstance::new(InstanceId(id), Pose::from_yaw(Vec3::new(x, 0.0, z), yaw), kind)
            .with_footprint(Footprint::new(4.0, 3.0, 0.2))
            .with_snap_points(vec![
                SnapPoint::new(SnapType::Wall, Vec3::new(-2.0, 0.0, 0.0)).with_radius(0.5),
                SnapPoint::new(SnapType::Wall, Vec3::new(2.0, 0.0, 0.0)).with_radius(0.5),
            ])
    }

    fn square(kinds: [StructuralKind; 4]) -> (InstanceTable, AdjacencyGraph) {
        let mut table = InstanceTable::new(32);
        table.insert(wall(1, 0.0, -2.0, 0.0, kinds[0]));
        table.insert(wall(2, 2.0, 0.0, FRAC_PI_2, kinds[1]));
        table.insert(wall(3, 0.0, 2.0, 0.0, kinds[2]));
        table.insert(wall(4, -2.0, 0.0, FRAC_PI_2, kinds[3]));
        let mut g = AdjacencyGraph::new(32);
        for (a, b) in [(1, 2), (2, 3), (3, 4), (4, 1)] {
            g.register_connection(InstanceId(a), InstanceId(b));
        }
        (table, g)
    }

    fn strict_config() -> RoomConfig {
        let mut config = RoomConfig::default();
        config.connectivity.fallback_edge_distance = 1.0;
        config
    }

    #[test]
    fn square_candidate_evaluates_cleanly() {
        let (table, g) = square([StructuralKind::Wall; 4]);
        let config = strict_config();
        let ctx = EvaluationContext {
            instances: &table,
            adjacency: &g,
            config: &config,
        };
        let ids: Vec<InstanceId> = (1..=4).map(InstanceId).collect();
        let candidate = RoomCandidate::evaluate(&ids, &ctx);
        assert!(candidate.cyclic);
        assert!(candidate.missing.is_empty());
        assert_eq!(candidate.revision, g.revision());
        let geom = candidate.geometry.as_ref().unwrap();
        assert!((geom.obb.size.x - 4.2).abs() < 1e-2);
        // Corner snaps pair each wall with its two neighbors only.
        let first = &candidate.adjacency_snapshot[&InstanceId(1)];
        let targets: BTreeSet<InstanceId> = first.iter().map(|c| c.target).collect();
        assert_eq!(targets, BTreeSet::from([InstanceId(2), InstanceId(4)]));
        assert_eq!(candidate.junctions.len(), 4);
    }

    #[test]
    fn walls_meeting_at_one_point_have_a_single_junction() {
        // Two collinear walls and a perpendicular one all ending at (2, -2).
        let mut table = InstanceTable::new(32);
        table.insert(wall(1, 0.0, -2.0, 0.0, StructuralKind::Wall));
        table.insert(wall(2, 4.0, -2.0, 0.0, StructuralKind::Wall));
        table.insert(wall(3, 2.0, 0.0, FRAC_PI_2, StructuralKind::Wall));
        let mut g = AdjacencyGraph::new(32);
        for (a, b) in [(1, 2), (2, 3), (3, 1)] {
            g.register_connection(InstanceId(a), InstanceId(b));
        }
        let config = strict_config();
        let ctx = EvaluationContext {
            instances: &table,
            adjacency: &g,
            config: &config,
        };
        let ids: Vec<InstanceId> = (1..=3).map(InstanceId).collect();
        let candidate = RoomCandidate::evaluate(&ids, &ctx);
        assert!(candidate.cyclic);
        assert_eq!(candidate.junctions.len(), 1);
        assert!(candidate.junctions[0].distance(Vec2::new(2.0, -2.0)) < 1e-4);
    }

    #[test]
    fn walls_without_snaps_meet_where_their_center_lines_do() {
        let mut table = InstanceTable::new(32);
        for (id, x, z, yaw) in [
            (1, 0.0, -2.0, 0.0),
            (2, 2.0, 0.0, FRAC_PI_2),
            (3, 0.0, 2.0, 0.0),
            (4, -2.0, 0.0, FRAC_PI_2),
        ] {
            let mut w = wall(id, x, z, yaw, StructuralKind::Wall);
            w.snap_points.clear();
            table.insert(w);
        }
        let g = AdjacencyGraph::new(32);
        let config = strict_config();
        let ctx = EvaluationContext {
            instances: &table,
            adjacency: &g,
            config: &config,
        };
        let ids: Vec<InstanceId> = (1..=4).map(InstanceId).collect();
        let candidate = RoomCandidate::evaluate(&ids, &ctx);
        assert_eq!(candidate.junctions.len(), 4);
        assert!(candidate.junctions.iter().any(|j| j.distance(Vec2::new(-2.0, 2.0)) < 1e-4));
    }

    #[test]
    fn missing_members_are_reported_and_break_the_cycle() {
        let (mut table, g) = square([StructuralKind::Wall; 4]);
        table.remove(InstanceId(3));
        let config = strict_config();
        let ctx = EvaluationContext {
            instances: &table,
            adjacency: &g,
            config: &config,
        };
        let ids: Vec<InstanceId> = (1..=4).map(InstanceId).collect();
        let candidate = RoomCandidate::evaluate(&ids, &ctx);
        assert_eq!(candidate.missing, vec![InstanceId(3)]);
        assert_eq!(candidate.members.len(), 3);
        assert!(!candidate.cyclic);
    }

    #[test]
    fn parallel_evaluation_preserves_order() {
        let (table, g) = square([
            StructuralKind::Wall,
            StructuralKind::Door,
            StructuralKind::Wall,
            StructuralKind::Window,
        ]);
        let config = strict_config();
        let ctx = EvaluationContext {
            instances: &table,
            adjacency: &g,
            config: &config,
        };
        let lists = vec![
            vec![InstanceId(1), InstanceId(2), InstanceId(3), InstanceId(4)],
            vec![InstanceId(1), InstanceId(2)],
        ];
        let results = evaluate_all(&lists, &ctx);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].members.len(), 4);
        assert_eq!(results[0].opening_counts(), (1, 1));
        assert!(results[1].geometry.is_err());
    }
}
