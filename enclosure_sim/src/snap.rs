// Snap-point matching between building instances.
//
// A snap point is a typed attachment location authored on a piece. The
// matcher answers two questions:
// - `find_candidates`: given a source provider at a (possibly hypothetical)
//   pose, which compatible snap-point pairs on nearby instances are within
//   reach? Pairs are accepted when their world distance is at most the sum
//   of the two snap radii and scored `1 - distance / max_distance`.
// - `process_candidates`: pick the closest pair as primary and gather the
//   related pairs (same target, or near the primary's target point).
//
// `in_snap_contact` is the cheaper yes/no variant used to auto-register
// adjacency edges when a piece is placed next to existing ones.
//
// Candidate order is total: distance ascending, score descending, then
// target id and point indices. Equal-ranked pairs are never collapsed.
//
// See also: `spatial.rs` for the overlap query that finds nearby
// instances, `adjacency.rs` for the edges built from snap contact,
// `room.rs` for the per-member snap snapshot stored on each room.

use crate::instance::{BuildingInstance, InstanceTable};
use crate::spatial::SpatialQuery;
use crate::types::{InstanceId, KindMask, Pose, SnapType};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ---------------------------------------------------------------------------
// Snap points and compatibility
// ---------------------------------------------------------------------------

/// A typed attachment location, authored in the owning piece's local space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapPoint {
    pub snap_type: SnapType,
    pub local_position: Vec3,
    pub local_rotation: Quat,
    pub snap_radius: f32,
    pub max_penetration: f32,
    pub active: bool,
    pub priority: i32,
}

impl SnapPoint {
    /// Active point with the default radius (2.0) and penetration (0.01).
    pub fn new(snap_type: SnapType, local_position: Vec3) -> Self {
        Self {
            snap_type,
            local_position,
            local_rotation: Quat::IDENTITY,
            snap_radius: 2.0,
            max_penetration: 0.01,
            active: true,
            priority: 0,
        }
    }

    pub fn with_radius(mut self, snap_radius: f32) -> Self {
        self.snap_radius = snap_radius;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Symmetric compatibility relation between snap types. Identical types are
/// always compatible; the rule list adds unordered pairs on top.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapCompatibility {
    pub rules: Vec<(SnapType, SnapType)>,
}

impl Default for SnapCompatibility {
    fn default() -> Self {
        use SnapType::*;
        Self {
            rules: vec![
                (Wall, Door),
                (Wall, Window),
                (Wall, Pillar),
                (Wall, Floor),
                (Floor, Foundation),
                (Floor, Pillar),
                (Wall, Ceiling),
                (Ceiling, Roof),
                (Foundation, Pillar),
                (Socket, Wall),
            ],
        }
    }
}

impl SnapCompatibility {
    pub fn are_compatible(&self, a: SnapType, b: SnapType) -> bool {
        a == b
            || self
                .rules
                .iter()
                .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
    }
}

/// Anything that carries snap points: a placed instance, or a bare point
/// list for a piece that has not been placed yet.
pub trait SnapProvider {
    fn snap_points(&self) -> &[SnapPoint];
    /// The provider's own id, excluded from its search results.
    fn instance_id(&self) -> Option<InstanceId>;
}

impl SnapProvider for BuildingInstance {
    fn snap_points(&self) -> &[SnapPoint] {
        &self.snap_points
    }

    fn instance_id(&self) -> Option<InstanceId> {
        Some(self.id)
    }
}

impl SnapProvider for [SnapPoint] {
    fn snap_points(&self) -> &[SnapPoint] {
        self
    }

    fn instance_id(&self) -> Option<InstanceId> {
        None
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// One compatible snap-point pair within reach.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapCandidate {
    pub distance: f32,
    /// `1 - distance / (radius_a + radius_b)`, in `[0, 1]`.
    pub score: f32,
    /// Index into the source provider's snap points.
    pub source_point: usize,
    /// Index into the target instance's snap points.
    pub target_point: usize,
    pub target: InstanceId,
    /// World position of the target snap point.
    pub target_position: Vec3,
}

impl SnapCandidate {
    /// Total order used for candidate lists.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| other.score.total_cmp(&self.score))
            .then_with(|| self.target.cmp(&other.target))
            .then_with(|| self.source_point.cmp(&other.source_point))
            .then_with(|| self.target_point.cmp(&other.target_point))
    }
}

/// Result of `process_candidates`.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapSelection {
    pub primary: SnapCandidate,
    /// Other candidates on the primary's target instance or close to the
    /// primary's target point, in rank order.
    pub related: Vec<SnapCandidate>,
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Stateless matcher bound to a compatibility table.
#[derive(Clone, Copy, Debug)]
pub struct SnapMatcher<'a> {
    pub compatibility: &'a SnapCompatibility,
    pub group_radius: f32,
}

impl<'a> SnapMatcher<'a> {
    pub fn new(compatibility: &'a SnapCompatibility, group_radius: f32) -> Self {
        Self {
            compatibility,
            group_radius,
        }
    }

    /// All compatible snap pairs between `source` (placed at `source_pose`)
    /// and instances found near `search_center`, in rank order.
    #[allow(clippy::too_many_arguments)]
    pub fn find_candidates<P, Q>(
        &self,
        source: &P,
        source_pose: &Pose,
        search_center: Vec3,
        radius: f32,
        filter: KindMask,
        query: &Q,
        instances: &InstanceTable,
    ) -> Vec<SnapCandidate>
    where
        P: SnapProvider + ?Sized,
        Q: SpatialQuery + ?Sized,
    {
        let own_id = source.instance_id();
        let mut candidates = Vec::new();

        for target_id in query.overlap_sphere(search_center, radius, filter) {
            if Some(target_id) == own_id {
                continue;
            }
            let Some(target) = instances.get(target_id) else {
                continue;
            };

            for (si, sp) in source.snap_points().iter().enumerate() {
                if !sp.active {
                    continue;
                }
                let source_world = source_pose.transform_point(sp.local_position);

                for (ti, tp) in target.snap_points.iter().enumerate() {
                    if !tp.active
                        || !self.compatibility.are_compatible(sp.snap_type, tp.snap_type)
                    {
                        continue;
                    }
                    let Some(target_world) = target.snap_world_position(ti, &target.pose) else {
                        continue;
                    };
                    let distance = source_world.distance(target_world);
                    let max_distance = sp.snap_radius + tp.snap_radius;
                    if max_distance <= 0.0 || distance > max_distance {
                        continue;
                    }
                    candidates.push(SnapCandidate {
                        distance,
                        score: 1.0 - distance / max_distance,
                        source_point: si,
                        target_point: ti,
                        target: target_id,
                        target_position: target_world,
                    });
                }
            }
        }

        candidates.sort_by(SnapCandidate::rank_cmp);
        candidates
    }

    /// Closest candidate plus its related group. `None` when there are no
    /// candidates.
    pub fn process_candidates(&self, candidates: &[SnapCandidate]) -> Option<SnapSelection> {
        let primary = candidates.iter().min_by(|a, b| a.rank_cmp(b))?.clone();
        let mut related: Vec<SnapCandidate> = candidates
            .iter()
            .filter(|c| *c != &primary)
            .filter(|c| {
                c.target == primary.target
                    || c.target_position.distance(primary.target_position) <= self.group_radius
            })
            .cloned()
            .collect();
        related.sort_by(SnapCandidate::rank_cmp);
        Some(SnapSelection { primary, related })
    }

    /// Whether two placed instances touch through a compatible pair of
    /// active snap points.
    pub fn in_snap_contact(
        &self,
        a: &BuildingInstance,
        b: &BuildingInstance,
        max_center_distance: f32,
        slack: f32,
    ) -> bool {
        if a.id == b.id || a.position().distance(b.position()) > max_center_distance {
            return false;
        }
        self.contact_point(a, b, slack).is_some()
    }

    /// Midpoint of the closest compatible active snap pair between two
    /// placed instances, if any pair is within reach.
    pub fn contact_point(
        &self,
        a: &BuildingInstance,
        b: &BuildingInstance,
        slack: f32,
    ) -> Option<Vec3> {
        let mut best: Option<(f32, Vec3)> = None;
        for (ia, pa) in a.snap_points.iter().enumerate() {
            if !pa.active {
                continue;
            }
            let Some(wa) = a.snap_world_position(ia, &a.pose) else {
                continue;
            };
            for (ib, pb) in b.snap_points.iter().enumerate() {
                if !pb.active || !self.compatibility.are_compatible(pa.snap_type, pb.snap_type) {
                    continue;
                }
                let Some(wb) = b.snap_world_position(ib, &b.pose) else {
                    continue;
                };
                let distance = wa.distance(wb);
                let reach = pa.snap_radius.max(pb.snap_radius) * slack;
                if distance <= reach && best.is_none_or(|(d, _)| distance < d) {
                    best = Some((distance, (wa + wb) * 0.5));
                }
            }
        }
        best.map(|(_, point)| point)
    }
}
