// Building instances and the instance arena.
//
// A `BuildingInstance` is a placed structural piece: id, world pose, kind,
// authored snap points and an optional explicit footprint. Instances are
// owned by `InstanceTable`, a `BTreeMap` arena keyed by `InstanceId`. Graph
// edges between instances are NOT stored here; they live in
// `AdjacencyGraph` (see `adjacency.rs`) so that the instance record stays a
// plain value that can be snapshotted and handed to worker threads.
//
// See also: `snap.rs` for `SnapPoint`, `spatial.rs` for the overlap query
// implemented over this table, `config.rs` for per-kind footprint defaults.

use crate::config::FootprintDefaults;
use crate::snap::SnapPoint;
use crate::types::{InstanceId, Pose, StructuralKind};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Width (local X) × height (local Y) × depth (local Z) of a piece.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

impl Footprint {
    pub const fn new(width: f32, height: f32, depth: f32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }
}

/// A placed structural piece.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildingInstance {
    pub id: InstanceId,
    pub pose: Pose,
    pub kind: StructuralKind,
    /// Authored attachment points, in priority order.
    pub snap_points: Vec<SnapPoint>,
    /// Explicit size from the piece's collider. `None` falls back to the
    /// per-kind defaults in config.
    pub footprint: Option<Footprint>,
}

impl BuildingInstance {
    pub fn new(id: InstanceId, pose: Pose, kind: StructuralKind) -> Self {
        Self {
            id,
            pose,
            kind,
            snap_points: Vec::new(),
            footprint: None,
        }
    }

    pub fn with_snap_points(mut self, snap_points: Vec<SnapPoint>) -> Self {
        self.snap_points = snap_points;
        self
    }

    pub fn with_footprint(mut self, footprint: Footprint) -> Self {
        self.footprint = Some(footprint);
        self
    }

    pub fn position(&self) -> Vec3 {
        self.pose.position
    }

    /// Explicit footprint, or the kind default.
    pub fn resolved_footprint(&self, defaults: &FootprintDefaults) -> Footprint {
        self.footprint
            .unwrap_or_else(|| defaults.for_kind(self.kind))
    }

    /// World-space position of the snap point at `index` if the instance
    /// were placed at `pose`.
    pub fn snap_world_position(&self, index: usize, pose: &Pose) -> Option<Vec3> {
        self.snap_points
            .get(index)
            .map(|sp| pose.transform_point(sp.local_position))
    }
}

/// Arena of live building instances.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstanceTable {
    instances: BTreeMap<InstanceId, BuildingInstance>,
    /// Cap on handles returned by one overlap query.
    pub max_query_results: usize,
}

impl InstanceTable {
    pub fn new(max_query_results: usize) -> Self {
        Self {
            instances: BTreeMap::new(),
            max_query_results,
        }
    }

    /// Insert or replace an instance. Returns the previous record.
    pub fn insert(&mut self, instance: BuildingInstance) -> Option<BuildingInstance> {
        self.instances.insert(instance.id, instance)
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<BuildingInstance> {
        self.instances.remove(&id)
    }

    pub fn get(&self, id: InstanceId) -> Option<&BuildingInstance> {
        self.instances.get(&id)
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &BuildingInstance> {
        self.instances.values()
    }

    /// Resolves ids to instances, silently skipping ids that no longer exist.
    pub fn resolve<'a>(
        &'a self,
        ids: &'a [InstanceId],
    ) -> impl Iterator<Item = &'a BuildingInstance> + 'a {
        ids.iter().filter_map(|id| self.instances.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_footprint_prefers_explicit_size() {
        let defaults = FootprintDefaults::default();
        let wall = BuildingInstance::new(InstanceId(1), Pose::IDENTITY, StructuralKind::Wall);
        assert_eq!(wall.resolved_footprint(&defaults), defaults.wall);
        let sized = wall.with_footprint(Footprint::new(4.0, 2.5, 0.3));
        assert_eq!(sized.resolved_footprint(&defaults).width, 4.0);
    }

    #[test]
    fn resolve_skips_missing_ids() {
        let mut table = InstanceTable::new(32);
        table.insert(BuildingInstance::new(InstanceId(1), Pose::IDENTITY, StructuralKind::Wall));
        table.insert(BuildingInstance::new(InstanceId(3), Pose::IDENTITY, StructuralKind::Door));
        let ids = [InstanceId(1), InstanceId(2), InstanceId(3)];
        let found: Vec<InstanceId> = table.resolve(&ids).map(|i| i.id).collect();
        assert_eq!(found, vec![InstanceId(1), InstanceId(3)]);
    }

    #[test]
    fn insert_replaces_existing_record() {
        let mut table = InstanceTable::new(32);
        let id = InstanceId(7);
        let first = BuildingInstance::new(id, Pose::IDENTITY, StructuralKind::Wall);
        assert!(table.insert(first).is_none());
        let old = table.insert(BuildingInstance::new(id, Pose::IDENTITY, StructuralKind::Window));
        assert_eq!(old.map(|i| i.kind), Some(StructuralKind::Wall));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(id).map(|i| i.kind), Some(StructuralKind::Window));
    }
}
