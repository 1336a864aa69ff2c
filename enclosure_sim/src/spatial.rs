// Spatial query contract.
//
// Room detection never owns a physics scene; it consumes sphere-overlap
// queries through the `SpatialQuery` trait. A host with a real physics
// engine implements the trait over its broadphase. `InstanceTable`
// implements it by brute force so the core runs headless (tests, replays,
// dedicated authority processes).
//
// Results are bounded: an implementation returns at most its configured
// number of handles, nearest first, mirroring a fixed-size overlap buffer.

use crate::instance::InstanceTable;
use crate::types::{InstanceId, KindMask};
use glam::Vec3;

/// Sphere-overlap query over placed instances.
pub trait SpatialQuery {
    /// Instances whose origin lies within `radius` of `center` and whose
    /// kind passes `filter`, nearest first, bounded in count.
    fn overlap_sphere(&self, center: Vec3, radius: f32, filter: KindMask) -> Vec<InstanceId>;
}

impl SpatialQuery for InstanceTable {
    fn overlap_sphere(&self, center: Vec3, radius: f32, filter: KindMask) -> Vec<InstanceId> {
        let radius_sq = radius * radius;
        let mut hits: Vec<(f32, InstanceId)> = self
            .values()
            .filter(|inst| filter.contains(inst.kind))
            .filter_map(|inst| {
                let d2 = inst.position().distance_squared(center);
                (d2 <= radius_sq).then_some((d2, inst.id))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits.truncate(self.max_query_results);
        hits.into_iter().map(|(_, id)| id).collect()
    }
}
