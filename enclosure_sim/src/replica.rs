// Read-only room view for non-authoritative peers.
//
// A replica never runs detection. It receives `RoomSnapshot`s exported by
// the authority (`EnclosureSim::room_snapshots()`) and replaces its whole
// view with each batch. Queries answer from the snapshots alone: the exact
// oriented-box test, no position cache.

use crate::room::RoomSnapshot;
use crate::types::{InstanceId, RoomId};
use glam::Vec3;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct ReplicaRooms {
    rooms: BTreeMap<RoomId, RoomSnapshot>,
}

impl ReplicaRooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the view with `snapshots`.
    pub fn apply_snapshots(&mut self, snapshots: impl IntoIterator<Item = RoomSnapshot>) {
        self.rooms = snapshots.into_iter().map(|s| (s.id, s)).collect();
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn room(&self, id: RoomId) -> Option<&RoomSnapshot> {
        self.rooms.get(&id)
    }

    pub fn room_at(&self, position: Vec3) -> Option<RoomId> {
        self.rooms
            .values()
            .find(|s| {
                s.enclosed
                    && s.geometry.aabb.contains(position)
                    && s.geometry.obb.contains(position)
            })
            .map(|s| s.id)
    }

    pub fn is_position_indoor(&self, position: Vec3) -> bool {
        self.room_at(position).is_some()
    }

    /// Lowest-id room the instance belongs to.
    pub fn room_for_instance(&self, id: InstanceId) -> Option<RoomId> {
        self.rooms
            .values()
            .find(|s| s.members.contains(&id))
            .map(|s| s.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Aabb, OrientedBox, RoomGeometry};
    use crate::room::EnvironmentAttributes;
    use crate::types::ChunkCoord;
    use glam::{Quat, Vec2};

    fn snapshot(id: u32, center: Vec3, members: &[u64]) -> RoomSnapshot {
        let size = Vec3::new(4.0, 3.0, 4.0);
        let obb = OrientedBox {
            center,
            angle: 0.0,
            size,
        };
        RoomSnapshot {
            id: RoomId(id),
            members: members.iter().map(|&m| InstanceId(m)).collect(),
            chunk: ChunkCoord::new(0, 0),
            center,
            rotation: Quat::IDENTITY,
            size,
            geometry: RoomGeometry {
                obb,
                aabb: Aabb {
                    min: center - size * 0.5,
                    max: center + size * 0.5,
                },
                hull: vec![Vec2::ZERO],
                floor_height: center.y - 1.5,
            },
            enclosed: true,
            environment: EnvironmentAttributes::from_counts(0, 0),
        }
    }

    #[test]
    fn replica_answers_from_latest_batch() {
        let mut replica = ReplicaRooms::new();
        replica.apply_snapshots(vec![
            snapshot(1, Vec3::new(0.0, 1.5, 0.0), &[1, 2, 3, 4]),
            snapshot(2, Vec3::new(10.0, 1.5, 0.0), &[4, 5, 6, 7]),
        ]);
        assert_eq!(replica.len(), 2);
        assert!(replica.is_position_indoor(Vec3::new(0.5, 1.0, 0.5)));
        assert_eq!(replica.room_at(Vec3::new(10.0, 1.0, 1.0)), Some(RoomId(2)));
        assert!(!replica.is_position_indoor(Vec3::new(5.0, 1.0, 0.0)));
        assert_eq!(replica.room_for_instance(InstanceId(4)), Some(RoomId(1)));
        assert_eq!(replica.room_for_instance(InstanceId(9)), None);

        replica.apply_snapshots(vec![snapshot(2, Vec3::new(10.0, 1.5, 0.0), &[4, 5, 6, 7])]);
        assert!(replica.room(RoomId(1)).is_none());
        assert_eq!(replica.room_for_instance(InstanceId(4)), Some(RoomId(2)));
    }
}
