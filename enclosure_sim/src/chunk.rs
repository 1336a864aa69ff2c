// Spatial chunk index.
//
// Buckets building instances and committed rooms into fixed-size cells of
// the horizontal plane. Chunk scope bounds connectivity work: a placement
// or connection only re-runs Union-Find over the wall-like members of the
// affected chunk, pooled with the chunks its edges reach when a structure
// crosses a chunk border.
//
// Chunks are created lazily when the first instance lands in a cell and
// are never destroyed; an emptied chunk simply has no members.
//
// Activation is observer-driven: every poll, chunks within `active_radius`
// (Chebyshev, in chunk units) of any observer become active and all others
// inactive. Active chunks materialize their rooms (colliders, environment
// effects) through the collaborator; inactive ones tear them down. The
// chunk index only tracks the flags; `sim.rs` turns the returned changes
// into events.
//
// See also: `types.rs` for `ChunkCoord`, `sim.rs` for the activation poll.

use crate::types::{ChunkCoord, InstanceId, RoomId};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One grid cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub coord: ChunkCoord,
    /// Member instances in placement order.
    pub members: Vec<InstanceId>,
    pub rooms: BTreeSet<RoomId>,
    pub active: bool,
    /// Last tick at which the chunk was (or stayed) active.
    pub last_active_tick: Option<u64>,
}

impl Chunk {
    fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            members: Vec::new(),
            rooms: BTreeSet::new(),
            active: false,
            last_active_tick: None,
        }
    }
}

/// Chunks whose active flag flipped during an activation poll.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActivationChanges {
    pub activated: Vec<ChunkCoord>,
    pub deactivated: Vec<ChunkCoord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpatialChunkIndex {
    chunk_size: f32,
    chunks: BTreeMap<ChunkCoord, Chunk>,
}

impl SpatialChunkIndex {
    pub fn new(chunk_size: f32) -> Self {
        Self {
            chunk_size,
            chunks: BTreeMap::new(),
        }
    }

    pub fn chunk_size(&self) -> f32 {
        self.chunk_size
    }

    pub fn coordinate_of(&self, position: Vec3) -> ChunkCoord {
        ChunkCoord::containing(position, self.chunk_size)
    }

    /// Append `id` to the chunk containing `position`, creating the chunk
    /// on first use. Re-inserting an existing member is a no-op.
    pub fn insert(&mut self, id: InstanceId, position: Vec3) -> ChunkCoord {
        let coord = self.coordinate_of(position);
        let chunk = self
            .chunks
            .entry(coord)
            .or_insert_with(|| Chunk::new(coord));
        if !chunk.members.contains(&id) {
            chunk.members.push(id);
        }
        coord
    }

    /// Remove `id` from its chunk. `position` is where the instance was
    /// filed; if it is not found there every chunk is searched. Returns the
    /// chunk it was removed from.
    pub fn remove(&mut self, id: InstanceId, position: Vec3) -> Option<ChunkCoord> {
        let expected = self.coordinate_of(position);
        if let Some(chunk) = self.chunks.get_mut(&expected) {
            if let Some(pos) = chunk.members.iter().position(|&m| m == id) {
                chunk.members.remove(pos);
                return Some(expected);
            }
        }
        for chunk in self.chunks.values_mut() {
            if let Some(pos) = chunk.members.iter().position(|&m| m == id) {
                chunk.members.remove(pos);
                return Some(chunk.coord);
            }
        }
        None
    }

    pub fn get(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord)
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn members(&self, coord: ChunkCoord) -> &[InstanceId] {
        self.chunks
            .get(&coord)
            .map(|c| c.members.as_slice())
            .unwrap_or(&[])
    }

    pub fn room_count(&self, coord: ChunkCoord) -> usize {
        self.chunks.get(&coord).map_or(0, |c| c.rooms.len())
    }

    pub fn rooms(&self, coord: ChunkCoord) -> impl Iterator<Item = RoomId> + '_ {
        self.chunks
            .get(&coord)
            .into_iter()
            .flat_map(|c| c.rooms.iter().copied())
    }

    /// File `room` under `coord`. Returns false if the chunk does not exist.
    pub fn attach_room(&mut self, coord: ChunkCoord, room: RoomId) -> bool {
        match self.chunks.get_mut(&coord) {
            Some(chunk) => {
                chunk.rooms.insert(room);
                true
            }
            None => false,
        }
    }

    pub fn detach_room(&mut self, coord: ChunkCoord, room: RoomId) -> bool {
        self.chunks
            .get_mut(&coord)
            .is_some_and(|c| c.rooms.remove(&room))
    }

    pub fn is_active(&self, coord: ChunkCoord) -> bool {
        self.chunks.get(&coord).is_some_and(|c| c.active)
    }

    /// Mark a chunk active. Returns true if the flag flipped.
    pub fn activate(&mut self, coord: ChunkCoord, tick: u64) -> bool {
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return false;
        };
        chunk.last_active_tick = Some(tick);
        let flipped = !chunk.active;
        chunk.active = true;
        flipped
    }

    /// Mark a chunk inactive. Returns true if the flag flipped.
    pub fn deactivate(&mut self, coord: ChunkCoord) -> bool {
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return false;
        };
        let flipped = chunk.active;
        chunk.active = false;
        flipped
    }

    /// Recompute every chunk's active flag from observer positions.
    pub fn update_activation(
        &mut self,
        observers: &[Vec3],
        radius: u32,
        tick: u64,
    ) -> ActivationChanges {
        let centers: Vec<ChunkCoord> = observers.iter().map(|&p| self.coordinate_of(p)).collect();
        let mut changes = ActivationChanges::default();
        for chunk in self.chunks.values_mut() {
            let wanted = centers
                .iter()
                .any(|c| c.chebyshev_distance(chunk.coord) <= radius);
            if wanted {
                chunk.last_active_tick = Some(tick);
            }
            if wanted != chunk.active {
                chunk.active = wanted;
                if wanted {
                    changes.activated.push(chunk.coord);
                } else {
                    changes.deactivated.push(chunk.coord);
                }
            }
        }
        changes
    }
}
