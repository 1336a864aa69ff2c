// Authoritative room store.
//
// `RoomRegistry` owns every committed `Room`, allocates room ids
// (monotonic, never reused), guards against duplicate and near-duplicate
// rooms, re-validates rooms when their members change, and answers
// point-containment queries.
//
// Commit gates, in order (first failure wins):
//   1. member count ≥ `min_room_members`
//   2. snapshot still current (adjacency revision unchanged, members alive)
//   3. member set is cyclic, and consecutive members meet at ≥ 3 distinct
//      corners (a loop closed through one T-junction encloses nothing)
//   4. owning chunk below `max_rooms_per_chunk`
//   5. no identical / ≥ `max_overlap_ratio` overlapping room in the chunk
//   6. same check across all rooms
//   7. geometry valid
//   8. volume and side lengths within `RoomBounds`
//
// Position cache: a grid (cell = `grid_cell_size`) mapping rounded plan
// coordinates to the room covering that cell. Only enclosed rooms are
// rasterized. Any room mutation marks it dirty; queries rebuild a dirty
// cache at most once per `rebuild_interval_ticks`, so a query may see a
// slightly stale answer. `force_cache_rebuild` bypasses the limit.
//
// See also: `room.rs` for `RoomCandidate` evaluation, `sim.rs` which
// drives commits and re-evaluation from input events.
//
// **Critical constraint: determinism.** Rooms live in a `BTreeMap`; the
// transient cache uses `FxHashMap` but is never iterated for output.

use crate::chunk::SpatialChunkIndex;
use crate::config::{CacheParams, RoomBounds, RoomConfig};
use crate::geometry::{GeometryError, RoomGeometry};
use crate::instance::InstanceTable;
use crate::room::{EnvironmentAttributes, EvaluationContext, Room, RoomCandidate};
use crate::types::{ChunkCoord, InstanceId, RoomId};
use glam::Vec3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Fewest distinct corners a closed outline can turn through.
const MIN_CORNERS: usize = 3;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a candidate did not become a room (or why a room was destroyed).
#[derive(Clone, Debug, PartialEq)]
pub enum RoomRejection {
    TooFewMembers { count: usize, min: usize },
    StaleSnapshot { evaluated: u64, current: u64, missing: usize },
    NoCycle,
    TooFewCorners { corners: usize },
    ChunkFull { chunk: ChunkCoord, limit: usize },
    Duplicate { existing: RoomId },
    Overlap { existing: RoomId, shared: usize, smaller: usize },
    InvalidGeometry(GeometryError),
    VolumeOutOfBounds { volume: f32, min: f32, max: f32 },
    SideTooShort { width: f32, depth: f32, min: f32 },
}

impl fmt::Display for RoomRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomRejection::TooFewMembers { count, min } => {
                write!(f, "{count} members, at least {min} required")
            }
            RoomRejection::StaleSnapshot {
                evaluated,
                current,
                missing,
            } => write!(
                f,
                "stale snapshot (revision {evaluated} vs {current}, {missing} members gone)"
            ),
            RoomRejection::NoCycle => write!(f, "members do not form a closed loop"),
            RoomRejection::TooFewCorners { corners } => {
                write!(f, "loop turns through only {corners} distinct corners")
            }
            RoomRejection::ChunkFull { chunk, limit } => {
                write!(f, "chunk {chunk} already holds {limit} rooms")
            }
            RoomRejection::Duplicate { existing } => {
                write!(f, "same members as {existing}")
            }
            RoomRejection::Overlap {
                existing,
                shared,
                smaller,
            } => write!(f, "shares {shared} of {smaller} members with {existing}"),
            RoomRejection::InvalidGeometry(e) => write!(f, "invalid geometry: {e}"),
            RoomRejection::VolumeOutOfBounds { volume, min, max } => {
                write!(f, "volume {volume:.2} outside [{min}, {max}]")
            }
            RoomRejection::SideTooShort { width, depth, min } => {
                write!(f, "footprint {width:.2} x {depth:.2} has a side under {min}")
            }
        }
    }
}

impl std::error::Error for RoomRejection {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitReceipt {
    pub room_id: RoomId,
    /// The owning chunk was active, so the room was materialized at once.
    pub materialized: bool,
}

#[derive(Clone, Debug)]
pub enum ReevaluateOutcome {
    /// Still enclosed; geometry and attributes refreshed.
    Updated { room_id: RoomId },
    /// No longer valid and removed from the registry.
    Destroyed { room: Room, reason: RoomRejection },
    /// No room with that id.
    Missing,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub rooms: usize,
    pub enclosed_rooms: usize,
    pub cached_cells: usize,
    pub dirty: bool,
}

/// Bounds gate shared by commit and re-evaluation.
pub fn check_bounds(geometry: &RoomGeometry, bounds: &RoomBounds) -> Result<(), RoomRejection> {
    let size = geometry.obb.size;
    let volume = geometry.obb.volume();
    if volume < bounds.min_volume || volume > bounds.max_volume {
        return Err(RoomRejection::VolumeOutOfBounds {
            volume,
            min: bounds.min_volume,
            max: bounds.max_volume,
        });
    }
    if size.x < bounds.min_side_length || size.z < bounds.min_side_length {
        return Err(RoomRejection::SideTooShort {
            width: size.x,
            depth: size.z,
            min: bounds.min_side_length,
        });
    }
    Ok(())
}

/// Duplicate / overlap test of `candidate` against one room.
fn membership_conflict(
    candidate: &BTreeSet<InstanceId>,
    room: &Room,
    max_overlap_ratio: f32,
) -> Option<RoomRejection> {
    let existing = room.member_set();
    if existing == *candidate {
        return Some(RoomRejection::Duplicate { existing: room.id });
    }
    let shared = existing.intersection(candidate).count();
    let smaller = existing.len().min(candidate.len());
    (smaller > 0 && shared as f32 >= max_overlap_ratio * smaller as f32).then_some(
        RoomRejection::Overlap {
            existing: room.id,
            shared,
            smaller,
        },
    )
}

fn default_dirty() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomRegistry {
    rooms: BTreeMap<RoomId, Room>,
    next_room_id: u32,
    cache_params: CacheParams,
    #[serde(skip)]
    position_cache: FxHashMap<(i32, i32), RoomId>,
    #[serde(skip, default = "default_dirty")]
    cache_dirty: bool,
    #[serde(skip)]
    last_cache_rebuild: Option<u64>,
}

impl RoomRegistry {
    pub fn new(cache_params: CacheParams) -> Self {
        Self {
            rooms: BTreeMap::new(),
            next_room_id: 1,
            cache_params,
            position_cache: FxHashMap::default(),
            cache_dirty: true,
            last_cache_rebuild: None,
        }
    }

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn rooms_containing_instance(&self, id: InstanceId) -> Vec<RoomId> {
        self.rooms
            .values()
            .filter(|r| r.has_member(id))
            .map(|r| r.id)
            .collect()
    }

    pub fn is_instance_in_any_room(&self, id: InstanceId) -> bool {
        self.rooms.values().any(|r| r.has_member(id))
    }

    pub fn set_materialized(&mut self, id: RoomId, materialized: bool) -> bool {
        match self.rooms.get_mut(&id) {
            Some(room) if room.materialized != materialized => {
                room.materialized = materialized;
                true
            }
            _ => false,
        }
    }

    /// Validate `candidate` and store it as a room filed under `owner`.
    pub fn try_commit(
        &mut self,
        candidate: RoomCandidate,
        owner: ChunkCoord,
        chunks: &mut SpatialChunkIndex,
        ctx: &EvaluationContext<'_>,
        tick: u64,
    ) -> Result<CommitReceipt, RoomRejection> {
        let result = self.commit_gates(&candidate, owner, chunks, ctx);
        let geometry = match result {
            Ok(geometry) => geometry,
            Err(reason) => {
                match &reason {
                    RoomRejection::StaleSnapshot { .. } => {
                        warn!(
                            members = ?candidate.members,
                            %reason,
                            "discarding stale room candidate"
                        )
                    }
                    _ => debug!(members = ?candidate.members, %reason, "room candidate rejected"),
                }
                return Err(reason);
            }
        };

        let id = RoomId(self.next_room_id);
        self.next_room_id += 1;
        let (windows, doors) = candidate.opening_counts();
        let materialized = chunks.is_active(owner);
        if !chunks.attach_room(owner, id) {
            warn!(
                room = %id,
                chunk = %owner,
                "owning chunk missing, room filed without chunk entry"
            );
        }

        info!(
            room = %id,
            chunk = %owner,
            members = candidate.members.len(),
            size = ?geometry.obb.size,
            "room created"
        );
        self.rooms.insert(
            id,
            Room {
                id,
                members: candidate.members,
                chunk: owner,
                geometry,
                enclosed: true,
                window_count: windows,
                door_count: doors,
                environment: EnvironmentAttributes::from_counts(windows, doors),
                adjacency_snapshot: candidate.adjacency_snapshot,
                materialized,
                created_tick: tick,
                updated_tick: tick,
            },
        );
        self.cache_dirty = true;
        Ok(CommitReceipt {
            room_id: id,
            materialized,
        })
    }

    fn commit_gates(
        &self,
        candidate: &RoomCandidate,
        owner: ChunkCoord,
        chunks: &SpatialChunkIndex,
        ctx: &EvaluationContext<'_>,
    ) -> Result<RoomGeometry, RoomRejection> {
        let config: &RoomConfig = ctx.config;
        let min = config.connectivity.min_room_members;
        if candidate.members.len() < min {
            return Err(RoomRejection::TooFewMembers {
                count: candidate.members.len(),
                min,
            });
        }

        let current = ctx.adjacency.revision();
        let gone = candidate.missing.len()
            + candidate
                .members
                .iter()
                .filter(|&&id| !ctx.instances.contains(id))
                .count();
        if candidate.revision != current || gone > 0 {
            return Err(RoomRejection::StaleSnapshot {
                evaluated: candidate.revision,
                current,
                missing: gone,
            });
        }

        if !candidate.cyclic {
            return Err(RoomRejection::NoCycle);
        }
        if candidate.junctions.len() < MIN_CORNERS {
            return Err(RoomRejection::TooFewCorners {
                corners: candidate.junctions.len(),
            });
        }

        let limit = config.chunks.max_rooms_per_chunk;
        if chunks.room_count(owner) >= limit {
            return Err(RoomRejection::ChunkFull {
                chunk: owner,
                limit,
            });
        }

        let set = candidate.member_set();
        let ratio = config.bounds.max_overlap_ratio;
        for room_id in chunks.rooms(owner) {
            if let Some(conflict) = self
                .rooms
                .get(&room_id)
                .and_then(|room| membership_conflict(&set, room, ratio))
            {
                return Err(conflict);
            }
        }
        if let Some(conflict) = self
            .rooms
            .values()
            .find_map(|room| membership_conflict(&set, room, ratio))
        {
            return Err(conflict);
        }

        let geometry = candidate
            .geometry
            .clone()
            .map_err(RoomRejection::InvalidGeometry)?;
        check_bounds(&geometry, &config.bounds)?;
        Ok(geometry)
    }

    /// Remove a room outright. Returns it if it existed.
    pub fn remove_room(&mut self, id: RoomId, chunks: &mut SpatialChunkIndex) -> Option<Room> {
        let room = self.rooms.remove(&id)?;
        chunks.detach_room(room.chunk, id);
        self.cache_dirty = true;
        Some(room)
    }

    /// Re-check a room after its membership or connectivity changed.
    pub fn reevaluate(
        &mut self,
        id: RoomId,
        chunks: &mut SpatialChunkIndex,
        ctx: &EvaluationContext<'_>,
        tick: u64,
    ) -> ReevaluateOutcome {
        let Some(room) = self.rooms.get(&id) else {
            return ReevaluateOutcome::Missing;
        };
        let candidate = RoomCandidate::evaluate(&room.members, ctx);

        let min = ctx.config.connectivity.min_room_members;
        let verdict = if candidate.members.len() < min {
            Err(RoomRejection::TooFewMembers {
                count: candidate.members.len(),
                min,
            })
        } else if !candidate.cyclic {
            Err(RoomRejection::NoCycle)
        } else if candidate.junctions.len() < MIN_CORNERS {
            Err(RoomRejection::TooFewCorners {
                corners: candidate.junctions.len(),
            })
        } else {
            candidate
                .geometry
                .clone()
                .map_err(RoomRejection::InvalidGeometry)
                .and_then(|g| check_bounds(&g, &ctx.config.bounds).map(|()| g))
        };

        match verdict {
            Ok(geometry) => {
                let (windows, doors) = candidate.opening_counts();
                if let Some(room) = self.rooms.get_mut(&id) {
                    let kept: BTreeSet<InstanceId> = candidate.member_set();
                    room.adjacency_snapshot.retain(|member, _| kept.contains(member));
                    for snaps in room.adjacency_snapshot.values_mut() {
                        snaps.retain(|c| kept.contains(&c.target));
                    }
                    room.members = candidate.members;
                    room.geometry = geometry;
                    room.window_count = windows;
                    room.door_count = doors;
                    room.environment = EnvironmentAttributes::from_counts(windows, doors);
                    room.updated_tick = tick;
                }
                self.cache_dirty = true;
                debug!(room = %id, "room re-validated");
                ReevaluateOutcome::Updated { room_id: id }
            }
            Err(reason) => match self.remove_room(id, chunks) {
                Some(room) => {
                    info!(room = %id, %reason, "room destroyed");
                    ReevaluateOutcome::Destroyed { room, reason }
                }
                None => ReevaluateOutcome::Missing,
            },
        }
    }

    /// Drop rooms left with fewer than `min_members` live members (members
    /// that vanished without a removal event).
    pub fn cleanup_invalid(
        &mut self,
        instances: &InstanceTable,
        chunks: &mut SpatialChunkIndex,
        min_members: usize,
    ) -> Vec<Room> {
        let doomed: Vec<RoomId> = self
            .rooms
            .values()
            .filter(|r| r.members.iter().filter(|&&m| instances.contains(m)).count() < min_members)
            .map(|r| r.id)
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| {
                let room = self.remove_room(id, chunks);
                if room.is_some() {
                    info!(room = %id, "removing room with vanished members");
                }
                room
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Point queries
    // -----------------------------------------------------------------------

    /// Exact scan: the lowest-id enclosed room whose box contains `point`.
    pub fn room_containing(&self, point: Vec3) -> Option<RoomId> {
        self.rooms
            .values()
            .find(|r| r.enclosed && r.contains_point(point))
            .map(|r| r.id)
    }

    /// Cached lookup. Rebuilds a dirty cache if the rebuild interval has
    /// elapsed; otherwise answers from the current (possibly stale) grid.
    pub fn room_at(&mut self, point: Vec3, tick: u64) -> Option<RoomId> {
        let interval = self.cache_params.rebuild_interval_ticks;
        let due = self
            .last_cache_rebuild
            .is_none_or(|last| tick >= last.saturating_add(interval));
        if self.cache_dirty && due {
            self.force_cache_rebuild(tick);
        }
        let id = *self.position_cache.get(&self.cell_of(point))?;
        let room = self.rooms.get(&id)?;
        let aabb = &room.geometry.aabb;
        (point.y >= aabb.min.y && point.y <= aabb.max.y).then_some(id)
    }

    pub fn is_position_indoor(&mut self, point: Vec3, tick: u64) -> bool {
        self.room_at(point, tick).is_some()
    }

    pub fn mark_cache_dirty(&mut self) {
        self.cache_dirty = true;
    }

    /// Rebuild the position grid now.
    pub fn force_cache_rebuild(&mut self, tick: u64) {
        self.position_cache.clear();
        let cell = self.cache_params.grid_cell_size;
        for room in self.rooms.values().filter(|r| r.enclosed) {
            let aabb = &room.geometry.aabb;
            let sample_y = room.center().y;
            let (x0, z0) = self.cell_of(aabb.min);
            let (x1, z1) = self.cell_of(aabb.max);
            for x in x0..=x1 {
                for z in z0..=z1 {
                    let sample = Vec3::new(x as f32 * cell, sample_y, z as f32 * cell);
                    if room.geometry.obb.contains(sample) {
                        self.position_cache.entry((x, z)).or_insert(room.id);
                    }
                }
            }
        }
        self.cache_dirty = false;
        self.last_cache_rebuild = Some(tick);
        debug!(cells = self.position_cache.len(), "position cache rebuilt");
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            rooms: self.rooms.len(),
            enclosed_rooms: self.rooms.values().filter(|r| r.enclosed).count(),
            cached_cells: self.position_cache.len(),
            dirty: self.cache_dirty,
        }
    }

    fn cell_of(&self, point: Vec3) -> (i32, i32) {
        let cell = self.cache_params.grid_cell_size;
        (
            (point.x / cell).round() as i32,
            (point.z / cell).round() as i32,
        )
    }
}
