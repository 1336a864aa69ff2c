// Data-driven room-detection configuration.
//
// Every tolerance and threshold the detector uses lives in `RoomConfig`,
// loaded from JSON. The detector never hard-codes its empirically chosen
// constants (snap distances, overlap ratio, volume bounds); it reads them
// from here so they can be tuned without recompilation.
//
// Parameters are grouped into nested structs: `SnapParams`,
// `AdjacencyParams`, `ChunkParams`, `ConnectivityParams`, `GeometryParams`
// (with per-kind `FootprintDefaults`), `RoomBounds` and `CacheParams`.
// `#[serde(default)]` on every group means a partial JSON document only
// overrides the fields it names.
//
// See also: `sim.rs` which owns the `RoomConfig` as part of `EnclosureSim`,
// `snap.rs` for `SnapCompatibility`, `instance.rs` for `Footprint`.
//
// **Critical constraint: determinism.** Config values feed directly into
// detection. Authority and replicas must use identical configs.

use crate::instance::Footprint;
use crate::snap::SnapCompatibility;
use crate::types::StructuralKind;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the enclosure detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Wall-clock length of one sim tick. All intervals below are in ticks;
    /// `ticks_to_seconds` converts for logs and hosts.
    pub tick_duration_ms: u32,
    pub snap: SnapParams,
    pub adjacency: AdjacencyParams,
    pub chunks: ChunkParams,
    pub connectivity: ConnectivityParams,
    pub geometry: GeometryParams,
    pub bounds: RoomBounds,
    pub cache: CacheParams,
    /// Ticks between periodic refreshes of every active room (environment
    /// attributes and membership integrity).
    pub room_refresh_interval_ticks: u64,
    /// Upper bound on room snapshots exported for replicas per request.
    pub max_replicated_rooms: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick_duration_ms: 100,
            snap: SnapParams::default(),
            adjacency: AdjacencyParams::default(),
            chunks: ChunkParams::default(),
            connectivity: ConnectivityParams::default(),
            geometry: GeometryParams::default(),
            bounds: RoomBounds::default(),
            cache: CacheParams::default(),
            room_refresh_interval_ticks: 20,
            max_replicated_rooms: 100,
        }
    }
}

impl RoomConfig {
    /// Parse a (possibly partial) JSON config document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Wall-clock seconds covered by `ticks` sim ticks.
    pub fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        ticks as f64 * f64::from(self.tick_duration_ms) / 1000.0
    }
}

/// Snap matching tolerances.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapParams {
    /// Symmetric type-compatibility rules between snap point tags.
    pub compatibility: SnapCompatibility,
    /// Secondary radius around the primary target point within which other
    /// candidates count as "related".
    pub group_radius: f32,
    /// Search radius used when snapshotting a room member's neighbor snaps.
    pub member_search_radius: f32,
    /// Maximum number of handles a spatial query returns.
    pub max_query_results: usize,
    /// Register adjacency edges automatically when a placed instance is in
    /// snap contact with an existing one.
    pub auto_connect_on_place: bool,
    /// Centers farther apart than this are never in snap contact.
    pub auto_connect_max_center_distance: f32,
    /// Multiplier on the larger snap radius for the contact test.
    pub contact_slack: f32,
}

impl Default for SnapParams {
    fn default() -> Self {
        Self {
            compatibility: SnapCompatibility::default(),
            group_radius: 1.0,
            member_search_radius: 10.0,
            max_query_results: 32,
            auto_connect_on_place: true,
            auto_connect_max_center_distance: 5.0,
            contact_slack: 1.5,
        }
    }
}

/// Adjacency graph limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjacencyParams {
    /// Maximum neighbors per instance; registrations beyond it are skipped.
    pub max_connections_per_instance: usize,
}

impl Default for AdjacencyParams {
    fn default() -> Self {
        Self {
            max_connections_per_instance: 32,
        }
    }
}

/// Spatial chunking and observer-driven activation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkParams {
    /// Edge length of a chunk cell in world units.
    pub chunk_size: f32,
    /// Chunks within this Chebyshev distance of an observer's chunk are active.
    pub active_radius: u32,
    /// Ticks between activation polls.
    pub activation_poll_interval_ticks: u64,
    /// Commits into a chunk already holding this many rooms are rejected.
    pub max_rooms_per_chunk: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 50.0,
            active_radius: 2,
            activation_poll_interval_ticks: 10,
            max_rooms_per_chunk: 20,
        }
    }
}

/// Union-Find / cycle search parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityParams {
    /// Instances whose centers are at most this far apart are treated as
    /// connected even without a registered adjacency edge.
    pub fallback_edge_distance: f32,
    /// Smallest component or cycle that can enclose a room.
    pub min_room_members: usize,
}

impl Default for ConnectivityParams {
    fn default() -> Self {
        Self {
            fallback_edge_distance: 3.0,
            min_room_members: 3,
        }
    }
}

/// Footprint sizes used when an instance carries no explicit footprint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FootprintDefaults {
    pub wall: Footprint,
    pub door: Footprint,
    pub window: Footprint,
    pub other: Footprint,
}

impl Default for FootprintDefaults {
    fn default() -> Self {
        Self {
            wall: Footprint::new(2.0, 3.0, 0.2),
            door: Footprint::new(1.0, 2.5, 0.2),
            window: Footprint::new(1.5, 1.0, 0.2),
            other: Footprint::new(2.0, 3.0, 0.2),
        }
    }
}

impl FootprintDefaults {
    pub fn for_kind(&self, kind: StructuralKind) -> Footprint {
        match kind {
            StructuralKind::Wall => self.wall,
            StructuralKind::Door => self.door,
            StructuralKind::Window => self.window,
            StructuralKind::Floor | StructuralKind::Other => self.other,
        }
    }
}

/// Geometry engine tolerances.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryParams {
    pub footprints: FootprintDefaults,
    /// Plan-view corners closer than this are merged before the hull.
    pub dedup_epsilon: f32,
    /// Room height never drops below this.
    pub min_room_height: f32,
    /// Members whose height differs from the average by more than this
    /// make the room invalid.
    pub max_vertical_deviation: f32,
    /// Members farther than this from the plan-view centroid make the room
    /// invalid.
    pub max_member_spread: f32,
    /// Junctions between consecutive cycle members closer than this count
    /// as one corner.
    pub junction_merge_distance: f32,
}

impl Default for GeometryParams {
    fn default() -> Self {
        Self {
            footprints: FootprintDefaults::default(),
            dedup_epsilon: 0.1,
            min_room_height: 2.0,
            max_vertical_deviation: 2.0,
            max_member_spread: 30.0,
            junction_merge_distance: 0.5,
        }
    }
}

/// Acceptance bounds for a committed room.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomBounds {
    pub min_volume: f32,
    pub max_volume: f32,
    /// Each horizontal side of the oriented box must be at least this long.
    pub min_side_length: f32,
    /// Candidates sharing at least this fraction of the smaller member set
    /// with an existing room are rejected.
    pub max_overlap_ratio: f32,
}

impl Default for RoomBounds {
    fn default() -> Self {
        Self {
            min_volume: 4.0,
            max_volume: 1000.0,
            min_side_length: 1.0,
            max_overlap_ratio: 0.5,
        }
    }
}

/// Point-containment cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheParams {
    /// Edge length of a position-cache grid cell.
    pub grid_cell_size: f32,
    /// A dirty cache is rebuilt on query at most once per this many ticks.
    pub rebuild_interval_ticks: u64,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            grid_cell_size: 1.0,
            rebuild_interval_ticks: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SnapType;

    #[test]
    fn default_config_serializes() {
        let config = RoomConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored: RoomConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.chunks.chunk_size, restored.chunks.chunk_size);
        assert_eq!(
            config.connectivity.fallback_edge_distance,
            restored.connectivity.fallback_edge_distance
        );
        assert_eq!(config.bounds.max_volume, restored.bounds.max_volume);
        assert_eq!(config.geometry.footprints.door, restored.geometry.footprints.door);
        assert!(
            restored
                .snap
                .compatibility
                .are_compatible(SnapType::Door, SnapType::Wall)
        );
    }

    #[test]
    fn config_loads_from_partial_json_string() {
        let json = r#"{
            "chunks": { "chunk_size": 16.0 },
            "bounds": { "max_overlap_ratio": 0.75 },
            "connectivity": { "fallback_edge_distance": 1.5 }
        }"#;
        let config = RoomConfig::from_json(json).unwrap();
        assert_eq!(config.chunks.chunk_size, 16.0);
        // Unnamed fields in a named group keep their defaults.
        assert_eq!(config.chunks.max_rooms_per_chunk, 20);
        assert_eq!(config.bounds.max_overlap_ratio, 0.75);
        assert_eq!(config.bounds.min_volume, 4.0);
        assert_eq!(config.connectivity.fallback_edge_distance, 1.5);
        assert_eq!(config.connectivity.min_room_members, 3);
        assert_eq!(config.max_replicated_rooms, 100);
    }

    #[test]
    fn config_rejects_malformed_json() {
        assert!(RoomConfig::from_json("{ \"chunks\": 5 }").is_err());
    }

    #[test]
    fn footprint_defaults_cover_every_kind() {
        let defaults = FootprintDefaults::default();
        assert_eq!(defaults.for_kind(StructuralKind::Wall).height, 3.0);
        assert_eq!(defaults.for_kind(StructuralKind::Door).width, 1.0);
        assert_eq!(defaults.for_kind(StructuralKind::Window).height, 1.0);
        assert_eq!(defaults.for_kind(StructuralKind::Floor), defaults.other);
    }

    #[test]
    fn ticks_convert_through_tick_duration() {
        let mut config = RoomConfig::default();
        assert_eq!(config.ticks_to_seconds(0), 0.0);
        assert!((config.ticks_to_seconds(25) - 2.5).abs() < 1e-9);
        config.tick_duration_ms = 50;
        assert!((config.ticks_to_seconds(20) - 1.0).abs() < 1e-9);
    }
}
