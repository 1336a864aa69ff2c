// Core types shared across the room-detection core.
//
// Defines the stable identifiers (`InstanceId`, `RoomId`), the chunk grid
// coordinate (`ChunkCoord`), the rigid transform value type (`Pose`), and
// the small classification enums (`StructuralKind`, `SnapType`, `KindMask`).
// All types derive or implement `Serialize`/`Deserialize` for save/load and
// replica snapshots.
//
// Geometry uses `glam` vectors as immutable values. Composition of
// transforms is explicit through `Pose` methods; nothing mutates a pose in
// place.
//
// **Critical constraint: determinism.** IDs are plain integers supplied by
// the owning simulation (instances) or allocated monotonically by the
// registry (rooms). They order totally so `BTreeMap` iteration is stable.

use glam::{Quat, Vec2, Vec3};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! compact_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

compact_id!(
    /// Stable identifier of a placed building instance. Assigned by the
    /// owning simulation; must survive serialization boundaries.
    InstanceId(u64)
);
compact_id!(
    /// Identifier of a committed room. Allocated monotonically by the
    /// registry and never reused.
    RoomId(u32)
);
compact_id!(
    /// Position of an observer in the latest `SetObservers` list.
    ObserverId(u32)
);

// ---------------------------------------------------------------------------
// Chunk coordinates
// ---------------------------------------------------------------------------

/// Integer cell of the horizontal chunk grid: `(floor(x / size), floor(z / size))`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk cell containing `position` for the given chunk edge length.
    pub fn containing(position: Vec3, chunk_size: f32) -> Self {
        Self {
            x: (position.x / chunk_size).floor() as i32,
            z: (position.z / chunk_size).floor() as i32,
        }
    }

    /// Chebyshev distance in chunk units.
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        (self.x - other.x)
            .unsigned_abs()
            .max((self.z - other.z).unsigned_abs())
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.x, self.z)
    }
}

// Serialized as an "x:z" string so chunk coordinates work as JSON map keys.
impl Serialize for ChunkCoord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChunkCoord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let (x, z) = s
            .split_once(':')
            .ok_or_else(|| serde::de::Error::custom(format!("invalid chunk coord: {s}")))?;
        let x = x.parse().map_err(serde::de::Error::custom)?;
        let z = z.parse().map_err(serde::de::Error::custom)?;
        Ok(Self { x, z })
    }
}

// ---------------------------------------------------------------------------
// Poses
// ---------------------------------------------------------------------------

/// World-space rigid transform (no scale).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Pose at `position` rotated by `yaw` radians about +Y.
    pub fn from_yaw(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            rotation: Quat::from_rotation_y(yaw),
        }
    }

    /// Maps a point from this pose's local space into world space.
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }

    /// Composes a child pose expressed in this pose's local space.
    pub fn compose(&self, child: &Pose) -> Pose {
        Pose {
            position: self.transform_point(child.position),
            rotation: (self.rotation * child.rotation).normalize(),
        }
    }
}

/// Drops the vertical axis: world `(x, y, z)` becomes plan `(x, z)`.
pub fn flatten(v: Vec3) -> Vec2 {
    Vec2::new(v.x, v.z)
}

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// What a building instance is, structurally. Only the wall-like kinds take
/// part in room detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StructuralKind {
    Wall,
    Door,
    Window,
    Floor,
    Other,
}

impl StructuralKind {
    pub const ALL: [StructuralKind; 5] = [
        StructuralKind::Wall,
        StructuralKind::Door,
        StructuralKind::Window,
        StructuralKind::Floor,
        StructuralKind::Other,
    ];

    /// Wall, door and window pieces can bound a room.
    pub fn is_wall_like(self) -> bool {
        matches!(
            self,
            StructuralKind::Wall | StructuralKind::Door | StructuralKind::Window
        )
    }

    fn bit(self) -> u8 {
        match self {
            StructuralKind::Wall => 1 << 0,
            StructuralKind::Door => 1 << 1,
            StructuralKind::Window => 1 << 2,
            StructuralKind::Floor => 1 << 3,
            StructuralKind::Other => 1 << 4,
        }
    }
}

/// Set of structural kinds, used as the layer filter of spatial queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KindMask(u8);

impl KindMask {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b1_1111);
    pub const WALL_LIKE: Self = Self(0b0_0111);

    pub fn only(kind: StructuralKind) -> Self {
        Self(kind.bit())
    }

    pub fn with(self, kind: StructuralKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn contains(self, kind: StructuralKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

/// Type tag of a snap point. Compatibility between tags is configured in
/// `SnapCompatibility` (see `snap.rs`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SnapType {
    None,
    Foundation,
    Floor,
    Wall,
    Ceiling,
    Roof,
    Socket,
    Pillar,
    Door,
    Window,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_coord_floors_negative_positions() {
        let c = ChunkCoord::containing(Vec3::new(-0.5, 10.0, 49.9), 50.0);
        assert_eq!(c, ChunkCoord::new(-1, 0));
        let c = ChunkCoord::containing(Vec3::new(-50.0, 0.0, -50.1), 50.0);
        assert_eq!(c, ChunkCoord::new(-1, -2));
    }

    #[test]
    fn chunk_coord_serializes_as_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(ChunkCoord::new(-3, 7), 1u32);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"-3:7":1}"#);
        let restored: std::collections::BTreeMap<ChunkCoord, u32> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(restored, map);
    }

    #[test]
    fn chunk_coord_rejects_malformed_string() {
        let result: Result<ChunkCoord, _> = serde_json::from_str(r#""12""#);
        assert!(result.is_err());
    }

    #[test]
    fn chebyshev_distance_takes_larger_axis() {
        let a = ChunkCoord::new(0, 0);
        assert_eq!(a.chebyshev_distance(ChunkCoord::new(2, -1)), 2);
        assert_eq!(a.chebyshev_distance(ChunkCoord::new(-1, 3)), 3);
    }

    #[test]
    fn pose_transform_applies_rotation_then_offset() {
        let pose = Pose::from_yaw(Vec3::new(10.0, 0.0, 0.0), std::f32::consts::FRAC_PI_2);
        let p = pose.transform_point(Vec3::new(1.0, 0.0, 0.0));
        // +90° about Y maps +X to -Z.
        assert!((p - Vec3::new(10.0, 0.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn pose_compose_matches_sequential_transform() {
        let parent = Pose::from_yaw(Vec3::new(1.0, 2.0, 3.0), 0.7);
        let child = Pose::from_yaw(Vec3::new(0.5, 0.0, -2.0), -0.3);
        let composed = parent.compose(&child);
        let local = Vec3::new(0.25, 1.0, 0.75);
        let expected = parent.transform_point(child.transform_point(local));
        assert!((composed.transform_point(local) - expected).length() < 1e-5);
    }

    #[test]
    fn kind_mask_membership() {
        assert!(KindMask::WALL_LIKE.contains(StructuralKind::Door));
        assert!(!KindMask::WALL_LIKE.contains(StructuralKind::Floor));
        let mask = KindMask::only(StructuralKind::Floor).with(StructuralKind::Wall);
        assert!(mask.contains(StructuralKind::Wall));
        assert!(!mask.contains(StructuralKind::Window));
        for kind in StructuralKind::ALL {
            assert!(KindMask::ALL.contains(kind));
            assert!(!KindMask::NONE.contains(kind));
            assert_eq!(KindMask::WALL_LIKE.contains(kind), kind.is_wall_like());
        }
    }
}
