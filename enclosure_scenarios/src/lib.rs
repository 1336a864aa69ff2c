// Test-support driver for end-to-end room detection scenarios.
//
// Lays out walls in common shapes (squares, triangles, open "U"s) and wraps
// a real `EnclosureSim` in a synchronous, test-friendly API: each helper
// issues one batch of commands at the next tick and returns the events that
// batch produced. Everything else runs through the same `step()` path a
// host would use.
//
// Walls carry a `Wall` snap point at each end of their local X axis, so
// touching ends auto-connect on placement exactly as authored pieces would.
//
// See also: `tests/room_lifecycle.rs` for the scenarios themselves.

use enclosure_sim::command::{RoomAction, RoomCommand};
use enclosure_sim::config::RoomConfig;
use enclosure_sim::event::{RoomEvent, RoomEventKind};
use enclosure_sim::instance::{BuildingInstance, Footprint};
use enclosure_sim::room::RoomSnapshot;
use enclosure_sim::sim::EnclosureSim;
use enclosure_sim::snap::SnapPoint;
use enclosure_sim::types::{InstanceId, Pose, RoomId, SnapType, StructuralKind};
use glam::{Vec2, Vec3};
use std::f32::consts::FRAC_PI_2;

/// Snap radius of scenario walls. Small enough that only touching ends
/// connect.
pub const WALL_SNAP_RADIUS: f32 = 0.5;
pub const WALL_HEIGHT: f32 = 3.0;
pub const WALL_THICKNESS: f32 = 0.2;

/// Install a `tracing` subscriber honouring `RUST_LOG`, once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Layouts
// ---------------------------------------------------------------------------

fn snap_type_for(kind: StructuralKind) -> SnapType {
    match kind {
        StructuralKind::Door => SnapType::Door,
        StructuralKind::Window => SnapType::Window,
        StructuralKind::Floor => SnapType::Floor,
        StructuralKind::Wall | StructuralKind::Other => SnapType::Wall,
    }
}

/// A piece spanning `from` → `to` on the ground plane, centered between
/// them, with a snap point at each end.
pub fn segment(id: u64, kind: StructuralKind, from: Vec2, to: Vec2) -> BuildingInstance {
    let dir = to - from;
    let width = dir.length();
    let mid = (from + to) * 0.5;
    // Local +X maps to (cos yaw, -sin yaw) on the plane.
    let yaw = (-dir.y).atan2(dir.x);
    let half = width * 0.5;
    let snap = snap_type_for(kind);
    BuildingInstance::new(
        InstanceId(id),
        Pose::from_yaw(Vec3::new(mid.x, 0.0, mid.y), yaw),
        kind,
    )
    .with_footprint(Footprint::new(width, WALL_HEIGHT, WALL_THICKNESS))
    .with_snap_points(vec![
        SnapPoint::new(snap, Vec3::new(-half, 0.0, 0.0)).with_radius(WALL_SNAP_RADIUS),
        SnapPoint::new(snap, Vec3::new(half, 0.0, 0.0)).with_radius(WALL_SNAP_RADIUS),
    ])
}

pub fn wall(id: u64, from: Vec2, to: Vec2) -> BuildingInstance {
    segment(id, StructuralKind::Wall, from, to)
}

/// Walls along a closed polygon, ids `first_id..`, one per edge.
pub fn polygon_walls(first_id: u64, corners: &[Vec2]) -> Vec<BuildingInstance> {
    (0..corners.len())
        .map(|i| {
            wall(
                first_id + i as u64,
                corners[i],
                corners[(i + 1) % corners.len()],
            )
        })
        .collect()
}

/// Corners of an axis-aligned square, counter-clockwise from the min
/// corner: south, east, north, west walls in that order.
pub fn square_corners(center: Vec2, side: f32) -> [Vec2; 4] {
    let h = side * 0.5;
    [
        center + Vec2::new(-h, -h),
        center + Vec2::new(h, -h),
        center + Vec2::new(h, h),
        center + Vec2::new(-h, h),
    ]
}

pub fn square_walls(first_id: u64, center: Vec2, side: f32) -> Vec<BuildingInstance> {
    polygon_walls(first_id, &square_corners(center, side))
}

/// Equilateral triangle centered on `center`.
pub fn triangle_walls(first_id: u64, center: Vec2, side: f32) -> Vec<BuildingInstance> {
    let r = side / 3f32.sqrt();
    let corners: Vec<Vec2> = (0..3)
        .map(|i| {
            let a = FRAC_PI_2 + i as f32 * std::f32::consts::TAU / 3.0;
            center + Vec2::new(a.cos(), a.sin()) * r
        })
        .collect();
    polygon_walls(first_id, &corners)
}

/// A square missing its north wall.
pub fn open_u_walls(first_id: u64, center: Vec2, side: f32) -> Vec<BuildingInstance> {
    let mut walls = square_walls(first_id, center, side);
    walls.remove(2);
    walls
}

/// A floor piece centered at `center`. It carries no snap points, so it
/// only relates to walls through the connectivity distance fallback.
pub fn floor_tile(id: u64, center: Vec2) -> BuildingInstance {
    BuildingInstance::new(
        InstanceId(id),
        Pose::from_yaw(Vec3::new(center.x, 0.0, center.y), 0.0),
        StructuralKind::Floor,
    )
}

/// Rebuild `instance` as another structural kind (door, window) with the
/// matching snap type.
pub fn as_kind(instance: &BuildingInstance, kind: StructuralKind) -> BuildingInstance {
    let mut out = instance.clone();
    out.kind = kind;
    let snap = snap_type_for(kind);
    for point in &mut out.snap_points {
        point.snap_type = snap;
    }
    out
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct Scenario {
    pub sim: EnclosureSim,
    /// Every event emitted so far, in order.
    pub history: Vec<RoomEvent>,
}

impl Scenario {
    pub fn new() -> Self {
        Self::with_config(RoomConfig::default())
    }

    pub fn with_config(config: RoomConfig) -> Self {
        init_tracing();
        Self {
            sim: EnclosureSim::new(config),
            history: Vec::new(),
        }
    }

    /// Apply `actions` at the next tick and return the events they caused.
    pub fn run(&mut self, actions: Vec<RoomAction>) -> Vec<RoomEvent> {
        let tick = self.sim.tick + 1;
        let commands: Vec<RoomCommand> = actions
            .into_iter()
            .map(|action| RoomCommand::new(tick, action))
            .collect();
        let events = self.sim.step(&commands, tick).events;
        self.history.extend(events.iter().cloned());
        events
    }

    /// Advance the clock without input.
    pub fn advance(&mut self, ticks: u64) -> Vec<RoomEvent> {
        let target = self.sim.tick + ticks;
        let events = self.sim.step(&[], target).events;
        self.history.extend(events.iter().cloned());
        events
    }

    pub fn place(&mut self, instances: Vec<BuildingInstance>) -> Vec<RoomEvent> {
        self.run(
            instances
                .into_iter()
                .map(|instance| RoomAction::InstancePlaced { instance })
                .collect(),
        )
    }

    pub fn remove(&mut self, id: u64) -> Vec<RoomEvent> {
        self.run(vec![RoomAction::InstanceRemoved {
            id: InstanceId(id),
            former_neighbors: Vec::new(),
        }])
    }

    pub fn connect(&mut self, a: u64, b: u64) -> Vec<RoomEvent> {
        self.run(vec![RoomAction::InstancesConnected {
            a: InstanceId(a),
            b: InstanceId(b),
        }])
    }

    pub fn disconnect(&mut self, a: u64, b: u64) -> Vec<RoomEvent> {
        self.run(vec![RoomAction::InstancesDisconnected {
            a: InstanceId(a),
            b: InstanceId(b),
        }])
    }

    pub fn observe(&mut self, positions: Vec<Vec3>) -> Vec<RoomEvent> {
        self.run(vec![RoomAction::SetObservers { positions }])
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Event helpers
// ---------------------------------------------------------------------------

pub fn created_rooms(events: &[RoomEvent]) -> Vec<RoomSnapshot> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            RoomEventKind::RoomCreated { room } => Some(room.clone()),
            _ => None,
        })
        .collect()
}

pub fn destroyed_rooms(events: &[RoomEvent]) -> Vec<RoomId> {
    events
        .iter()
        .filter_map(|e| match e.kind {
            RoomEventKind::RoomDestroyed { room_id } => Some(room_id),
            _ => None,
        })
        .collect()
}

pub fn has_event(events: &[RoomEvent], kind: &RoomEventKind) -> bool {
    events.iter().any(|e| e.kind == *kind)
}
