// enclosure_sim: headless room enclosure detection.
//
// Detects when placed structural pieces (walls, doors, windows) close a
// loop, computes the enclosed room's minimum-area oriented bounding box,
// and keeps rooms consistent as pieces are placed, removed, connected and
// disconnected. No engine dependencies: spatial queries come in through a
// trait and every lifecycle change goes out as an event.
//
// Module overview:
// - `sim.rs`:          EnclosureSim composition root, tick loop, detection flow.
// - `command.rs`:      RoomCommand / RoomAction: the only inputs.
// - `event.rs`:        EventQueue (housekeeping schedule) + RoomEvent output.
// - `config.rs`:       RoomConfig: every threshold and tolerance, JSON-loadable.
// - `types.rs`:        Ids, ChunkCoord, Pose, StructuralKind, KindMask, SnapType.
// - `instance.rs`:     BuildingInstance, Footprint and the InstanceTable arena.
// - `spatial.rs`:      SpatialQuery trait (sphere overlap) + brute-force impl.
// - `snap.rs`:         Snap points, compatibility rules, candidate matching.
// - `adjacency.rs`:    Bidirectional bounded neighbor lists with a revision counter.
// - `chunk.rs`:        Fixed-size spatial chunks, room filing, observer activation.
// - `connectivity.rs`: Union-Find components and BFS minimal cycles.
// - `geometry.rs`:     Convex hull, rotating calipers, room boxes.
// - `room.rs`:         Room, RoomSnapshot, parallel candidate evaluation.
// - `registry.rs`:     RoomRegistry: commit gates, re-evaluation, position cache.
// - `replica.rs`:      ReplicaRooms: read-only view built from snapshots.
//
// Logging goes through `tracing`; this crate never installs a subscriber.
//
// **Critical constraint: determinism.** Given the same config and command
// stream, two sims produce the same rooms, ids and events. Authoritative
// state lives in `BTreeMap`/`BTreeSet`; the only hash map is the transient
// position cache, which is never iterated for output.

pub mod adjacency;
pub mod chunk;
pub mod command;
pub mod config;
pub mod connectivity;
pub mod event;
pub mod geometry;
pub mod instance;
pub mod registry;
pub mod replica;
pub mod room;
pub mod sim;
pub mod snap;
pub mod spatial;
pub mod types;
