// Composition root and tick loop.
//
// `EnclosureSim` owns every component of room detection: the instance table,
// the adjacency graph, the chunk index, the room registry, the scheduled
// event queue, the observer list and the authority flag. It is a function
// `(state, commands) -> (new_state, events)`: hosts feed `RoomCommand`s to
// `step()` and receive `RoomEvent`s back.
//
// ## Detection flow
//
// A placement (or an explicit connection) is the trigger:
//
//   1. Placement files the instance in its chunk and, if enabled, registers
//      adjacency edges to every nearby instance in snap contact.
//   2. The wall-like members of the trigger's chunk are pooled with those of
//      every chunk its adjacency edges reach, within twice the member
//      spread limit (cross-chunk detection).
//   3. `ConnectivityAnalyzer` finds the component holding the trigger and
//      its minimal cycles. A trigger that is not wall-like (a floor or
//      fixture placed against walls) is never a member itself; the cycles
//      run through the members of every component it touches.
//   4. Every cycle becomes a `RoomCandidate`, evaluated in parallel on the
//      rayon pool against an immutable `EvaluationContext`.
//   5. Candidates are committed serially in cycle order. Each commit sees
//      the rooms committed before it, so duplicates within one batch are
//      rejected too.
//
// Removal and disconnection run the other direction: every room that
// contained the instance (or both ends of the edge) is re-evaluated and
// either refreshed (`RoomUpdated`) or destroyed (`RoomDestroyed`).
//
// ## Filing
//
// A room whose members all share a chunk is filed there. A cross-chunk room
// is filed under the chunk containing its box center, or the trigger's
// chunk if that center chunk holds no instances.
//
// ## Periodic work
//
// Two self-rescheduling events run from construction: `ActivationPoll`
// recomputes active chunks from observer positions and (de)materializes
// their rooms, then reports observers that entered or left a room;
// `RoomRefresh` drops rooms whose members vanished without a removal
// command and re-syncs materialization flags. Rescheduling saturates at
// `u64::MAX` instead of wrapping.
//
// ## Authority
//
// A non-authoritative sim (a replica host) ignores every mutating action.
// Queries still work against whatever state it holds; see `replica.rs` for
// the snapshot-driven view.
//
// See also: `command.rs`, `event.rs`, `registry.rs`, `connectivity.rs`.
//
// **Critical constraint: determinism.** All state is in ordered
// collections, parallel evaluation preserves input order, and commits are
// serial, so identical command streams produce identical rooms and events.

use crate::adjacency::{AdjacencyGraph, ConnectionOutcome};
use crate::chunk::SpatialChunkIndex;
use crate::command::{RoomAction, RoomCommand};
use crate::config::RoomConfig;
use crate::connectivity::{ConnectivityAnalyzer, MemberSnapshot};
use crate::event::{EventQueue, RoomEvent, RoomEventKind, ScheduledEventKind};
use crate::instance::{BuildingInstance, InstanceTable};
use crate::registry::{CacheStats, ReevaluateOutcome, RoomRegistry};
use crate::room::{EvaluationContext, Room, RoomCandidate, RoomSnapshot, evaluate_all};
use crate::snap::SnapMatcher;
use crate::spatial::SpatialQuery;
use crate::types::{ChunkCoord, InstanceId, KindMask, ObserverId, RoomId, flatten};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnclosureSim {
    pub tick: u64,
    pub config: RoomConfig,
    /// Only an authoritative sim applies mutating commands.
    pub authoritative: bool,
    pub instances: InstanceTable,
    pub adjacency: AdjacencyGraph,
    pub chunks: SpatialChunkIndex,
    pub registry: RoomRegistry,
    pub event_queue: EventQueue,
    pub observers: Vec<Vec3>,
    /// Room each observer stood in at the last activation poll. Observers
    /// outdoors have no entry.
    #[serde(default)]
    pub observer_rooms: BTreeMap<ObserverId, RoomId>,
}

/// Output of one `step()`.
pub struct StepResult {
    pub events: Vec<RoomEvent>,
}

impl EnclosureSim {
    pub fn new(config: RoomConfig) -> Self {
        let mut sim = Self {
            tick: 0,
            instances: InstanceTable::new(config.snap.max_query_results),
            adjacency: AdjacencyGraph::new(config.adjacency.max_connections_per_instance),
            chunks: SpatialChunkIndex::new(config.chunks.chunk_size),
            registry: RoomRegistry::new(config.cache.clone()),
            event_queue: EventQueue::new(),
            observers: Vec::new(),
            observer_rooms: BTreeMap::new(),
            authoritative: true,
            config,
        };
        let poll = sim.activation_interval();
        let refresh = sim.refresh_interval();
        sim.event_queue.schedule(poll, ScheduledEventKind::ActivationPoll);
        sim.event_queue.schedule(refresh, ScheduledEventKind::RoomRefresh);
        sim
    }

    pub fn with_authority(mut self, authoritative: bool) -> Self {
        self.authoritative = authoritative;
        self
    }

    fn activation_interval(&self) -> u64 {
        self.config.chunks.activation_poll_interval_ticks.max(1)
    }

    fn refresh_interval(&self) -> u64 {
        self.config.room_refresh_interval_ticks.max(1)
    }

    /// Apply a batch of commands and advance to `target_tick`, processing
    /// every scheduled event up to that point.
    ///
    /// Commands must be sorted by tick. Commands with tick > `target_tick`
    /// are ignored (caller error).
    pub fn step(&mut self, commands: &[RoomCommand], target_tick: u64) -> StepResult {
        let mut events = Vec::new();
        let mut cmd_idx = 0;

        // Each pass jumps straight to the earliest pending tick (next
        // command, next scheduled event, or the target) instead of walking
        // every tick in between.
        loop {
            let next_event_tick = self.event_queue.peek_tick();
            let next_cmd_tick = commands
                .get(cmd_idx)
                .filter(|c| c.tick <= target_tick)
                .map(|c| c.tick);

            let next_tick = match (next_event_tick, next_cmd_tick) {
                (Some(et), Some(ct)) => et.min(ct).min(target_tick),
                (Some(et), None) => et.min(target_tick),
                (None, Some(ct)) => ct.min(target_tick),
                (None, None) => target_tick,
            };
            // Commands stamped in the past apply at the current tick.
            self.tick = next_tick.max(self.tick);

            // Commands for this tick go first, so a scheduled poll or refresh
            // due at the same tick sees their effects.
            while cmd_idx < commands.len() && commands[cmd_idx].tick <= self.tick {
                let cmd = &commands[cmd_idx];
                cmd_idx += 1;
                self.apply_command(cmd, &mut events);
            }

            // Handlers only reschedule strictly later, so draining
            // everything due now always terminates.
            while let Some(event) = self.event_queue.pop_if_ready(self.tick) {
                self.process_event(event.kind, &mut events);
            }

            if self.tick >= target_tick {
                break;
            }
        }

        StepResult { events }
    }

    fn apply_command(&mut self, cmd: &RoomCommand, events: &mut Vec<RoomEvent>) {
        if !self.authoritative && cmd.action.is_mutating() {
            debug!(tick = cmd.tick, action = ?cmd.action, "not authoritative, ignoring command");
            return;
        }
        match &cmd.action {
            RoomAction::InstancePlaced { instance } => {
                self.place_instance(instance.clone(), events);
            }
            RoomAction::InstanceRemoved {
                id,
                former_neighbors,
            } => {
                self.remove_instance(*id, former_neighbors, events);
            }
            RoomAction::InstancesConnected { a, b } => {
                self.connect(*a, *b, events);
            }
            RoomAction::InstancesDisconnected { a, b } => {
                self.disconnect(*a, *b, events);
            }
            RoomAction::SetObservers { positions } => {
                self.observers = positions.clone();
                self.poll_activation(events);
            }
            RoomAction::ForceCacheRebuild => {
                self.registry.force_cache_rebuild(self.tick);
            }
        }
    }

    fn process_event(&mut self, kind: ScheduledEventKind, events: &mut Vec<RoomEvent>) {
        match kind {
            ScheduledEventKind::ActivationPoll => {
                self.poll_activation(events);
                let next = self.tick.saturating_add(self.activation_interval());
                self.reschedule(next, ScheduledEventKind::ActivationPoll);
            }
            ScheduledEventKind::RoomRefresh => {
                if self.authoritative {
                    self.refresh_rooms(events);
                }
                let next = self.tick.saturating_add(self.refresh_interval());
                self.reschedule(next, ScheduledEventKind::RoomRefresh);
            }
        }
    }

    /// Queue the next run of a periodic event. At the end of the tick
    /// range there is no later tick, and the event is retired.
    fn reschedule(&mut self, next: u64, kind: ScheduledEventKind) {
        if next > self.tick {
            self.event_queue.schedule(next, kind);
        } else {
            debug!(tick = self.tick, ?kind, "tick range exhausted, retiring periodic event");
        }
    }

    fn emit(&self, events: &mut Vec<RoomEvent>, kind: RoomEventKind) {
        events.push(RoomEvent {
            tick: self.tick,
            kind,
        });
    }

    // -----------------------------------------------------------------------
    // Input handlers
    // -----------------------------------------------------------------------

    fn place_instance(&mut self, instance: BuildingInstance, events: &mut Vec<RoomEvent>) {
        let id = instance.id;
        if self.instances.contains(id) {
            debug!(instance = %id, "instance already placed, ignoring");
            return;
        }
        self.chunks.insert(id, instance.position());
        self.instances.insert(instance);

        for other in self.snap_contacts(id) {
            self.adjacency.register_connection(id, other);
        }

        self.detect_rooms(id, events);
    }

    /// Existing instances in snap contact with `id`, nearest first.
    fn snap_contacts(&self, id: InstanceId) -> Vec<InstanceId> {
        let Some(placed) = self.instances.get(id) else {
            return Vec::new();
        };
        if !self.config.snap.auto_connect_on_place {
            return Vec::new();
        }
        let snap = &self.config.snap;
        let matcher = SnapMatcher::new(&snap.compatibility, snap.group_radius);
        self.instances
            .overlap_sphere(
                placed.position(),
                snap.auto_connect_max_center_distance,
                KindMask::ALL,
            )
            .into_iter()
            .filter(|&other| other != id)
            .filter(|&other| {
                self.instances.get(other).is_some_and(|o| {
                    matcher.in_snap_contact(
                        placed,
                        o,
                        snap.auto_connect_max_center_distance,
                        snap.contact_slack,
                    )
                })
            })
            .collect()
    }

    fn remove_instance(
        &mut self,
        id: InstanceId,
        former_neighbors: &[InstanceId],
        events: &mut Vec<RoomEvent>,
    ) {
        let touched = self.adjacency.unregister(id, former_neighbors);
        let Some(instance) = self.instances.remove(id) else {
            debug!(instance = %id, scrubbed = touched.len(), "removal of unknown instance");
            return;
        };
        self.chunks.remove(id, instance.position());
        let affected = self.registry.rooms_containing_instance(id);
        self.reevaluate_rooms(&affected, events);
    }

    fn connect(&mut self, a: InstanceId, b: InstanceId, events: &mut Vec<RoomEvent>) {
        let (Some(ia), Some(ib)) = (self.instances.get(a), self.instances.get(b)) else {
            debug!(%a, %b, "connection references unknown instance");
            return;
        };
        let trigger = match (ia.kind.is_wall_like(), ib.kind.is_wall_like()) {
            (true, _) => Some(a),
            (false, true) => Some(b),
            (false, false) => None,
        };

        let outcome = self.adjacency.register_connection(a, b);
        if outcome != ConnectionOutcome::Added {
            debug!(%a, %b, %outcome, "connection did not add an edge");
            return;
        }
        if let Some(trigger) = trigger {
            self.detect_rooms(trigger, events);
        }
    }

    fn disconnect(&mut self, a: InstanceId, b: InstanceId, events: &mut Vec<RoomEvent>) {
        if !self.adjacency.disconnect(a, b) {
            return;
        }
        let affected: Vec<RoomId> = self
            .registry
            .rooms()
            .filter(|r| r.has_member(a) && r.has_member(b))
            .map(|r| r.id)
            .collect();
        self.reevaluate_rooms(&affected, events);
    }

    // -----------------------------------------------------------------------
    // Detection
    // -----------------------------------------------------------------------

    /// Chunks holding the wall-like instances reachable from `trigger` over
    /// adjacency edges, without straying farther from it than a room can
    /// span. Always includes the trigger's own chunk.
    fn reachable_chunks(&self, trigger: InstanceId) -> BTreeSet<ChunkCoord> {
        let Some(origin) = self.instances.get(trigger).map(|i| flatten(i.position())) else {
            return BTreeSet::new();
        };
        let reach = self.config.geometry.max_member_spread * 2.0;
        let mut seen = BTreeSet::from([trigger]);
        let mut queue = VecDeque::from([trigger]);
        let mut coords = BTreeSet::new();
        while let Some(id) = queue.pop_front() {
            let Some(inst) = self.instances.get(id) else {
                continue;
            };
            coords.insert(self.chunks.coordinate_of(inst.position()));
            for &n in self.adjacency.neighbors(id) {
                let in_reach = self.instances.get(n).is_some_and(|o| {
                    o.kind.is_wall_like() && flatten(o.position()).distance(origin) <= reach
                });
                if in_reach && seen.insert(n) {
                    queue.push_back(n);
                }
            }
        }
        coords
    }

    /// Wall-like members of the given chunks, each once, chunk order then
    /// placement order.
    fn pooled_members(&self, coords: &BTreeSet<ChunkCoord>) -> Vec<MemberSnapshot> {
        let mut seen = BTreeSet::new();
        coords
            .iter()
            .flat_map(|&c| self.chunks.members(c).iter().copied())
            .filter(|&id| seen.insert(id))
            .filter_map(|id| self.instances.get(id))
            .filter(|inst| inst.kind.is_wall_like())
            .map(MemberSnapshot::of)
            .collect()
    }

    fn detect_rooms(&mut self, trigger: InstanceId, events: &mut Vec<RoomEvent>) {
        let Some(trigger_inst) = self.instances.get(trigger) else {
            return;
        };
        let trigger_snapshot = MemberSnapshot::of(trigger_inst);
        let trigger_chunk = self.chunks.coordinate_of(trigger_inst.position());
        let pool = self.reachable_chunks(trigger);
        if pool.len() > 1 {
            debug!(instance = %trigger, chunks = pool.len(), "cross-chunk room search");
        }

        let members = self.pooled_members(&pool);
        let analyzer = ConnectivityAnalyzer::new(
            &self.adjacency,
            self.config.connectivity.fallback_edge_distance,
            self.config.connectivity.min_room_members,
        );
        let components = match analyzer.component_containing(&members, trigger) {
            Some(component) => vec![component],
            None => analyzer.components_touching(&members, &trigger_snapshot),
        };
        let cycles: Vec<Vec<InstanceId>> = components
            .iter()
            .flat_map(|component| analyzer.find_minimal_cycles(component, &trigger_snapshot))
            .collect();
        if cycles.is_empty() {
            return;
        }
        debug!(instance = %trigger, cycles = cycles.len(), "evaluating room candidates");

        let ctx = EvaluationContext {
            instances: &self.instances,
            adjacency: &self.adjacency,
            config: &self.config,
        };
        for candidate in evaluate_all(&cycles, &ctx) {
            let owner = owner_chunk(&self.chunks, &self.instances, &candidate, trigger_chunk);
            let Ok(receipt) =
                self.registry
                    .try_commit(candidate, owner, &mut self.chunks, &ctx, self.tick)
            else {
                continue;
            };
            if let Some(room) = self.registry.room(receipt.room_id) {
                events.push(RoomEvent {
                    tick: self.tick,
                    kind: RoomEventKind::RoomCreated {
                        room: room.snapshot(),
                    },
                });
            }
            if receipt.materialized {
                events.push(RoomEvent {
                    tick: self.tick,
                    kind: RoomEventKind::RoomMaterialized {
                        room_id: receipt.room_id,
                    },
                });
            }
        }
    }

    fn reevaluate_rooms(&mut self, ids: &[RoomId], events: &mut Vec<RoomEvent>) {
        for &id in ids {
            let ctx = EvaluationContext {
                instances: &self.instances,
                adjacency: &self.adjacency,
                config: &self.config,
            };
            match self.registry.reevaluate(id, &mut self.chunks, &ctx, self.tick) {
                ReevaluateOutcome::Updated { room_id } => {
                    self.emit(events, RoomEventKind::RoomUpdated { room_id });
                }
                ReevaluateOutcome::Destroyed { room, .. } => self.emit_destroyed(&room, events),
                ReevaluateOutcome::Missing => {}
            }
        }
    }

    fn emit_destroyed(&mut self, room: &Room, events: &mut Vec<RoomEvent>) {
        let lived = self.tick.saturating_sub(room.created_tick);
        debug!(
            room = %room.id,
            lifetime_secs = self.config.ticks_to_seconds(lived),
            "room torn down"
        );
        if room.materialized {
            self.emit(events, RoomEventKind::RoomDematerialized { room_id: room.id });
        }
        let inside: Vec<ObserverId> = self
            .observer_rooms
            .iter()
            .filter(|&(_, &r)| r == room.id)
            .map(|(&observer, _)| observer)
            .collect();
        for observer in inside {
            self.observer_rooms.remove(&observer);
            self.emit(events, RoomEventKind::ObserverExitedRoom { observer, room_id: room.id });
        }
        self.emit(events, RoomEventKind::RoomDestroyed { room_id: room.id });
    }

    // -----------------------------------------------------------------------
    // Periodic work
    // -----------------------------------------------------------------------

    fn poll_activation(&mut self, events: &mut Vec<RoomEvent>) {
        let changes = self.chunks.update_activation(
            &self.observers,
            self.config.chunks.active_radius,
            self.tick,
        );
        for coord in changes.deactivated {
            self.emit(events, RoomEventKind::ChunkDeactivated { coord });
            let rooms: Vec<RoomId> = self.chunks.rooms(coord).collect();
            for room_id in rooms {
                if self.registry.set_materialized(room_id, false) {
                    self.emit(events, RoomEventKind::RoomDematerialized { room_id });
                }
            }
        }
        for coord in changes.activated {
            self.emit(events, RoomEventKind::ChunkActivated { coord });
            let rooms: Vec<RoomId> = self.chunks.rooms(coord).collect();
            for room_id in rooms {
                if self.registry.set_materialized(room_id, true) {
                    self.emit(events, RoomEventKind::RoomMaterialized { room_id });
                }
            }
        }
        self.track_observers(events);
    }

    /// Compare each observer's room against the last poll. Exits are
    /// reported before entries, each in observer order.
    fn track_observers(&mut self, events: &mut Vec<RoomEvent>) {
        let current: BTreeMap<ObserverId, RoomId> = self
            .observers
            .iter()
            .enumerate()
            .filter_map(|(i, &position)| {
                let room_id = self.registry.room_containing(position)?;
                Some((ObserverId(i as u32), room_id))
            })
            .collect();
        let previous = std::mem::replace(&mut self.observer_rooms, current);
        for (&observer, &room_id) in &previous {
            if self.observer_rooms.get(&observer) != Some(&room_id) {
                self.emit(events, RoomEventKind::ObserverExitedRoom { observer, room_id });
            }
        }
        for (&observer, &room_id) in &self.observer_rooms {
            if previous.get(&observer) != Some(&room_id) {
                self.emit(events, RoomEventKind::ObserverEnteredRoom { observer, room_id });
            }
        }
    }

    fn refresh_rooms(&mut self, events: &mut Vec<RoomEvent>) {
        let removed = self.registry.cleanup_invalid(
            &self.instances,
            &mut self.chunks,
            self.config.connectivity.min_room_members,
        );
        for room in &removed {
            self.emit_destroyed(room, events);
        }

        let out_of_sync: Vec<(RoomId, bool)> = self
            .registry
            .rooms()
            .filter_map(|r| {
                let active = self.chunks.is_active(r.chunk);
                (r.materialized != active).then_some((r.id, active))
            })
            .collect();
        for (room_id, active) in out_of_sync {
            warn!(room = %room_id, active, "materialization out of sync, correcting");
            self.registry.set_materialized(room_id, active);
            let kind = if active {
                RoomEventKind::RoomMaterialized { room_id }
            } else {
                RoomEventKind::RoomDematerialized { room_id }
            };
            self.emit(events, kind);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.registry.room(id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.registry.rooms()
    }

    pub fn room_count(&self) -> usize {
        self.registry.len()
    }

    pub fn rooms_containing_instance(&self, id: InstanceId) -> Vec<RoomId> {
        self.registry.rooms_containing_instance(id)
    }

    pub fn is_instance_in_any_room(&self, id: InstanceId) -> bool {
        self.registry.is_instance_in_any_room(id)
    }

    /// Cached point lookup at the current tick.
    pub fn room_at(&mut self, position: Vec3) -> Option<RoomId> {
        self.registry.room_at(position, self.tick)
    }

    /// Exact point lookup, bypassing the cache.
    pub fn room_containing(&self, position: Vec3) -> Option<RoomId> {
        self.registry.room_containing(position)
    }

    pub fn is_position_indoor(&mut self, position: Vec3) -> bool {
        self.registry.is_position_indoor(position, self.tick)
    }

    /// Room the observer stood in at the last activation poll.
    pub fn observer_room(&self, observer: ObserverId) -> Option<RoomId> {
        self.observer_rooms.get(&observer).copied()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.registry.cache_stats()
    }

    /// Snapshots of rooms in active chunks, for replicas. Capped at
    /// `max_replicated_rooms`, lowest room ids first.
    pub fn room_snapshots(&self) -> Vec<RoomSnapshot> {
        self.registry
            .rooms()
            .filter(|r| self.chunks.is_active(r.chunk))
            .take(self.config.max_replicated_rooms)
            .map(Room::snapshot)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Save / load
    // -----------------------------------------------------------------------

    /// Rebuild `#[serde(skip)]` state after deserialization.
    pub fn rebuild_transient_state(&mut self) {
        self.registry.mark_cache_dirty();
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut sim: EnclosureSim = serde_json::from_str(json)?;
        sim.rebuild_transient_state();
        Ok(sim)
    }
}

/// Chunk a candidate room is filed under.
fn owner_chunk(
    chunks: &SpatialChunkIndex,
    instances: &InstanceTable,
    candidate: &RoomCandidate,
    trigger_chunk: ChunkCoord,
) -> ChunkCoord {
    let member_chunks: BTreeSet<ChunkCoord> = instances
        .resolve(&candidate.members)
        .map(|inst| chunks.coordinate_of(inst.position()))
        .collect();
    if member_chunks.len() == 1 {
        return member_chunks.into_iter().next().unwrap_or(trigger_chunk);
    }
    match &candidate.geometry {
        Ok(geometry) => {
            let center = chunks.coordinate_of(geometry.obb.center);
            if !chunks.members(center).is_empty() {
                center
            } else {
                trigger_chunk
            }
        }
        Err(_) => trigger_chunk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Footprint;
    use crate::snap::SnapPoint;
    use crate::types::{Pose, SnapType, StructuralKind};
    use std::f32::consts::FRAC_PI_2;

    fn wall(id: u64, x: f32, z: f32, yaw: f32, width: f32) -> BuildingInstance {
        let hw = width * 0.5;
        BuildingInstance::new(
            InstanceId(id),
            Pose::from_yaw(Vec3::new(x, 0.0, z), yaw),
            StructuralKind::Wall,
        )
        .with_footprint(Footprint::new(width, 3.0, 0.2))
        .with_snap_points(vec![
            SnapPoint::new(SnapType::Wall, Vec3::new(-hw, 0.0, 0.0)).with_radius(0.5),
            SnapPoint::new(SnapType::Wall, Vec3::new(hw, 0.0, 0.0)).with_radius(0.5),
        ])
    }

    fn square(base: u64, cx: f32, cz: f32, s: f32) -> Vec<BuildingInstance> {
        let h = s * 0.5;
        vec![
            wall(base, cx, cz - h, 0.0, s),
            wall(base + 1, cx + h, cz, FRAC_PI_2, s),
            wall(base + 2, cx, cz + h, 0.0, s),
            wall(base + 3, cx - h, cz, FRAC_PI_2, s),
        ]
    }

    fn place_all(tick: u64, walls: Vec<BuildingInstance>) -> Vec<RoomCommand> {
        walls
            .into_iter()
            .map(|instance| RoomCommand::new(tick, RoomAction::InstancePlaced { instance }))
            .collect()
    }

    fn created(events: &[RoomEvent]) -> Vec<RoomId> {
        events
            .iter()
            .filter_map(|e| match &e.kind {
                RoomEventKind::RoomCreated { room } => Some(room.id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn new_sim_schedules_housekeeping() {
        let sim = EnclosureSim::new(RoomConfig::default());
        assert_eq!(sim.event_queue.len(), 2);
        assert_eq!(sim.event_queue.peek_tick(), Some(10));
    }

    #[test]
    fn step_advances_clock_and_reschedules() {
        let mut sim = EnclosureSim::new(RoomConfig::default());
        let result = sim.step(&[], 100);
        assert_eq!(sim.tick, 100);
        assert!(result.events.is_empty());
        assert_eq!(sim.event_queue.len(), 2);
        assert!(sim.event_queue.peek_tick().is_some_and(|t| t > 100));
    }

    #[test]
    fn housekeeping_retires_at_the_end_of_the_tick_range() {
        let mut sim = EnclosureSim::new(RoomConfig::default());
        sim.tick = u64::MAX - 5;
        sim.step(&[], u64::MAX);
        assert_eq!(sim.tick, u64::MAX);
        // Both periodic events ran at u64::MAX and had nowhere later to go.
        assert!(sim.event_queue.is_empty());
        assert!(sim.step(&[], u64::MAX).events.is_empty());
    }

    #[test]
    fn placing_four_walls_creates_one_room() {
        let mut sim = EnclosureSim::new(RoomConfig::default());
        let result = sim.step(&place_all(1, square(1, 10.0, 10.0, 4.0)), 2);
        let rooms = created(&result.events);
        assert_eq!(rooms.len(), 1);
        let room = sim.room(rooms[0]).unwrap();
        assert_eq!(room.members.len(), 4);
        assert_eq!(room.chunk, ChunkCoord::new(0, 0));
        assert!(sim.adjacency.is_connected(InstanceId(1), InstanceId(2)));
        assert!(sim.is_instance_in_any_room(InstanceId(3)));
        assert!(sim.is_position_indoor(Vec3::new(10.0, 1.0, 10.0)));
    }

    #[test]
    fn removing_a_wall_destroys_the_room() {
        let mut sim = EnclosureSim::new(RoomConfig::default());
        sim.step(&place_all(1, square(1, 10.0, 10.0, 4.0)), 2);
        assert_eq!(sim.room_count(), 1);

        let remove = RoomCommand::new(
            3,
            RoomAction::InstanceRemoved {
                id: InstanceId(2),
                former_neighbors: vec![],
            },
        );
        let result = sim.step(&[remove], 4);
        assert!(
            result
                .events
                .iter()
                .any(|e| e.kind == RoomEventKind::RoomDestroyed { room_id: RoomId(1) })
        );
        assert_eq!(sim.room_count(), 0);
        assert!(!sim.adjacency.is_connected(InstanceId(1), InstanceId(2)));
    }

    #[test]
    fn non_authoritative_sim_ignores_mutations() {
        let mut sim = EnclosureSim::new(RoomConfig::default()).with_authority(false);
        sim.step(&place_all(1, square(1, 10.0, 10.0, 4.0)), 2);
        assert!(sim.instances.is_empty());
        assert_eq!(sim.room_count(), 0);
        // Non-mutating housekeeping is still honoured.
        sim.step(&[RoomCommand::new(3, RoomAction::ForceCacheRebuild)], 3);
        assert!(!sim.cache_stats().dirty);
    }

    #[test]
    fn observers_materialize_rooms_in_range() {
        let mut sim = EnclosureSim::new(RoomConfig::default());
        let result = sim.step(&place_all(1, square(1, 10.0, 10.0, 4.0)), 2);
        assert!(
            !result
                .events
                .iter()
                .any(|e| matches!(e.kind, RoomEventKind::RoomMaterialized { .. }))
        );
        assert!(sim.room_snapshots().is_empty());

        let watch = RoomCommand::new(
            3,
            RoomAction::SetObservers {
                positions: vec![Vec3::new(0.0, 0.0, 0.0)],
            },
        );
        let result = sim.step(&[watch], 3);
        assert!(result.events.contains(&RoomEvent {
            tick: 3,
            kind: RoomEventKind::ChunkActivated {
                coord: ChunkCoord::new(0, 0)
            }
        }));
        assert!(result.events.contains(&RoomEvent {
            tick: 3,
            kind: RoomEventKind::RoomMaterialized { room_id: RoomId(1) }
        }));
        assert_eq!(sim.room_snapshots().len(), 1);

        let leave = RoomCommand::new(
            4,
            RoomAction::SetObservers {
                positions: vec![Vec3::new(1000.0, 0.0, 1000.0)],
            },
        );
        let result = sim.step(&[leave], 4);
        assert!(result.events.contains(&RoomEvent {
            tick: 4,
            kind: RoomEventKind::RoomDematerialized { room_id: RoomId(1) }
        }));
        assert!(!sim.room(RoomId(1)).unwrap().materialized);
    }

    #[test]
    fn json_round_trip_preserves_rooms() {
        let mut sim = EnclosureSim::new(RoomConfig::default());
        sim.step(&place_all(1, square(1, 10.0, 10.0, 4.0)), 5);
        let json = sim.to_json().unwrap();
        let mut restored = EnclosureSim::from_json(&json).unwrap();

        assert_eq!(restored.tick, 5);
        assert_eq!(restored.room_count(), 1);
        assert_eq!(
            restored.room(RoomId(1)).map(|r| r.geometry.clone()),
            sim.room(RoomId(1)).map(|r| r.geometry.clone())
        );
        assert_eq!(restored.adjacency.revision(), sim.adjacency.revision());
        assert!(restored.cache_stats().dirty);
        assert!(restored.is_position_indoor(Vec3::new(10.0, 1.0, 10.0)));

        // Both continue identically.
        let more = place_all(6, square(11, 30.0, 30.0, 4.0));
        let a = sim.step(&more, 7);
        let b = restored.step(&more, 7);
        assert_eq!(a.events, b.events);
    }

    #[test]
    fn refresh_drops_rooms_whose_members_vanished() {
        let mut sim = EnclosureSim::new(RoomConfig::default());
        sim.step(&place_all(1, square(1, 10.0, 10.0, 4.0)), 2);
        // Members disappear behind the sim's back.
        sim.instances.remove(InstanceId(1));
        sim.instances.remove(InstanceId(2));
        let result = sim.step(&[], 25);
        assert!(
            result
                .events
                .iter()
                .any(|e| e.kind == RoomEventKind::RoomDestroyed { room_id: RoomId(1) })
        );
        assert_eq!(sim.room_count(), 0);
    }
}
