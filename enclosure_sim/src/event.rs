// Events: the internal scheduling queue and the room-lifecycle output.
//
// Periodic housekeeping (chunk activation polls, room refreshes) is driven
// by scheduled events in a priority queue ordered by `(tick, sequence)`.
// Each handler reschedules itself, so the queue always holds exactly one of
// each kind once the sim is running. Empty ticks are free.
//
// This file defines two related but distinct concepts:
// - `ScheduledEvent`: internal events in the priority queue.
// - `RoomEvent`: room-lifecycle notifications emitted as output for the
//   host (colliders, environment effects, replication).
//
// See also: `sim.rs` for the tick loop that processes scheduled events.
//
// **Critical constraint: determinism.** The `(tick, sequence)` key provides
// a total order, so two sims fed the same commands emit identical events.

use crate::room::RoomSnapshot;
use crate::types::{ChunkCoord, ObserverId, RoomId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

// ---------------------------------------------------------------------------
// Internal scheduled events (priority queue)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub tick: u64,
    /// Tiebreak within a tick. Lower values fire first.
    pub sequence: u64,
    pub kind: ScheduledEventKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledEventKind {
    /// Recompute chunk activation from observer positions.
    ActivationPoll,
    /// Drop rooms whose members vanished and re-sync materialization.
    RoomRefresh,
}

// Equality and ordering look only at `(tick, sequence)`; `kind` is payload.
// `BinaryHeap` pops its greatest element, so `cmp` compares `other` against
// `self`: the earliest tick is "greatest" and pops first, and within one
// tick the lower sequence (scheduled earlier) wins. Sequences are unique,
// so no two queued events ever compare equal.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .tick
            .cmp(&self.tick)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Min-heap of scheduled events.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    next_sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, tick: u64, kind: ScheduledEventKind) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledEvent {
            tick,
            sequence,
            kind,
        });
    }

    pub fn peek_tick(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.tick)
    }

    /// Pop the next event if its tick is <= `up_to_tick`.
    pub fn pop_if_ready(&mut self, up_to_tick: u64) -> Option<ScheduledEvent> {
        if self.heap.peek().is_some_and(|e| e.tick <= up_to_tick) {
            self.heap.pop()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Room lifecycle events (output)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub tick: u64,
    pub kind: RoomEventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RoomEventKind {
    RoomCreated { room: RoomSnapshot },
    RoomDestroyed { room_id: RoomId },
    /// Membership or geometry of a surviving room changed.
    RoomUpdated { room_id: RoomId },
    /// The room's chunk is active; the host should build its collider and
    /// environment effects.
    RoomMaterialized { room_id: RoomId },
    RoomDematerialized { room_id: RoomId },
    ChunkActivated { coord: ChunkCoord },
    ChunkDeactivated { coord: ChunkCoord },
    /// An observer now stands inside `room_id` (as of an activation poll).
    ObserverEnteredRoom { observer: ObserverId, room_id: RoomId },
    /// An observer left `room_id`, or the room was destroyed around them.
    ObserverExitedRoom { observer: ObserverId, room_id: RoomId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_orders_by_tick_then_sequence() {
        let mut queue = EventQueue::new();
        queue.schedule(100, ScheduledEventKind::RoomRefresh);
        queue.schedule(50, ScheduledEventKind::ActivationPoll);
        queue.schedule(50, ScheduledEventKind::RoomRefresh);

        let first = queue.pop_if_ready(200).unwrap();
        assert_eq!((first.tick, first.sequence), (50, 1));
        assert_eq!(first.kind, ScheduledEventKind::ActivationPoll);

        let second = queue.pop_if_ready(200).unwrap();
        assert_eq!((second.tick, second.sequence), (50, 2));

        let third = queue.pop_if_ready(200).unwrap();
        assert_eq!(third.tick, 100);
        assert!(queue.pop_if_ready(200).is_none());
    }

    #[test]
    fn pop_if_ready_respects_tick_limit() {
        let mut queue = EventQueue::new();
        queue.schedule(100, ScheduledEventKind::ActivationPoll);
        assert_eq!(queue.peek_tick(), Some(100));
        assert!(queue.pop_if_ready(99).is_none());
        assert!(queue.pop_if_ready(100).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn queue_survives_json() {
        let mut queue = EventQueue::new();
        queue.schedule(10, ScheduledEventKind::ActivationPoll);
        queue.schedule(20, ScheduledEventKind::RoomRefresh);

        let json = serde_json::to_string(&queue).unwrap();
        let mut restored: EventQueue = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.pop_if_ready(100).map(|e| e.tick), Some(10));
        // Sequence numbering continues after load.
        restored.schedule(10, ScheduledEventKind::ActivationPoll);
        assert_eq!(restored.pop_if_ready(100).map(|e| e.sequence), Some(2));
    }
}
