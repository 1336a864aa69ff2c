// Inputs that drive room detection.
//
// All external mutations go through `RoomCommand`. The sim is a function
// `(state, commands) -> (new_state, events)` and commands are the input.
// A host (game server, editor, test scenario) translates its own placement,
// removal and connection callbacks into commands and feeds them to
// `EnclosureSim::step()`.
//
// A `RoomCommand` carries a `tick` (when to apply) and a `RoomAction`:
// - `InstancePlaced` - file a new piece, auto-connect it to touching
//   neighbors, and look for rooms closed by it.
// - `InstanceRemoved` - unregister the piece and re-evaluate every room it
//   belonged to. `former_neighbors` lets a replicated removal scrub edges
//   the local graph never saw.
// - `InstancesConnected` / `InstancesDisconnected` - explicit adjacency
//   edits (a connection also searches for new rooms).
// - `SetObservers` - positions that keep nearby chunks active.
// - `ForceCacheRebuild` - rebuild the position cache immediately.
//
// See also: `sim.rs` for `apply_command()` which dispatches these,
// `event.rs` for the output side.
//
// **Critical constraint: determinism.** Commands are the sole external input.
// Periodic work comes from scheduled events (see `event.rs`).

use crate::instance::BuildingInstance;
use crate::types::InstanceId;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// A command applied at a specific tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomCommand {
    pub tick: u64,
    pub action: RoomAction,
}

impl RoomCommand {
    pub fn new(tick: u64, action: RoomAction) -> Self {
        Self { tick, action }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RoomAction {
    InstancePlaced {
        instance: BuildingInstance,
    },
    InstanceRemoved {
        id: InstanceId,
        former_neighbors: Vec<InstanceId>,
    },
    InstancesConnected {
        a: InstanceId,
        b: InstanceId,
    },
    InstancesDisconnected {
        a: InstanceId,
        b: InstanceId,
    },
    SetObservers {
        positions: Vec<Vec3>,
    },
    ForceCacheRebuild,
}

impl RoomAction {
    /// Whether this action changes authoritative state (and so is ignored
    /// by non-authoritative instances).
    pub fn is_mutating(&self) -> bool {
        !matches!(self, RoomAction::ForceCacheRebuild)
    }
}
