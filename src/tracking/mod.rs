//! Vehicle tracking state
//!
//! This module handles:
//! - Per-vehicle current position, bounded history and activity flags
//! - Periodic staleness sweeps
//! - The bounded geofence/alert event log
//! - Selection of a single vehicle for detail display

mod events;
mod selection;
mod store;
mod sweeper;

pub use events::{EventLog, FleetEvent, SharedEventLog};
pub use selection::SelectionCoordinator;
pub use store::{FleetSummary, SharedTrackStore, TrackConfig, VehicleTrackState, VehicleTrackStore};
pub use sweeper::{StalenessSweeper, SweeperHandle};
