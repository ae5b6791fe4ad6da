//! Fleet Tracker
//!
//! Real-time location tracking for a fleet of uncrewed aerial vehicles. One
//! broker session feeds a dispatcher, which keeps per-vehicle track state,
//! a geofence/alert log and an operator selection up to date.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod listeners;
pub mod tracking;
pub mod transport;

pub use config::TrackerConfig;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStatus};
pub use dispatch::{register_tracking_handlers, MessageDispatcher};
pub use error::{ConnectionError, DecodeError, SubscriptionError};
pub use tracking::{
    EventLog, SelectionCoordinator, StalenessSweeper, VehicleTrackState, VehicleTrackStore,
};
