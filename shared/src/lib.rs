//! Fleet Tracker Shared Types
//!
//! This crate provides the telemetry message types, topic grammar and payload
//! codec shared by the fleet tracker and the telemetry simulator.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Default tracking parameters
pub mod defaults {
    /// Number of recent samples kept per vehicle
    pub const HISTORY_CAPACITY: usize = 30;

    /// A vehicle with no sample for this long is inactive
    pub const INACTIVITY_TIMEOUT_MS: u64 = 30_000;

    /// A vehicle with no sample for this long has lost its link
    pub const LINK_TIMEOUT_MS: u64 = 10_000;

    /// Interval between staleness sweeps
    pub const SWEEP_INTERVAL_MS: u64 = 1_000;

    /// Fixed delay between reconnection attempts
    pub const RECONNECT_DELAY_MS: u64 = 5_000;

    /// Connection attempt timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 30_000;

    /// MQTT keepalive interval
    pub const KEEPALIVE_SECS: u64 = 60;

    /// Default broker port for mqtt:// URLs
    pub const BROKER_PORT: u16 = 1883;

    /// Number of geofence/alert entries kept in the event log
    pub const EVENT_LOG_CAPACITY: usize = 100;

    /// Battery percentage below which the simulator raises a warning
    pub const BATTERY_WARNING_PERCENT: f64 = 20.0;

    /// Battery percentage below which the simulator raises a critical alert
    pub const BATTERY_CRITICAL_PERCENT: f64 = 10.0;
}

/// MQTT quality-of-service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(format!("invalid QoS level {other} (expected 0, 1 or 2)")),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> u8 {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// One location/status report from a vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleLocationSample {
    /// Filled from the topic when the payload omits it
    #[serde(default)]
    pub drone_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub battery_level: f64,
    #[serde(default)]
    pub satellites: u32,
    /// Milliseconds since Unix epoch, as stamped by the vehicle
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_mode: Option<String>,
}

impl VehicleLocationSample {
    /// Create a sample at a position, stamped now
    pub fn new(drone_id: impl Into<String>, latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            drone_id: drone_id.into(),
            latitude,
            longitude,
            altitude,
            speed: 0.0,
            heading: 0.0,
            battery_level: 100.0,
            satellites: 0,
            timestamp: now_ms(),
            mission_id: None,
            flight_mode: None,
        }
    }
}

/// Direction of a geofence crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeofenceTransition {
    Enter,
    Exit,
}

/// A vehicle crossed a geofence boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    #[serde(default)]
    pub drone_id: String,
    pub geofence_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geofence_name: Option<String>,
    pub event_type: GeofenceTransition,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// An operator-facing alert raised by a vehicle or the telemetry bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMessage {
    #[serde(default)]
    pub drone_id: String,
    pub severity: AlertSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub timestamp: u64,
}

impl AlertMessage {
    pub fn new(drone_id: impl Into<String>, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            drone_id: drone_id.into(),
            severity,
            message: message.into(),
            code: None,
            timestamp: now_ms(),
        }
    }
}

/// The closed set of messages carried on vehicle topics
#[derive(Debug, Clone, PartialEq)]
pub enum DroneMessage {
    Location(VehicleLocationSample),
    Geofence(GeofenceEvent),
    Alert(AlertMessage),
}

impl DroneMessage {
    /// Vehicle this message belongs to
    pub fn drone_id(&self) -> &str {
        match self {
            DroneMessage::Location(s) => &s.drone_id,
            DroneMessage::Geofence(e) => &e.drone_id,
            DroneMessage::Alert(a) => &a.drone_id,
        }
    }
}
