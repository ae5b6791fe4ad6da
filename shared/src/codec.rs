//! Topic grammar and JSON payload codec
//!
//! Vehicle messages travel on per-vehicle topics:
//! ```text
//! drone/{vehicleId}/location   VehicleLocationSample
//! drone/{vehicleId}/geofence   GeofenceEvent
//! drone/{vehicleId}/alert      AlertMessage
//! ```
//!
//! Payloads are JSON objects with camelCase field names. The vehicle id in the
//! topic is authoritative: a payload without `droneId` inherits it, a payload
//! that names a different vehicle is rejected.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{AlertMessage, DroneMessage, GeofenceEvent, VehicleLocationSample};

/// First topic level for every vehicle topic
pub const TOPIC_ROOT: &str = "drone";

/// Errors that can occur while decoding a single payload
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty payload on {topic}")]
    EmptyPayload { topic: String },

    #[error("Malformed {kind} payload: {source}")]
    Json {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("Payload names vehicle {payload} but topic names {topic}")]
    VehicleMismatch { topic: String, payload: String },

    #[error("Field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("Invalid vehicle id: {0:?}")]
    InvalidVehicleId(String),

    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Message kind selected by the last topic level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Location,
    Geofence,
    Alert,
}

impl MessageKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            MessageKind::Location => "location",
            MessageKind::Geofence => "geofence",
            MessageKind::Alert => "alert",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "location" => Some(MessageKind::Location),
            "geofence" => Some(MessageKind::Geofence),
            "alert" => Some(MessageKind::Alert),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// A parsed vehicle topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleTopic<'a> {
    pub vehicle_id: &'a str,
    pub kind: MessageKind,
}

impl<'a> VehicleTopic<'a> {
    /// Parse `drone/{id}/{kind}`; anything else is not a vehicle topic
    pub fn parse(topic: &'a str) -> Option<Self> {
        let mut levels = topic.split('/');
        let root = levels.next()?;
        let vehicle_id = levels.next()?;
        let kind = MessageKind::from_suffix(levels.next()?)?;
        if root != TOPIC_ROOT || levels.next().is_some() || !is_valid_vehicle_id(vehicle_id) {
            return None;
        }
        Some(Self { vehicle_id, kind })
    }
}

/// Build the topic a vehicle publishes a message kind on
pub fn topic_for(vehicle_id: &str, kind: MessageKind) -> String {
    format!("{TOPIC_ROOT}/{vehicle_id}/{}", kind.suffix())
}

/// Vehicle ids are single, non-wildcard topic levels
pub fn is_valid_vehicle_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '+', '#'])
}

/// Match a topic name against an MQTT topic filter (`+` and `#` wildcards)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Decode a (topic, payload) pair
///
/// Returns:
/// - `Ok(Some(message))` for a valid payload on a vehicle topic
/// - `Ok(None)` if the topic is not a vehicle topic
/// - `Err(...)` if the payload is malformed
pub fn decode(topic: &str, payload: &[u8]) -> Result<Option<DroneMessage>, CodecError> {
    let Some(parsed) = VehicleTopic::parse(topic) else {
        return Ok(None);
    };

    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(CodecError::EmptyPayload {
            topic: topic.to_string(),
        });
    }

    let message = match parsed.kind {
        MessageKind::Location => {
            let mut sample: VehicleLocationSample = parse_json(parsed.kind, payload)?;
            sample.drone_id = reconcile_id(parsed.vehicle_id, sample.drone_id)?;
            validate_sample(&sample)?;
            DroneMessage::Location(sample)
        }
        MessageKind::Geofence => {
            let mut event: GeofenceEvent = parse_json(parsed.kind, payload)?;
            event.drone_id = reconcile_id(parsed.vehicle_id, event.drone_id)?;
            validate_position(event.latitude, event.longitude)?;
            DroneMessage::Geofence(event)
        }
        MessageKind::Alert => {
            let mut alert: AlertMessage = parse_json(parsed.kind, payload)?;
            alert.drone_id = reconcile_id(parsed.vehicle_id, alert.drone_id)?;
            DroneMessage::Alert(alert)
        }
    };

    Ok(Some(message))
}

/// Encode a message into its topic and JSON payload
pub fn encode(message: &DroneMessage) -> Result<(String, Bytes), CodecError> {
    let drone_id = message.drone_id();
    if !is_valid_vehicle_id(drone_id) {
        return Err(CodecError::InvalidVehicleId(drone_id.to_string()));
    }

    let (kind, body) = match message {
        DroneMessage::Location(s) => (MessageKind::Location, serde_json::to_vec(s)?),
        DroneMessage::Geofence(e) => (MessageKind::Geofence, serde_json::to_vec(e)?),
        DroneMessage::Alert(a) => (MessageKind::Alert, serde_json::to_vec(a)?),
    };

    Ok((topic_for(drone_id, kind), Bytes::from(body)))
}

fn parse_json<T: DeserializeOwned>(kind: MessageKind, payload: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(payload).map_err(|source| CodecError::Json { kind, source })
}

fn reconcile_id(topic_id: &str, payload_id: String) -> Result<String, CodecError> {
    if payload_id.is_empty() || payload_id == topic_id {
        Ok(topic_id.to_string())
    } else {
        Err(CodecError::VehicleMismatch {
            topic: topic_id.to_string(),
            payload: payload_id,
        })
    }
}

fn validate_sample(sample: &VehicleLocationSample) -> Result<(), CodecError> {
    validate_position(sample.latitude, sample.longitude)?;
    for (field, value) in [
        ("altitude", sample.altitude),
        ("speed", sample.speed),
        ("heading", sample.heading),
    ] {
        if !value.is_finite() {
            return Err(CodecError::OutOfRange { field, value });
        }
    }
    check_range("batteryLevel", sample.battery_level, 0.0, 100.0)
}

fn validate_position(latitude: f64, longitude: f64) -> Result<(), CodecError> {
    check_range("latitude", latitude, -90.0, 90.0)?;
    check_range("longitude", longitude, -180.0, 180.0)
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), CodecError> {
    // NaN fails the contains check
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(CodecError::OutOfRange { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlertSeverity, GeofenceTransition};

    fn location_payload(drone_id: &str) -> Vec<u8> {
        format!(
            r#"{{"droneId":"{drone_id}","latitude":37.77,"longitude":-122.42,"altitude":80.0,
                "speed":9.5,"heading":45.0,"batteryLevel":88.0,"satellites":12,"timestamp":1000}}"#
        )
        .into_bytes()
    }

    #[test]
    fn test_parse_vehicle_topic() {
        let topic = VehicleTopic::parse("drone/D1/location").expect("should parse");
        assert_eq!(topic.vehicle_id, "D1");
        assert_eq!(topic.kind, MessageKind::Location);

        assert_eq!(
            VehicleTopic::parse("drone/D1/alert").map(|t| t.kind),
            Some(MessageKind::Alert)
        );
        assert!(VehicleTopic::parse("drone/D1/battery").is_none());
        assert!(VehicleTopic::parse("drone//location").is_none());
        assert!(VehicleTopic::parse("drone/D1/location/extra").is_none());
        assert!(VehicleTopic::parse("rover/D1/location").is_none());
        assert!(VehicleTopic::parse("drone").is_none());
    }

    #[test]
    fn test_topic_filter_matching() {
        assert!(topic_matches("drone/+/location", "drone/D1/location"));
        assert!(!topic_matches("drone/+/location", "drone/D1/alert"));
        assert!(topic_matches("drone/#", "drone/D1/alert"));
        assert!(topic_matches("#", "drone/D1/alert"));
        assert!(!topic_matches("drone/+", "drone/D1/alert"));
        assert!(topic_matches("drone/D1/alert", "drone/D1/alert"));
        assert!(!topic_matches("drone/D1/alert/#/x", "drone/D1/alert/y/x"));
    }

    #[test]
    fn test_decode_location() {
        let msg = decode("drone/D1/location", &location_payload("D1"))
            .expect("decode failed")
            .expect("should be a vehicle message");

        match msg {
            DroneMessage::Location(sample) => {
                assert_eq!(sample.drone_id, "D1");
                assert_eq!(sample.satellites, 12);
                assert_eq!(sample.timestamp, 1000);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_topic_id_fills_missing_payload_id() {
        let payload = br#"{"latitude":1.0,"longitude":2.0,"timestamp":5}"#;
        let msg = decode("drone/D9/location", payload).unwrap().unwrap();
        assert_eq!(msg.drone_id(), "D9");
    }

    #[test]
    fn test_vehicle_mismatch_rejected() {
        let result = decode("drone/D1/location", &location_payload("D2"));
        assert!(matches!(result, Err(CodecError::VehicleMismatch { .. })));
    }

    #[test]
    fn test_unknown_topic_ignored() {
        let result = decode("fleet/status", b"not even json").expect("unknown topics are not errors");
        assert!(result.is_none());
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            decode("drone/D1/location", b""),
            Err(CodecError::EmptyPayload { .. })
        ));
        assert!(matches!(
            decode("drone/D1/location", b"{\"latitude\":"),
            Err(CodecError::Json { kind: MessageKind::Location, .. })
        ));
        assert!(matches!(
            decode("drone/D1/location", br#"{"latitude":91.0,"longitude":0.0,"timestamp":1}"#),
            Err(CodecError::OutOfRange { field: "latitude", .. })
        ));
        assert!(matches!(
            decode(
                "drone/D1/location",
                br#"{"latitude":1.0,"longitude":0.0,"batteryLevel":140.0,"timestamp":1}"#
            ),
            Err(CodecError::OutOfRange { field: "batteryLevel", .. })
        ));
        assert!(matches!(
            decode("drone/D1/alert", br#"{"severity":"apocalyptic","message":"x","timestamp":1}"#),
            Err(CodecError::Json { kind: MessageKind::Alert, .. })
        ));
    }

    #[test]
    fn test_decode_geofence_and_alert() {
        let geofence = br#"{"geofenceId":"gf-1","eventType":"exit","latitude":10.0,"longitude":20.0,"timestamp":7}"#;
        match decode("drone/D3/geofence", geofence).unwrap().unwrap() {
            DroneMessage::Geofence(e) => {
                assert_eq!(e.drone_id, "D3");
                assert_eq!(e.event_type, GeofenceTransition::Exit);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let alert = br#"{"severity":"critical","message":"Battery critical","code":"BATT","timestamp":8}"#;
        match decode("drone/D3/alert", alert).unwrap().unwrap() {
            DroneMessage::Alert(a) => {
                assert_eq!(a.severity, AlertSeverity::Critical);
                assert_eq!(a.code.as_deref(), Some("BATT"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_encode_targets_vehicle_topic() {
        let sample = VehicleLocationSample::new("SIM-001", 1.0, 2.0, 3.0);
        let (topic, payload) = encode(&DroneMessage::Location(sample.clone())).expect("encode failed");
        assert_eq!(topic, "drone/SIM-001/location");

        let decoded = decode(&topic, &payload).unwrap().unwrap();
        assert_eq!(decoded, DroneMessage::Location(sample));
    }

    #[test]
    fn test_encode_rejects_wildcard_id() {
        let sample = VehicleLocationSample::new("D+", 1.0, 2.0, 3.0);
        assert!(matches!(
            encode(&DroneMessage::Location(sample)),
            Err(CodecError::InvalidVehicleId(_))
        ));
    }
}
