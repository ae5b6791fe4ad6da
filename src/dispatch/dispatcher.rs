//! Message dispatcher - decodes inbound publishes and fans them out to handlers

use crate::error::DecodeError;
use crate::listeners::{ListenerHandle, Listeners};
use fleet_shared::{codec, AlertMessage, DroneMessage, GeofenceEvent, VehicleLocationSample};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// What happened to one inbound message
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Decoded and handed to this many handlers
    Delivered(usize),
    /// Not a vehicle topic
    Ignored,
    /// Malformed payload, dropped
    Dropped(DecodeError),
}

/// Running totals for status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub delivered: u64,
    pub ignored: u64,
    pub dropped: u64,
}

/// Routes decoded vehicle messages to per-kind handler lists.
///
/// Handlers of one kind run in registration order.
#[derive(Default)]
pub struct MessageDispatcher {
    location: Listeners<VehicleLocationSample>,
    geofence: Listeners<GeofenceEvent>,
    alert: Listeners<AlertMessage>,
    delivered: AtomicU64,
    ignored: AtomicU64,
    dropped: AtomicU64,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_location<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&VehicleLocationSample) + Send + Sync + 'static,
    {
        self.location.add(handler)
    }

    pub fn on_geofence<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&GeofenceEvent) + Send + Sync + 'static,
    {
        self.geofence.add(handler)
    }

    pub fn on_alert<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&AlertMessage) + Send + Sync + 'static,
    {
        self.alert.add(handler)
    }

    /// Decode a raw publish and invoke the handlers for its kind
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        match codec::decode(topic, payload) {
            Ok(Some(message)) => {
                let handled = self.deliver(&message);
                self.delivered.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Delivered(handled)
            }
            Ok(None) => {
                trace!("Ignoring message on unknown topic {}", topic);
                self.ignored.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Ignored
            }
            Err(e) => {
                warn!("Dropping message on {}: {}", topic, e);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Dropped(e)
            }
        }
    }

    /// Invoke handlers for an already decoded message
    pub fn deliver(&self, message: &DroneMessage) -> usize {
        match message {
            DroneMessage::Location(sample) => self.location.emit(sample),
            DroneMessage::Geofence(event) => self.geofence.emit(event),
            DroneMessage::Alert(alert) => self.alert.emit(alert),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
