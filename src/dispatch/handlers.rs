//! Handlers binding dispatched messages to the tracking state

use super::dispatcher::MessageDispatcher;
use crate::listeners::ListenerHandle;
use crate::tracking::{FleetEvent, SharedEventLog, SharedTrackStore};
use fleet_shared::state_machine::TrackActivity;
use fleet_shared::{now_ms, AlertSeverity, GeofenceTransition};
use tracing::{debug, info, warn};

/// Source of local arrival timestamps in milliseconds
pub type Clock = fn() -> u64;

/// Handles for the tracking handlers, for teardown
pub struct TrackingHandlers {
    handles: Vec<ListenerHandle>,
}

impl TrackingHandlers {
    pub fn unsubscribe(self) {
        for handle in self.handles {
            handle.unsubscribe();
        }
    }
}

/// Register the store and event log handlers using the wall clock
pub fn register_tracking_handlers(
    dispatcher: &MessageDispatcher,
    store: SharedTrackStore,
    events: SharedEventLog,
) -> TrackingHandlers {
    register_with_clock(dispatcher, store, events, now_ms)
}

/// Register the store and event log handlers with an explicit clock
pub fn register_with_clock(
    dispatcher: &MessageDispatcher,
    store: SharedTrackStore,
    events: SharedEventLog,
    clock: Clock,
) -> TrackingHandlers {
    let location = dispatcher.on_location(move |sample| {
        let previous = store.write().record_sample(sample.clone(), clock());
        match previous {
            TrackActivity::Unknown => info!("Tracking new vehicle {}", sample.drone_id),
            TrackActivity::Inactive => info!("Vehicle {} active again", sample.drone_id),
            TrackActivity::Active => debug!(
                "Vehicle {} at {:.6},{:.6} alt={:.1}m",
                sample.drone_id, sample.latitude, sample.longitude, sample.altitude
            ),
        }
    });

    let geofence_log = events.clone();
    let geofence = dispatcher.on_geofence(move |event| {
        let verb = match event.event_type {
            GeofenceTransition::Enter => "entered",
            GeofenceTransition::Exit => "left",
        };
        info!(
            "Vehicle {} {} geofence {}",
            event.drone_id,
            verb,
            event.geofence_name.as_deref().unwrap_or(&event.geofence_id)
        );
        geofence_log.write().push(FleetEvent::Geofence(event.clone()));
    });

    let alert = dispatcher.on_alert(move |alert| {
        match alert.severity {
            AlertSeverity::Critical => warn!("CRITICAL alert from {}: {}", alert.drone_id, alert.message),
            AlertSeverity::Warning => info!("Warning from {}: {}", alert.drone_id, alert.message),
            AlertSeverity::Info => debug!("Info from {}: {}", alert.drone_id, alert.message),
        }
        events.write().push(FleetEvent::Alert(alert.clone()));
    });

    TrackingHandlers {
        handles: vec![location, geofence, alert],
    }
}
