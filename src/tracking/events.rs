//! Bounded log of geofence crossings and alerts

use fleet_shared::{defaults, AlertMessage, GeofenceEvent};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

pub type SharedEventLog = Arc<RwLock<EventLog>>;

#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    Geofence(GeofenceEvent),
    Alert(AlertMessage),
}

impl FleetEvent {
    pub fn drone_id(&self) -> &str {
        match self {
            FleetEvent::Geofence(e) => &e.drone_id,
            FleetEvent::Alert(a) => &a.drone_id,
        }
    }
}

/// Events in arrival order, oldest evicted first
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    entries: VecDeque<FleetEvent>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn shared(capacity: usize) -> SharedEventLog {
        Arc::new(RwLock::new(Self::new(capacity)))
    }

    pub fn push(&mut self, event: FleetEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    /// Up to `limit` most recent events, newest last
    pub fn recent(&self, limit: usize) -> Vec<FleetEvent> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn for_vehicle(&self, vehicle_id: &str) -> Vec<FleetEvent> {
        self.entries
            .iter()
            .filter(|e| e.drone_id() == vehicle_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(defaults::EVENT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_shared::AlertSeverity;

    fn alert(id: &str, message: &str) -> FleetEvent {
        FleetEvent::Alert(AlertMessage::new(id, AlertSeverity::Warning, message))
    }

    #[test]
    fn test_bounded_eviction() {
        let mut log = EventLog::new(2);
        log.push(alert("D1", "one"));
        log.push(alert("D1", "two"));
        log.push(alert("D2", "three"));

        assert_eq!(log.len(), 2);
        let messages: Vec<String> = log
            .recent(10)
            .into_iter()
            .filter_map(|e| match e {
                FleetEvent::Alert(a) => Some(a.message),
                FleetEvent::Geofence(_) => None,
            })
            .collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[test]
    fn test_recent_and_per_vehicle() {
        let mut log = EventLog::default();
        log.push(alert("D1", "a"));
        log.push(alert("D2", "b"));
        log.push(alert("D1", "c"));

        assert_eq!(log.recent(2).len(), 2);
        assert_eq!(log.recent(2)[1].drone_id(), "D1");
        assert_eq!(log.for_vehicle("D1").len(), 2);
        assert!(log.for_vehicle("D9").is_empty());
    }
}
