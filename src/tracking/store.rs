//! Per-vehicle track state with bounded position history
//!
//! Samples are applied last-write-wins in arrival order. The store does not
//! reorder by vehicle timestamp, so a late sample becomes `latest`.

use fleet_shared::state_machine::{is_expired, ActivityEvent, TrackActivity};
use fleet_shared::{defaults, VehicleLocationSample};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Store shared between the dispatcher, the sweeper and readers
pub type SharedTrackStore = Arc<RwLock<VehicleTrackStore>>;

/// Tracking thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackConfig {
    pub history_capacity: usize,
    pub inactivity_timeout_ms: u64,
    pub link_timeout_ms: u64,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            history_capacity: defaults::HISTORY_CAPACITY,
            inactivity_timeout_ms: defaults::INACTIVITY_TIMEOUT_MS,
            link_timeout_ms: defaults::LINK_TIMEOUT_MS,
        }
    }
}

/// Aggregate state of one vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleTrackState {
    pub vehicle_id: String,
    latest: VehicleLocationSample,
    history: VecDeque<VehicleLocationSample>,
    /// Local arrival time of the latest sample
    pub last_update_ms: u64,
    activity: TrackActivity,
    /// A sample arrived within the link timeout
    pub connected: bool,
    pub samples_received: u64,
}

impl VehicleTrackState {
    fn new(sample: VehicleLocationSample, capacity: usize, now_ms: u64) -> Self {
        let mut history = VecDeque::with_capacity(capacity);
        history.push_back(sample.clone());
        Self {
            vehicle_id: sample.drone_id.clone(),
            latest: sample,
            history,
            last_update_ms: now_ms,
            activity: TrackActivity::Unknown.on_event(ActivityEvent::SampleReceived),
            connected: true,
            samples_received: 1,
        }
    }

    /// Most recently arrived sample
    pub fn latest(&self) -> &VehicleLocationSample {
        &self.latest
    }

    /// Recent samples, oldest first
    pub fn history(&self) -> &VecDeque<VehicleLocationSample> {
        &self.history
    }

    pub fn activity(&self) -> TrackActivity {
        self.activity
    }

    pub fn is_active(&self) -> bool {
        self.activity.is_active()
    }
}

/// Fleet-wide counts for status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FleetSummary {
    pub total: usize,
    pub active: usize,
    pub connected: usize,
}

/// Maintains [`VehicleTrackState`] per vehicle id
#[derive(Debug, Default)]
pub struct VehicleTrackStore {
    config: TrackConfig,
    vehicles: HashMap<String, VehicleTrackState>,
}

impl VehicleTrackStore {
    pub fn new(config: TrackConfig) -> Self {
        Self {
            config: TrackConfig {
                history_capacity: config.history_capacity.max(1),
                ..config
            },
            vehicles: HashMap::new(),
        }
    }

    /// Wrap in the shared handle passed to handlers and views
    pub fn shared(config: TrackConfig) -> SharedTrackStore {
        Arc::new(RwLock::new(Self::new(config)))
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    /// Apply a sample that arrived at `now_ms`.
    ///
    /// Returns the vehicle's activity before the sample.
    pub fn record_sample(&mut self, sample: VehicleLocationSample, now_ms: u64) -> TrackActivity {
        let capacity = self.config.history_capacity;

        match self.vehicles.get_mut(&sample.drone_id) {
            Some(track) => {
                let previous = track.activity;
                if track.history.len() == capacity {
                    track.history.pop_front();
                }
                track.history.push_back(sample.clone());
                track.latest = sample;
                track.last_update_ms = now_ms;
                track.activity = previous.on_event(ActivityEvent::SampleReceived);
                track.connected = true;
                track.samples_received += 1;
                previous
            }
            None => {
                let id = sample.drone_id.clone();
                self.vehicles
                    .insert(id, VehicleTrackState::new(sample, capacity, now_ms));
                TrackActivity::Unknown
            }
        }
    }

    /// Flag vehicles whose last sample is older than the timeouts.
    ///
    /// Returns the ids that became inactive on this sweep. History is kept.
    pub fn mark_stale_if_expired(&mut self, now_ms: u64) -> Vec<String> {
        let mut went_inactive = Vec::new();

        for (id, track) in self.vehicles.iter_mut() {
            track.connected = !is_expired(now_ms, track.last_update_ms, self.config.link_timeout_ms);

            if is_expired(now_ms, track.last_update_ms, self.config.inactivity_timeout_ms) {
                let previous = track.activity;
                track.activity = previous.on_event(ActivityEvent::TimeoutElapsed);
                if previous.is_active() && !track.activity.is_active() {
                    went_inactive.push(id.clone());
                }
            }
        }

        went_inactive.sort();
        went_inactive
    }

    pub fn get(&self, vehicle_id: &str) -> Option<&VehicleTrackState> {
        self.vehicles.get(vehicle_id)
    }

    /// Recent samples for a vehicle, oldest first
    pub fn history(&self, vehicle_id: &str) -> Option<&VecDeque<VehicleLocationSample>> {
        self.vehicles.get(vehicle_id).map(|t| &t.history)
    }

    pub fn vehicles(&self) -> &HashMap<String, VehicleTrackState> {
        &self.vehicles
    }

    /// Owned copies of every track, sorted by vehicle id
    pub fn snapshot(&self) -> Vec<VehicleTrackState> {
        let mut tracks: Vec<_> = self.vehicles.values().cloned().collect();
        tracks.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        tracks
    }

    pub fn summary(&self) -> FleetSummary {
        FleetSummary {
            total: self.vehicles.len(),
            active: self.vehicles.values().filter(|t| t.is_active()).count(),
            connected: self.vehicles.values().filter(|t| t.connected).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}
