//! Tracks which single vehicle, if any, is selected for detail display

use super::store::{SharedTrackStore, VehicleTrackState};
use fleet_shared::VehicleLocationSample;
use tokio::sync::watch;

/// Selection is a plain state replace; unknown ids are legal and simply
/// resolve to empty detail and history.
pub struct SelectionCoordinator {
    store: SharedTrackStore,
    selected: watch::Sender<Option<String>>,
}

impl SelectionCoordinator {
    pub fn new(store: SharedTrackStore) -> Self {
        let (selected, _) = watch::channel(None);
        Self { store, selected }
    }

    /// Replace the selection; `None` clears it
    pub fn select(&self, vehicle_id: Option<&str>) {
        self.selected.send_replace(vehicle_id.map(str::to_string));
    }

    pub fn selected(&self) -> Option<String> {
        self.selected.borrow().clone()
    }

    /// Observe selection changes
    pub fn watch(&self) -> watch::Receiver<Option<String>> {
        self.selected.subscribe()
    }

    /// History for any vehicle, oldest first; empty if unknown
    pub fn history(&self, vehicle_id: &str) -> Vec<VehicleLocationSample> {
        self.store
            .read()
            .history(vehicle_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Track state of the selected vehicle, if selected and known
    pub fn selected_detail(&self) -> Option<VehicleTrackState> {
        let id = self.selected()?;
        self.store.read().get(&id).cloned()
    }

    /// History of the selected vehicle; empty when nothing is selected
    pub fn selected_history(&self) -> Vec<VehicleLocationSample> {
        self.selected()
            .map(|id| self.history(&id))
            .unwrap_or_default()
    }
}
