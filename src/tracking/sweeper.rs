//! Periodic staleness sweep over the track store

use super::store::SharedTrackStore;
use fleet_shared::now_ms;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Runs `mark_stale_if_expired` on a fixed interval
pub struct StalenessSweeper {
    store: SharedTrackStore,
    interval: Duration,
}

impl StalenessSweeper {
    pub fn new(store: SharedTrackStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run one sweep at `now_ms`, returning the ids that went inactive
    pub fn sweep(&self, now_ms: u64) -> Vec<String> {
        let went_inactive = self.store.write().mark_stale_if_expired(now_ms);
        for id in &went_inactive {
            info!("Vehicle {} inactive (no telemetry within timeout)", id);
        }
        went_inactive
    }

    /// Start the background sweep task
    pub fn start(self) -> SweeperHandle {
        let task = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.sweep(now_ms());
            }
        });

        debug!("Staleness sweeper started");
        SweeperHandle { task }
    }
}

/// Handle to stop the sweeper
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}
