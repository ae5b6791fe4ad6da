//! Vehicle Activity State Machine
//!
//! ```text
//! Unknown --sample--> Active --timeout--> Inactive --sample--> Active
//! ```
//!
//! There is no terminal state; vehicles are never forgotten.

/// Activity of a tracked vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackActivity {
    /// No sample has been seen yet
    #[default]
    Unknown,
    /// A sample arrived within the inactivity timeout
    Active,
    /// The inactivity timeout elapsed since the last sample
    Inactive,
}

/// Events that drive activity transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    SampleReceived,
    TimeoutElapsed,
}

impl TrackActivity {
    /// Apply an event and return the resulting state
    pub fn on_event(self, event: ActivityEvent) -> TrackActivity {
        use ActivityEvent::*;
        use TrackActivity::*;

        match (self, event) {
            (_, SampleReceived) => Active,
            (Active, TimeoutElapsed) => Inactive,
            (state, TimeoutElapsed) => state,
        }
    }

    pub fn is_active(self) -> bool {
        self == TrackActivity::Active
    }
}

/// Check whether more than `timeout_ms` has passed since `last_update_ms`
pub fn is_expired(now_ms: u64, last_update_ms: u64, timeout_ms: u64) -> bool {
    now_ms.saturating_sub(last_update_ms) > timeout_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults;

    #[test]
    fn test_first_sample_activates() {
        let state = TrackActivity::default();
        assert_eq!(state, TrackActivity::Unknown);
        assert_eq!(state.on_event(ActivityEvent::SampleReceived), TrackActivity::Active);
    }

    #[test]
    fn test_full_lifecycle() {
        let state = TrackActivity::Unknown
            .on_event(ActivityEvent::SampleReceived)
            .on_event(ActivityEvent::TimeoutElapsed);
        assert_eq!(state, TrackActivity::Inactive);
        assert!(!state.is_active());

        let state = state.on_event(ActivityEvent::SampleReceived);
        assert!(state.is_active());
    }

    #[test]
    fn test_timeout_without_sample_is_noop() {
        assert_eq!(
            TrackActivity::Unknown.on_event(ActivityEvent::TimeoutElapsed),
            TrackActivity::Unknown
        );
        assert_eq!(
            TrackActivity::Inactive.on_event(ActivityEvent::TimeoutElapsed),
            TrackActivity::Inactive
        );
    }

    #[test]
    fn test_expiry_detection() {
        let timeout = defaults::INACTIVITY_TIMEOUT_MS;
        assert!(!is_expired(1000, 1000, timeout));
        assert!(!is_expired(1000 + timeout, 1000, timeout));
        assert!(is_expired(1000 + timeout + 1, 1000, timeout));

        // Clock behind the last update never expires
        assert!(!is_expired(500, 1000, timeout));
    }
}
