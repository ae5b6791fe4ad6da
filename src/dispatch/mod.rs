//! Inbound message routing
//!
//! This module handles:
//! - Decoding raw (topic, payload) pairs into typed vehicle messages
//! - Fanning them out to per-kind handlers in registration order
//! - Binding those handlers to the track store and event log

mod dispatcher;
mod handlers;

pub use dispatcher::{DispatchOutcome, DispatchStats, MessageDispatcher};
pub use handlers::{register_tracking_handlers, register_with_clock, Clock, TrackingHandlers};
