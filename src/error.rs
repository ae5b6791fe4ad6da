//! Error taxonomy for the tracking core
//!
//! None of these are fatal: connection failures are retried, subscription
//! failures are logged per topic, decode failures drop a single message.

use std::time::Duration;
use thiserror::Error;

pub use fleet_shared::codec::CodecError as DecodeError;

/// Transport-level failure, retried per the reconnect policy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Not connected after {after:?}: {cause}")]
    Timeout { after: Duration, cause: String },

    #[error("{transport} connection failed: {reason}")]
    Transport {
        transport: &'static str,
        reason: String,
    },

    #[error("Connection manager shut down")]
    Closed,
}

/// Failure to subscribe to one topic filter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscriptionError {
    #[error("Subscribe request for {filter} failed: {reason}")]
    Request { filter: String, reason: String },

    #[error("Broker rejected subscription to {filter}")]
    Rejected { filter: String },
}
