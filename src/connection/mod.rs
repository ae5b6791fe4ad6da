//! Connection management for the broker session
//!
//! This module handles:
//! - A single live broker session guarded against double initialization
//! - Automatic reconnection with a fixed delay
//! - Re-subscription of enabled topics on every connect
//! - Lifecycle notifications and an observable connection state

mod manager;

pub use manager::{
    default_subscriptions, ConnectionConfig, ConnectionManager, ConnectionState,
    ConnectionStatus, InboundMessage, TopicSubscription,
};
