//! Broker transport abstraction for pluggable messaging backends

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use fleet_shared::Qos;

/// Something that happened on a live broker link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A publish arrived on a subscribed topic
    Message { topic: String, payload: Bytes },
    /// The broker closed the session
    Closed { reason: String },
}

/// A live session with a broker
#[async_trait]
pub trait BrokerLink: Send + 'static {
    /// Subscribe to a topic filter
    async fn subscribe(&mut self, filter: &str, qos: Qos) -> Result<()>;

    /// Wait for the next inbound event; an error means the link is dead
    async fn next_event(&mut self) -> Result<LinkEvent>;

    /// Close the session gracefully
    async fn disconnect(&mut self) -> Result<()>;
}

/// Factory for broker sessions
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// The link type this connector produces
    type Link: BrokerLink;

    /// Attempt to open a session, returning once the broker accepted it
    async fn connect(&self) -> Result<Self::Link>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
