//! In-process broker for tests and offline wiring

use crate::transport::traits::{BrokerConnector, BrokerLink, LinkEvent};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use fleet_shared::{codec::topic_matches, Qos};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Session {
    id: u64,
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

#[derive(Default)]
struct BrokerState {
    next_session_id: u64,
    sessions: Vec<Session>,
    connect_attempts: usize,
    refusal: Option<String>,
    rejected_filters: Vec<String>,
}

/// A minimal topic router with MQTT filter semantics
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose sessions attach to this broker
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
            connect_delay: Duration::ZERO,
        }
    }

    /// Deliver a publish to every session with a matching filter
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let mut state = self.state.lock();
        let mut delivered = 0;

        state.sessions.retain(|session| {
            if !session.filters.iter().any(|f| topic_matches(f, topic)) {
                return true;
            }
            let event = LinkEvent::Message {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            match session.tx.send(event) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });

        delivered
    }

    /// Refuse new connections with `reason`, or accept them again with `None`
    pub fn set_refusal(&self, reason: Option<&str>) {
        self.state.lock().refusal = reason.map(str::to_string);
    }

    /// Fail every later subscribe request for exactly `filter`
    pub fn reject_filter(&self, filter: &str) {
        self.state.lock().rejected_filters.push(filter.to_string());
    }

    /// Close every live session as if the broker restarted
    pub fn drop_sessions(&self, reason: &str) {
        let sessions = std::mem::take(&mut self.state.lock().sessions);
        for session in sessions {
            let _ = session.tx.send(LinkEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Filters currently subscribed across all sessions
    pub fn subscriptions(&self) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .iter()
            .flat_map(|s| s.filters.iter().cloned())
            .collect()
    }

    fn open_session(&self) -> Result<MemoryLink> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if let Some(reason) = &state.refusal {
            bail!("Broker refused connection: {reason}");
        }

        let id = state.next_session_id;
        state.next_session_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.sessions.push(Session {
            id,
            filters: Vec::new(),
            tx,
        });

        Ok(MemoryLink {
            id,
            rx,
            broker: self.clone(),
        })
    }

    fn close_session(&self, id: u64) {
        self.state.lock().sessions.retain(|s| s.id != id);
    }
}

/// Opens sessions on a [`MemoryBroker`]
pub struct MemoryConnector {
    broker: MemoryBroker,
    connect_delay: Duration,
}

impl MemoryConnector {
    /// Simulate a slow handshake
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }
}

#[async_trait]
impl BrokerConnector for MemoryConnector {
    type Link = MemoryLink;

    async fn connect(&self) -> Result<Self::Link> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.broker.open_session()
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

/// A session on a [`MemoryBroker`]
pub struct MemoryLink {
    id: u64,
    rx: mpsc::UnboundedReceiver<LinkEvent>,
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerLink for MemoryLink {
    async fn subscribe(&mut self, filter: &str, _qos: Qos) -> Result<()> {
        let mut state = self.broker.state.lock();
        if state.rejected_filters.iter().any(|f| f == filter) {
            bail!("Not authorized to subscribe to {filter}");
        }
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == self.id)
            .ok_or_else(|| anyhow!("Session closed"))?;
        if !session.filters.iter().any(|f| f == filter) {
            session.filters.push(filter.to_string());
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<LinkEvent> {
        self.rx.recv().await.ok_or_else(|| anyhow!("Broker went away"))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.broker.close_session(self.id);
        Ok(())
    }
}
