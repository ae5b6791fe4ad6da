//! MQTT transport implementation backed by rumqttc

use crate::error::SubscriptionError;
use crate::transport::traits::{BrokerConnector, BrokerLink, LinkEvent};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use fleet_shared::{defaults, Qos};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Connection parameters for an MQTT broker
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive: Duration,
    pub clean_session: bool,
}

impl MqttSettings {
    /// Build settings from a `mqtt://host[:port]` or `tcp://host[:port]` URL
    pub fn from_url(url: &str, client_id: impl Into<String>) -> Result<Self> {
        let rest = url
            .strip_prefix("mqtt://")
            .or_else(|| url.strip_prefix("tcp://"))
            .ok_or_else(|| anyhow!("Unsupported broker URL scheme: {url}"))?;
        let authority = rest.trim_end_matches('/');
        if authority.is_empty() || authority.contains('/') {
            bail!("Invalid broker address in URL: {url}");
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| anyhow!("Invalid broker port in URL: {url}"))?;
                (host, port)
            }
            None => (authority, defaults::BROKER_PORT),
        };
        if host.is_empty() {
            bail!("Missing broker host in URL: {url}");
        }

        Ok(Self {
            host: host.to_string(),
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
            keepalive: Duration::from_secs(defaults::KEEPALIVE_SECS),
            clean_session: true,
        })
    }

    fn to_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keepalive);
        options.set_clean_session(self.clean_session);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Map our QoS onto rumqttc's
pub fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Connector that opens one MQTT session per call
pub struct MqttConnector {
    settings: MqttSettings,
}

impl MqttConnector {
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    type Link = MqttLink;

    async fn connect(&self) -> Result<Self::Link> {
        let (client, mut eventloop) =
            AsyncClient::new(self.settings.to_options(), REQUEST_CHANNEL_CAPACITY);

        // Drive the event loop until the broker answers CONNECT
        loop {
            match eventloop.poll().await? {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    if ack.code != ConnectReturnCode::Success {
                        bail!("Broker refused connection: {:?}", ack.code);
                    }
                    debug!(
                        "MQTT session established with {}:{} (session_present={})",
                        self.settings.host, self.settings.port, ack.session_present
                    );
                    return Ok(MqttLink {
                        client,
                        eventloop,
                        pending_subscriptions: VecDeque::new(),
                    });
                }
                _ => continue,
            }
        }
    }

    fn name(&self) -> &'static str {
        "MQTT"
    }
}

/// A live MQTT session
pub struct MqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Filters awaiting SUBACK, in request order
    pending_subscriptions: VecDeque<String>,
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn subscribe(&mut self, filter: &str, qos: Qos) -> Result<()> {
        self.client.subscribe(filter, to_mqtt_qos(qos)).await?;
        self.pending_subscriptions.push_back(filter.to_string());
        Ok(())
    }

    async fn next_event(&mut self) -> Result<LinkEvent> {
        loop {
            match self.eventloop.poll().await? {
                Event::Incoming(Packet::Publish(publish)) => {
                    return Ok(LinkEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload,
                    });
                }
                Event::Incoming(Packet::SubAck(ack)) => {
                    for code in ack.return_codes {
                        let filter = self
                            .pending_subscriptions
                            .pop_front()
                            .unwrap_or_else(|| format!("pkid {}", ack.pkid));
                        match code {
                            SubscribeReasonCode::Success(granted) => {
                                debug!("Subscribed to {} (granted {:?})", filter, granted);
                            }
                            SubscribeReasonCode::Failure => {
                                warn!("{}", SubscriptionError::Rejected { filter });
                            }
                        }
                    }
                }
                Event::Incoming(Packet::Disconnect) => {
                    return Ok(LinkEvent::Closed {
                        reason: "Broker sent DISCONNECT".into(),
                    });
                }
                _ => continue,
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect().await?;
        // Flush the DISCONNECT packet; the broker closing the socket ends this
        let _ = tokio::time::timeout(Duration::from_secs(1), self.eventloop.poll()).await;
        Ok(())
    }
}
