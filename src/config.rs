//! Tracker configuration
//!
//! Loaded from an optional YAML file, then overridden from the environment.
//! Every field has a default, so an empty or missing file is valid.

use crate::connection::{default_subscriptions, ConnectionConfig, TopicSubscription};
use crate::tracking::TrackConfig;
use crate::transport::MqttSettings;
use fleet_shared::defaults;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub keepalive_secs: u64,
    pub clean_session: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: format!("mqtt://localhost:{}", defaults::BROKER_PORT),
            username: None,
            password: None,
            client_id: format!("fleet-tracker-{}", std::process::id()),
            reconnect_delay_ms: defaults::RECONNECT_DELAY_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            keepalive_secs: defaults::KEEPALIVE_SECS,
            clean_session: true,
        }
    }
}

/// Tracking thresholds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub history_capacity: usize,
    pub inactivity_timeout_ms: u64,
    pub link_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub event_log_capacity: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            history_capacity: defaults::HISTORY_CAPACITY,
            inactivity_timeout_ms: defaults::INACTIVITY_TIMEOUT_MS,
            link_timeout_ms: defaults::LINK_TIMEOUT_MS,
            sweep_interval_ms: defaults::SWEEP_INTERVAL_MS,
            event_log_capacity: defaults::EVENT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub broker: BrokerConfig,
    pub tracking: TrackingConfig,
    pub subscriptions: Vec<TopicSubscription>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            tracking: TrackingConfig::default(),
            subscriptions: default_subscriptions(),
        }
    }
}

impl TrackerConfig {
    /// Load from a YAML file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_yaml(&text)?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply overrides through a variable lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("FLEET_BROKER_URL") {
            self.broker.url = url;
        }
        if let Some(username) = lookup("FLEET_BROKER_USERNAME") {
            self.broker.username = Some(username);
        }
        if let Some(password) = lookup("FLEET_BROKER_PASSWORD") {
            self.broker.password = Some(password);
        }
        if let Some(client_id) = lookup("FLEET_CLIENT_ID") {
            self.broker.client_id = client_id;
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        let t = &self.tracking;
        let b = &self.broker;

        if t.history_capacity == 0 {
            return invalid("tracking.history_capacity must be at least 1");
        }
        if t.event_log_capacity == 0 {
            return invalid("tracking.event_log_capacity must be at least 1");
        }
        if t.inactivity_timeout_ms == 0 || t.link_timeout_ms == 0 || t.sweep_interval_ms == 0 {
            return invalid("tracking timeouts and sweep interval must be positive");
        }
        if t.link_timeout_ms > t.inactivity_timeout_ms {
            return invalid("tracking.link_timeout_ms must not exceed inactivity_timeout_ms");
        }
        if b.reconnect_delay_ms == 0 || b.connect_timeout_ms == 0 {
            return invalid("broker reconnect delay and connect timeout must be positive");
        }
        if b.keepalive_secs < 5 {
            return invalid("broker.keepalive_secs must be at least 5");
        }
        if b.client_id.is_empty() {
            return invalid("broker.client_id must not be empty");
        }
        if self.subscriptions.iter().any(|s| s.topic.trim().is_empty()) {
            return invalid("subscription topics must not be empty");
        }

        self.mqtt_settings()?;
        Ok(())
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            reconnect_delay: Duration::from_millis(self.broker.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.broker.connect_timeout_ms),
            subscriptions: self.subscriptions.clone(),
        }
    }

    pub fn track(&self) -> TrackConfig {
        TrackConfig {
            history_capacity: self.tracking.history_capacity,
            inactivity_timeout_ms: self.tracking.inactivity_timeout_ms,
            link_timeout_ms: self.tracking.link_timeout_ms,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.tracking.sweep_interval_ms)
    }

    pub fn mqtt_settings(&self) -> Result<MqttSettings, ConfigError> {
        let mut settings = MqttSettings::from_url(&self.broker.url, &self.broker.client_id)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        settings.username = self.broker.username.clone();
        settings.password = self.broker.password.clone();
        settings.keepalive = Duration::from_secs(self.broker.keepalive_secs);
        settings.clean_session = self.broker.clean_session;
        Ok(settings)
    }
}
