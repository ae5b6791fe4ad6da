//! Connection manager with a single broker session and automatic reconnection
//!
//! Lifecycle: `connect()` starts the connection loop exactly once and waits for
//! the broker; further calls only wait. `shutdown()` stops the loop, closes the
//! link and re-arms the manager so a later `connect()` starts afresh.

use crate::error::{ConnectionError, SubscriptionError};
use crate::listeners::{ListenerHandle, Listeners};
use crate::transport::{BrokerConnector, BrokerLink, LinkEvent};
use bytes::Bytes;
use fleet_shared::{defaults, Qos};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

/// Capacity of the inbound message channel
const INBOUND_CAPACITY: usize = 1024;

/// Observable connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the connection for status indicators
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Human-readable cause of the last failure or disconnect
    pub last_error: Option<String>,
    pub messages_received: u64,
}

/// A topic filter re-subscribed on every successful connect
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TopicSubscription {
    pub topic: String,
    #[serde(default)]
    pub qos: Qos,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl TopicSubscription {
    pub fn new(topic: impl Into<String>, qos: Qos) -> Self {
        Self {
            topic: topic.into(),
            qos,
            enabled: true,
        }
    }
}

/// Subscriptions covering every vehicle message kind
pub fn default_subscriptions() -> Vec<TopicSubscription> {
    ["drone/+/location", "drone/+/geofence", "drone/+/alert"]
        .into_iter()
        .map(|topic| TopicSubscription::new(topic, Qos::AtLeastOnce))
        .collect()
}

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Fixed delay between reconnection attempts
    pub reconnect_delay: Duration,
    /// Bound on a single connection attempt and on `connect()` waiting
    pub connect_timeout: Duration,
    pub subscriptions: Vec<TopicSubscription>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(defaults::RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_millis(defaults::CONNECT_TIMEOUT_MS),
            subscriptions: default_subscriptions(),
        }
    }
}

/// A publish received from the broker
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

struct Shared<C: BrokerConnector> {
    config: ConnectionConfig,
    connector: C,
    /// Set by the first `connect()`, cleared by `shutdown()`
    started: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    task: Mutex<Option<JoinHandle<()>>>,
    on_connect: Listeners<()>,
    on_disconnect: Listeners<str>,
    on_error: Listeners<ConnectionError>,
}

impl<C: BrokerConnector> Shared<C> {
    fn update(&self, f: impl FnOnce(&mut ConnectionState)) {
        self.state_tx.send_modify(f);
    }

    fn fail(&self, err: ConnectionError) {
        error!("Broker connection failed: {}", err);
        self.update(|s| {
            s.status = ConnectionStatus::Error;
            s.last_error = Some(err.to_string());
        });
        self.on_error.emit(&err);
    }
}

/// Owns the one live broker session for the lifetime of the application
pub struct ConnectionManager<C: BrokerConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: BrokerConnector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: BrokerConnector> ConnectionManager<C> {
    /// Create a manager and the receiver its inbound publishes are sent to
    pub fn new(config: ConnectionConfig, connector: C) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::default());
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            config,
            connector,
            started: AtomicBool::new(false),
            state_tx,
            shutdown_tx,
            inbound_tx,
            task: Mutex::new(None),
            on_connect: Listeners::new(),
            on_disconnect: Listeners::new(),
            on_error: Listeners::new(),
        });

        (Self { shared }, inbound_rx)
    }

    /// Start the connection loop unless it is already running.
    ///
    /// Returns whether this call started it.
    pub fn start(&self) -> bool {
        // Held across the guard flip and spawn so `shutdown()` sees both or neither
        let mut task = self.shared.task.lock();
        if self
            .shared
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Connection loop already running");
            return false;
        }

        self.shared.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shared.shutdown_tx.subscribe();
        let shared = self.shared.clone();
        *task = Some(tokio::spawn(connection_loop(shared, shutdown_rx)));
        true
    }

    /// Connect to the broker, or wait for the connection already in flight.
    ///
    /// Fails with [`ConnectionError::Closed`] as soon as `shutdown()` is requested.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut state_rx = self.shared.state_tx.subscribe();
        self.start();
        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();

        let after = self.shared.config.connect_timeout;
        let connected = async {
            tokio::select! {
                result = state_rx.wait_for(|s| s.status == ConnectionStatus::Connected) => {
                    result.map(|_| ()).map_err(|_| ConnectionError::Closed)
                }
                _ = shutdown_rx.wait_for(|stop| *stop) => Err(ConnectionError::Closed),
            }
        };

        match timeout(after, connected).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout {
                after,
                cause: self
                    .state()
                    .last_error
                    .unwrap_or_else(|| "broker did not answer".into()),
            }),
        }
    }

    /// Stop the connection loop and close the live session.
    ///
    /// A pending reconnect timer is cancelled; listeners may still see one
    /// notification that raced with the shutdown.
    pub async fn shutdown(&self) {
        let task = {
            let mut task = self.shared.task.lock();
            self.shared.shutdown_tx.send_replace(true);
            task.take()
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Connection loop ended abnormally: {}", e);
            }
        }

        let task = self.shared.task.lock();
        if task.is_some() {
            debug!("Connection loop restarted during shutdown");
            return;
        }
        self.shared.started.store(false, Ordering::Release);
        self.shared.update(|s| s.status = ConnectionStatus::Disconnected);
        drop(task);
        info!("Connection manager shut down");
    }

    /// Current connection snapshot
    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state_tx.borrow().status == ConnectionStatus::Connected
    }

    pub fn on_connect<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.on_connect.add(move |_: &()| listener())
    }

    pub fn on_disconnect<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.on_disconnect.add(listener)
    }

    pub fn on_error<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ConnectionError) + Send + Sync + 'static,
    {
        self.shared.on_error.add(listener)
    }
}

/// Why the message pump stopped
enum PumpExit {
    Shutdown,
    Lost(String),
}

/// Main connection loop with fixed-delay reconnection
async fn connection_loop<C: BrokerConnector>(
    shared: Arc<Shared<C>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let transport = shared.connector.name();
    let config = &shared.config;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        shared.update(|s| s.status = ConnectionStatus::Connecting);
        debug!("Connecting to broker via {}", transport);

        let attempt = tokio::select! {
            result = timeout(config.connect_timeout, shared.connector.connect()) => result,
            _ = shutdown_rx.changed() => break,
        };

        match attempt {
            Ok(Ok(mut link)) => {
                let subscribed = subscribe_enabled(&config.subscriptions, &mut link).await;
                info!(
                    "Connected to broker via {} ({} subscriptions)",
                    transport, subscribed
                );
                shared.update(|s| {
                    s.status = ConnectionStatus::Connected;
                    s.last_error = None;
                });
                shared.on_connect.emit(&());

                match pump(&shared, &mut link, &mut shutdown_rx).await {
                    PumpExit::Shutdown => {
                        if let Err(e) = link.disconnect().await {
                            warn!("Error closing broker session: {:#}", e);
                        }
                        break;
                    }
                    PumpExit::Lost(reason) => {
                        warn!("Disconnected from broker: {}", reason);
                        shared.update(|s| {
                            s.status = ConnectionStatus::Disconnected;
                            s.last_error = Some(reason.clone());
                        });
                        shared.on_disconnect.emit(reason.as_str());
                    }
                }
            }
            Ok(Err(e)) => shared.fail(ConnectionError::Transport {
                transport,
                reason: format!("{e:#}"),
            }),
            Err(_) => shared.fail(ConnectionError::Timeout {
                after: config.connect_timeout,
                cause: "broker did not answer".into(),
            }),
        }

        debug!("Reconnecting in {:?}", config.reconnect_delay);
        tokio::select! {
            _ = sleep(config.reconnect_delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    debug!("Connection loop stopped");
}

/// Subscribe to every enabled filter; one failure does not abort the rest
async fn subscribe_enabled<L: BrokerLink>(subscriptions: &[TopicSubscription], link: &mut L) -> usize {
    let mut subscribed = 0;
    for sub in subscriptions.iter().filter(|s| s.enabled) {
        match link.subscribe(&sub.topic, sub.qos).await {
            Ok(()) => {
                debug!("Subscribed to {} (qos {})", sub.topic, u8::from(sub.qos));
                subscribed += 1;
            }
            Err(e) => warn!(
                "{}",
                SubscriptionError::Request {
                    filter: sub.topic.clone(),
                    reason: format!("{e:#}"),
                }
            ),
        }
    }
    subscribed
}

/// Forward inbound publishes until the link dies or shutdown is requested
async fn pump<C: BrokerConnector>(
    shared: &Shared<C>,
    link: &mut C::Link,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> PumpExit {
    loop {
        let event = tokio::select! {
            event = link.next_event() => event,
            _ = shutdown_rx.changed() => return PumpExit::Shutdown,
        };

        match event {
            Ok(LinkEvent::Message { topic, payload }) => {
                shared.update(|s| s.messages_received += 1);
                if shared
                    .inbound_tx
                    .send(InboundMessage { topic, payload })
                    .await
                    .is_err()
                {
                    trace!("Inbound receiver dropped, discarding message");
                }
            }
            Ok(LinkEvent::Closed { reason }) => return PumpExit::Lost(reason),
            Err(e) => return PumpExit::Lost(format!("{e:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBroker;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            reconnect_delay: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(2),
            subscriptions: default_subscriptions(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_single_attempt() {
        let broker = MemoryBroker::new();
        let connector = broker
            .connector()
            .with_connect_delay(Duration::from_millis(100));
        let (manager, _inbound) = ConnectionManager::new(test_config(), connector);

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(broker.session_count(), 1);

        // Repeated connect after success is a no-op
        manager.connect().await.expect("already connected");
        assert!(!manager.start());
        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(manager.state().status, ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_across_clones() {
        let broker = MemoryBroker::new();
        let (manager, _inbound) = ConnectionManager::new(test_config(), broker.connector());
        let twin = manager.clone();

        let (a, b) = tokio::join!(
            tokio::spawn(async move { twin.connect().await }),
            manager.connect()
        );
        assert!(a.expect("task panicked").is_ok());
        assert!(b.is_ok());
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_callers_share_one_attempt() {
        let broker = MemoryBroker::new();
        let connector = broker
            .connector()
            .with_connect_delay(Duration::from_millis(50));
        let (manager, _inbound) = ConnectionManager::new(test_config(), connector);

        let results = futures::future::join_all((0..16).map(|_| manager.connect())).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_enabled_topics_subscribed() {
        let broker = MemoryBroker::new();
        let mut config = test_config();
        config.subscriptions = vec![
            TopicSubscription::new("drone/+/location", Qos::AtLeastOnce),
            TopicSubscription {
                topic: "drone/+/alert".into(),
                qos: Qos::AtLeastOnce,
                enabled: false,
            },
        ];
        let (manager, _inbound) = ConnectionManager::new(config, broker.connector());

        manager.connect().await.unwrap();
        assert_eq!(broker.subscriptions(), vec!["drone/+/location".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resubscribes() {
        let broker = MemoryBroker::new();
        let (manager, _inbound) = ConnectionManager::new(test_config(), broker.connector());

        let (connected_tx, mut connected_rx) = mpsc::unbounded_channel();
        manager.on_connect(move || {
            let _ = connected_tx.send(());
        });
        let disconnects = Arc::new(Mutex::new(Vec::<String>::new()));
        let d = disconnects.clone();
        manager.on_disconnect(move |reason| d.lock().push(reason.to_string()));

        manager.connect().await.unwrap();
        connected_rx.recv().await.unwrap();
        assert_eq!(broker.subscriptions().len(), 3);

        broker.drop_sessions("broker restart");
        connected_rx.recv().await.expect("should reconnect");

        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(broker.subscriptions().len(), 3);
        assert_eq!(*disconnects.lock(), vec!["broker restart".to_string()]);
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_surfaces_error() {
        let broker = MemoryBroker::new();
        broker.set_refusal(Some("not authorized"));
        let (manager, _inbound) = ConnectionManager::new(test_config(), broker.connector());

        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        manager.on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let err = manager.connect().await.expect_err("broker refuses");
        match err {
            ConnectionError::Timeout { cause, .. } => assert!(cause.contains("not authorized")),
            other => panic!("unexpected error: {other:?}"),
        }

        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Error);
        assert!(state.last_error.is_some());
        assert!(broker.connect_attempts() >= 2, "should keep retrying");
        assert!(errors.load(Ordering::SeqCst) >= 2);

        // Retries continue in the background and eventually succeed
        broker.set_refusal(None);
        manager.connect().await.expect("should recover");
        assert_eq!(manager.state().last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_messages_forwarded_and_counted() {
        let broker = MemoryBroker::new();
        let (manager, mut inbound) = ConnectionManager::new(test_config(), broker.connector());
        manager.connect().await.unwrap();

        assert_eq!(broker.publish("drone/D1/location", "{}"), 1);
        let msg = inbound.recv().await.expect("message forwarded");
        assert_eq!(msg.topic, "drone/D1/location");
        assert_eq!(msg.payload, Bytes::from_static(b"{}"));
        assert_eq!(manager.state().messages_received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_then_restart() {
        let broker = MemoryBroker::new();
        let (manager, _inbound) = ConnectionManager::new(test_config(), broker.connector());

        manager.connect().await.unwrap();
        manager.shutdown().await;
        assert_eq!(manager.state().status, ConnectionStatus::Disconnected);
        assert_eq!(broker.session_count(), 0);

        manager.connect().await.unwrap();
        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(broker.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribed_listener_not_notified() {
        let broker = MemoryBroker::new();
        let (manager, _inbound) = ConnectionManager::new(test_config(), broker.connector());

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let handle = manager.on_connect(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.unsubscribe();

        manager.connect().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_waiting_connect() {
        let broker = MemoryBroker::new();
        broker.set_refusal(Some("down"));
        let mut config = test_config();
        config.connect_timeout = Duration::from_secs(30);
        let (manager, _inbound) = ConnectionManager::new(config, broker.connector());

        let waiter = manager.clone();
        let begun = tokio::time::Instant::now();
        let pending = tokio::spawn(async move { waiter.connect().await });

        sleep(Duration::from_secs(1)).await;
        manager.shutdown().await;

        let result = pending.await.expect("task panicked");
        assert_eq!(result, Err(ConnectionError::Closed));
        assert!(begun.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_subscription_does_not_abort_others() {
        let broker = MemoryBroker::new();
        broker.reject_filter("drone/+/geofence");
        let (manager, _inbound) = ConnectionManager::new(test_config(), broker.connector());

        manager.connect().await.expect("connection survives a rejected filter");
        assert_eq!(manager.state().status, ConnectionStatus::Connected);
        assert_eq!(
            broker.subscriptions(),
            vec!["drone/+/location".to_string(), "drone/+/alert".to_string()]
        );
        assert_eq!(broker.publish("drone/D1/alert", "{}"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_state_follows_lifecycle() {
        let broker = MemoryBroker::new();
        let (manager, _inbound) = ConnectionManager::new(test_config(), broker.connector());
        let mut states = manager.watch_state();
        assert_eq!(states.borrow().status, ConnectionStatus::Disconnected);

        manager.connect().await.unwrap();
        assert_eq!(states.borrow_and_update().status, ConnectionStatus::Connected);

        broker.drop_sessions("broker restart");
        let lost = states
            .wait_for(|s| s.status == ConnectionStatus::Disconnected)
            .await
            .expect("manager alive")
            .clone();
        assert_eq!(lost.last_error.as_deref(), Some("broker restart"));

        states
            .wait_for(|s| s.status == ConnectionStatus::Connected)
            .await
            .expect("manager alive");
        assert_eq!(broker.connect_attempts(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_racing_shutdown_leaves_no_stray_loop() {
        let broker = MemoryBroker::new();
        let (manager, _inbound) = ConnectionManager::new(test_config(), broker.connector());

        for _ in 0..50 {
            let starter = manager.clone();
            let stopper = manager.clone();
            let (started, stopped) = tokio::join!(
                tokio::spawn(async move { starter.start() }),
                tokio::spawn(async move { stopper.shutdown().await }),
            );
            started.expect("start panicked");
            stopped.expect("shutdown panicked");
        }

        manager.shutdown().await;
        assert_eq!(broker.session_count(), 0);
        assert!(!manager.is_connected());

        manager.connect().await.expect("restart after shutdown");
        sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.session_count(), 1);
    }
}
