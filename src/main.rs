use clap::Parser;
use fleet_tracker::connection::ConnectionManager;
use fleet_tracker::dispatch::{register_tracking_handlers, MessageDispatcher};
use fleet_tracker::tracking::{
    EventLog, SelectionCoordinator, SharedEventLog, SharedTrackStore, StalenessSweeper,
    VehicleTrackStore,
};
use fleet_tracker::transport::{BrokerConnector, MqttConnector};
use fleet_tracker::TrackerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "fleet-tracker")]
#[command(about = "Real-time UAV location tracking over MQTT")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Broker URL, overriding config and environment
    #[arg(long)]
    broker: Option<String>,
    /// Vehicle to select for detail output
    #[arg(long)]
    follow: Option<String>,
    #[arg(long, default_value_t = 10)]
    status_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let mut config = TrackerConfig::load(cli.config.as_deref())?;
    config.apply_env();
    if let Some(url) = cli.broker {
        config.broker.url = url;
    }
    config.validate()?;

    info!("Fleet tracker starting: {}", config.broker.client_id);
    info!("  Broker: {}", config.broker.url);
    info!(
        "  History: {} samples, inactive after {}ms",
        config.tracking.history_capacity, config.tracking.inactivity_timeout_ms
    );

    let store = VehicleTrackStore::shared(config.track());
    let events = EventLog::shared(config.tracking.event_log_capacity);
    let dispatcher = Arc::new(MessageDispatcher::new());
    let _handlers = register_tracking_handlers(&dispatcher, store.clone(), events.clone());

    let selection = SelectionCoordinator::new(store.clone());
    selection.select(cli.follow.as_deref());

    let connector = MqttConnector::new(config.mqtt_settings()?);
    let (connection, mut inbound) = ConnectionManager::new(config.connection(), connector);

    let store_clone = store.clone();
    connection.on_connect(move || {
        info!("Live tracking resumed ({} vehicles known)", store_clone.read().len());
    });

    let sweeper = StalenessSweeper::new(store.clone(), config.sweep_interval()).start();
    info!("Staleness sweeper started");

    // Spawn dispatch task
    let dispatcher_clone = dispatcher.clone();
    tokio::spawn(async move {
        while let Some(msg) = inbound.recv().await {
            dispatcher_clone.dispatch(&msg.topic, &msg.payload);
        }
        debug!("Inbound channel closed");
    });

    // Connect in the background; the loop keeps retrying after a failure
    let connection_clone = connection.clone();
    tokio::spawn(async move {
        if let Err(e) = connection_clone.connect().await {
            error!("Initial broker connection failed: {}", e);
        }
    });

    // Main status loop
    let mut ticker = tokio::time::interval(Duration::from_secs(cli.status_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                log_status(&connection, &dispatcher, &store, &events, &selection);
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutting down");
                break;
            }
        }
    }

    sweeper.stop();
    connection.shutdown().await;
    Ok(())
}

/// Console status view: connection, fleet counts, followed vehicle
fn log_status<C: BrokerConnector>(
    connection: &ConnectionManager<C>,
    dispatcher: &MessageDispatcher,
    store: &SharedTrackStore,
    events: &SharedEventLog,
    selection: &SelectionCoordinator,
) {
    let state = connection.state();
    let stats = dispatcher.stats();
    let summary = store.read().summary();

    match &state.last_error {
        Some(cause) if state.status != fleet_tracker::ConnectionStatus::Connected => info!(
            "[STATUS] broker={} ({}) received={}",
            state.status, cause, state.messages_received
        ),
        _ => info!(
            "[STATUS] broker={} received={}",
            state.status, state.messages_received
        ),
    }
    info!(
        "[STATUS] vehicles={} active={} connected={} dropped={} ignored={}",
        summary.total, summary.active, summary.connected, stats.dropped, stats.ignored
    );

    let tracks = store.read().snapshot();
    for track in &tracks {
        let latest = track.latest();
        debug!(
            "  {} {:?} pos={:.5},{:.5} alt={:.0}m bat={:.0}% history={}",
            track.vehicle_id,
            track.activity(),
            latest.latitude,
            latest.longitude,
            latest.altitude,
            latest.battery_level,
            track.history().len()
        );
    }

    if let Some(id) = selection.selected() {
        match selection.selected_detail() {
            Some(track) => {
                let latest = track.latest();
                info!(
                    "[FOLLOW] {} active={} link={} pos={:.6},{:.6} alt={:.1}m speed={:.1}m/s hdg={:.0} bat={:.0}% sats={} trail={} events={}",
                    id,
                    track.is_active(),
                    track.connected,
                    latest.latitude,
                    latest.longitude,
                    latest.altitude,
                    latest.speed,
                    latest.heading,
                    latest.battery_level,
                    latest.satellites,
                    selection.selected_history().len(),
                    events.read().for_vehicle(&id).len()
                );
            }
            None => info!("[FOLLOW] {} (no telemetry yet)", id),
        }
    }
}
