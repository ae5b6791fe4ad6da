mod flight;

use anyhow::{bail, Context};
use clap::Parser;
use fleet_shared::codec::{self, MessageKind};
use fleet_shared::{defaults, DroneMessage};
use flight::{FlightPlan, SimulatedDrone};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "telemetry-sim")]
#[command(about = "Publish synthetic UAV telemetry to an MQTT broker")]
struct Cli {
    #[arg(long, default_value = "mqtt://localhost:1883")]
    broker: String,
    /// Number of simulated vehicles
    #[arg(long, default_value_t = 3)]
    drones: usize,
    /// Publish interval per vehicle
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
    /// Replace every Kth location payload with garbage (0 disables)
    #[arg(long, default_value_t = 0)]
    malformed_every: u64,
    #[arg(long, default_value_t = 37.7749)]
    center_lat: f64,
    #[arg(long, default_value_t = -122.4194, allow_hyphen_values = true)]
    center_lon: f64,
    #[arg(long, default_value_t = 300.0)]
    radius_m: f64,
    /// Battery percent lost per second
    #[arg(long, default_value_t = 0.1)]
    drain_per_sec: f64,
}

/// Split `mqtt://host[:port]` or `tcp://host[:port]` into its parts
fn broker_address(url: &str) -> anyhow::Result<(String, u16)> {
    let Some(rest) = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
    else {
        bail!("unsupported broker URL scheme: {}", url);
    };
    let authority = rest.trim_end_matches('/');
    if authority.contains('/') {
        bail!("invalid broker address in {}", url);
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().with_context(|| format!("bad port in {}", url))?;
            (host, port)
        }
        None => (authority, defaults::BROKER_PORT),
    };
    if host.is_empty() {
        bail!("missing host in {}", url);
    }
    Ok((host.to_string(), port))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    if cli.drones == 0 {
        bail!("--drones must be at least 1");
    }

    let (host, port) = broker_address(&cli.broker)?;
    let mut options = MqttOptions::new(format!("telemetry-sim-{}", std::process::id()), host, port);
    options.set_keep_alive(Duration::from_secs(defaults::KEEPALIVE_SECS));

    let (client, mut eventloop) = AsyncClient::new(options, 100);

    info!("Telemetry simulator starting");
    info!("  Broker: {}", cli.broker);
    info!("  Vehicles: {} every {}ms", cli.drones, cli.interval_ms);

    // The client only makes progress while the event loop is polled
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("Connected to broker"),
                Ok(event) => debug!("MQTT event: {:?}", event),
                Err(e) => {
                    warn!("Broker connection error: {}", e);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let plan = FlightPlan {
        center_lat: cli.center_lat,
        center_lon: cli.center_lon,
        orbit_radius_m: cli.radius_m,
        drain_per_sec: cli.drain_per_sec,
        ..FlightPlan::default()
    };
    let mut fleet: Vec<SimulatedDrone> = (0..cli.drones)
        .map(|i| SimulatedDrone::new(i, cli.drones))
        .collect();

    let interval = Duration::from_millis(cli.interval_ms.max(10));
    let dt = interval.as_secs_f64();
    let mut ticker = tokio::time::interval(interval);
    let mut location_count: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for drone in fleet.iter_mut() {
                    for message in drone.step(&plan, dt) {
                        let (topic, payload) = match codec::encode(&message) {
                            Ok(encoded) => encoded,
                            Err(e) => {
                                error!("Failed to encode message for {}: {}", drone.id, e);
                                continue;
                            }
                        };

                        let mut payload = payload.to_vec();
                        if let DroneMessage::Location(_) = message {
                            location_count += 1;
                            if cli.malformed_every > 0 && location_count % cli.malformed_every == 0 {
                                debug!("Sending malformed payload on {}", topic);
                                payload = br#"{"latitude":"garbled""#.to_vec();
                            }
                        } else {
                            info!("{} -> {}", drone.id, describe(&message));
                        }

                        if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, payload).await {
                            error!("Publish failed: {}", e);
                        }
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutting down after {} location samples", location_count);
                for drone in &fleet {
                    info!("  {} battery {:.0}%", drone.id, drone.battery());
                }
                break;
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        debug!("Disconnect failed: {}", e);
    }
    Ok(())
}

fn describe(message: &DroneMessage) -> String {
    match message {
        DroneMessage::Location(_) => MessageKind::Location.to_string(),
        DroneMessage::Geofence(event) => format!("geofence {:?} {}", event.event_type, event.geofence_id),
        DroneMessage::Alert(alert) => format!("{:?} alert: {}", alert.severity, alert.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_address() {
        assert_eq!(broker_address("mqtt://localhost:1883").unwrap(), ("localhost".into(), 1883));
        assert_eq!(broker_address("tcp://10.0.0.5:1884/").unwrap(), ("10.0.0.5".into(), 1884));
        assert_eq!(broker_address("mqtt://broker.local").unwrap(), ("broker.local".into(), 1883));
        assert!(broker_address("mqtt://host:abc").is_err());
        assert!(broker_address("mqtt://").is_err());
    }

    #[test]
    fn test_broker_address_rejects_unknown_scheme_and_empty_host() {
        assert!(broker_address("ws://broker:9001").is_err());
        assert!(broker_address("broker.local").is_err());
        assert!(broker_address("mqtt://:1883").is_err());
        assert!(broker_address("mqtt://broker/path").is_err());
    }
}
