//! Synthetic flight model: circular orbits, a geofence and battery drain

use fleet_shared::{
    defaults, now_ms, AlertMessage, AlertSeverity, DroneMessage, GeofenceEvent,
    GeofenceTransition, VehicleLocationSample,
};
use std::f64::consts::TAU;

const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Shared parameters for every simulated vehicle
#[derive(Debug, Clone)]
pub struct FlightPlan {
    pub center_lat: f64,
    pub center_lon: f64,
    pub orbit_radius_m: f64,
    pub altitude_m: f64,
    pub speed_mps: f64,
    /// Battery percent lost per second
    pub drain_per_sec: f64,
    pub geofence_id: String,
    pub geofence_radius_m: f64,
}

impl Default for FlightPlan {
    fn default() -> Self {
        Self {
            center_lat: 37.7749,
            center_lon: -122.4194,
            orbit_radius_m: 300.0,
            altitude_m: 120.0,
            speed_mps: 12.0,
            drain_per_sec: 0.1,
            geofence_id: "gf-depot".into(),
            geofence_radius_m: 150.0,
        }
    }
}

impl FlightPlan {
    /// Offset a local east/north displacement from the orbit centre
    fn to_lat_lon(&self, east_m: f64, north_m: f64) -> (f64, f64) {
        let lat = self.center_lat + north_m / METERS_PER_DEG_LAT;
        let lon = self.center_lon
            + east_m / (METERS_PER_DEG_LAT * self.center_lat.to_radians().cos());
        (lat, lon)
    }

    /// The geofence sits on the orbit's eastern edge so every lap crosses it
    fn fence_center(&self) -> (f64, f64) {
        (self.orbit_radius_m, 0.0)
    }
}

/// One simulated vehicle
#[derive(Debug, Clone)]
pub struct SimulatedDrone {
    pub id: String,
    angle: f64,
    battery: f64,
    inside_fence: Option<bool>,
}

impl SimulatedDrone {
    pub fn new(index: usize, fleet_size: usize) -> Self {
        Self {
            id: format!("SIM-{:03}", index + 1),
            angle: TAU * index as f64 / fleet_size.max(1) as f64,
            battery: 100.0 - 7.0 * index as f64,
            inside_fence: None,
        }
    }

    pub fn battery(&self) -> f64 {
        self.battery
    }

    /// Advance by `dt_secs` and return the messages to publish
    pub fn step(&mut self, plan: &FlightPlan, dt_secs: f64) -> Vec<DroneMessage> {
        let mut messages = Vec::new();

        let omega = plan.speed_mps / plan.orbit_radius_m.max(1.0);
        self.angle = (self.angle + omega * dt_secs) % TAU;

        let east = plan.orbit_radius_m * self.angle.cos();
        let north = plan.orbit_radius_m * self.angle.sin();
        let (latitude, longitude) = plan.to_lat_lon(east, north);

        // Counter-clockwise tangent, as a compass bearing
        let heading = (-self.angle.sin()).atan2(self.angle.cos()).to_degrees().rem_euclid(360.0);

        let before = self.battery;
        self.battery = (self.battery - plan.drain_per_sec * dt_secs).max(0.0);
        if let Some(alert) = self.battery_alert(before) {
            messages.push(DroneMessage::Alert(alert));
        }
        if self.battery <= 0.0 {
            // Battery swap keeps the demo running
            self.battery = 100.0;
        }

        let mut sample = VehicleLocationSample::new(&self.id, latitude, longitude, plan.altitude_m);
        sample.speed = plan.speed_mps;
        sample.heading = heading;
        sample.battery_level = self.battery;
        sample.satellites = 12;
        sample.flight_mode = Some("AUTO".into());
        messages.push(DroneMessage::Location(sample));

        let (fx, fy) = plan.fence_center();
        let inside = (east - fx).hypot(north - fy) <= plan.geofence_radius_m;
        if self.inside_fence.is_some_and(|was| was != inside) {
            messages.push(DroneMessage::Geofence(GeofenceEvent {
                drone_id: self.id.clone(),
                geofence_id: plan.geofence_id.clone(),
                geofence_name: Some("Depot".into()),
                event_type: if inside {
                    GeofenceTransition::Enter
                } else {
                    GeofenceTransition::Exit
                },
                latitude,
                longitude,
                timestamp: now_ms(),
            }));
        }
        self.inside_fence = Some(inside);

        messages
    }

    fn battery_alert(&self, before: f64) -> Option<AlertMessage> {
        let crossed = |threshold: f64| before >= threshold && self.battery < threshold;

        if crossed(defaults::BATTERY_CRITICAL_PERCENT) {
            let mut alert = AlertMessage::new(
                &self.id,
                AlertSeverity::Critical,
                format!("Battery critical: {:.0}%", self.battery),
            );
            alert.code = Some("BATTERY_CRITICAL".into());
            Some(alert)
        } else if crossed(defaults::BATTERY_WARNING_PERCENT) {
            let mut alert = AlertMessage::new(
                &self.id,
                AlertSeverity::Warning,
                format!("Battery low: {:.0}%", self.battery),
            );
            alert.code = Some("BATTERY_LOW".into());
            Some(alert)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locations(messages: &[DroneMessage]) -> Vec<&VehicleLocationSample> {
        messages
            .iter()
            .filter_map(|m| match m {
                DroneMessage::Location(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_fleet_ids_and_spacing() {
        let a = SimulatedDrone::new(0, 4);
        let b = SimulatedDrone::new(1, 4);
        assert_eq!(a.id, "SIM-001");
        assert_eq!(b.id, "SIM-002");
        assert!((b.angle - TAU / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_step_emits_valid_location() {
        let plan = FlightPlan::default();
        let mut drone = SimulatedDrone::new(0, 1);
        let messages = drone.step(&plan, 1.0);

        let samples = locations(&messages);
        assert_eq!(samples.len(), 1);
        let sample = samples[0];
        assert_eq!(sample.drone_id, "SIM-001");
        assert!((sample.latitude - plan.center_lat).abs() < 0.01);
        assert!((sample.longitude - plan.center_lon).abs() < 0.01);
        assert!((0.0..360.0).contains(&sample.heading));
        assert!((0.0..=100.0).contains(&sample.battery_level));
    }

    #[test]
    fn test_orbit_crosses_geofence() {
        let plan = FlightPlan::default();
        let mut drone = SimulatedDrone::new(0, 1);
        let lap_secs = TAU * plan.orbit_radius_m / plan.speed_mps;

        let mut transitions = Vec::new();
        for _ in 0..(lap_secs as usize + 2) {
            for message in drone.step(&plan, 1.0) {
                if let DroneMessage::Geofence(event) = message {
                    transitions.push(event.event_type);
                }
            }
        }

        assert!(transitions.contains(&GeofenceTransition::Exit));
        assert!(transitions.contains(&GeofenceTransition::Enter));
    }

    #[test]
    fn test_battery_alerts_escalate() {
        let plan = FlightPlan {
            drain_per_sec: 5.0,
            ..FlightPlan::default()
        };
        let mut drone = SimulatedDrone::new(0, 1);

        let mut severities = Vec::new();
        for _ in 0..19 {
            for message in drone.step(&plan, 1.0) {
                if let DroneMessage::Alert(alert) = message {
                    severities.push(alert.severity);
                }
            }
        }

        assert_eq!(severities, vec![AlertSeverity::Warning, AlertSeverity::Critical]);
    }

    #[test]
    fn test_battery_swap_at_empty() {
        let plan = FlightPlan {
            drain_per_sec: 60.0,
            ..FlightPlan::default()
        };
        let mut drone = SimulatedDrone::new(0, 1);
        drone.step(&plan, 1.0);
        drone.step(&plan, 1.0);
        assert_eq!(drone.battery(), 100.0);
    }
}
