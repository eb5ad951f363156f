//! Telemetry ingest
//!
//! Merges raw [`TelemetrySample`]s from the hardware link into complete
//! [`TelemetrySnapshot`]s and publishes them. Fields a sample does not
//! carry keep their previous value; the merged snapshot always replaces the
//! published one as a whole.
//!
//! The ingest also tracks sample freshness for link-loss detection and
//! classifies the battery level against the configured thresholds.

use crate::config::FlightConfig;
use crate::core::types::{GeoPoint, TelemetrySample, TelemetrySnapshot, VehicleStatus, now_us};
use crate::core::watch::{Watch, WatchReceiver};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Mean Earth radius used for distance-from-home
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Battery level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BatteryStatus {
    Normal,
    Low,
    Critical,
}

struct IngestState {
    last_sample_at: Option<Instant>,
    home: Option<GeoPoint>,
    status: Option<VehicleStatus>,
    battery: BatteryStatus,
}

/// Latest-telemetry publisher
pub struct TelemetryIngest {
    latest: Watch<TelemetrySnapshot>,
    state: Mutex<IngestState>,
    low_battery_percent: u8,
    critical_battery_percent: u8,
}

impl TelemetryIngest {
    pub fn new(config: &FlightConfig) -> Self {
        Self {
            latest: Watch::default(),
            state: Mutex::new(IngestState {
                last_sample_at: None,
                home: None,
                status: None,
                battery: BatteryStatus::Normal,
            }),
            low_battery_percent: config.low_battery_percent,
            critical_battery_percent: config.critical_battery_percent,
        }
    }

    /// Merge `sample` into the published snapshot and return the new snapshot
    pub fn ingest(&self, sample: &TelemetrySample) -> TelemetrySnapshot {
        // Held across merge and publish so concurrent samples cannot interleave
        let mut state = self.state.lock();
        let previous = self.latest.get();

        if let Some(home) = sample.home_location.filter(GeoPoint::is_known) {
            state.home = Some(home);
        }
        let location = sample.aircraft_location.filter(GeoPoint::is_known);

        let speed_mps = match (sample.velocity_mps, sample.speed_mps) {
            (Some([vx, vy, vz]), _) => (vx * vx + vy * vy + vz * vz).sqrt(),
            (None, Some(speed)) => speed,
            (None, None) => previous.speed_mps,
        };

        let distance_from_home_m = match (location, state.home) {
            (Some(aircraft), Some(home)) => haversine_m(aircraft, home) as f32,
            _ => previous.distance_from_home_m,
        };

        let snapshot = TelemetrySnapshot {
            altitude_m: sample.altitude_m.unwrap_or(previous.altitude_m),
            speed_mps,
            battery_percent: sample
                .battery_percent
                .map(|b| b.min(100))
                .unwrap_or(previous.battery_percent),
            distance_from_home_m,
            gps_satellites: sample.gps_satellites.unwrap_or(previous.gps_satellites),
            latitude: location.map_or(previous.latitude, |p| p.latitude),
            longitude: location.map_or(previous.longitude, |p| p.longitude),
            is_flying: sample.status.is_flying,
            timestamp_us: now_us(),
        };

        state.last_sample_at = Some(Instant::now());
        state.status = Some(sample.status);

        let battery = self.classify_battery(snapshot.battery_percent);
        if battery != state.battery {
            match battery {
                BatteryStatus::Critical => {
                    log::warn!("Battery critical: {}%", snapshot.battery_percent)
                }
                BatteryStatus::Low => log::warn!("Battery low: {}%", snapshot.battery_percent),
                BatteryStatus::Normal => {
                    log::info!("Battery back to normal: {}%", snapshot.battery_percent)
                }
            }
            state.battery = battery;
        }

        self.latest.set(snapshot);
        log::trace!(
            "Telemetry: alt={:.1}m speed={:.1}m/s battery={}% gps={}",
            snapshot.altitude_m,
            snapshot.speed_mps,
            snapshot.battery_percent,
            snapshot.gps_satellites
        );
        snapshot
    }

    /// Most recent complete snapshot
    pub fn latest(&self) -> TelemetrySnapshot {
        self.latest.get()
    }

    /// Stream of snapshots, starting with the current one
    pub fn subscribe(&self) -> WatchReceiver<TelemetrySnapshot> {
        self.latest.subscribe()
    }

    /// Vehicle status from the most recent sample, while the link is live
    pub fn vehicle_status(&self) -> Option<VehicleStatus> {
        self.state.lock().status
    }

    /// Time since the last sample, `None` if no sample since (re)connect
    pub fn sample_age(&self) -> Option<Duration> {
        self.state.lock().last_sample_at.map(|t| t.elapsed())
    }

    /// Whether the last sample is older than `threshold`
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.sample_age().is_some_and(|age| age > threshold)
    }

    /// Forget freshness and status after the link dropped. The last
    /// snapshot stays published.
    pub fn mark_link_lost(&self) {
        let mut state = self.state.lock();
        state.last_sample_at = None;
        state.status = None;
    }

    pub fn battery_status(&self) -> BatteryStatus {
        self.state.lock().battery
    }

    fn classify_battery(&self, percent: u8) -> BatteryStatus {
        if percent <= self.critical_battery_percent {
            BatteryStatus::Critical
        } else if percent <= self.low_battery_percent {
            BatteryStatus::Low
        } else {
            BatteryStatus::Normal
        }
    }
}

/// Great-circle distance between two points (meters)
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingest() -> TelemetryIngest {
        TelemetryIngest::new(&FlightConfig::default())
    }

    #[test]
    fn test_partial_sample_keeps_previous_fields() {
        let ingest = ingest();
        ingest.ingest(&TelemetrySample {
            altitude_m: Some(12.0),
            battery_percent: Some(80),
            gps_satellites: Some(9),
            ..Default::default()
        });
        let snap = ingest.ingest(&TelemetrySample {
            altitude_m: Some(15.0),
            ..Default::default()
        });

        assert_eq!(snap.altitude_m, 15.0);
        assert_eq!(snap.battery_percent, 80);
        assert_eq!(snap.gps_satellites, 9);
    }

    #[test]
    fn test_speed_from_velocity_vector() {
        let ingest = ingest();
        let snap = ingest.ingest(&TelemetrySample {
            velocity_mps: Some([3.0, 4.0, 0.0]),
            speed_mps: Some(99.0),
            ..Default::default()
        });
        assert!((snap.speed_mps - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_from_home() {
        let ingest = ingest();
        let home = GeoPoint::new(-23.5505, -46.6333);
        // ~111m north
        let aircraft = GeoPoint::new(-23.5495, -46.6333);
        let snap = ingest.ingest(&TelemetrySample {
            aircraft_location: Some(aircraft),
            home_location: Some(home),
            ..Default::default()
        });
        assert!((snap.distance_from_home_m - 111.2).abs() < 1.0);

        // Unknown (0,0) fix keeps the previous distance and position
        let snap = ingest.ingest(&TelemetrySample {
            aircraft_location: Some(GeoPoint::default()),
            ..Default::default()
        });
        assert!((snap.distance_from_home_m - 111.2).abs() < 1.0);
        assert_eq!(snap.latitude, aircraft.latitude);
    }

    #[test]
    fn test_battery_classification() {
        let ingest = ingest();
        for (percent, expected) in [
            (90, BatteryStatus::Normal),
            (30, BatteryStatus::Low),
            (15, BatteryStatus::Critical),
            (50, BatteryStatus::Normal),
        ] {
            ingest.ingest(&TelemetrySample {
                battery_percent: Some(percent),
                ..Default::default()
            });
            assert_eq!(ingest.battery_status(), expected, "at {}%", percent);
        }
    }

    #[test]
    fn test_staleness_tracking() {
        let ingest = ingest();
        assert!(!ingest.is_stale(Duration::ZERO));
        ingest.ingest(&TelemetrySample::default());
        std::thread::sleep(Duration::from_millis(5));
        assert!(ingest.is_stale(Duration::from_millis(1)));
        assert!(ingest.vehicle_status().is_some());

        ingest.mark_link_lost();
        assert!(ingest.sample_age().is_none());
        assert!(ingest.vehicle_status().is_none());
    }
}
