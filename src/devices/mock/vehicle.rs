//! Simulated flight controller
//!
//! Records every command, answers according to its [`AckPolicy`], and
//! (optionally) runs a point-mass vehicle model that emits telemetry at the
//! configured rate.

use super::{AckPolicy, Answer, SimulationHandle, answer, period_for};
use crate::config::SimulationConfig;
use crate::core::adapter::{Ack, FlightAdapter, Subscription};
use crate::core::types::{
    Direction, GeoPoint, LinkEvent, Rotation, TelemetrySample, VehicleCommand, VehicleStatus,
};
use crate::error::Result;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const METERS_PER_DEGREE: f64 = 111_320.0;
const TAKEOFF_ALTITUDE_M: f32 = 1.2;
const CLIMB_RATE_MPS: f32 = 1.0;
const HOMING_SPEED_MPS: f64 = 5.0;
/// Battery drain per second with motors on (percent)
const DRAIN_PER_S: f32 = 0.05;

type Sinks = Arc<Mutex<Vec<(u64, Sender<LinkEvent>)>>>;

/// Point-mass vehicle driven by commands
#[derive(Debug, Clone)]
struct VehicleModel {
    home: GeoPoint,
    position: GeoPoint,
    heading_deg: f32,
    altitude_m: f32,
    target_altitude_m: f32,
    vertical_speed_mps: f32,
    horizontal_speed_mps: f32,
    battery_percent: f32,
    flying: bool,
    going_home: bool,
}

impl VehicleModel {
    fn new(home: GeoPoint) -> Self {
        Self {
            home,
            position: home,
            heading_deg: 0.0,
            altitude_m: 0.0,
            target_altitude_m: 0.0,
            vertical_speed_mps: 0.0,
            horizontal_speed_mps: 0.0,
            battery_percent: 100.0,
            flying: false,
            going_home: false,
        }
    }

    fn apply(&mut self, command: &VehicleCommand) {
        match command {
            VehicleCommand::TakeOff => {
                self.flying = true;
                self.target_altitude_m = TAKEOFF_ALTITUDE_M;
            }
            VehicleCommand::Land => {
                self.going_home = false;
                self.target_altitude_m = 0.0;
            }
            VehicleCommand::ReturnToHome => self.going_home = self.flying,
            VehicleCommand::Move {
                direction,
                distance_m,
            } if self.flying => self.translate(*direction, *distance_m),
            VehicleCommand::Rotate {
                rotation,
                angle_deg,
            } if self.flying => {
                let sign = match rotation {
                    Rotation::Left => -1.0,
                    Rotation::Right => 1.0,
                };
                self.heading_deg = (self.heading_deg + sign * angle_deg).rem_euclid(360.0);
            }
            VehicleCommand::StopMovement => self.target_altitude_m = self.altitude_m,
            VehicleCommand::EmergencyStop => {
                // Motors cut
                self.flying = false;
                self.going_home = false;
                self.altitude_m = 0.0;
                self.target_altitude_m = 0.0;
            }
            _ => {}
        }
    }

    fn translate(&mut self, direction: Direction, distance_m: f32) {
        let bearing = match direction {
            Direction::Up => {
                self.target_altitude_m += distance_m;
                return;
            }
            Direction::Down => {
                self.target_altitude_m = (self.target_altitude_m - distance_m).max(0.5);
                return;
            }
            Direction::Forward => self.heading_deg,
            Direction::Backward => self.heading_deg + 180.0,
            Direction::Left => self.heading_deg - 90.0,
            Direction::Right => self.heading_deg + 90.0,
        };
        let bearing = (bearing as f64).to_radians();
        let north = distance_m as f64 * bearing.cos();
        let east = distance_m as f64 * bearing.sin();
        self.offset(north, east);
    }

    fn offset(&mut self, north_m: f64, east_m: f64) {
        self.position.latitude += north_m / METERS_PER_DEGREE;
        self.position.longitude +=
            east_m / (METERS_PER_DEGREE * self.position.latitude.to_radians().cos());
    }

    fn step(&mut self, dt: Duration) {
        let dt_s = dt.as_secs_f32();

        self.horizontal_speed_mps = 0.0;
        if self.going_home {
            let north = (self.home.latitude - self.position.latitude) * METERS_PER_DEGREE;
            let east = (self.home.longitude - self.position.longitude)
                * METERS_PER_DEGREE
                * self.position.latitude.to_radians().cos();
            let remaining = north.hypot(east);
            let reach = HOMING_SPEED_MPS * dt_s as f64;
            if remaining <= reach {
                self.position = self.home;
                self.going_home = false;
                self.target_altitude_m = 0.0;
            } else {
                let scale = reach / remaining;
                self.offset(north * scale, east * scale);
                self.horizontal_speed_mps = HOMING_SPEED_MPS as f32;
            }
        }

        let delta = self.target_altitude_m - self.altitude_m;
        let max_step = CLIMB_RATE_MPS * dt_s;
        let step = delta.clamp(-max_step, max_step);
        self.altitude_m += step;
        self.vertical_speed_mps = if dt_s > 0.0 { step / dt_s } else { 0.0 };

        if self.flying && self.target_altitude_m == 0.0 && self.altitude_m <= 0.0 {
            self.altitude_m = 0.0;
            self.flying = false;
            log::debug!("Mock vehicle touched down");
        }

        if self.flying {
            self.battery_percent = (self.battery_percent - DRAIN_PER_S * dt_s).max(0.0);
        }
    }

    fn sample(&self) -> TelemetrySample {
        TelemetrySample {
            altitude_m: Some(self.altitude_m),
            velocity_mps: Some([self.horizontal_speed_mps, 0.0, -self.vertical_speed_mps]),
            speed_mps: None,
            battery_percent: Some(self.battery_percent.round() as u8),
            gps_satellites: Some(12),
            aircraft_location: Some(self.position),
            home_location: Some(self.home),
            status: VehicleStatus {
                is_flying: self.flying,
                is_taking_off: self.flying && self.altitude_m < self.target_altitude_m,
                is_landing: self.flying && self.target_altitude_m == 0.0,
                is_going_home: self.going_home,
                motors_on: self.flying,
            },
        }
    }
}

/// Flight adapter backed by a simulated vehicle
pub struct MockFlightAdapter {
    policy: Mutex<AckPolicy>,
    pending: Mutex<VecDeque<Ack>>,
    commands: Mutex<Vec<VehicleCommand>>,
    sinks: Sinks,
    next_sink: AtomicU64,
    connected: AtomicBool,
    model: Arc<Mutex<VehicleModel>>,
}

impl MockFlightAdapter {
    pub fn new(policy: AckPolicy) -> Self {
        Self::with_home(policy, GeoPoint::new(0.0, 0.0))
    }

    /// Adapter whose vehicle starts at `home`
    pub fn with_home(policy: AckPolicy, home: GeoPoint) -> Self {
        Self {
            policy: Mutex::new(policy),
            pending: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            sinks: Arc::new(Mutex::new(Vec::new())),
            next_sink: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            model: Arc::new(Mutex::new(VehicleModel::new(home))),
        }
    }

    pub fn set_policy(&self, policy: AckPolicy) {
        *self.policy.lock() = policy;
    }

    pub fn set_product_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Commands received so far, in order
    pub fn commands(&self) -> Vec<VehicleCommand> {
        self.commands.lock().clone()
    }

    /// Acks queued under `AckPolicy::Manual`
    pub fn pending_acks(&self) -> usize {
        self.pending.lock().len()
    }

    /// Answer the oldest queued ack. Returns false if none was queued.
    pub fn complete_next(&self, result: std::result::Result<(), String>) -> bool {
        let ack = self.pending.lock().pop_front();
        match ack {
            Some(ack) => {
                ack.complete(result);
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every live subscription
    pub fn emit(&self, event: LinkEvent) {
        self.sinks
            .lock()
            .retain(|(_, sink)| sink.send(event.clone()).is_ok());
    }

    pub fn active_subscriptions(&self) -> usize {
        self.sinks.lock().len()
    }

    /// Start emitting telemetry from the vehicle model
    pub fn start_simulation(
        self: &Arc<Self>,
        config: &SimulationConfig,
    ) -> Result<SimulationHandle> {
        {
            let mut model = self.model.lock();
            let home = GeoPoint::new(config.start_latitude, config.start_longitude);
            *model = VehicleModel::new(home);
        }

        self.emit(LinkEvent::Connected);
        let adapter = Arc::clone(self);
        SimulationHandle::spawn("mock-telemetry", period_for(config.telemetry_hz), move |dt| {
            let sample = {
                let mut model = adapter.model.lock();
                model.step(dt);
                model.sample()
            };
            adapter.emit(LinkEvent::Telemetry(sample));
        })
    }
}

impl FlightAdapter for MockFlightAdapter {
    fn subscribe_telemetry(&self, sink: Sender<LinkEvent>) -> Result<Subscription> {
        let id = self.next_sink.fetch_add(1, Ordering::Relaxed);
        self.sinks.lock().push((id, sink));
        log::debug!("Mock telemetry subscription {} registered", id);

        let sinks = Arc::clone(&self.sinks);
        Ok(Subscription::new(move || {
            sinks.lock().retain(|(sink_id, _)| *sink_id != id);
            log::debug!("Mock telemetry subscription {} cancelled", id);
        }))
    }

    fn send_command(&self, command: VehicleCommand, ack: Ack) {
        log::debug!("Mock vehicle received {:?}", command);
        self.model.lock().apply(&command);
        self.commands.lock().push(command);

        let policy = self.policy.lock().clone();
        if let Answer::Queue(ack) = answer(&policy, ack) {
            self.pending.lock().push_back(ack);
        }
    }

    fn product_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
