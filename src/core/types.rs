//! Core data types shared by the flight, video and streaming components.
//!
//! Key types:
//! - [`FlightState`]: Discrete vehicle mode tracked by the application
//! - [`StreamState`]: Outbound re-broadcast session state
//! - [`TelemetrySample`]: Raw (possibly partial) sample from the hardware link
//! - [`TelemetrySnapshot`]: Complete, immutable view published to readers
//! - [`VehicleCommand`]: Commands forwarded to the flight adapter
//! - [`CommandOutcome`]: Result of a user-issued command

use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, bounded};
use std::fmt;

/// Vehicle flight state as tracked by the control application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlightState {
    /// No hardware link (initial state)
    #[default]
    Disconnected,
    /// Connected, on the ground, motors idle
    OnGround,
    /// Take-off requested, awaiting confirmation
    TakingOff,
    /// Flying
    InAir,
    /// Landing requested, awaiting confirmation
    Landing,
    /// Return-to-home requested, awaiting confirmation
    GoingHome,
    /// Emergency stop engaged; only an explicit reset leaves this state
    EmergencyStop,
    /// Hardware fault or unconfirmed transition
    Error,
}

impl FlightState {
    /// States entered optimistically on command issue, pending confirmation
    pub fn is_awaiting_confirmation(self) -> bool {
        matches!(
            self,
            FlightState::TakingOff | FlightState::Landing | FlightState::GoingHome
        )
    }

    /// Movement and rotation are only valid in this state
    pub fn is_airborne(self) -> bool {
        self == FlightState::InAir
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlightState::Disconnected => "disconnected",
            FlightState::OnGround => "on_ground",
            FlightState::TakingOff => "taking_off",
            FlightState::InAir => "in_air",
            FlightState::Landing => "landing",
            FlightState::GoingHome => "going_home",
            FlightState::EmergencyStop => "emergency_stop",
            FlightState::Error => "error",
        }
    }
}

impl fmt::Display for FlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound re-broadcast session state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Stopping,
    Error(String),
}

impl StreamState {
    /// Local preview must be detached while the session is in one of these
    pub fn is_live(&self) -> bool {
        matches!(self, StreamState::Connecting | StreamState::Streaming)
    }

    /// `start()` is accepted from these states
    pub fn can_start(&self) -> bool {
        matches!(self, StreamState::Idle | StreamState::Error(_))
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Idle => f.write_str("idle"),
            StreamState::Connecting => f.write_str("connecting"),
            StreamState::Streaming => f.write_str("streaming"),
            StreamState::Stopping => f.write_str("stopping"),
            StreamState::Error(reason) => write!(f, "error ({})", reason),
        }
    }
}

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Flight controllers report 0,0 until a GPS fix exists
    pub fn is_known(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// Flight status flags reported by the flight controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VehicleStatus {
    pub is_flying: bool,
    pub is_taking_off: bool,
    pub is_landing: bool,
    pub is_going_home: bool,
    pub motors_on: bool,
}

impl VehicleStatus {
    /// Whether a (re)connected vehicle should be considered airborne
    pub fn reports_airborne(&self) -> bool {
        self.is_flying || self.is_taking_off || self.is_landing || self.is_going_home
    }
}

/// One telemetry sample from the hardware link.
///
/// Fields the hardware did not report are `None`; the ingest keeps the
/// previous value for them.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySample {
    pub altitude_m: Option<f32>,
    /// Velocity vector (north, east, down) in m/s
    pub velocity_mps: Option<[f32; 3]>,
    /// Scalar ground speed when no velocity vector is available
    pub speed_mps: Option<f32>,
    pub battery_percent: Option<u8>,
    pub gps_satellites: Option<u8>,
    pub aircraft_location: Option<GeoPoint>,
    pub home_location: Option<GeoPoint>,
    pub status: VehicleStatus,
}

/// Complete telemetry view. Replaced wholesale on each sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    pub altitude_m: f32,
    pub speed_mps: f32,
    /// Battery charge (0-100)
    pub battery_percent: u8,
    pub distance_from_home_m: f32,
    pub gps_satellites: u8,
    pub latitude: f64,
    pub longitude: f64,
    pub is_flying: bool,
    /// Capture time (microseconds since UNIX epoch)
    pub timestamp_us: u64,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            altitude_m: 0.0,
            speed_mps: 0.0,
            battery_percent: 100,
            distance_from_home_m: 0.0,
            gps_satellites: 0,
            latitude: 0.0,
            longitude: 0.0,
            is_flying: false,
            timestamp_us: 0,
        }
    }
}

/// Events delivered by the flight adapter's telemetry subscription
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Product connected (no telemetry yet)
    Connected,
    /// Periodic telemetry sample
    Telemetry(TelemetrySample),
    /// Product disconnected
    Disconnected,
    /// Flight controller reported a fault
    Fault(String),
}

/// Horizontal/vertical translation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Forward,
    Backward,
    Left,
    Right,
}

/// Yaw direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Left,
    Right,
}

/// Commands forwarded to the flight adapter
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleCommand {
    TakeOff,
    Land,
    ReturnToHome,
    /// Translate by `distance_m` meters
    Move { direction: Direction, distance_m: f32 },
    /// Yaw by `angle_deg` degrees
    Rotate { rotation: Rotation, angle_deg: f32 },
    /// Zero all stick inputs
    StopMovement,
    EmergencyStop,
    TakePhoto,
    StartRecording,
    StopRecording,
}

impl VehicleCommand {
    /// Commands whose failure forces the flight state to `Error`
    pub fn is_flight_affecting(&self) -> bool {
        matches!(
            self,
            VehicleCommand::TakeOff | VehicleCommand::Land | VehicleCommand::ReturnToHome
        )
    }

    pub fn is_movement(&self) -> bool {
        matches!(
            self,
            VehicleCommand::Move { .. } | VehicleCommand::Rotate { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            VehicleCommand::TakeOff => "take_off",
            VehicleCommand::Land => "land",
            VehicleCommand::ReturnToHome => "return_to_home",
            VehicleCommand::Move { .. } => "move",
            VehicleCommand::Rotate { .. } => "rotate",
            VehicleCommand::StopMovement => "stop_movement",
            VehicleCommand::EmergencyStop => "emergency_stop",
            VehicleCommand::TakePhoto => "take_photo",
            VehicleCommand::StartRecording => "start_recording",
            VehicleCommand::StopRecording => "stop_recording",
        }
    }
}

/// Outcome of a user-issued command.
///
/// `accepted == false` means the gate rejected it before dispatch;
/// `accepted && !success` means the hardware reported failure or timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub accepted: bool,
    pub success: bool,
    pub message: Option<String>,
}

impl CommandOutcome {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            success: false,
            message: Some(message.into()),
        }
    }

    pub fn succeeded() -> Self {
        Self {
            accepted: true,
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            success: false,
            message: Some(message.into()),
        }
    }

    /// Map onto the crate error taxonomy
    pub fn into_result(self) -> Result<()> {
        let message = self.message.unwrap_or_default();
        match (self.accepted, self.success) {
            (true, true) => Ok(()),
            (false, _) => Err(Error::CommandRejected(message)),
            (true, false) => Err(Error::CommandFailed(message)),
        }
    }
}

/// Caller-supplied callback receiving the asynchronous outcome of an
/// accepted command. Invoked exactly once.
pub type Completion = Box<dyn FnOnce(CommandOutcome) + Send + 'static>;

/// Completion that discards the outcome
pub fn ignore_outcome() -> Completion {
    Box::new(|_| {})
}

/// Adapt a completion into a channel, for callers that prefer to block or
/// select on the outcome.
pub fn outcome_channel() -> (Completion, Receiver<CommandOutcome>) {
    let (tx, rx) = bounded(1);
    let completion: Completion = Box::new(move |outcome| {
        let _ = tx.send(outcome);
    });
    (completion, rx)
}

/// Synchronous result of issuing a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Dispatched to hardware; the completion will receive the outcome
    Pending,
    /// Rejected before dispatch; the completion is not invoked
    Rejected(CommandOutcome),
}

impl Dispatch {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Dispatch::Pending)
    }

    /// The rejection outcome, if any
    pub fn rejection(&self) -> Option<&CommandOutcome> {
        match self {
            Dispatch::Pending => None,
            Dispatch::Rejected(outcome) => Some(outcome),
        }
    }
}

/// Opaque handle for a rendering surface supplied by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// Current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_state_liveness() {
        assert!(StreamState::Connecting.is_live());
        assert!(StreamState::Streaming.is_live());
        assert!(!StreamState::Idle.is_live());
        assert!(!StreamState::Stopping.is_live());
        assert!(!StreamState::Error("x".into()).is_live());

        assert!(StreamState::Idle.can_start());
        assert!(StreamState::Error("x".into()).can_start());
        assert!(!StreamState::Stopping.can_start());
    }

    #[test]
    fn test_outcome_channel_delivers_once() {
        let (completion, rx) = outcome_channel();
        completion(CommandOutcome::failed("boom"));
        let outcome = rx.recv().unwrap();
        assert!(outcome.accepted);
        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("boom"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_outcome_error_taxonomy() {
        assert!(CommandOutcome::succeeded().into_result().is_ok());
        assert!(matches!(
            CommandOutcome::rejected("not airborne").into_result(),
            Err(Error::CommandRejected(m)) if m == "not airborne"
        ));
        assert!(matches!(
            CommandOutcome::failed("confirmation timeout").into_result(),
            Err(Error::CommandFailed(_))
        ));
    }

    #[test]
    fn test_unknown_geo_point() {
        assert!(!GeoPoint::default().is_known());
        assert!(GeoPoint::new(0.0, 12.5).is_known());
    }
}
