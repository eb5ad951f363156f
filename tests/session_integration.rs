//! Session Coordinator Integration Tests
//!
//! Drives the full coordinator against the mock adapters in manual
//! acknowledgement mode, so every hardware answer is under test control.
//!
//! Covers:
//! - Movement gating across every flight state
//! - Emergency stop from any state
//! - Take-off confirmation and timeout
//! - Preview/streaming mutual exclusion
//! - Idempotent shutdown with single resource release
//!
//! Run with: `cargo test --test session_integration`

use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vimana::config::{Config, FlightConfig};
use vimana::core::adapter::{FlightAdapter, StreamPublisher, VideoAdapter};
use vimana::core::types::{
    LinkEvent, TelemetrySample, VehicleCommand, VehicleStatus, ignore_outcome, outcome_channel,
};
use vimana::devices::mock::{
    AckPolicy, MockFlightAdapter, MockStreamPublisher, MockVideoAdapter, PublisherRequest,
};
use vimana::video::AttachOutcome;
use vimana::{Adapters, Dispatch, FlightState, SessionCoordinator, StreamState, SurfaceId};

// ============================================================================
// Harness
// ============================================================================

const WAIT: Duration = Duration::from_secs(2);
const SURFACE: SurfaceId = SurfaceId(7);

struct Rig {
    coordinator: SessionCoordinator,
    vehicle: Arc<MockFlightAdapter>,
    camera: Arc<MockVideoAdapter>,
    publisher: Arc<MockStreamPublisher>,
}

fn test_config() -> Config {
    Config {
        flight: FlightConfig {
            confirmation_timeout_ms: 200,
            supervisor_tick_ms: 5,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn rig() -> Rig {
    rig_with(test_config())
}

fn rig_with(config: Config) -> Rig {
    let vehicle = Arc::new(MockFlightAdapter::new(AckPolicy::Manual));
    let camera = Arc::new(MockVideoAdapter::new());
    let publisher = Arc::new(MockStreamPublisher::new(AckPolicy::Manual));
    let coordinator = SessionCoordinator::new(
        &config,
        Adapters {
            flight: Arc::clone(&vehicle) as Arc<dyn FlightAdapter>,
            video: Arc::clone(&camera) as Arc<dyn VideoAdapter>,
            publisher: Arc::clone(&publisher) as Arc<dyn StreamPublisher>,
        },
    )
    .unwrap();
    Rig {
        coordinator,
        vehicle,
        camera,
        publisher,
    }
}

fn wait_until<T: PartialEq + std::fmt::Debug>(
    rx: &Receiver<T>,
    current: impl Fn() -> T,
    expected: T,
) {
    let deadline = Instant::now() + WAIT;
    while current() != expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(!remaining.is_zero(), "timed out waiting for {:?}", expected);
        let _ = rx.recv_timeout(remaining);
    }
}

fn wait_flight(rig: &Rig, expected: FlightState) {
    let rx = rig.coordinator.subscribe_flight_state();
    wait_until(&rx, || rig.coordinator.flight_state(), expected);
}

fn wait_stream(rig: &Rig, expected: StreamState) {
    let rx = rig.coordinator.subscribe_stream_state();
    wait_until(&rx, || rig.coordinator.stream_state(), expected);
}

fn telemetry(rig: &Rig, status: VehicleStatus) {
    rig.vehicle.emit(LinkEvent::Telemetry(TelemetrySample {
        altitude_m: Some(if status.is_flying { 10.0 } else { 0.0 }),
        battery_percent: Some(80),
        gps_satellites: Some(11),
        status,
        ..Default::default()
    }));
}

fn on_ground(rig: &Rig) {
    telemetry(rig, VehicleStatus::default());
    wait_flight(rig, FlightState::OnGround);
}

fn airborne(rig: &Rig) {
    let (completion, rx) = outcome_channel();
    assert!(rig.coordinator.commands().take_off(completion).is_accepted());
    assert!(rig.vehicle.complete_next(Ok(())));
    assert!(rx.recv_timeout(WAIT).unwrap().success);
    assert_eq!(rig.coordinator.flight_state(), FlightState::InAir);
}

fn try_every_movement(rig: &Rig) -> Vec<Dispatch> {
    let gate = rig.coordinator.commands();
    vec![
        gate.move_up(1.0, ignore_outcome()),
        gate.move_down(1.0, ignore_outcome()),
        gate.move_forward(2.0, ignore_outcome()),
        gate.move_backward(2.0, ignore_outcome()),
        gate.move_left(2.0, ignore_outcome()),
        gate.move_right(2.0, ignore_outcome()),
        gate.rotate_left(45.0, ignore_outcome()),
        gate.rotate_right(45.0, ignore_outcome()),
    ]
}

// ============================================================================
// Flight command gating
// ============================================================================

#[test]
fn test_movement_rejected_outside_in_air() {
    let rig = rig();

    // Disconnected
    for dispatch in try_every_movement(&rig) {
        assert!(!dispatch.is_accepted());
    }

    // OnGround
    on_ground(&rig);
    for dispatch in try_every_movement(&rig) {
        let outcome = dispatch.rejection().cloned().unwrap();
        assert!(!outcome.accepted && !outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("not airborne"));
    }

    // TakingOff (unacknowledged)
    rig.coordinator.commands().take_off(ignore_outcome());
    assert_eq!(rig.coordinator.flight_state(), FlightState::TakingOff);
    for dispatch in try_every_movement(&rig) {
        assert!(!dispatch.is_accepted());
    }

    // Error (confirmation timed out)
    wait_flight(&rig, FlightState::Error);
    for dispatch in try_every_movement(&rig) {
        assert!(!dispatch.is_accepted());
    }

    // EmergencyStop
    rig.coordinator.commands().emergency_stop(ignore_outcome());
    for dispatch in try_every_movement(&rig) {
        assert!(!dispatch.is_accepted());
    }

    // Answer what is still queued, then back on the ground
    while rig.vehicle.complete_next(Err("superseded".to_string())) {}
    rig.coordinator.commands().reset_emergency().unwrap();
    assert_eq!(rig.coordinator.flight_state(), FlightState::OnGround);

    // Landing (unacknowledged)
    airborne(&rig);
    rig.coordinator.commands().land(ignore_outcome());
    assert_eq!(rig.coordinator.flight_state(), FlightState::Landing);
    for dispatch in try_every_movement(&rig) {
        assert!(!dispatch.is_accepted());
    }

    // Confirm the pre-landing stop and the landing
    assert!(rig.vehicle.complete_next(Ok(())));
    assert!(rig.vehicle.complete_next(Ok(())));
    wait_flight(&rig, FlightState::OnGround);

    // GoingHome (unacknowledged)
    airborne(&rig);
    rig.coordinator.commands().return_to_home(ignore_outcome());
    assert_eq!(rig.coordinator.flight_state(), FlightState::GoingHome);
    for dispatch in try_every_movement(&rig) {
        assert!(!dispatch.is_accepted());
    }

    // No movement ever reached the hardware
    assert_eq!(
        rig.vehicle.commands(),
        vec![
            VehicleCommand::TakeOff,
            VehicleCommand::EmergencyStop,
            VehicleCommand::TakeOff,
            VehicleCommand::StopMovement,
            VehicleCommand::Land,
            VehicleCommand::TakeOff,
            VehicleCommand::ReturnToHome,
        ]
    );
}

#[test]
fn test_emergency_stop_from_any_state() {
    let rig = rig();

    // From Disconnected
    assert!(rig.coordinator.commands().emergency_stop(ignore_outcome()).is_accepted());
    assert_eq!(rig.coordinator.flight_state(), FlightState::EmergencyStop);

    // From Error: reset, take off, let it time out, then stop
    rig.coordinator.commands().reset_emergency().unwrap();
    on_ground(&rig);
    rig.coordinator.commands().take_off(ignore_outcome());
    wait_flight(&rig, FlightState::Error);
    rig.coordinator.commands().emergency_stop(ignore_outcome());
    assert_eq!(rig.coordinator.flight_state(), FlightState::EmergencyStop);

    // Late take-off ack cannot resurrect the flight
    while rig.vehicle.complete_next(Ok(())) {}
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(rig.coordinator.flight_state(), FlightState::EmergencyStop);
}

#[test]
fn test_take_off_then_move_forward() {
    let rig = rig();
    on_ground(&rig);

    let (completion, rx) = outcome_channel();
    let dispatch = rig.coordinator.commands().take_off(completion);
    assert_eq!(dispatch, Dispatch::Pending);
    assert_eq!(rig.coordinator.flight_state(), FlightState::TakingOff);

    rig.vehicle.complete_next(Ok(()));
    let outcome = rx.recv_timeout(WAIT).unwrap();
    assert!(outcome.accepted && outcome.success);
    assert_eq!(rig.coordinator.flight_state(), FlightState::InAir);

    let (completion, rx) = outcome_channel();
    assert!(rig.coordinator.commands().move_forward(2.0, completion).is_accepted());
    rig.vehicle.complete_next(Ok(()));
    assert!(rx.recv_timeout(WAIT).unwrap().success);
}

#[test]
fn test_move_forward_on_ground_is_rejected() {
    let rig = rig();
    on_ground(&rig);

    let (completion, rx) = outcome_channel();
    let dispatch = rig.coordinator.commands().move_forward(2.0, completion);
    let outcome = dispatch.rejection().cloned().unwrap();
    assert!(!outcome.accepted);
    assert_eq!(outcome.message.as_deref(), Some("not airborne"));
    assert_eq!(rig.coordinator.flight_state(), FlightState::OnGround);
    assert!(rig.vehicle.commands().is_empty());
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn test_unconfirmed_take_off_forces_error() {
    let rig = rig();
    on_ground(&rig);

    let (completion, rx) = outcome_channel();
    rig.coordinator.commands().take_off(completion);

    let outcome = rx.recv_timeout(WAIT).unwrap();
    assert!(outcome.accepted && !outcome.success);
    assert!(matches!(
        outcome.clone().into_result(),
        Err(vimana::Error::CommandFailed(_))
    ));
    assert_eq!(outcome.message.as_deref(), Some("confirmation timeout"));
    assert_eq!(rig.coordinator.flight_state(), FlightState::Error);
}

#[test]
fn test_camera_commands_need_connected_product() {
    let rig = rig();
    on_ground(&rig);

    let (completion, rx) = outcome_channel();
    assert!(rig.coordinator.commands().take_photo(completion).is_accepted());
    rig.vehicle.complete_next(Err("sd card full".to_string()));
    let outcome = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(outcome.message.as_deref(), Some("sd card full"));
    // Non-flight failure leaves the state alone
    assert_eq!(rig.coordinator.flight_state(), FlightState::OnGround);

    rig.vehicle.set_product_connected(false);
    let dispatch = rig.coordinator.commands().start_recording(ignore_outcome());
    assert_eq!(
        dispatch.rejection().and_then(|o| o.message.clone()),
        Some("no product connected".to_string())
    );
}

#[test]
fn test_link_loss_and_reconnect() {
    let mut config = test_config();
    config.flight.link_stale_ms = 300;
    let rig = rig_with(config);
    let flying = VehicleStatus {
        is_flying: true,
        motors_on: true,
        ..Default::default()
    };

    telemetry(&rig, flying);
    wait_flight(&rig, FlightState::InAir);

    // Telemetry stops: the link goes stale
    wait_flight(&rig, FlightState::Disconnected);

    // Reconnect while flying re-enters InAir
    telemetry(&rig, flying);
    wait_flight(&rig, FlightState::InAir);
    assert_eq!(rig.coordinator.telemetry().gps_satellites, 11);
}

// ============================================================================
// Preview and streaming
// ============================================================================

#[test]
fn test_attach_twice_keeps_one_sink() {
    let rig = rig();
    assert_eq!(
        rig.coordinator.attach_preview(SURFACE, 1920, 1080).unwrap(),
        AttachOutcome::Attached
    );
    assert_eq!(
        rig.coordinator.attach_preview(SURFACE, 1920, 1080).unwrap(),
        AttachOutcome::AlreadyAttached
    );
    assert_eq!(rig.camera.live_decoders().len(), 1);
    assert_eq!(rig.camera.listener_count(), 1);
}

#[test]
fn test_streaming_detaches_preview_before_live() {
    let rig = rig();
    rig.coordinator.on_surface_available(SURFACE, 1280, 720).unwrap();
    assert!(rig.coordinator.is_preview_attached());

    rig.coordinator.start_streaming("rtmp://ingest.example/live/k").unwrap();
    // Detached on entering Connecting, before any acknowledgement
    assert_eq!(rig.coordinator.stream_state(), StreamState::Connecting);
    assert!(!rig.coordinator.is_preview_attached());
    assert!(rig.camera.live_decoders().is_empty());
    assert_eq!(rig.camera.listener_count(), 0);

    rig.publisher.complete_next(Ok(()));
    wait_stream(&rig, StreamState::Streaming);
    assert_eq!(
        rig.publisher.requests(),
        vec![PublisherRequest::Start("rtmp://ingest.example/live/k".to_string())]
    );
}

#[test]
fn test_attach_refused_while_streaming_then_retry_succeeds() {
    let rig = rig();
    rig.coordinator.start_streaming("").unwrap();
    assert_eq!(
        rig.coordinator.on_surface_available(SURFACE, 1280, 720).unwrap(),
        AttachOutcome::Suspended
    );

    rig.publisher.complete_next(Ok(()));
    wait_stream(&rig, StreamState::Streaming);
    assert_eq!(
        rig.coordinator.on_surface_available(SURFACE, 1280, 720).unwrap(),
        AttachOutcome::Suspended
    );
    assert_eq!(rig.camera.decoders_created(), 0);

    rig.coordinator.stop_streaming();
    rig.publisher.complete_next(Ok(()));
    wait_stream(&rig, StreamState::Idle);

    // Not re-attached automatically
    assert!(!rig.coordinator.is_preview_attached());
    assert_eq!(
        rig.coordinator.on_surface_available(SURFACE, 1280, 720).unwrap(),
        AttachOutcome::Attached
    );
}

#[test]
fn test_stream_error_allows_preview_and_retry() {
    let rig = rig();
    rig.coordinator.start_streaming("").unwrap();
    rig.publisher.complete_next(Err("connection refused".to_string()));
    wait_stream(&rig, StreamState::Error("connection refused".to_string()));

    assert_eq!(
        rig.coordinator.attach_preview(SURFACE, 1280, 720).unwrap(),
        AttachOutcome::Attached
    );
    rig.coordinator.start_streaming("").unwrap();
    assert_eq!(rig.coordinator.stream_state(), StreamState::Connecting);
    assert!(!rig.coordinator.is_preview_attached());
}

#[test]
fn test_repeated_start_while_live_keeps_session() {
    let rig = rig();
    let url = "rtmp://ingest.example/live/a";
    rig.coordinator.start_streaming(url).unwrap();

    // Connecting: same URL or empty is a no-op
    rig.coordinator.start_streaming(url).unwrap();
    rig.coordinator.start_streaming("").unwrap();
    assert_eq!(rig.coordinator.stream_state(), StreamState::Connecting);

    rig.publisher.complete_next(Ok(()));
    wait_stream(&rig, StreamState::Streaming);

    // Streaming: same again
    rig.coordinator.start_streaming(url).unwrap();
    rig.coordinator.start_streaming("").unwrap();
    assert_eq!(rig.coordinator.stream_state(), StreamState::Streaming);
    assert_eq!(rig.publisher.requests(), vec![PublisherRequest::Start(url.to_string())]);

    // A different URL restarts the session against it
    rig.coordinator.start_streaming("rtmp://ingest.example/live/b").unwrap();
    assert_eq!(rig.coordinator.stream_state(), StreamState::Stopping);
    rig.publisher.complete_next(Ok(()));
    wait_stream(&rig, StreamState::Connecting);
    assert_eq!(rig.coordinator.stream_url(), "rtmp://ingest.example/live/b");
}

#[test]
fn test_surface_destroyed_detaches() {
    let rig = rig();
    rig.coordinator.on_surface_available(SURFACE, 1280, 720).unwrap();
    rig.camera.push_frame(&[0u8; 32]);

    assert!(rig.coordinator.on_surface_destroyed());
    assert!(!rig.coordinator.on_surface_destroyed());
    assert_eq!(rig.camera.decoders_released(), 1);
    assert_eq!(rig.camera.invalid_releases(), 0);
    assert_eq!(rig.camera.invalid_decodes(), 0);
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_shutdown_is_idempotent_and_releases_once() {
    let rig = rig();
    on_ground(&rig);
    rig.coordinator.attach_preview(SURFACE, 1280, 720).unwrap();

    let (completion, rx) = outcome_channel();
    rig.coordinator.commands().take_photo(completion);

    rig.coordinator.shutdown();
    rig.coordinator.shutdown();
    rig.coordinator.commands().stop();

    let outcome = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(outcome.message.as_deref(), Some("command gate stopped"));
    assert_eq!(rig.coordinator.flight_state(), FlightState::Disconnected);
    assert_eq!(rig.vehicle.active_subscriptions(), 0);
    assert_eq!(rig.publisher.releases(), 1);
    assert_eq!(rig.camera.decoders_released(), 1);
    assert_eq!(rig.camera.invalid_releases(), 0);

    // Nothing comes back to life afterwards
    assert_eq!(
        rig.coordinator.attach_preview(SURFACE, 1280, 720).unwrap(),
        AttachOutcome::Suspended
    );
    assert!(matches!(
        rig.coordinator.start_streaming(""),
        Err(vimana::Error::SessionReleased)
    ));

    let Rig {
        coordinator,
        publisher,
        camera,
        ..
    } = rig;
    drop(coordinator);
    assert_eq!(publisher.releases(), 1);
    assert_eq!(camera.decoders_released(), 1);
}

#[test]
fn test_shutdown_while_streaming() {
    let rig = rig();
    rig.coordinator.start_streaming("").unwrap();
    rig.publisher.complete_next(Ok(()));
    wait_stream(&rig, StreamState::Streaming);

    rig.coordinator.shutdown();
    assert_eq!(rig.coordinator.stream_state(), StreamState::Idle);
    assert_eq!(rig.publisher.releases(), 1);
    assert_eq!(rig.publisher.requests().last(), Some(&PublisherRequest::Stop));
}
