//! Vimana - simulation daemon
//!
//! Runs the session coordinator against the simulated vehicle, camera and
//! stream publisher and flies a short scripted sortie:
//!
//! ```text
//! wait for link ─▶ attach preview ─▶ take off ─▶ move / rotate / photo
//!   ─▶ stream (preview detached) ─▶ stop stream ─▶ re-attach preview
//!   ─▶ return to home ─▶ shutdown
//! ```
//!
//! Ctrl-C ends the sortie early; shutdown always runs.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use vimana::core::adapter::{FlightAdapter, StreamPublisher, VideoAdapter};
use vimana::core::types::outcome_channel;
use vimana::devices::mock::{AckPolicy, MockFlightAdapter, MockStreamPublisher, MockVideoAdapter};
use vimana::{
    Adapters, CommandOutcome, Completion, Config, Dispatch, Error, FlightState, Result,
    SessionCoordinator, StreamState, SurfaceId,
};

const PREVIEW_SURFACE: SurfaceId = SurfaceId(1);
const PREVIEW_SIZE: (u32, u32) = (1280, 720);

/// Parse config path from command line arguments.
///
/// Supports:
/// - `vimana <path>` (positional)
/// - `vimana --config <path>` (flag-based)
/// - `vimana -c <path>` (short flag)
///
/// Defaults to `vimana.toml` in the working directory.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "vimana.toml".to_string()
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let (config, load_error) = match Config::load(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("Vimana v{} starting...", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => log::info!("Using config: {}", config_path),
        Some(Error::Io(e)) => {
            log::warn!("Config {} not readable ({}), using defaults", config_path, e)
        }
        Some(e) => return Err(e),
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Interrupt received, ending sortie");
        handler_flag.store(false, Ordering::SeqCst);
    })
    .map_err(|e| Error::Other(format!("Failed to install signal handler: {}", e)))?;

    let sim = &config.simulation;
    let ack_latency = Duration::from_millis(sim.ack_latency_ms);
    let vehicle = Arc::new(MockFlightAdapter::with_home(
        AckPolicy::Auto(ack_latency),
        vimana::core::types::GeoPoint::new(sim.start_latitude, sim.start_longitude),
    ));
    let camera = Arc::new(MockVideoAdapter::new());
    let publisher = Arc::new(MockStreamPublisher::new(AckPolicy::Auto(ack_latency)));

    let coordinator = SessionCoordinator::new(
        &config,
        Adapters {
            flight: Arc::clone(&vehicle) as Arc<dyn FlightAdapter>,
            video: Arc::clone(&camera) as Arc<dyn VideoAdapter>,
            publisher: Arc::clone(&publisher) as Arc<dyn StreamPublisher>,
        },
    )?;

    let mut telemetry_sim = vehicle.start_simulation(sim)?;
    let mut camera_sim = camera.start_feed(sim)?;

    let result = fly_sortie(&coordinator, &running);

    coordinator.shutdown();
    camera_sim.stop();
    telemetry_sim.stop();

    let snapshot = coordinator.telemetry();
    log::info!(
        "Final telemetry: alt={:.1}m battery={}% home={:.1}m, {} frames decoded, {} dropped",
        snapshot.altitude_m,
        snapshot.battery_percent,
        snapshot.distance_from_home_m,
        camera.frames_decoded(),
        coordinator.dropped_frames()
    );
    log::info!("Vimana shutdown complete");
    result
}

fn fly_sortie(coordinator: &SessionCoordinator, running: &AtomicBool) -> Result<()> {
    let command_timeout = Duration::from_secs(10);
    let gate = coordinator.commands();

    let flight = coordinator.subscribe_flight_state();
    if !wait_for(&flight, |s| *s == FlightState::OnGround, command_timeout, running) {
        if !running.load(Ordering::SeqCst) {
            return Ok(());
        }
        return Err(Error::LinkLost);
    }

    let (width, height) = PREVIEW_SIZE;
    let outcome = coordinator.on_surface_available(PREVIEW_SURFACE, width, height)?;
    log::info!("Preview: {:?}", outcome);

    if !issue("take off", |c| gate.take_off(c), command_timeout) {
        return Ok(());
    }
    wait_for(&flight, |s| *s == FlightState::InAir, command_timeout, running);

    issue("move up", |c| gate.move_up(2.0, c), command_timeout);
    issue("move forward", |c| gate.move_forward(5.0, c), command_timeout);
    issue("rotate right", |c| gate.rotate_right(90.0, c), command_timeout);
    issue("take photo", |c| gate.take_photo(c), command_timeout);
    pause(running, Duration::from_secs(2));

    // Preview is detached before the stream goes live
    coordinator.start_streaming("")?;
    let streams = coordinator.subscribe_stream_state();
    if wait_for(&streams, |s| *s == StreamState::Streaming, command_timeout, running) {
        log::info!(
            "Streaming to {} (preview attached: {})",
            coordinator.stream_url(),
            coordinator.is_preview_attached()
        );
        pause(running, Duration::from_secs(3));
    }
    coordinator.stop_streaming();
    wait_for(&streams, |s| *s == StreamState::Idle, command_timeout, running);

    // Retry from the surface callback now that streaming ended
    let outcome = coordinator.on_surface_available(PREVIEW_SURFACE, width, height)?;
    log::info!("Preview after streaming: {:?}", outcome);

    if running.load(Ordering::SeqCst) {
        issue("return to home", |c| gate.return_to_home(c), command_timeout);
        pause(running, Duration::from_secs(5));
    } else {
        issue("land", |c| gate.land(c), command_timeout);
    }
    Ok(())
}

/// Issue a command and wait for its outcome. Returns whether it succeeded.
fn issue<F>(label: &str, command: F, timeout: Duration) -> bool
where
    F: FnOnce(Completion) -> Dispatch,
{
    let (completion, rx) = outcome_channel();
    if let Dispatch::Rejected(outcome) = command(completion) {
        log::warn!("{}: {}", label, describe(outcome));
        return false;
    }
    match rx.recv_timeout(timeout) {
        Ok(outcome) => {
            let ok = outcome.success;
            if ok {
                log::info!("{}: ok", label);
            } else {
                log::warn!("{}: {}", label, describe(outcome));
            }
            ok
        }
        Err(_) => {
            log::warn!("{}: no outcome", label);
            false
        }
    }
}

fn describe(outcome: CommandOutcome) -> String {
    match outcome.into_result() {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    }
}

/// Wait until `rx` yields a value matching `done`
fn wait_for<T, P>(rx: &Receiver<T>, done: P, timeout: Duration, running: &AtomicBool) -> bool
where
    P: Fn(&T) -> bool,
{
    let deadline = Instant::now() + timeout;
    while running.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match rx.recv_timeout(remaining.min(Duration::from_millis(100))) {
            Ok(value) if done(&value) => return true,
            Err(RecvTimeoutError::Disconnected) => return false,
            _ => {}
        }
    }
    false
}

fn pause(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
}
