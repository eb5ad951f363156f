//! Session coordinator (composition root)
//!
//! Wires flight control, preview and streaming together and enforces the
//! one cross-cutting policy: local preview is disabled while the outbound
//! stream is connecting or live.
//!
//! ```text
//!  surface events ──▶ attach/detach ─┐
//!                                    ▼
//!  StreamingSessionManager ──hook──▶ VideoSinkCoordinator (single slot lock)
//!
//!  FlightAdapter ──▶ CommandGate / FlightStateMachine / TelemetryIngest
//! ```
//!
//! Both triggers (surface lifecycle and streaming lifecycle) end up in the
//! video sink's slot lock, so "currently attached" and "preview allowed"
//! are always decided against the latest state.

use crate::config::Config;
use crate::core::adapter::{FlightAdapter, StreamPublisher, VideoAdapter};
use crate::core::types::{FlightState, StreamState, SurfaceId, TelemetrySnapshot};
use crate::core::watch::WatchReceiver;
use crate::error::Result;
use crate::flight::{BatteryStatus, CommandGate, FlightStateMachine, TelemetryIngest};
use crate::streaming::{StateHook, StreamingSessionManager};
use crate::video::{AttachOutcome, VideoSinkCoordinator};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Hardware services injected into the coordinator
#[derive(Clone)]
pub struct Adapters {
    pub flight: Arc<dyn FlightAdapter>,
    pub video: Arc<dyn VideoAdapter>,
    pub publisher: Arc<dyn StreamPublisher>,
}

/// Unified contract exposed to the presentation layer
pub struct SessionCoordinator {
    flight: Arc<FlightStateMachine>,
    telemetry: Arc<TelemetryIngest>,
    gate: CommandGate,
    video: Arc<VideoSinkCoordinator>,
    streaming: StreamingSessionManager,
    shut_down: AtomicBool,
}

impl SessionCoordinator {
    pub fn new(config: &Config, adapters: Adapters) -> Result<Self> {
        let flight = Arc::new(FlightStateMachine::new());
        let telemetry = Arc::new(TelemetryIngest::new(&config.flight));
        let video = Arc::new(VideoSinkCoordinator::new(&config.video, adapters.video));

        let preview = Arc::clone(&video);
        let hook: StateHook = Box::new(move |state| match state {
            StreamState::Connecting | StreamState::Streaming => {
                if preview.suspend_preview() {
                    log::info!("Preview detached for streaming");
                }
            }
            StreamState::Idle | StreamState::Error(_) => preview.resume_preview(),
            StreamState::Stopping => {}
        });
        let streaming =
            StreamingSessionManager::new(config.streaming.clone(), adapters.publisher, Some(hook))?;

        let gate = CommandGate::start(
            config.flight.clone(),
            Arc::clone(&flight),
            Arc::clone(&telemetry),
            adapters.flight,
        )?;

        log::info!("Session coordinator ready");
        Ok(Self {
            flight,
            telemetry,
            gate,
            video,
            streaming,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Flight command operations
    pub fn commands(&self) -> &CommandGate {
        &self.gate
    }

    pub fn flight_state(&self) -> FlightState {
        self.flight.current()
    }

    pub fn subscribe_flight_state(&self) -> WatchReceiver<FlightState> {
        self.flight.subscribe()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.latest()
    }

    pub fn subscribe_telemetry(&self) -> WatchReceiver<TelemetrySnapshot> {
        self.telemetry.subscribe()
    }

    pub fn battery_status(&self) -> BatteryStatus {
        self.telemetry.battery_status()
    }

    pub fn stream_state(&self) -> StreamState {
        self.streaming.state()
    }

    pub fn subscribe_stream_state(&self) -> WatchReceiver<StreamState> {
        self.streaming.subscribe()
    }

    /// Attach local preview to `surface`. Refused while streaming is
    /// connecting or live, and after shutdown.
    pub fn attach_preview(
        &self,
        surface: SurfaceId,
        width: u32,
        height: u32,
    ) -> Result<AttachOutcome> {
        if self.is_shut_down() {
            log::debug!("Coordinator shut down, ignoring surface {}", surface.0);
            return Ok(AttachOutcome::Suspended);
        }
        self.video.attach_preview(surface, width, height)
    }

    pub fn detach_preview(&self) -> bool {
        self.video.detach_preview()
    }

    /// Rendering layer reports a usable surface; also the retry point after
    /// streaming ends
    pub fn on_surface_available(
        &self,
        surface: SurfaceId,
        width: u32,
        height: u32,
    ) -> Result<AttachOutcome> {
        log::debug!("Surface {} available ({}x{})", surface.0, width, height);
        self.attach_preview(surface, width, height)
    }

    pub fn on_surface_destroyed(&self) -> bool {
        log::debug!("Surface destroyed");
        self.detach_preview()
    }

    pub fn is_preview_attached(&self) -> bool {
        self.video.is_attached()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.video.dropped_frames()
    }

    /// Start streaming to `url`, or to the recorded URL when empty.
    ///
    /// No-op while connecting or streaming to the same URL; a live session
    /// given a different URL is restarted against it.
    pub fn start_streaming(&self, url: &str) -> Result<()> {
        if self.streaming.state().is_live() && (url.is_empty() || url == self.streaming.url()) {
            log::debug!("Stream already live, start ignored");
            return Ok(());
        }
        if !url.is_empty() {
            self.streaming.update_url(url)?;
        }
        self.streaming.start()
    }

    /// URL the next (or current) session connects to
    pub fn stream_url(&self) -> String {
        self.streaming.url()
    }

    pub fn stop_streaming(&self) {
        self.streaming.stop();
    }

    pub fn update_stream_url(&self, url: &str) -> Result<()> {
        self.streaming.update_url(url)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop the command gate, release the streaming session and suspend
    /// preview, in that order. Idempotent.
    ///
    /// Suspending (rather than detaching) is decided under the sink's slot
    /// lock, so an attach racing this call cannot leave a sink behind.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Session coordinator shutting down");
        self.gate.stop();
        self.streaming.release();
        self.video.suspend_preview();
        log::info!("Session coordinator shut down");
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::devices::mock::{AckPolicy, MockFlightAdapter, MockStreamPublisher, MockVideoAdapter};

    #[test]
    fn test_attach_after_shutdown_leaves_no_sink() {
        let camera = Arc::new(MockVideoAdapter::new());
        let coordinator = SessionCoordinator::new(
            &Config::default(),
            Adapters {
                flight: Arc::new(MockFlightAdapter::new(AckPolicy::Manual)),
                video: Arc::clone(&camera) as Arc<dyn VideoAdapter>,
                publisher: Arc::new(MockStreamPublisher::new(AckPolicy::Manual)),
            },
        )
        .unwrap();
        coordinator.attach_preview(SurfaceId(1), 640, 480).unwrap();

        coordinator.shutdown();
        assert_eq!(camera.decoders_released(), 1);

        // An attach that got past the shutdown flag before shutdown ran
        assert_eq!(
            coordinator.video.attach_preview(SurfaceId(1), 640, 480).unwrap(),
            AttachOutcome::Suspended
        );
        assert!(camera.live_decoders().is_empty());
        assert_eq!(camera.decoders_created(), 1);
    }
}
