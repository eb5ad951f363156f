//! Hardware adapter traits.
//!
//! The coordinator never talks to a vendor SDK directly. Each hardware
//! service is injected as one of these traits:
//! - [`FlightAdapter`]: telemetry subscription, command dispatch, connection flag
//! - [`VideoAdapter`]: frame callbacks and decoder lifecycle
//! - [`StreamPublisher`]: outbound push-streaming session
//!
//! Asynchronous completions come back as [`Acknowledgement`] messages on a
//! channel owned by the component that issued the request, rather than as
//! nested closures, so ordering and cancellation are explicit.

use crate::core::types::{LinkEvent, SurfaceId, VehicleCommand};
use crate::error::Result;
use crossbeam_channel::Sender;
use parking_lot::Mutex;

/// Hardware completion of a request identified by `ticket`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub ticket: u64,
    pub result: std::result::Result<(), String>,
}

/// One-shot acknowledgement handle handed to an adapter with each request.
///
/// The adapter calls [`Ack::succeed`] or [`Ack::fail`] from any thread, at
/// any later time. Dropping the handle without completing it counts as no
/// confirmation, which the issuing component eventually times out.
#[derive(Debug)]
pub struct Ack {
    ticket: u64,
    tx: Sender<Acknowledgement>,
}

impl Ack {
    pub fn new(ticket: u64, tx: Sender<Acknowledgement>) -> Self {
        Self { ticket, tx }
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn complete(self, result: std::result::Result<(), String>) {
        // Receiver gone means the issuer was torn down; nothing to notify
        let _ = self.tx.send(Acknowledgement {
            ticket: self.ticket,
            result,
        });
    }

    pub fn succeed(self) {
        self.complete(Ok(()))
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.complete(Err(reason.into()))
    }
}

/// Cancellable registration with a hardware service.
///
/// Cancelling is idempotent; dropping the subscription cancels it.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Unregister. Runs the cancel hook at most once.
    pub fn cancel(&self) {
        let hook = self.cancel.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Flight controller link
pub trait FlightAdapter: Send + Sync {
    /// Register `sink` for link events (telemetry, connect, disconnect, faults)
    fn subscribe_telemetry(&self, sink: Sender<LinkEvent>) -> Result<Subscription>;

    /// Dispatch a command. Must not block; completion is reported via `ack`.
    fn send_command(&self, command: VehicleCommand, ack: Ack);

    /// Whether a flight product is currently connected (read-only shared flag)
    fn product_connected(&self) -> bool;
}

/// Frame callback registered with the video adapter.
///
/// Called on the hardware's delivery thread with each encoded buffer.
pub type FrameListener = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Handle of a registered frame listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Handle of a decoder created by the video adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecoderId(pub u64);

/// Live video feed and decoder service
pub trait VideoAdapter: Send + Sync {
    fn add_frame_listener(&self, listener: FrameListener) -> Result<ListenerId>;

    fn remove_frame_listener(&self, id: ListenerId);

    /// Create a decoder rendering onto `surface`
    fn create_decoder(&self, surface: SurfaceId, width: u32, height: u32) -> Result<DecoderId>;

    /// Feed one encoded buffer to a decoder
    fn decode(&self, decoder: DecoderId, frame: &[u8]);

    fn release_decoder(&self, decoder: DecoderId);
}

/// Push-streaming (re-broadcast) service
pub trait StreamPublisher: Send + Sync {
    /// Mute or unmute the audio track for the next session
    fn set_audio_muted(&self, _muted: bool) {}

    /// Begin publishing to `url`. Must not block; connection result via `ack`.
    fn start(&self, url: &str, ack: Ack);

    /// Stop publishing. Must not block; completion via `ack`.
    fn stop(&self, ack: Ack);

    /// Free all publisher resources. Called once, at teardown.
    fn release(&self);
}
