//! Local preview sink
//!
//! # Frame Path
//!
//! ```text
//! hardware feed thread            frame-pump thread
//! ┌────────────────────┐  bounded  ┌──────────────────────┐
//! │ FrameListener      │──queue───▶│ VideoAdapter::decode │
//! │ (try_send, copy)   │           └──────────────────────┘
//! └────────────────────┘
//!        │ queue full
//!        ▼
//!   dropped_frames += 1
//! ```
//!
//! The listener never blocks the delivery thread. Frames that arrive while
//! the queue is full are dropped and counted.
//!
//! # Lifecycle
//!
//! Attach creates the decoder, starts the pump, then registers the listener.
//! Teardown runs in the reverse order: the listener is unregistered, the pump
//! is stopped and joined, and only then is the decoder released, so no frame
//! reaches a released decoder. Every attach and detach runs under the single
//! slot lock, which is also where the "preview suspended while streaming"
//! flag lives.

use crate::config::VideoConfig;
use crate::core::adapter::{DecoderId, FrameListener, ListenerId, VideoAdapter};
use crate::core::types::SurfaceId;
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

/// Result of an attach request that did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// A new sink now renders onto the surface
    Attached,
    /// A sink was already attached; nothing changed
    AlreadyAttached,
    /// Width or height was zero; nothing changed
    InvalidDimensions,
    /// Preview is suspended while streaming; nothing changed
    Suspended,
}

/// Decoder bound to one surface, plus the listener and pump feeding it.
///
/// Owned exclusively by [`VideoSinkCoordinator`]. Dropping the handle tears
/// it down; each resource is released at most once.
pub struct VideoSinkHandle {
    adapter: Arc<dyn VideoAdapter>,
    surface: SurfaceId,
    width: u32,
    height: u32,
    decoder: Option<DecoderId>,
    listener: Option<ListenerId>,
    /// Dropping this stops the pump
    stop_tx: Option<Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

impl VideoSinkHandle {
    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn teardown(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.adapter.remove_frame_listener(listener);
        }

        self.stop_tx.take();
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                log::error!("Frame pump panicked");
            }
        }

        if let Some(decoder) = self.decoder.take() {
            self.adapter.release_decoder(decoder);
            log::info!(
                "Preview detached from surface {} ({}x{})",
                self.surface.0,
                self.width,
                self.height
            );
        }
    }
}

impl Drop for VideoSinkHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

struct SinkSlot {
    active: Option<VideoSinkHandle>,
    suspended: bool,
}

/// Single-active-sink owner of the preview decoder
pub struct VideoSinkCoordinator {
    adapter: Arc<dyn VideoAdapter>,
    slot: Mutex<SinkSlot>,
    queue_depth: usize,
    dropped: Arc<AtomicU64>,
}

impl VideoSinkCoordinator {
    pub fn new(config: &VideoConfig, adapter: Arc<dyn VideoAdapter>) -> Self {
        Self {
            adapter,
            slot: Mutex::new(SinkSlot {
                active: None,
                suspended: false,
            }),
            queue_depth: config.frame_queue_depth.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bind a decoder to `surface` unless a sink is already attached, the
    /// dimensions are empty, or preview is suspended.
    ///
    /// A failed decoder or listener setup leaves no sink attached.
    pub fn attach_preview(
        &self,
        surface: SurfaceId,
        width: u32,
        height: u32,
    ) -> Result<AttachOutcome> {
        let mut slot = self.slot.lock();

        if slot.active.is_some() {
            log::debug!("Preview already attached, ignoring surface {}", surface.0);
            return Ok(AttachOutcome::AlreadyAttached);
        }
        if width == 0 || height == 0 {
            log::warn!("Ignoring surface {} with size {}x{}", surface.0, width, height);
            return Ok(AttachOutcome::InvalidDimensions);
        }
        if slot.suspended {
            log::debug!("Preview suspended while streaming, ignoring surface {}", surface.0);
            return Ok(AttachOutcome::Suspended);
        }

        let handle = self.build_sink(surface, width, height).inspect_err(|e| {
            log::error!("Preview attach failed: {}", e);
        })?;
        slot.active = Some(handle);

        log::info!("Preview attached to surface {} ({}x{})", surface.0, width, height);
        Ok(AttachOutcome::Attached)
    }

    /// Release the attached sink, if any. Returns whether one was released.
    pub fn detach_preview(&self) -> bool {
        let mut slot = self.slot.lock();
        // Torn down under the lock so a racing attach waits for the release
        match slot.active.take() {
            Some(handle) => {
                drop(handle);
                true
            }
            None => false,
        }
    }

    /// Forbid attaching and release any attached sink.
    /// Returns whether a sink was released.
    pub fn suspend_preview(&self) -> bool {
        let mut slot = self.slot.lock();
        slot.suspended = true;
        match slot.active.take() {
            Some(handle) => {
                drop(handle);
                true
            }
            None => false,
        }
    }

    /// Allow attaching again. Does not attach by itself.
    pub fn resume_preview(&self) {
        self.slot.lock().suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.slot.lock().suspended
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().active.is_some()
    }

    /// Surface and dimensions of the attached sink
    pub fn attached(&self) -> Option<(SurfaceId, u32, u32)> {
        self.slot
            .lock()
            .active
            .as_ref()
            .map(|h| (h.surface(), h.width, h.height))
    }

    /// Frames dropped because the decode queue was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn build_sink(&self, surface: SurfaceId, width: u32, height: u32) -> Result<VideoSinkHandle> {
        let decoder = self.adapter.create_decoder(surface, width, height)?;

        let mut handle = VideoSinkHandle {
            adapter: Arc::clone(&self.adapter),
            surface,
            width,
            height,
            decoder: Some(decoder),
            listener: None,
            stop_tx: None,
            pump: None,
        };

        let (frame_tx, frame_rx) = bounded::<Vec<u8>>(self.queue_depth);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        // On error, dropping `handle` releases the decoder
        let adapter = Arc::clone(&self.adapter);
        let pump = thread::Builder::new()
            .name("frame-pump".to_string())
            .spawn(move || pump_frames(adapter, decoder, frame_rx, stop_rx))
            .map_err(|e| Error::ThreadSpawn(e.to_string()))?;
        handle.stop_tx = Some(stop_tx);
        handle.pump = Some(pump);

        let dropped = Arc::clone(&self.dropped);
        let listener: FrameListener = Box::new(move |frame: &[u8]| {
            match frame_tx.try_send(frame.to_vec()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    log::trace!("Decode queue full, frame dropped ({} total)", total);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        });
        handle.listener = Some(self.adapter.add_frame_listener(listener)?);

        Ok(handle)
    }
}

impl Drop for VideoSinkCoordinator {
    fn drop(&mut self) {
        self.detach_preview();
    }
}

fn pump_frames(
    adapter: Arc<dyn VideoAdapter>,
    decoder: DecoderId,
    frame_rx: Receiver<Vec<u8>>,
    stop_rx: Receiver<()>,
) {
    log::debug!("Frame pump started for decoder {}", decoder.0);
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(frame_rx) -> msg => match msg {
                Ok(frame) => adapter.decode(decoder, &frame),
                Err(_) => break,
            },
        }
    }
    log::debug!("Frame pump stopped for decoder {}", decoder.0);
}
