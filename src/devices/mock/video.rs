//! Simulated video feed and decoder service

use super::{SimulationHandle, period_for};
use crate::config::SimulationConfig;
use crate::core::adapter::{DecoderId, FrameListener, ListenerId, VideoAdapter};
use crate::core::types::SurfaceId;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Decoder bound to a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderRecord {
    pub surface: SurfaceId,
    pub width: u32,
    pub height: u32,
}

/// Video adapter with observable decoder bookkeeping
pub struct MockVideoAdapter {
    listeners: Mutex<HashMap<u64, Arc<FrameListener>>>,
    decoders: Mutex<HashMap<u64, DecoderRecord>>,
    next_id: AtomicU64,
    created: AtomicUsize,
    released: AtomicUsize,
    /// Release calls for decoders that were not live
    invalid_releases: AtomicUsize,
    /// Decode calls for decoders that were not live
    invalid_decodes: AtomicUsize,
    decoded: AtomicUsize,
    fail_decoder: AtomicBool,
    fail_listener: AtomicBool,
    decode_delay: Mutex<Duration>,
}

impl MockVideoAdapter {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            decoders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            created: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            invalid_releases: AtomicUsize::new(0),
            invalid_decodes: AtomicUsize::new(0),
            decoded: AtomicUsize::new(0),
            fail_decoder: AtomicBool::new(false),
            fail_listener: AtomicBool::new(false),
            decode_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Deliver one encoded buffer to every registered listener, the way a
    /// hardware feed callback would
    pub fn push_frame(&self, frame: &[u8]) {
        let listeners: Vec<Arc<FrameListener>> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            (**listener)(frame);
        }
    }

    /// Make `create_decoder` fail
    pub fn set_fail_decoder(&self, fail: bool) {
        self.fail_decoder.store(fail, Ordering::SeqCst);
    }

    /// Make `add_frame_listener` fail
    pub fn set_fail_listener(&self, fail: bool) {
        self.fail_listener.store(fail, Ordering::SeqCst);
    }

    /// Slow every decode down, to exercise the bounded frame queue
    pub fn set_decode_delay(&self, delay: Duration) {
        *self.decode_delay.lock() = delay;
    }

    pub fn live_decoders(&self) -> Vec<DecoderRecord> {
        self.decoders.lock().values().copied().collect()
    }

    pub fn decoders_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn decoders_released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn invalid_releases(&self) -> usize {
        self.invalid_releases.load(Ordering::SeqCst)
    }

    pub fn invalid_decodes(&self) -> usize {
        self.invalid_decodes.load(Ordering::SeqCst)
    }

    pub fn frames_decoded(&self) -> usize {
        self.decoded.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Push synthetic frames of `frame_size` bytes at `frame_hz`
    pub fn start_feed(self: &Arc<Self>, config: &SimulationConfig) -> Result<SimulationHandle> {
        let adapter = Arc::clone(self);
        let mut frame = vec![0u8; config.frame_size.max(1)];
        let mut sequence: u32 = 0;
        SimulationHandle::spawn("mock-camera", period_for(config.frame_hz), move |_| {
            // Sequence number in the first bytes so frames differ
            sequence = sequence.wrapping_add(1);
            let header = sequence.to_le_bytes();
            let n = header.len().min(frame.len());
            frame[..n].copy_from_slice(&header[..n]);
            adapter.push_frame(&frame);
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MockVideoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoAdapter for MockVideoAdapter {
    fn add_frame_listener(&self, listener: FrameListener) -> Result<ListenerId> {
        if self.fail_listener.load(Ordering::SeqCst) {
            return Err(Error::ResourceUnavailable(
                "frame listener registration refused".to_string(),
            ));
        }
        let id = self.next_id();
        self.listeners.lock().insert(id, Arc::new(listener));
        Ok(ListenerId(id))
    }

    fn remove_frame_listener(&self, id: ListenerId) {
        if self.listeners.lock().remove(&id.0).is_none() {
            log::warn!("Mock video: unknown listener {}", id.0);
        }
    }

    fn create_decoder(&self, surface: SurfaceId, width: u32, height: u32) -> Result<DecoderId> {
        if self.fail_decoder.load(Ordering::SeqCst) {
            return Err(Error::ResourceUnavailable(
                "decoder creation failed".to_string(),
            ));
        }
        let id = self.next_id();
        self.decoders.lock().insert(
            id,
            DecoderRecord {
                surface,
                width,
                height,
            },
        );
        self.created.fetch_add(1, Ordering::SeqCst);
        log::debug!("Mock decoder {} created {}x{}", id, width, height);
        Ok(DecoderId(id))
    }

    fn decode(&self, decoder: DecoderId, frame: &[u8]) {
        let delay = *self.decode_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.decoders.lock().contains_key(&decoder.0) {
            self.decoded.fetch_add(1, Ordering::SeqCst);
            log::trace!("Mock decoder {} consumed {} bytes", decoder.0, frame.len());
        } else {
            self.invalid_decodes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release_decoder(&self, decoder: DecoderId) {
        if self.decoders.lock().remove(&decoder.0).is_some() {
            self.released.fetch_add(1, Ordering::SeqCst);
            log::debug!("Mock decoder {} released", decoder.0);
        } else {
            self.invalid_releases.fetch_add(1, Ordering::SeqCst);
            log::warn!("Mock video: release of unknown decoder {}", decoder.0);
        }
    }
}
