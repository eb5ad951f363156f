//! Simulated hardware for running the coordinator without a vehicle
//!
//! | Adapter | Simulation |
//! |---------|------------|
//! | [`MockFlightAdapter`] | Point-mass vehicle, telemetry generator, scripted acks |
//! | [`MockVideoAdapter`] | Decoder bookkeeping, synthetic frame feed |
//! | [`MockStreamPublisher`] | Scripted connect/stop acknowledgements |
//!
//! # Acknowledgement Policy
//!
//! Every adapter answers requests according to an [`AckPolicy`]:
//!
//! - `Manual`: acks are queued until the test calls `complete_next`
//! - `Auto(latency)`: succeed after `latency` (zero = inline)
//! - `Fail(reason)`: fail immediately
//! - `Ignore`: never answer, so the caller's timeout fires
//!
//! # Thread Model
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ mock-telemetry  │────▶│ LinkEvent sinks │
//! └─────────────────┘     └─────────────────┘
//! ┌─────────────────┐     ┌─────────────────┐
//! │  mock-camera    │────▶│ frame listeners │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! Both generators are optional; tests drive the adapters by hand instead.

pub mod publisher;
pub mod vehicle;
pub mod video;

pub use publisher::{MockStreamPublisher, PublisherRequest};
pub use vehicle::MockFlightAdapter;
pub use video::MockVideoAdapter;

use crate::core::adapter::Ack;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How a mock adapter answers requests
#[derive(Debug, Clone, PartialEq)]
pub enum AckPolicy {
    Manual,
    Auto(Duration),
    Fail(String),
    Ignore,
}

/// Outcome of applying a policy to one ack
pub(crate) enum Answer {
    /// Caller must queue the ack for `complete_next`
    Queue(Ack),
    Done,
}

pub(crate) fn answer(policy: &AckPolicy, ack: Ack) -> Answer {
    match policy {
        AckPolicy::Manual => Answer::Queue(ack),
        AckPolicy::Auto(latency) if latency.is_zero() => {
            ack.succeed();
            Answer::Done
        }
        AckPolicy::Auto(latency) => {
            let latency = *latency;
            let spawned = thread::Builder::new()
                .name("mock-ack".to_string())
                .spawn(move || {
                    thread::sleep(latency);
                    ack.succeed();
                });
            if let Err(e) = spawned {
                log::warn!("Mock ack thread failed to start, ack dropped: {}", e);
            }
            Answer::Done
        }
        AckPolicy::Fail(reason) => {
            ack.fail(reason.clone());
            Answer::Done
        }
        AckPolicy::Ignore => Answer::Done,
    }
}

/// Running simulation thread. Stopped and joined on drop.
pub struct SimulationHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimulationHandle {
    pub(crate) fn spawn<F>(name: &str, period: Duration, mut step: F) -> Result<Self>
    where
        F: FnMut(Duration) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                log::debug!("{} started ({:?} period)", thread_name(), period);
                let mut last = std::time::Instant::now();
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(period);
                    let now = std::time::Instant::now();
                    step(now - last);
                    last = now;
                }
                log::debug!("{} stopped", thread_name());
            })
            .map_err(|e| Error::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn thread_name() -> String {
    thread::current().name().unwrap_or("mock").to_string()
}

/// Period for a rate in Hz, clamped to at least 1 ms
pub(crate) fn period_for(hz: f32) -> Duration {
    if hz > 0.0 {
        Duration::from_secs_f32(1.0 / hz).max(Duration::from_millis(1))
    } else {
        Duration::from_secs(1)
    }
}
