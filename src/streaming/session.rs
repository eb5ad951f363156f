//! Outbound streaming session
//!
//! # State Machine
//!
//! ```text
//!           start()               ack ok
//!   Idle ───────────▶ Connecting ────────▶ Streaming
//!    ▲  ▲               │  │ ack err /         │
//!    │  │               │  │ connect timeout   │ stop()
//!    │  │ ack           │  ▼                   ▼
//!    │  └─────────── Stopping ◀──stop()── (Connecting|Streaming)
//!    │                                   Error(reason)
//!    └───────────────── start() from Error ──┘
//! ```
//!
//! All transitions happen under one lock, either on the caller's thread
//! (`start`, `stop`, `update_url`, `release`) or on the `stream-session`
//! worker, which consumes publisher acknowledgements and enforces the
//! connect timeout. Each request carries a ticket; acknowledgements for
//! anything but the outstanding request are discarded.
//!
//! # State Hook
//!
//! An optional hook observes every transition synchronously, under the
//! session lock. It runs *before* entering `Connecting`/`Streaming` and
//! *after* leaving them, which is how preview is suspended before the
//! session goes live. The hook must not call back into the session.

use crate::config::StreamingConfig;
use crate::core::adapter::{Ack, Acknowledgement, StreamPublisher};
use crate::core::types::StreamState;
use crate::core::watch::{Watch, WatchReceiver};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, select, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Period of the worker's deadline scan
const DEADLINE_TICK: Duration = Duration::from_millis(20);

/// Observer of session state transitions
pub type StateHook = Box<dyn Fn(&StreamState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    ticket: u64,
    kind: RequestKind,
    deadline: Instant,
}

struct SessionInner {
    url: String,
    outstanding: Option<Outstanding>,
    /// Start again once the outstanding stop completes (URL change)
    restart_pending: bool,
    released: bool,
    next_ticket: u64,
}

struct SessionCore {
    config: StreamingConfig,
    publisher: Arc<dyn StreamPublisher>,
    state: Watch<StreamState>,
    inner: Mutex<SessionInner>,
    hook: Option<StateHook>,
    ack_tx: Sender<Acknowledgement>,
}

impl SessionCore {
    fn transition(&self, next: StreamState) {
        let entering_live = next.is_live();
        if entering_live {
            self.notify(&next);
        }
        let previous = self.state.set(next.clone());
        if previous != next {
            match &next {
                StreamState::Error(reason) => {
                    log::error!("Stream state: {} -> error ({})", previous, reason)
                }
                _ => log::info!("Stream state: {} -> {}", previous, next),
            }
        }
        if !entering_live {
            self.notify(&next);
        }
    }

    fn notify(&self, state: &StreamState) {
        if let Some(hook) = &self.hook {
            hook(state);
        }
    }

    fn ticket(inner: &mut SessionInner) -> u64 {
        inner.next_ticket += 1;
        inner.next_ticket
    }

    /// Enter `Connecting` and ask the publisher to connect
    fn begin_start(&self, inner: &mut SessionInner) {
        let ticket = Self::ticket(inner);
        inner.outstanding = Some(Outstanding {
            ticket,
            kind: RequestKind::Start,
            deadline: Instant::now() + self.config.connect_timeout(),
        });
        self.transition(StreamState::Connecting);

        if self.config.mute_audio {
            self.publisher.set_audio_muted(true);
        }
        log::info!("Starting stream to {}", inner.url);
        self.publisher.start(&inner.url, Ack::new(ticket, self.ack_tx.clone()));
    }

    /// Enter `Stopping` and ask the publisher to stop
    fn begin_stop(&self, inner: &mut SessionInner) {
        let ticket = Self::ticket(inner);
        inner.outstanding = Some(Outstanding {
            ticket,
            kind: RequestKind::Stop,
            deadline: Instant::now() + self.config.connect_timeout(),
        });
        self.transition(StreamState::Stopping);
        self.publisher.stop(Ack::new(ticket, self.ack_tx.clone()));
    }

    fn acknowledge(&self, ack: Acknowledgement) {
        let mut inner = self.inner.lock();
        let outstanding = match inner.outstanding {
            Some(o) if o.ticket == ack.ticket => o,
            _ => {
                log::debug!("Discarding stale stream acknowledgement {}", ack.ticket);
                return;
            }
        };
        inner.outstanding = None;

        match (outstanding.kind, ack.result) {
            (RequestKind::Start, Ok(())) => self.transition(StreamState::Streaming),
            (RequestKind::Start, Err(reason)) => {
                log::error!("{}", Error::Streaming(reason.clone()));
                inner.restart_pending = false;
                self.transition(StreamState::Error(reason));
            }
            (RequestKind::Stop, result) => {
                if let Err(reason) = result {
                    log::warn!("Publisher reported stop failure: {}", reason);
                }
                self.transition(StreamState::Idle);
                if std::mem::take(&mut inner.restart_pending) {
                    self.begin_start(&mut inner);
                }
            }
        }
    }

    fn check_deadline(&self, now: Instant) {
        let mut inner = self.inner.lock();
        let Some(outstanding) = inner.outstanding else {
            return;
        };
        if outstanding.deadline > now {
            return;
        }
        inner.outstanding = None;

        match outstanding.kind {
            RequestKind::Start => {
                inner.restart_pending = false;
                self.transition(StreamState::Error("connect timeout".to_string()));
                // Best effort; the acknowledgement is untracked
                let ticket = Self::ticket(&mut inner);
                self.publisher.stop(Ack::new(ticket, self.ack_tx.clone()));
            }
            RequestKind::Stop => {
                log::warn!("Publisher did not confirm stop, assuming stopped");
                self.transition(StreamState::Idle);
                if std::mem::take(&mut inner.restart_pending) {
                    self.begin_start(&mut inner);
                }
            }
        }
    }
}

/// Owner of the outbound streaming session
pub struct StreamingSessionManager {
    core: Arc<SessionCore>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingSessionManager {
    pub fn new(
        config: StreamingConfig,
        publisher: Arc<dyn StreamPublisher>,
        hook: Option<StateHook>,
    ) -> Result<Self> {
        let (ack_tx, ack_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded();

        let core = Arc::new(SessionCore {
            inner: Mutex::new(SessionInner {
                url: config.default_url.clone(),
                outstanding: None,
                restart_pending: false,
                released: false,
                next_ticket: 0,
            }),
            config,
            publisher,
            state: Watch::new(StreamState::Idle),
            hook,
            ack_tx,
        });

        let worker_core = Arc::clone(&core);
        let worker = thread::Builder::new()
            .name("stream-session".to_string())
            .spawn(move || run_worker(worker_core, ack_rx, shutdown_rx))
            .map_err(|e| Error::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            core,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn state(&self) -> StreamState {
        self.core.state.get()
    }

    /// Stream of session states, starting with the current one
    pub fn subscribe(&self) -> WatchReceiver<StreamState> {
        self.core.state.subscribe()
    }

    pub fn url(&self) -> String {
        self.core.inner.lock().url.clone()
    }

    /// Connect to the recorded URL. No-op while connecting or streaming;
    /// while stopping, the start happens once the stop completes.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.core.inner.lock();
        if inner.released {
            return Err(Error::SessionReleased);
        }

        match self.core.state.get() {
            StreamState::Connecting | StreamState::Streaming => {
                log::debug!("Stream already live, start ignored");
                Ok(())
            }
            StreamState::Stopping => {
                inner.restart_pending = true;
                Ok(())
            }
            StreamState::Idle | StreamState::Error(_) => {
                if inner.url.trim().is_empty() {
                    return Err(Error::Streaming("no stream url configured".to_string()));
                }
                self.core.begin_start(&mut inner);
                Ok(())
            }
        }
    }

    /// Disconnect. No-op unless connecting or streaming. Also cancels a
    /// start queued behind an in-progress stop.
    pub fn stop(&self) {
        let mut inner = self.core.inner.lock();
        inner.restart_pending = false;
        if inner.released {
            return;
        }
        if self.core.state.get().is_live() {
            self.core.begin_stop(&mut inner);
        }
    }

    /// Record `url`. A live session is restarted against it.
    pub fn update_url(&self, url: &str) -> Result<()> {
        let mut inner = self.core.inner.lock();
        if inner.released {
            return Err(Error::SessionReleased);
        }
        inner.url = url.to_string();

        if self.core.state.get().is_live() {
            log::info!("Stream url changed while live, restarting");
            inner.restart_pending = true;
            self.core.begin_stop(&mut inner);
        }
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.core.inner.lock().released
    }

    /// Tear the session down for good. The publisher is released exactly
    /// once no matter how often this is called.
    pub fn release(&self) {
        {
            let mut inner = self.core.inner.lock();
            if inner.released {
                return;
            }
            inner.released = true;
            inner.restart_pending = false;
            inner.outstanding = None;

            if self.core.state.get().is_live() {
                let ticket = SessionCore::ticket(&mut inner);
                self.core.publisher.stop(Ack::new(ticket, self.core.ack_tx.clone()));
            }
            self.core.transition(StreamState::Idle);
            self.core.publisher.release();
            log::info!("Streaming session released");
        }

        self.shutdown_tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("Stream session worker panicked");
            }
        }
    }
}

impl Drop for StreamingSessionManager {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_worker(
    core: Arc<SessionCore>,
    ack_rx: Receiver<Acknowledgement>,
    shutdown_rx: Receiver<()>,
) {
    log::debug!("Stream session worker started");
    loop {
        select! {
            recv(shutdown_rx) -> _ => break,
            recv(ack_rx) -> msg => {
                if let Ok(ack) = msg {
                    core.acknowledge(ack);
                }
            },
            default(DEADLINE_TICK) => {},
        }
        core.check_deadline(Instant::now());
    }
    log::debug!("Stream session worker stopped");
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::devices::mock::{AckPolicy, MockStreamPublisher, PublisherRequest};

    const WAIT: Duration = Duration::from_secs(2);

    fn session(policy: AckPolicy) -> (StreamingSessionManager, Arc<MockStreamPublisher>) {
        session_with(StreamingConfig::default(), policy, None)
    }

    fn session_with(
        config: StreamingConfig,
        policy: AckPolicy,
        hook: Option<StateHook>,
    ) -> (StreamingSessionManager, Arc<MockStreamPublisher>) {
        let publisher = Arc::new(MockStreamPublisher::new(policy));
        let manager = StreamingSessionManager::new(
            config,
            Arc::clone(&publisher) as Arc<dyn StreamPublisher>,
            hook,
        )
        .unwrap();
        (manager, publisher)
    }

    fn wait_for(manager: &StreamingSessionManager, expected: StreamState) {
        let rx = manager.subscribe();
        let deadline = Instant::now() + WAIT;
        while manager.state() != expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            assert!(!remaining.is_zero(), "timed out waiting for {}", expected);
            let _ = rx.recv_timeout(remaining);
        }
    }

    #[test]
    fn test_start_confirm_stop() {
        let (manager, publisher) = session(AckPolicy::Manual);
        manager.start().unwrap();
        assert_eq!(manager.state(), StreamState::Connecting);
        assert!(publisher.is_muted());

        publisher.complete_next(Ok(()));
        wait_for(&manager, StreamState::Streaming);

        manager.stop();
        assert_eq!(manager.state(), StreamState::Stopping);
        publisher.complete_next(Ok(()));
        wait_for(&manager, StreamState::Idle);

        assert_eq!(
            publisher.requests(),
            vec![
                PublisherRequest::Start("rtmp://localhost:1935/live/drone".to_string()),
                PublisherRequest::Stop
            ]
        );
    }

    #[test]
    fn test_connect_failure_is_recoverable() {
        let (manager, publisher) = session(AckPolicy::Manual);
        manager.start().unwrap();
        publisher.complete_next(Err("handshake refused".to_string()));
        wait_for(&manager, StreamState::Error("handshake refused".to_string()));

        // stop() from Error is a no-op
        manager.stop();
        assert_eq!(publisher.requests().len(), 1);

        manager.start().unwrap();
        assert_eq!(manager.state(), StreamState::Connecting);
    }

    #[test]
    fn test_connect_timeout() {
        let config = StreamingConfig {
            connect_timeout_ms: 60,
            ..Default::default()
        };
        let (manager, _publisher) = session_with(config, AckPolicy::Ignore, None);
        manager.start().unwrap();
        wait_for(&manager, StreamState::Error("connect timeout".to_string()));
    }

    #[test]
    fn test_update_url_restarts_live_session() {
        let (manager, publisher) = session(AckPolicy::Manual);
        manager.start().unwrap();
        publisher.complete_next(Ok(()));
        wait_for(&manager, StreamState::Streaming);

        manager.update_url("rtmp://relay.example/live/b").unwrap();
        assert_eq!(manager.state(), StreamState::Stopping);
        publisher.complete_next(Ok(()));
        wait_for(&manager, StreamState::Connecting);
        // The worker holds the session lock until the start request is out
        let _ = manager.url();

        assert_eq!(
            publisher.requests().last(),
            Some(&PublisherRequest::Start("rtmp://relay.example/live/b".to_string()))
        );
    }

    #[test]
    fn test_update_url_while_idle_only_records() {
        let (manager, publisher) = session(AckPolicy::Manual);
        manager.update_url("rtmp://relay.example/live/c").unwrap();
        assert_eq!(manager.state(), StreamState::Idle);
        assert!(publisher.requests().is_empty());
        assert_eq!(manager.url(), "rtmp://relay.example/live/c");
    }

    #[test]
    fn test_stale_start_ack_after_stop_is_discarded() {
        let (manager, publisher) = session(AckPolicy::Manual);
        manager.start().unwrap();
        manager.stop();

        // Start ack arrives after the stop request
        publisher.complete_next(Ok(()));
        publisher.complete_next(Ok(()));
        wait_for(&manager, StreamState::Idle);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(manager.state(), StreamState::Idle);
    }

    #[test]
    fn test_hook_observes_every_transition() {
        let seen: Arc<Mutex<Vec<StreamState>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let hook: StateHook = Box::new(move |state| log.lock().push(state.clone()));
        let (manager, publisher) =
            session_with(StreamingConfig::default(), AckPolicy::Manual, Some(hook));

        manager.start().unwrap();
        publisher.complete_next(Ok(()));
        wait_for(&manager, StreamState::Streaming);
        manager.stop();
        publisher.complete_next(Ok(()));
        wait_for(&manager, StreamState::Idle);
        let _ = manager.url();

        assert_eq!(
            *seen.lock(),
            vec![
                StreamState::Connecting,
                StreamState::Streaming,
                StreamState::Stopping,
                StreamState::Idle
            ]
        );
    }

    #[test]
    fn test_release_is_terminal_and_idempotent() {
        let (manager, publisher) = session(AckPolicy::Manual);
        manager.start().unwrap();
        publisher.complete_next(Ok(()));
        wait_for(&manager, StreamState::Streaming);

        manager.release();
        manager.release();
        assert_eq!(publisher.releases(), 1);
        assert_eq!(manager.state(), StreamState::Idle);
        assert!(matches!(manager.start(), Err(Error::SessionReleased)));
        manager.stop();

        drop(manager);
        assert_eq!(publisher.releases(), 1);
    }
}
