//! Simulated push-streaming publisher

use super::{AckPolicy, Answer, answer};
use crate::core::adapter::{Ack, StreamPublisher};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Request received by the publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherRequest {
    Start(String),
    Stop,
}

pub struct MockStreamPublisher {
    policy: Mutex<AckPolicy>,
    pending: Mutex<VecDeque<(PublisherRequest, Ack)>>,
    requests: Mutex<Vec<PublisherRequest>>,
    muted: AtomicBool,
    releases: AtomicUsize,
}

impl MockStreamPublisher {
    pub fn new(policy: AckPolicy) -> Self {
        Self {
            policy: Mutex::new(policy),
            pending: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            muted: AtomicBool::new(false),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn set_policy(&self, policy: AckPolicy) {
        *self.policy.lock() = policy;
    }

    pub fn requests(&self) -> Vec<PublisherRequest> {
        self.requests.lock().clone()
    }

    pub fn pending_acks(&self) -> usize {
        self.pending.lock().len()
    }

    /// Answer the oldest queued request, returning it
    pub fn complete_next(
        &self,
        result: std::result::Result<(), String>,
    ) -> Option<PublisherRequest> {
        let (request, ack) = self.pending.lock().pop_front()?;
        ack.complete(result);
        Some(request)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn handle(&self, request: PublisherRequest, ack: Ack) {
        log::debug!("Mock publisher received {:?}", request);
        self.requests.lock().push(request.clone());

        if self.releases() > 0 {
            ack.fail("publisher released");
            return;
        }
        let policy = self.policy.lock().clone();
        if let Answer::Queue(ack) = answer(&policy, ack) {
            self.pending.lock().push_back((request, ack));
        }
    }
}

impl StreamPublisher for MockStreamPublisher {
    fn set_audio_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn start(&self, url: &str, ack: Ack) {
        self.handle(PublisherRequest::Start(url.to_string()), ack);
    }

    fn stop(&self, ack: Ack) {
        self.handle(PublisherRequest::Stop, ack);
    }

    fn release(&self) {
        let count = self.releases.fetch_add(1, Ordering::SeqCst) + 1;
        if count > 1 {
            log::warn!("Mock publisher released {} times", count);
        }
        // Queued acks are dropped unanswered
        self.pending.lock().clear();
    }
}
