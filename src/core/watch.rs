//! Observable single-writer state cell.
//!
//! A `Watch<T>` holds one value behind a mutex. Writes replace the value
//! wholesale and are published to every subscriber while the lock is held,
//! so subscribers observe writes in the order they were applied and readers
//! never see a half-updated value.
//!
//! Each subscriber holds at most one unread value: a newer write replaces
//! the one still waiting, so a slow reader skips intermediate values and
//! always wakes up to the latest.

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::{Arc, Weak};

struct Subscriber<T> {
    tx: Sender<T>,
    /// Used to discard an unread value before sending its replacement
    rx: Receiver<T>,
    alive: Weak<()>,
}

struct WatchInner<T> {
    value: T,
    subscribers: Vec<Subscriber<T>>,
}

/// Latest-value receiver returned by [`Watch::subscribe`].
///
/// Dereferences to a [`Receiver`]; dropping it unsubscribes.
pub struct WatchReceiver<T> {
    rx: Receiver<T>,
    _alive: Arc<()>,
}

impl<T> Deref for WatchReceiver<T> {
    type Target = Receiver<T>;

    fn deref(&self) -> &Receiver<T> {
        &self.rx
    }
}

/// Mutex-guarded value with change subscriptions
pub struct Watch<T: Clone + PartialEq> {
    inner: Mutex<WatchInner<T>>,
}

impl<T: Clone + PartialEq> Watch<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(WatchInner {
                value,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Snapshot of the current value
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Replace the value. Returns the previous value.
    ///
    /// Subscribers are notified only when the value actually changes.
    pub fn set(&self, value: T) -> T {
        let mut inner = self.inner.lock();
        let previous = std::mem::replace(&mut inner.value, value);
        if previous != inner.value {
            Self::publish(&mut inner);
        }
        previous
    }

    /// Atomically compute and store a new value from the current one.
    ///
    /// `f` returns `None` to leave the value untouched. Returns
    /// `Some((previous, current))` when a value was stored.
    pub fn update<F>(&self, f: F) -> Option<(T, T)>
    where
        F: FnOnce(&T) -> Option<T>,
    {
        let mut inner = self.inner.lock();
        let next = f(&inner.value)?;
        let previous = std::mem::replace(&mut inner.value, next);
        if previous != inner.value {
            Self::publish(&mut inner);
        }
        Some((previous, inner.value.clone()))
    }

    /// Subscribe to changes. The receiver first yields the current value.
    pub fn subscribe(&self) -> WatchReceiver<T> {
        let (tx, rx) = bounded(1);
        let alive = Arc::new(());
        let mut inner = self.inner.lock();
        // Cannot fail: the slot is empty
        let _ = tx.try_send(inner.value.clone());
        inner.subscribers.push(Subscriber {
            tx,
            rx: rx.clone(),
            alive: Arc::downgrade(&alive),
        });
        WatchReceiver { rx, _alive: alive }
    }

    fn publish(inner: &mut WatchInner<T>) {
        let value = inner.value.clone();
        // Receivers that were dropped are pruned here
        inner.subscribers.retain(|sub| {
            if sub.alive.strong_count() == 0 {
                return false;
            }
            let _ = sub.rx.try_recv();
            let _ = sub.tx.try_send(value.clone());
            true
        });
    }
}

impl<T: Clone + PartialEq + Default> Default for Watch<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
