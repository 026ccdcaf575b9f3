//! Single-fire completion signal bridging a worker thread and a blocked waiter.
//!
//! # Design
//! A `Mutex` guards a three-state cell and a `Condvar` wakes waiters. The
//! value is written and the state flipped under the same lock that waiters
//! re-check, so no waiter can observe a half-written value. Every write a
//! producer made before calling `fulfill` is visible to a waiter once
//! `wait_until` returns.
//!
//! Only the first `fulfill` wins. A waiter's deadline is its own: timing out
//! leaves the cell pending for every other waiter. The owner that gives up on
//! the signal calls `expire`, after which later fulfillments are dropped, so a
//! late terminal event cannot resurrect a timed-out scenario.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Observable state of a `CompletionSignal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalState<T> {
    Pending,
    Fulfilled(T),
    Expired,
}

/// Returned by a wait whose deadline passed before the signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    /// How long the waiter was actually suspended.
    pub waited: Duration,
}

struct Inner<T> {
    state: Mutex<SignalState<T>>,
    fired: Condvar,
}

/// One-shot future with a timed blocking wait. Clones share the same cell.
pub struct CompletionSignal<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CompletionSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for CompletionSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CompletionSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match &*self.lock() {
            SignalState::Pending => "pending",
            SignalState::Fulfilled(_) => "fulfilled",
            SignalState::Expired => "expired",
        };
        f.debug_struct("CompletionSignal").field("state", &label).finish()
    }
}

impl<T> CompletionSignal<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SignalState::Pending),
                fired: Condvar::new(),
            }),
        }
    }

    // A handler that panicked mid-scenario must not wedge the waiter, so a
    // poisoned lock is taken over as-is. The cell is only ever written whole.
    fn lock(&self) -> MutexGuard<'_, SignalState<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `value` and wake every waiter.
    ///
    /// Returns `true` if this call won. Calls after the first fulfillment, or
    /// after the signal expired, leave the state untouched and return `false`.
    pub fn fulfill(&self, value: T) -> bool {
        let mut state = self.lock();
        if !matches!(*state, SignalState::Pending) {
            return false;
        }
        *state = SignalState::Fulfilled(value);
        drop(state);
        self.inner.fired.notify_all();
        true
    }

    /// Close a still-pending signal. Waiters wake with `Err` and later
    /// fulfillments are dropped. Returns `false` if the signal already fired.
    pub fn expire(&self) -> bool {
        let mut state = self.lock();
        if !matches!(*state, SignalState::Pending) {
            return false;
        }
        *state = SignalState::Expired;
        drop(state);
        self.inner.fired.notify_all();
        true
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.lock(), SignalState::Pending)
    }
}

impl<T: Clone> CompletionSignal<T> {
    /// Snapshot of the current state without blocking.
    pub fn state(&self) -> SignalState<T> {
        self.lock().clone()
    }

    /// Block until fulfilled or until `deadline`.
    ///
    /// Returns `Err` before `deadline` only if the signal was explicitly
    /// expired. Spurious wake-ups re-check the cell and keep waiting for the
    /// remaining time. Timing out does not change the cell.
    pub fn wait_until(&self, deadline: Instant) -> Result<T, Expired> {
        let started = Instant::now();
        let mut state = self.lock();
        loop {
            match &*state {
                SignalState::Fulfilled(value) => return Ok(value.clone()),
                SignalState::Expired => {
                    return Err(Expired {
                        waited: started.elapsed(),
                    })
                }
                SignalState::Pending => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Expired {
                    waited: started.elapsed(),
                });
            }
            state = self
                .inner
                .fired
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, Expired> {
        self.wait_until(Instant::now() + timeout)
    }
}
