//! Timeline semaphores.
//!
//! A timeline semaphore carries a monotonically increasing 64-bit payload.
//! Submissions wait for the payload to reach a timepoint and signal it past
//! that timepoint on completion, giving each device queue a program-order
//! timeline without per-operation host synchronization.

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{HalError, Result};
use crate::sync_loop::LoopNotifier;

/// A shareable timeline semaphore handle.
///
/// Cloning yields another handle to the same timeline. Signals must be
/// monotonic; waiting for an already reached timepoint completes immediately.
#[derive(Clone)]
pub struct TimelineSemaphore {
    inner: Arc<SemaphoreInner>,
}

struct SemaphoreInner {
    state: Mutex<SemaphoreState>,
    cond: Condvar,
}

struct SemaphoreState {
    value: u64,
    watchers: Vec<(u64, Weak<LoopNotifier>)>,
}

impl TimelineSemaphore {
    /// Create a semaphore with the given initial payload.
    pub fn new(initial: u64) -> Self {
        Self {
            inner: Arc::new(SemaphoreInner {
                state: Mutex::new(SemaphoreState {
                    value: initial,
                    watchers: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Current payload value.
    pub fn query(&self) -> u64 {
        self.inner.state.lock().value
    }

    /// Advance the payload to `value`, waking satisfied waiters.
    ///
    /// Signaling the current value is a no-op. Signaling backwards is an
    /// error: timelines only move forward.
    pub fn signal(&self, value: u64) -> Result<()> {
        let woken = {
            let mut state = self.inner.state.lock();
            if value < state.value {
                return Err(HalError::NonMonotonicSignal {
                    current: state.value,
                    requested: value,
                });
            }
            state.value = value;
            self.inner.cond.notify_all();
            let mut woken = Vec::new();
            state.watchers.retain(|(timepoint, watcher)| {
                if *timepoint <= value {
                    woken.push(watcher.clone());
                    false
                } else {
                    true
                }
            });
            woken
        };
        for watcher in woken {
            if let Some(notifier) = watcher.upgrade() {
                notifier.notify();
            }
        }
        Ok(())
    }

    /// Whether the payload has reached `timepoint`.
    pub fn is_reached(&self, timepoint: u64) -> bool {
        self.query() >= timepoint
    }

    /// Block until the payload reaches `timepoint` or `deadline` passes.
    ///
    /// Returns `true` if the timepoint was reached, `false` on timeout.
    pub fn wait_deadline(&self, timepoint: u64, deadline: Instant) -> bool {
        let mut state = self.inner.state.lock();
        while state.value < timepoint {
            if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                return state.value >= timepoint;
            }
        }
        true
    }

    /// Register a loop notifier to be woken once the payload reaches
    /// `timepoint`. An already reached timepoint notifies immediately.
    pub fn subscribe(&self, timepoint: u64, notifier: &Arc<LoopNotifier>) {
        let mut state = self.inner.state.lock();
        if state.value >= timepoint {
            drop(state);
            notifier.notify();
            return;
        }
        state.watchers.push((timepoint, Arc::downgrade(notifier)));
    }

    /// Whether two handles refer to the same timeline.
    pub fn same_timeline(&self, other: &TimelineSemaphore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for TimelineSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineSemaphore")
            .field("value", &self.query())
            .finish()
    }
}
