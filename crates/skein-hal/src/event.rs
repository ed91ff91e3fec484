//! Binary events usable both as blocking waits and as loop wait sources.

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::sync_loop::LoopNotifier;

/// A manually reset binary event.
///
/// Events can be set and reset from any thread. Waiters either block on the
/// event directly ([`Event::wait_deadline`]) or register a [`LoopNotifier`]
/// so a sync loop wakes when the event fires. Cloning an event yields another
/// handle to the same underlying state.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

struct EventInner {
    state: Mutex<EventState>,
    cond: Condvar,
}

struct EventState {
    signaled: bool,
    watchers: Vec<Weak<LoopNotifier>>,
}

impl Event {
    /// Create a new event with the given initial state.
    pub fn new(signaled: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(EventState {
                    signaled,
                    watchers: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Set the event, waking blocking waiters and registered loop notifiers.
    pub fn set(&self) {
        let watchers = {
            let mut state = self.inner.state.lock();
            state.signaled = true;
            self.inner.cond.notify_all();
            std::mem::take(&mut state.watchers)
        };
        for watcher in watchers {
            if let Some(notifier) = watcher.upgrade() {
                notifier.notify();
            }
        }
    }

    /// Reset the event to the unsignaled state.
    pub fn reset(&self) {
        self.inner.state.lock().signaled = false;
    }

    /// Whether the event is currently signaled.
    pub fn is_signaled(&self) -> bool {
        self.inner.state.lock().signaled
    }

    /// Block until the event is signaled or `deadline` passes.
    ///
    /// Returns `true` if the event was signaled, `false` on timeout.
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        let mut state = self.inner.state.lock();
        while !state.signaled {
            if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                return state.signaled;
            }
        }
        true
    }

    /// Register a loop notifier to be woken on the next `set`.
    ///
    /// Registration is one-shot: watchers are drained when the event fires.
    /// An already-signaled event notifies immediately.
    pub fn subscribe(&self, notifier: &Arc<LoopNotifier>) {
        let mut state = self.inner.state.lock();
        if state.signaled {
            drop(state);
            notifier.notify();
            return;
        }
        state.watchers.push(Arc::downgrade(notifier));
    }

    /// Whether two handles refer to the same event.
    pub fn same_event(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}
