//! A single-threaded cooperative sync loop.
//!
//! The loop owns a queue of one-shot callbacks and a set of wait
//! registrations against [`WaitSource`]s. `drain` runs callbacks whose
//! conditions are met, sleeping on an internal notifier between batches.
//! Registration entry points may be called from callbacks running inside
//! `drain`; internal locks are only held while queues are manipulated, never
//! across callback execution.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::event::Event;
use crate::fence::Fence;
use crate::semaphore::TimelineSemaphore;

/// Wakes a sleeping loop when a wait source it registered becomes ready.
pub struct LoopNotifier {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl LoopNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Mark the notifier pending and wake the loop if it is sleeping.
    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_all();
    }

    /// Sleep until notified or `deadline`, consuming the pending flag.
    fn wait_until(&self, deadline: Instant) {
        let mut pending = self.pending.lock();
        while !*pending {
            if self.cond.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        *pending = false;
    }

    /// Sleep until notified, consuming the pending flag.
    fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.cond.wait(&mut pending);
        }
        *pending = false;
    }
}

/// Something a loop can wait on.
#[derive(Clone, Debug)]
pub enum WaitSource {
    /// A binary event.
    Event(Event),
    /// A timeline semaphore reaching a timepoint.
    Semaphore(TimelineSemaphore, u64),
    /// A fence over several timelines.
    Fence(Fence),
}

impl WaitSource {
    fn is_signaled(&self) -> bool {
        match self {
            WaitSource::Event(event) => event.is_signaled(),
            WaitSource::Semaphore(sem, timepoint) => sem.is_reached(*timepoint),
            WaitSource::Fence(fence) => fence.is_signaled(),
        }
    }

    fn subscribe(&self, notifier: &Arc<LoopNotifier>) {
        match self {
            WaitSource::Event(event) => event.subscribe(notifier),
            WaitSource::Semaphore(sem, timepoint) => sem.subscribe(*timepoint, notifier),
            WaitSource::Fence(fence) => fence.subscribe(notifier),
        }
    }
}

impl From<Event> for WaitSource {
    fn from(event: Event) -> Self {
        WaitSource::Event(event)
    }
}

impl From<Fence> for WaitSource {
    fn from(fence: Fence) -> Self {
        WaitSource::Fence(fence)
    }
}

/// Status delivered to a loop callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Ok,
    DeadlineExceeded,
}

/// Scheduling priority for immediate calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopPriority {
    #[default]
    Default,
    High,
}

/// A one-shot loop callback.
///
/// Returning an error is fatal to the drain that ran the callback; recover
/// inside the callback or not at all.
pub type LoopCallback = Box<dyn FnOnce(&SyncLoop, LoopStatus) -> Result<()> + Send>;

struct WaitRegistration {
    /// `None` for pure timers registered via `wait_until`.
    source: Option<WaitSource>,
    deadline: Option<Instant>,
    callback: LoopCallback,
}

struct LoopQueues {
    calls: VecDeque<LoopCallback>,
    waits: Vec<WaitRegistration>,
}

/// The cooperative loop. One thread drains; any code already running on that
/// thread may register work.
pub struct SyncLoop {
    notifier: Arc<LoopNotifier>,
    queues: Mutex<LoopQueues>,
}

impl SyncLoop {
    pub fn new() -> Self {
        Self {
            notifier: LoopNotifier::new(),
            queues: Mutex::new(LoopQueues {
                calls: VecDeque::new(),
                waits: Vec::new(),
            }),
        }
    }

    /// The notifier external wait sources use to wake this loop.
    pub fn notifier(&self) -> &Arc<LoopNotifier> {
        &self.notifier
    }

    /// Enqueue a callback to run on the next drain cycle.
    pub fn call(&self, priority: LoopPriority, callback: LoopCallback) {
        {
            let mut queues = self.queues.lock();
            match priority {
                LoopPriority::Default => queues.calls.push_back(callback),
                LoopPriority::High => queues.calls.push_front(callback),
            }
        }
        self.notifier.notify();
    }

    /// Run `callback` once `source` is signaled, or with
    /// [`LoopStatus::DeadlineExceeded`] if `deadline` passes first.
    /// `deadline = None` waits forever.
    pub fn wait_one(
        &self,
        source: WaitSource,
        deadline: Option<Instant>,
        callback: LoopCallback,
    ) {
        source.subscribe(&self.notifier);
        {
            let mut queues = self.queues.lock();
            queues.waits.push(WaitRegistration {
                source: Some(source),
                deadline,
                callback,
            });
        }
        self.notifier.notify();
    }

    /// Run `callback` with [`LoopStatus::Ok`] once `deadline` passes.
    pub fn wait_until(&self, deadline: Instant, callback: LoopCallback) {
        {
            let mut queues = self.queues.lock();
            queues.waits.push(WaitRegistration {
                source: None,
                deadline: Some(deadline),
                callback,
            });
        }
        self.notifier.notify();
    }

    /// Number of outstanding registrations (calls plus waits).
    pub fn outstanding(&self) -> usize {
        let queues = self.queues.lock();
        queues.calls.len() + queues.waits.len()
    }

    /// Process ready work, sleeping between batches, for at most `quantum`.
    ///
    /// Returns once the loop reaches a quiescent point after having done
    /// work, or once `quantum` elapses, whichever comes first. A fully idle
    /// loop with work registered sleeps for the remainder of the quantum.
    /// `quantum = None` drains until quiescent-after-work or forever idle
    /// work arrives.
    ///
    /// An error returned by any callback aborts the drain and propagates.
    pub fn drain(&self, quantum: Option<Duration>) -> Result<()> {
        let drain_deadline = quantum.map(|q| Instant::now() + q);
        let mut did_work = false;

        loop {
            let mut processed = 0usize;

            // Immediate calls, one at a time so callbacks may re-enter.
            loop {
                let next = self.queues.lock().calls.pop_front();
                let Some(callback) = next else { break };
                processed += 1;
                callback(self, LoopStatus::Ok)?;
            }

            // Waits that are ready or expired.
            let now = Instant::now();
            let fired = {
                let mut queues = self.queues.lock();
                let mut fired = Vec::new();
                let mut index = 0;
                while index < queues.waits.len() {
                    let registration = &queues.waits[index];
                    let expired = registration.deadline.is_some_and(|d| now >= d);
                    let status = match &registration.source {
                        Some(source) if source.is_signaled() => Some(LoopStatus::Ok),
                        Some(_) if expired => Some(LoopStatus::DeadlineExceeded),
                        Some(_) => None,
                        // Pure timer.
                        None if expired => Some(LoopStatus::Ok),
                        None => None,
                    };
                    if let Some(status) = status {
                        fired.push((queues.waits.swap_remove(index), status));
                    } else {
                        index += 1;
                    }
                }
                fired
            };
            for (registration, status) in fired {
                processed += 1;
                (registration.callback)(self, status)?;
            }

            if processed > 0 {
                did_work = true;
                continue;
            }
            if did_work {
                return Ok(());
            }
            if let Some(deadline) = drain_deadline {
                if Instant::now() >= deadline {
                    return Ok(());
                }
            }

            // Idle: sleep until the earliest deadline or a notification.
            let mut sleep_deadline = drain_deadline;
            {
                let queues = self.queues.lock();
                if queues.calls.is_empty() && queues.waits.is_empty() {
                    // Nothing registered at all; nothing can fire.
                    return Ok(());
                }
                for wait in &queues.waits {
                    if let Some(deadline) = wait.deadline {
                        sleep_deadline = Some(match sleep_deadline {
                            Some(existing) => existing.min(deadline),
                            None => deadline,
                        });
                    }
                }
            }
            match sleep_deadline {
                Some(deadline) => self.notifier.wait_until(deadline),
                None => self.notifier.wait(),
            }
        }
    }
}

impl Default for SyncLoop {
    fn default() -> Self {
        Self::new()
    }
}
