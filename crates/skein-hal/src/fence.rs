//! Fences: joins over timeline semaphore timepoints.
//!
//! A fence names a set of `(semaphore, timepoint)` pairs. As a wait fence it
//! is satisfied once every named timeline has reached its timepoint; as a
//! signal fence, signaling it advances every named timeline.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::Result;
use crate::semaphore::TimelineSemaphore;
use crate::sync_loop::LoopNotifier;

/// A set of `(semaphore, timepoint)` pairs combined with AND semantics.
///
/// Inserting a semaphore that is already present keeps the highest timepoint,
/// so each timeline appears exactly once. Cloning shares the underlying set.
#[derive(Clone, Default)]
pub struct Fence {
    inner: Arc<Mutex<Vec<(TimelineSemaphore, u64)>>>,
}

impl Fence {
    /// Create an empty fence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fence over the given timepoints.
    pub fn from_timepoints(timepoints: impl IntoIterator<Item = (TimelineSemaphore, u64)>) -> Self {
        let fence = Self::new();
        for (sem, timepoint) in timepoints {
            fence.insert(sem, timepoint);
        }
        fence
    }

    /// Insert a timepoint, keeping the maximum per timeline.
    pub fn insert(&self, sem: TimelineSemaphore, timepoint: u64) {
        let mut entries = self.inner.lock();
        for (existing, existing_tp) in entries.iter_mut() {
            if existing.same_timeline(&sem) {
                *existing_tp = (*existing_tp).max(timepoint);
                return;
            }
        }
        entries.push((sem, timepoint));
    }

    /// Snapshot of the fence contents.
    pub fn timepoints(&self) -> Vec<(TimelineSemaphore, u64)> {
        self.inner.lock().clone()
    }

    /// Number of distinct timelines named by the fence.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the fence names no timelines. An empty fence is trivially
    /// satisfied.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Whether every named timeline has reached its timepoint.
    pub fn is_signaled(&self) -> bool {
        self.inner
            .lock()
            .iter()
            .all(|(sem, timepoint)| sem.is_reached(*timepoint))
    }

    /// Advance every named timeline to its timepoint.
    pub fn signal_all(&self) -> Result<()> {
        for (sem, timepoint) in self.inner.lock().iter() {
            sem.signal(*timepoint)?;
        }
        Ok(())
    }

    /// Block until the fence is satisfied or `deadline` passes.
    ///
    /// Returns `true` if satisfied, `false` on timeout.
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        for (sem, timepoint) in self.timepoints() {
            if !sem.wait_deadline(timepoint, deadline) {
                return false;
            }
        }
        true
    }

    /// Register a loop notifier on every named timeline.
    pub fn subscribe(&self, notifier: &Arc<LoopNotifier>) {
        for (sem, timepoint) in self.inner.lock().iter() {
            sem.subscribe(*timepoint, notifier);
        }
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.inner.lock();
        let mut list = f.debug_list();
        for (sem, timepoint) in entries.iter() {
            list.entry(&(sem.query(), timepoint));
        }
        list.finish()
    }
}
