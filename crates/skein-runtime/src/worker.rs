//! Workers: single-threaded cooperative executors.
//!
//! A worker drains a sync loop on one thread, either a dedicated thread it
//! owns (`owned_thread = true`) or a host thread donated through
//! [`Worker::run_on_current_thread`]. Foreign threads interact with a worker
//! only through [`Worker::call_threadsafe`] and [`Worker::kill`], both of
//! which synchronize on the internal mutex and the transact event.
//!
//! # Transact protocol
//!
//! The loop keeps a wait registered on the transact event. When it fires,
//! the worker resets the event under the lock, swaps out the pending thunk
//! list, runs the thunks in FIFO order, and re-arms the wait. Observing the
//! kill flag stops the cycle without re-arming; work already registered with
//! the loop still drains.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use skein_hal::{Event, LoopCallback, LoopPriority, LoopStatus, SyncLoop, WaitSource};

use crate::error::{Error, Result};

/// Polling slice for [`Worker::wait_for_shutdown`].
const SHUTDOWN_WAIT_SLICE: Duration = Duration::from_secs(5);

/// Work enqueued from any thread.
pub type Thunk = Box<dyn FnOnce() + Send>;

/// Configuration for a [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Used for thread naming and log correlation.
    pub name: String,
    /// When true the worker spawns and owns its thread; when false a host
    /// thread must call `run_on_current_thread` exactly once.
    pub owned_thread: bool,
    /// Upper bound on a single loop drain; also bounds kill latency.
    pub quantum: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            owned_thread: true,
            quantum: Duration::from_millis(100),
        }
    }
}

impl WorkerOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Lifecycle hooks invoked on the worker thread around the loop.
///
/// Default methods are no-ops; install hooks for error handlers or
/// per-thread setup.
pub trait WorkerHooks: Send + Sync {
    fn on_thread_start(&self) {}
    fn on_thread_stop(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    Started,
    Running,
    KillRequested,
    Ended,
}

struct WorkerState {
    phase: Phase,
    kill: bool,
    has_run: bool,
    pending_thunks: Vec<Thunk>,
}

/// A single-threaded cooperative executor.
pub struct Worker {
    options: WorkerOptions,
    state: Mutex<WorkerState>,
    transact: Event,
    ended: Event,
    sync_loop: SyncLoop,
    hooks: Option<Arc<dyn WorkerHooks>>,
    thread_id: Mutex<Option<ThreadId>>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(options: WorkerOptions) -> Arc<Self> {
        Self::with_hooks(options, None)
    }

    pub fn with_hooks(options: WorkerOptions, hooks: Option<Arc<dyn WorkerHooks>>) -> Arc<Self> {
        Arc::new(Self {
            options,
            state: Mutex::new(WorkerState {
                phase: Phase::New,
                kill: false,
                has_run: false,
                pending_thunks: Vec::new(),
            }),
            transact: Event::new(false),
            ended: Event::new(false),
            sync_loop: SyncLoop::new(),
            hooks,
            thread_id: Mutex::new(None),
            join_handle: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// The worker's loop. Registration entry points must only be used from
    /// the worker thread; prefer the `*_low_level` wrappers, which check.
    pub fn sync_loop(&self) -> &SyncLoop {
        &self.sync_loop
    }

    /// Spawn and start the owned thread.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if !self.options.owned_thread {
            return Err(Error::logic("cannot start worker when owned_thread=false"));
        }
        {
            let mut state = self.state.lock();
            if state.phase != Phase::New {
                return Err(Error::logic("cannot start worker multiple times"));
            }
            state.phase = Phase::Started;
        }
        let worker = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(self.options.name.clone())
            .spawn(move || worker.run_on_thread())
            .map_err(Error::Io)?;
        *self.join_handle.lock() = Some(handle);
        tracing::info!(worker = %self.options.name, "worker_started");
        Ok(())
    }

    /// Donate the calling thread to the worker until it is killed.
    pub fn run_on_current_thread(self: &Arc<Self>) -> Result<()> {
        if self.options.owned_thread {
            return Err(Error::logic(
                "cannot run_on_current_thread when worker owns its thread",
            ));
        }
        {
            let mut state = self.state.lock();
            if state.has_run {
                return Err(Error::logic("worker has already run"));
            }
            state.has_run = true;
            state.phase = Phase::Started;
        }
        Arc::clone(self).run_on_thread();
        Ok(())
    }

    fn run_on_thread(self: Arc<Self>) {
        *self.thread_id.lock() = Some(std::thread::current().id());
        self.state.lock().phase = Phase::Running;
        if let Some(hooks) = &self.hooks {
            hooks.on_thread_start();
        }

        let loop_status = self.run_loop();
        if let Err(err) = loop_status {
            // Documented fatal: a non-recoverable loop failure cannot leave
            // the process in a coherent scheduling state.
            tracing::error!(worker = %self.options.name, error = %err, "worker_loop_fatal");
            std::process::abort();
        }

        if let Some(hooks) = &self.hooks {
            hooks.on_thread_stop();
        }
        *self.thread_id.lock() = None;
        self.state.lock().phase = Phase::Ended;
        tracing::info!(worker = %self.options.name, "worker_ended");
        self.ended.set();
    }

    fn run_loop(self: &Arc<Self>) -> skein_hal::Result<()> {
        self.schedule_transact_wait();
        loop {
            if self.state.lock().kill {
                break;
            }
            self.sync_loop.drain(Some(self.options.quantum))?;
        }
        Ok(())
    }

    fn schedule_transact_wait(self: &Arc<Self>) {
        let worker = Arc::clone(self);
        let callback: LoopCallback =
            Box::new(move |_loop, status| worker.transact_cycle(status));
        self.sync_loop
            .wait_one(WaitSource::Event(self.transact.clone()), None, callback);
    }

    fn transact_cycle(self: &Arc<Self>, status: LoopStatus) -> skein_hal::Result<()> {
        if status != LoopStatus::Ok {
            return Err(skein_hal::HalError::callback(
                "transact wait delivered failure",
            ));
        }

        let next_thunks = {
            // An outside thread cannot change this state without entering
            // the critical section, so resetting the event here cannot race
            // with a set we have not yet observed.
            let mut state = self.state.lock();
            self.transact.reset();
            if state.kill {
                return Ok(());
            }
            std::mem::take(&mut state.pending_thunks)
        };

        let total = next_thunks.len();
        for (index, thunk) in next_thunks.into_iter().enumerate() {
            if self.state.lock().kill {
                tracing::debug!(
                    worker = %self.options.name,
                    discarded = total - index,
                    "thunks_discarded_on_kill"
                );
                return Ok(());
            }
            if catch_unwind(AssertUnwindSafe(thunk)).is_err() {
                tracing::error!(worker = %self.options.name, "thunk_panicked");
            }
        }

        self.schedule_transact_wait();
        Ok(())
    }

    /// Request shutdown. New thunks stop running; async work already
    /// registered with the loop drains. Safe from any thread.
    pub fn kill(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            let started = if self.options.owned_thread {
                state.phase != Phase::New
            } else {
                state.has_run
            };
            if !started {
                return Err(Error::logic("cannot kill a worker that was not started"));
            }
            state.kill = true;
            if state.phase != Phase::Ended {
                state.phase = Phase::KillRequested;
            }
        }
        self.transact.set();
        Ok(())
    }

    /// Block until the worker thread has ended, warning every five seconds.
    pub fn wait_for_shutdown(&self) -> Result<()> {
        if !self.options.owned_thread {
            return Err(Error::logic(
                "cannot wait_for_shutdown when owned_thread=false",
            ));
        }
        if self.state.lock().phase == Phase::New {
            return Err(Error::logic("cannot shut down a worker that was not started"));
        }
        loop {
            if self.ended.wait_deadline(Instant::now() + SHUTDOWN_WAIT_SLICE) {
                break;
            }
            tracing::warn!(worker = %self.options.name, "still waiting for worker to terminate");
        }
        if let Some(handle) = self.join_handle.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Enqueue a thunk from any thread. Thunks from one producer run in the
    /// order they were enqueued.
    pub fn call_threadsafe(&self, thunk: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.state.lock();
            state.pending_thunks.push(Box::new(thunk));
        }
        self.transact.set();
    }

    fn check_on_worker_thread(&self) -> Result<()> {
        let current = std::thread::current().id();
        if *self.thread_id.lock() == Some(current) {
            Ok(())
        } else {
            Err(Error::logic(
                "low-level loop access is only valid on the worker thread",
            ))
        }
    }

    /// Register a callback with the loop. Worker thread only.
    pub fn call_low_level(&self, priority: LoopPriority, callback: LoopCallback) -> Result<()> {
        self.check_on_worker_thread()?;
        self.sync_loop.call(priority, callback);
        Ok(())
    }

    /// Register a wait on `source` with the loop. Worker thread only.
    pub fn wait_one_low_level(
        &self,
        source: WaitSource,
        deadline: Option<Instant>,
        callback: LoopCallback,
    ) -> Result<()> {
        self.check_on_worker_thread()?;
        self.sync_loop.wait_one(source, deadline, callback);
        Ok(())
    }

    /// Register a timer with the loop. Worker thread only.
    pub fn wait_until_low_level(&self, deadline: Instant, callback: LoopCallback) -> Result<()> {
        self.check_on_worker_thread()?;
        self.sync_loop.wait_until(deadline, callback);
        Ok(())
    }

    /// Monotonic now.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Convert a relative timeout into an absolute deadline.
    pub fn deadline_from_timeout(&self, timeout: Duration) -> Instant {
        Instant::now() + timeout
    }
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Worker '{}'>", self.options.name)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Worker '{}'>", self.options.name)
    }
}
