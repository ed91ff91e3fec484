//! Typed futures completed from any thread, observed on a worker.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use skein_hal::Event;

use crate::error::{Error, Result};
use crate::worker::Worker;

type Observer<T> = Box<dyn FnOnce(TypedFuture<T>) + Send>;

enum FutureState<T> {
    Pending { observers: Vec<Observer<T>> },
    Done { result: Option<Result<T>> },
}

struct FutureShared<T> {
    worker: Arc<Worker>,
    state: Mutex<FutureState<T>>,
    done: Event,
}

/// A one-shot future.
///
/// Completion may happen from any thread, exactly once. Observers registered
/// with [`TypedFuture::on_done`] always run on the owning worker; foreign
/// threads block with [`TypedFuture::wait_deadline`] and then claim the
/// payload with [`TypedFuture::take_result`].
pub struct TypedFuture<T> {
    shared: Arc<FutureShared<T>>,
}

impl<T> Clone for TypedFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> TypedFuture<T> {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self {
            shared: Arc::new(FutureShared {
                worker,
                state: Mutex::new(FutureState::Pending {
                    observers: Vec::new(),
                }),
                done: Event::new(false),
            }),
        }
    }

    /// The worker observers run on.
    pub fn worker(&self) -> &Arc<Worker> {
        &self.shared.worker
    }

    /// Complete with a value or error. Fails with a logic error if the
    /// future was already completed.
    pub fn complete(&self, result: Result<T>) -> Result<()> {
        let observers = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                FutureState::Done { .. } => {
                    return Err(Error::logic("future already completed"));
                }
                FutureState::Pending { observers } => {
                    let observers = std::mem::take(observers);
                    *state = FutureState::Done {
                        result: Some(result),
                    };
                    observers
                }
            }
        };
        self.shared.done.set();
        for observer in observers {
            let future = self.clone();
            self.shared
                .worker
                .call_threadsafe(move || observer(future));
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.shared.done.is_signaled()
    }

    /// Run `observer` on the owning worker once the future completes.
    pub fn on_done(&self, observer: impl FnOnce(TypedFuture<T>) + Send + 'static) {
        let run_now = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                FutureState::Pending { observers } => {
                    observers.push(Box::new(observer));
                    None
                }
                FutureState::Done { .. } => Some(Box::new(observer) as Observer<T>),
            }
        };
        if let Some(observer) = run_now {
            let future = self.clone();
            self.shared
                .worker
                .call_threadsafe(move || observer(future));
        }
    }

    /// Block the calling thread until completion or `deadline`.
    ///
    /// Returns `true` when the future completed in time.
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        self.shared.done.wait_deadline(deadline)
    }

    /// Claim the payload. Returns `None` before completion or after a prior
    /// claim.
    pub fn take_result(&self) -> Option<Result<T>> {
        match &mut *self.shared.state.lock() {
            FutureState::Pending { .. } => None,
            FutureState::Done { result } => result.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerOptions;
    use std::sync::mpsc;
    use std::time::Duration;

    fn test_worker() -> Arc<Worker> {
        let worker = Worker::new(WorkerOptions::named("future-test"));
        worker.start().unwrap();
        worker
    }

    #[test]
    fn test_complete_and_take() {
        let worker = test_worker();
        let future = TypedFuture::<u32>::new(Arc::clone(&worker));
        assert!(!future.is_done());
        assert!(future.take_result().is_none());

        future.complete(Ok(9)).unwrap();
        assert!(future.is_done());
        assert_eq!(future.take_result().unwrap().unwrap(), 9);
        // One-shot payload.
        assert!(future.take_result().is_none());

        worker.kill().unwrap();
        worker.wait_for_shutdown().unwrap();
    }

    #[test]
    fn test_double_complete_rejected() {
        let worker = test_worker();
        let future = TypedFuture::<u32>::new(Arc::clone(&worker));
        future.complete(Ok(1)).unwrap();
        assert!(matches!(future.complete(Ok(2)), Err(Error::Logic(_))));
        worker.kill().unwrap();
        worker.wait_for_shutdown().unwrap();
    }

    #[test]
    fn test_complete_from_foreign_thread() {
        let worker = test_worker();
        let future = TypedFuture::<u32>::new(Arc::clone(&worker));
        let remote = future.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.complete(Ok(7)).unwrap();
        });
        assert!(future.wait_deadline(Instant::now() + Duration::from_secs(5)));
        assert_eq!(future.take_result().unwrap().unwrap(), 7);
        handle.join().unwrap();
        worker.kill().unwrap();
        worker.wait_for_shutdown().unwrap();
    }

    #[test]
    fn test_observer_runs_on_worker() {
        let worker = test_worker();
        let future = TypedFuture::<u32>::new(Arc::clone(&worker));
        let (tx, rx) = mpsc::channel();
        future.on_done(move |resolved| {
            tx.send((std::thread::current().name().map(String::from), resolved.take_result()))
                .unwrap();
        });
        future.complete(Ok(3)).unwrap();
        let (thread_name, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(thread_name.as_deref(), Some("future-test"));
        assert_eq!(result.unwrap().unwrap(), 3);

        // Late observers fire immediately (but still on the worker).
        let (tx, rx) = mpsc::channel();
        future.on_done(move |_| tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        worker.kill().unwrap();
        worker.wait_for_shutdown().unwrap();
    }
}
