//! Worker behavior under contention and during shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use skein::runtime::{Worker, WorkerOptions};

#[test]
fn fifo_per_producer_under_contention() {
    let worker = Worker::new(WorkerOptions::named("contention"));
    worker.start().unwrap();

    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 1000;

    let observed: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let executed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|tid| {
            let worker = Arc::clone(&worker);
            let observed = Arc::clone(&observed);
            let executed = Arc::clone(&executed);
            std::thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let observed = Arc::clone(&observed);
                    let executed = Arc::clone(&executed);
                    worker.call_threadsafe(move || {
                        observed.lock().push((tid, seq));
                        executed.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    while executed.load(Ordering::SeqCst) < PRODUCERS * PER_PRODUCER {
        assert!(Instant::now() < deadline, "thunks did not drain");
        std::thread::sleep(Duration::from_millis(5));
    }

    // Per producer, the observed sequence is strictly increasing.
    // Cross-producer interleaving is unconstrained.
    let tags = observed.lock();
    let mut last_seq = [None::<usize>; PRODUCERS];
    for &(tid, seq) in tags.iter() {
        if let Some(previous) = last_seq[tid] {
            assert!(seq > previous, "producer {tid} reordered: {previous} then {seq}");
        }
        last_seq[tid] = Some(seq);
    }
    for (tid, last) in last_seq.iter().enumerate() {
        assert_eq!(last, &Some(PER_PRODUCER - 1), "producer {tid} incomplete");
    }

    worker.kill().unwrap();
    worker.wait_for_shutdown().unwrap();
}

#[test]
fn kill_mid_flight_discards_pending_thunks() {
    let worker = Worker::new(WorkerOptions::named("mid-flight"));
    worker.start().unwrap();

    let begun = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let begun = Arc::clone(&begun);
        let completed = Arc::clone(&completed);
        worker.call_threadsafe(move || {
            begun.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }

    // Kill once the fifth thunk has begun.
    let deadline = Instant::now() + Duration::from_secs(10);
    while begun.load(Ordering::SeqCst) < 5 {
        assert!(Instant::now() < deadline, "thunks never started");
        std::thread::sleep(Duration::from_millis(1));
    }
    worker.kill().unwrap();

    let start = Instant::now();
    worker.wait_for_shutdown().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));

    // The in-flight thunk ran to completion; pending ones were discarded.
    let begun_now = begun.load(Ordering::SeqCst);
    assert_eq!(
        begun_now,
        completed.load(Ordering::SeqCst),
        "a running thunk was cut short"
    );
    assert!(begun_now < 100, "kill did not discard pending thunks");

    // No further thunk runs after shutdown.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(begun.load(Ordering::SeqCst), begun_now);
}

#[test]
fn shutdown_returns_promptly_when_idle() {
    let worker = Worker::new(WorkerOptions::named("idle"));
    worker.start().unwrap();
    worker.kill().unwrap();
    let start = Instant::now();
    worker.wait_for_shutdown().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
}
