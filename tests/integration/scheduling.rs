//! Coarse-fences scheduling: timeline monotonicity, wait-fence closure, and
//! affinity rules.

use std::sync::Arc;

use crate::common::{fixture, math_module, resolve, shutdown};
use skein::runtime::{
    Error, Program, ProgramInvocation, ProgramLoadOptions, ResourceBarrier, Storage,
};

#[test]
fn coarse_fences_single_queue_protocol() {
    let (_system, worker, fiber) = fixture(1);
    let program = Program::load(
        Arc::clone(&fiber),
        &[math_module()],
        ProgramLoadOptions::default(),
    )
    .unwrap();

    let scoped = fiber.device("cpu0").unwrap();
    let device = fiber.raw_device("cpu0").unwrap();
    let a = Storage::allocate_device(&scoped, 8);
    let b = Storage::allocate_device(&scoped, 8);

    let step = program.lookup_required_function("m.step").unwrap();
    let combine = program.lookup_required_function("m.combine").unwrap();

    // Advance the queue to tip 3 with three submissions; each signal
    // timepoint is strictly one past the previous.
    let mut timeline = None;
    for expected in 1..=3u64 {
        let mut invocation = step.create_invocation();
        invocation.add_arg(&a, ResourceBarrier::Write).unwrap();
        let resolved = resolve(ProgramInvocation::invoke(invocation));
        let (sem, timepoint) = resolved.coarse_signal().unwrap();
        assert_eq!(timepoint, expected);
        if let Some(previous) = &timeline {
            assert!(sem.same_timeline(previous));
        }
        timeline = Some(sem);
    }
    let timeline = timeline.unwrap();
    assert_eq!(fiber.timeline_tip(&device, 0), 3);
    assert_eq!(timeline.query(), 3);

    // READ then WRITE arguments against tip 3: the wait fence names the
    // queue exactly once at 3, and the signal lands at 4.
    let mut invocation = combine.create_invocation();
    invocation.add_arg(&a, ResourceBarrier::Read).unwrap();
    invocation.add_arg(&b, ResourceBarrier::Write).unwrap();

    let waits = invocation.wait_timepoints();
    assert_eq!(waits.len(), 1);
    assert!(waits[0].0.same_timeline(&timeline));
    assert_eq!(waits[0].1, 3);

    let resolved = resolve(ProgramInvocation::invoke(invocation));
    let (sem, timepoint) = resolved.coarse_signal().unwrap();
    assert!(sem.same_timeline(&timeline));
    assert_eq!(timepoint, 4);
    assert_eq!(fiber.timeline_tip(&device, 0), 4);
    assert_eq!(timeline.query(), 4);

    shutdown(&worker);
}

#[test]
fn wait_fence_joins_every_implicated_queue_at_its_tip() {
    let (_system, worker, fiber) = fixture(2);
    let program = Program::load(
        Arc::clone(&fiber),
        &[math_module()],
        ProgramLoadOptions::default(),
    )
    .unwrap();

    let q0 = fiber.device("cpu0").unwrap();
    let q1 = fiber.device("cpu1").unwrap();
    let on_q0 = Storage::allocate_device(&q0, 8);
    let on_q1 = Storage::allocate_device(&q1, 8);

    let step = program.lookup_required_function("m.step").unwrap();

    // Advance queue 0 once and queue 1 twice.
    for (storage, rounds) in [(&on_q0, 1), (&on_q1, 2)] {
        for _ in 0..rounds {
            let mut invocation = step.create_invocation();
            invocation.add_arg(storage, ResourceBarrier::Write).unwrap();
            resolve(ProgramInvocation::invoke(invocation));
        }
    }
    let device = fiber.raw_device("cpu0").unwrap();
    assert_eq!(fiber.timeline_tip(&device, 0), 1);
    assert_eq!(fiber.timeline_tip(&device, 1), 2);

    // Both queues implicated: the fence holds each exactly once at its tip.
    let combine = program.lookup_required_function("m.combine").unwrap();
    let mut invocation = combine.create_invocation();
    invocation.add_arg(&on_q0, ResourceBarrier::Read).unwrap();
    invocation.add_arg(&on_q1, ResourceBarrier::Read).unwrap();

    let mut waits: Vec<u64> = invocation
        .wait_timepoints()
        .iter()
        .map(|(_, timepoint)| *timepoint)
        .collect();
    waits.sort_unstable();
    assert_eq!(waits, vec![1, 2]);
    assert_eq!(invocation.device_selection().queue_mask(), 0b11);

    // The joint signal lands past the highest participating tip and
    // advances both queues.
    let resolved = resolve(ProgramInvocation::invoke(invocation));
    let (_sem, timepoint) = resolved.coarse_signal().unwrap();
    assert_eq!(timepoint, 3);
    assert_eq!(fiber.timeline_tip(&device, 0), 3);
    assert_eq!(fiber.timeline_tip(&device, 1), 3);

    shutdown(&worker);
}

#[test]
fn cross_instance_selection_rejected() {
    let system = skein::runtime::HostCpuSystemBuilder::new()
        .device_count(2)
        .build()
        .unwrap();
    let worker = skein::runtime::Worker::new(skein::runtime::WorkerOptions::named("cross"));
    worker.start().unwrap();
    let fiber =
        skein::runtime::Fiber::new(Arc::clone(&worker), system.devices().iter().cloned()).unwrap();

    let err = fiber.device((0usize, 1usize)).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    // The same conflict through argument marshalling.
    let program = Program::load(
        Arc::clone(&fiber),
        &[math_module()],
        ProgramLoadOptions::default(),
    )
    .unwrap();
    let a = Storage::allocate_device(&fiber.device(0usize).unwrap(), 8);
    let b = Storage::allocate_device(&fiber.device(1usize).unwrap(), 8);
    let combine = program.lookup_required_function("m.combine").unwrap();
    let mut invocation = combine.create_invocation();
    invocation.add_arg(&a, ResourceBarrier::Read).unwrap();
    let err = invocation.add_arg(&b, ResourceBarrier::Read).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    shutdown(&worker);
}

#[test]
fn downstream_consumer_can_chain_on_coarse_signal() {
    let (_system, worker, fiber) = fixture(1);
    let program = Program::load(
        Arc::clone(&fiber),
        &[math_module()],
        ProgramLoadOptions::default(),
    )
    .unwrap();

    let scoped = fiber.device("cpu0").unwrap();
    let storage = Storage::allocate_device(&scoped, 8);
    let step = program.lookup_required_function("m.step").unwrap();

    let mut invocation = step.create_invocation();
    invocation.add_arg(&storage, ResourceBarrier::Write).unwrap();
    let resolved = resolve(ProgramInvocation::invoke(invocation));
    let (sem, timepoint) = resolved.coarse_signal().unwrap();

    // The signal is observable without mapping results to host.
    assert!(sem.is_reached(timepoint));

    shutdown(&worker);
}
