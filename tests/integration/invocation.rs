//! Invocation flows: synchronous functions, failure paths, lookup behavior,
//! and the parameter provider.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::{fixture, math_module, resolve, shutdown};
use skein::runtime::{
    Error, Program, ProgramInvocation, ProgramLoadOptions, ProgramModule, ResourceBarrier,
    StaticProgramParameters, Storage,
};
use skein::vm::VmRef;

#[test]
fn trivial_invocation_resolves_scalar() {
    let (_system, worker, fiber) = fixture(1);
    let program = Program::load(
        Arc::clone(&fiber),
        &[math_module()],
        ProgramLoadOptions::default(),
    )
    .unwrap();

    let function = program.lookup_required_function("m.add").unwrap();
    let mut invocation = function.create_invocation();
    invocation.add_ref(42i32).unwrap();
    invocation.add_ref(7i32).unwrap();

    let resolved = resolve(ProgramInvocation::invoke(invocation));
    assert_eq!(resolved.results_size(), 1);
    assert_eq!(resolved.results().unwrap().get_i32(0).unwrap(), 49);
    // Scalar slots surface no ref.
    assert!(resolved.result_ref(0).is_none());
    assert!(resolved.coarse_signal().is_none());

    shutdown(&worker);
}

#[test]
fn calling_convention_mismatch_fails_future_not_caller() {
    let (_system, worker, fiber) = fixture(1);
    let program = Program::load(
        Arc::clone(&fiber),
        &[math_module()],
        ProgramLoadOptions::default(),
    )
    .unwrap();

    let function = program.lookup_required_function("m.add").unwrap();
    let invocation = function.create_invocation(); // no arguments added

    let future = ProgramInvocation::invoke(invocation);
    assert!(future.wait_deadline(Instant::now() + Duration::from_secs(5)));
    let result = future.take_result().unwrap();
    assert!(matches!(result, Err(Error::Vm(_))));

    shutdown(&worker);
}

#[test]
fn coarse_invocation_without_device_selection_fails() {
    let (_system, worker, fiber) = fixture(1);
    let program = Program::load(
        Arc::clone(&fiber),
        &[math_module()],
        ProgramLoadOptions::default(),
    )
    .unwrap();

    let function = program.lookup_required_function("m.step").unwrap();
    let mut invocation = function.create_invocation();
    // A bare ref argument carries no device, so the selection stays empty.
    invocation.add_ref(VmRef::new(0u8)).unwrap();

    let future = ProgramInvocation::invoke(invocation);
    assert!(future.wait_deadline(Instant::now() + Duration::from_secs(5)));
    assert!(matches!(future.take_result().unwrap(), Err(Error::Vm(_))));

    shutdown(&worker);
}

#[test]
fn lookup_missing_function() {
    let (_system, worker, fiber) = fixture(1);
    let program = Program::load(
        Arc::clone(&fiber),
        &[math_module()],
        ProgramLoadOptions::default(),
    )
    .unwrap();

    assert!(program.lookup_function("m.absent").is_none());
    assert!(matches!(
        program.lookup_required_function("m.absent"),
        Err(Error::InvalidArgument(_))
    ));

    shutdown(&worker);
}

#[test]
fn storage_refs_reach_the_function() {
    let (_system, worker, fiber) = fixture(1);
    let program = Program::load(
        Arc::clone(&fiber),
        &[math_module()],
        ProgramLoadOptions::default(),
    )
    .unwrap();

    let device = fiber.device("cpu0").unwrap();
    let storage = Storage::allocate_device(&device, 8);
    storage.copy_from_slice(&[5i32, 6]).unwrap();

    let function = program.lookup_required_function("m.step").unwrap();
    let mut invocation = function.create_invocation();
    invocation.add_arg(&storage, ResourceBarrier::Read).unwrap();

    let resolved = resolve(ProgramInvocation::invoke(invocation));
    assert!(resolved.scheduled());
    assert_eq!(resolved.results_size(), 0);

    shutdown(&worker);
}

#[test]
fn parameter_provider_satisfies_imports_and_serves_bytes() {
    let (system, worker, fiber) = fixture(1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.irpa");
    std::fs::write(&path, b"model-weights").unwrap();

    let params = StaticProgramParameters::new(&system, "model", 4);
    params.load(&path, Default::default()).unwrap();

    let provider = ProgramModule::parameter_provider(&system, &[&params]).unwrap();
    let consumer = ProgramModule::from_vm_module(
        skein::vm::VmModule::builder("consumer")
            .import("io_parameters.load")
            .build(),
    );

    // Consumer-first fails to link; provider-first succeeds.
    let err = Program::load(
        Arc::clone(&fiber),
        &[consumer.clone(), provider.clone()],
        ProgramLoadOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let program = Program::load(
        Arc::clone(&fiber),
        &[provider, consumer],
        ProgramLoadOptions::default(),
    )
    .unwrap();

    let load = program.lookup_required_function("io_parameters.load").unwrap();
    let mut invocation = load.create_invocation();
    invocation
        .add_ref(VmRef::new("model/weights".to_string()))
        .unwrap();
    let resolved = resolve(ProgramInvocation::invoke(invocation));
    let blob = resolved.result_ref(0).unwrap();
    assert_eq!(
        blob.downcast_ref::<Vec<u8>>().unwrap().as_slice(),
        b"model-weights"
    );

    shutdown(&worker);
}
