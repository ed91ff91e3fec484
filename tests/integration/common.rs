//! Shared fixtures for the integration scenarios.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use skein::runtime::{
    Fiber, HostCpuSystemBuilder, InvocationFuture, InvocationPtr, ProgramModule, System, Worker,
    WorkerOptions,
};
use skein::vm::{
    binary_scalar_body, coarse_fences_attrs, FunctionSignature, Instruction, VmList, VmModule,
    VmType,
};

/// A module exporting:
/// - `add(i32, i32) -> i32` — unannotated bytecode, trivially synchronous
/// - `step(ref, ref, ref) -> ()` — coarse fences, one data argument
/// - `combine(ref, ref, ref, ref) -> ()` — coarse fences, two data arguments
pub fn math_module() -> ProgramModule {
    let module = VmModule::builder("m")
        .export_bytecode(
            "add",
            FunctionSignature::new(vec![VmType::I32, VmType::I32], vec![VmType::I32]),
            BTreeMap::new(),
            binary_scalar_body(|dst, a, b| Instruction::Add { dst, a, b }),
        )
        .export_host(
            "step",
            FunctionSignature::new(vec![VmType::Ref, VmType::Ref, VmType::Ref], vec![]),
            coarse_fences_attrs(),
            |_args| Ok(VmList::new()),
        )
        .export_host(
            "combine",
            FunctionSignature::new(
                vec![VmType::Ref, VmType::Ref, VmType::Ref, VmType::Ref],
                vec![],
            ),
            coarse_fences_attrs(),
            |_args| Ok(VmList::new()),
        )
        .build();
    ProgramModule::from_vm_module(module)
}

/// One host-CPU device with `queues` queues, a started worker, and a fiber
/// over all devices.
pub fn fixture(queues: usize) -> (Arc<System>, Arc<Worker>, Arc<Fiber>) {
    let system = HostCpuSystemBuilder::new()
        .queues_per_device(queues)
        .build()
        .unwrap();
    let worker = Worker::new(WorkerOptions::named("integration"));
    worker.start().unwrap();
    let fiber = Fiber::new(Arc::clone(&worker), system.devices().iter().cloned()).unwrap();
    (system, worker, fiber)
}

/// Block on a future and claim the resolved invocation.
pub fn resolve(future: InvocationFuture) -> InvocationPtr {
    assert!(
        future.wait_deadline(Instant::now() + Duration::from_secs(5)),
        "invocation did not resolve in time"
    );
    future.take_result().unwrap().unwrap()
}

pub fn shutdown(worker: &Arc<Worker>) {
    worker.kill().unwrap();
    worker.wait_for_shutdown().unwrap();
}
