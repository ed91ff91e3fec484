//! skein: a local heterogeneous inference-serving runtime.
//!
//! This facade re-exports the workspace crates:
//!
//! - [`runtime`] — workers, fibers, device scheduling, program invocation
//! - [`vm`] — the embedded VM: modules, contexts, bytecode, async dispatch
//! - [`hal`] — events, timeline semaphores, fences, the sync loop, drivers
//! - [`tracing_setup`] — shared tracing subscriber configuration
//!
//! The commonly used runtime types are also re-exported at the top level.

pub use skein_hal as hal;
pub use skein_runtime as runtime;
pub use skein_tracing as tracing_setup;
pub use skein_vm as vm;

pub use skein_runtime::{
    Device, DeviceAffinity, Error, Fiber, HostCpuSystemBuilder, InvocationFuture, InvocationPtr,
    InvocationModel, Marshalable, Program, ProgramFunction, ProgramInvocation, ProgramLoadOptions,
    ProgramModule, ResourceBarrier, Result, ScopedDevice, StaticProgramParameters, Storage,
    System, SystemBuilder, Worker, WorkerOptions,
};
