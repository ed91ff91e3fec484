//! Core runtime for local heterogeneous inference serving.
//!
//! This crate turns asynchronous, cooperating user requests into ordered,
//! device-scheduled invocations of precompiled program functions:
//!
//! - **Device & topology**: addressed devices and [`DeviceAffinity`] masks
//! - **System**: the builder-constructed, frozen device/driver registry
//! - **Worker**: a single-threaded cooperative event loop with a
//!   threadsafe transact queue
//! - **Fiber**: a worker binding plus named devices and per-queue
//!   scheduling timelines
//! - **Program**: modules linked into a VM context, with function lookup
//!   and invocation-model detection
//! - **ProgramInvocation**: argument marshalling, coarse-fences
//!   finalization, async dispatch, and future resolution
//!
//! # Data flow
//!
//! ```text
//! Fiber::device() ─▶ ScopedDevice
//!                        │ Storage::allocate_device
//!                        ▼
//! Program::lookup_function ─▶ create_invocation ─▶ add_arg(..barriers..)
//!                                                      │
//!                              ProgramInvocation::invoke (to Worker)
//!                                                      │
//!                     finalize fences ─▶ VM async call ─▶ InvocationFuture
//! ```

pub mod device;
pub mod error;
pub mod fiber;
pub mod future;
pub mod invocation;
pub mod params;
pub mod program;
pub mod storage;
pub mod system;
pub mod worker;

pub use device::{Device, DeviceAddress, DeviceAffinity};
pub use error::{Error, Result};
pub use fiber::{DeviceSelector, Fiber, ScopedDevice};
pub use future::TypedFuture;
pub use invocation::{
    InvocationFuture, InvocationPtr, Marshalable, ProgramInvocation, ResourceBarrier,
};
pub use params::{
    ParameterEntry, ParameterLoadOptions, StaticProgramParameters,
    DEFAULT_MAX_CONCURRENT_OPERATIONS,
};
pub use program::{
    InvocationModel, Program, ProgramFunction, ProgramLoadOptions, ProgramModule,
};
pub use storage::Storage;
pub use system::{HostCpuSystemBuilder, System, SystemBuilder};
pub use worker::{Thunk, Worker, WorkerHooks, WorkerOptions};
