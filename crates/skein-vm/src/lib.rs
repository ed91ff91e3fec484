//! The embedded VM the skein runtime dispatches into.
//!
//! This crate provides:
//! - **Values**: scalars, opaque refs, and variant lists
//! - **Modules**: named export tables with bytecode or host-function bodies
//!   and a serialized container form
//! - **Contexts**: modules linked in order with import resolution
//! - **Invocation**: a synchronous core plus loop-scheduled async dispatch
//!   with wait/signal fences
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                VmContext                    │
//! │   modules linked in order, imports bound    │
//! └──────────┬──────────────────────────────────┘
//!            │ lookup_function("m.f")
//!            ▼
//! ┌─────────────────────────────────────────────┐
//! │  VmFunction ── async_invoke(loop, fences)   │
//! │      bytecode interpreter │ host closures   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod error;
pub mod invoke;
pub mod isa;
pub mod module;
pub mod value;

pub use context::{VmContext, VmContextOptions, VmFunction};
pub use error::{VmError, VmResult};
pub use invoke::{async_invoke, invoke, OnComplete};
pub use isa::{binary_scalar_body, Instruction, Scalar};
pub use module::{
    coarse_fences_attrs, FunctionBody, FunctionSignature, HostFn, VmModule, VmModuleBuilder,
    ABI_MODEL_COARSE_FENCES, ATTR_ABI_MODEL,
};
pub use value::{VmList, VmRef, VmType, VmValue};
