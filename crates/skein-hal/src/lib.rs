//! Hardware abstraction primitives for the skein runtime.
//!
//! This crate provides the low-level pieces the runtime schedules against:
//!
//! - **Events**: manually reset binary signals for cross-thread wakeups
//! - **Timeline semaphores**: per-queue monotonic timelines
//! - **Fences**: AND-joins over semaphore timepoints
//! - **Sync loop**: a single-threaded cooperative callback/wait executor
//! - **Drivers**: the device discovery seam plus the host-CPU reference
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 skein-runtime                │
//! │  (Worker / Fiber / ProgramInvocation)        │
//! └───────┬───────────────┬──────────────┬───────┘
//!         │               │              │
//!         ▼               ▼              ▼
//!   ┌──────────┐   ┌────────────┐  ┌──────────┐
//!   │ SyncLoop │   │ Semaphores │  │ Drivers  │
//!   │  Events  │   │   Fences   │  │ HostCpu  │
//!   └──────────┘   └────────────┘  └──────────┘
//! ```

pub mod driver;
pub mod error;
pub mod event;
pub mod fence;
pub mod semaphore;
pub mod sync_loop;

pub use driver::{
    DiscoveredDevice, Driver, HalDevice, HostCpuDevice, HostCpuDriver, HostCpuDriverOptions,
};
pub use error::{HalError, Result};
pub use event::Event;
pub use fence::Fence;
pub use semaphore::TimelineSemaphore;
pub use sync_loop::{LoopCallback, LoopNotifier, LoopPriority, LoopStatus, SyncLoop, WaitSource};
