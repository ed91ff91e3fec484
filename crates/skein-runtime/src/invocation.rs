//! Program invocations: one call into the VM, from argument assembly to
//! future resolution.
//!
//! An invocation is heap-only and uniquely owned. Internal pointers must
//! stay stable from construction to completion, so the object lives in a
//! `Box` whose ownership moves: user → worker (on [`ProgramInvocation::invoke`])
//! → VM completion → the resolved future, where the caller re-owns it for
//! result access.
//!
//! Before scheduling, the invocation carries its launch parameters
//! (function plus invocation model); scheduling consumes them in place so
//! the scheduled object retains only what result access needs.

use std::fmt;
use std::sync::Arc;

use skein_hal::{Fence, TimelineSemaphore};
use skein_vm::{VmError, VmFunction, VmList, VmRef, VmValue};

use crate::device::DeviceAffinity;
use crate::error::{Error, Result};
use crate::fiber::Fiber;
use crate::future::TypedFuture;
use crate::program::InvocationModel;

/// Concurrency barrier an argument requests against its device queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    /// No scheduling participation; the argument is passed through.
    None,
    /// Wait for pending writes on the queue before executing.
    Read,
    /// Wait for pending reads and writes on the queue before executing.
    Write,
}

/// An object that can append itself to an invocation's argument list and,
/// when a barrier is requested, participate in the wait-fence/timeline
/// protocol.
pub trait Marshalable {
    fn marshal(&self, invocation: &mut ProgramInvocation, barrier: ResourceBarrier) -> Result<()>;
}

/// Owning handle to an invocation. Transferring it consumes the handle.
pub type InvocationPtr = Box<ProgramInvocation>;

/// Future resolving to the completed invocation.
pub type InvocationFuture = TypedFuture<InvocationPtr>;

enum InvocationState {
    /// Launch parameters, alive until scheduling consumes them.
    Built {
        function: VmFunction,
        invocation_model: InvocationModel,
    },
    Scheduled,
}

/// State for one call into the VM.
pub struct ProgramInvocation {
    fiber: Arc<Fiber>,
    qualified_name: String,
    state: InvocationState,
    args: VmList,
    result_list: Option<VmList>,
    wait_fence: Option<Fence>,
    signal_sem: Option<TimelineSemaphore>,
    signal_timepoint: u64,
    device_selection: DeviceAffinity,
    scheduled: bool,
}

impl ProgramInvocation {
    pub(crate) fn new(
        fiber: Arc<Fiber>,
        function: VmFunction,
        invocation_model: InvocationModel,
    ) -> InvocationPtr {
        let qualified_name = function.qualified_name();
        Box::new(Self {
            fiber,
            qualified_name,
            state: InvocationState::Built {
                function,
                invocation_model,
            },
            args: VmList::new(),
            result_list: None,
            wait_fence: None,
            signal_sem: None,
            signal_timepoint: 0,
            device_selection: DeviceAffinity::new(),
            scheduled: false,
        })
    }

    /// The fiber this invocation schedules against.
    pub fn fiber(&self) -> &Arc<Fiber> {
        &self.fiber
    }

    /// Whether scheduling has consumed the launch parameters.
    pub fn scheduled(&self) -> bool {
        self.scheduled
    }

    fn check_not_scheduled(&self) -> Result<()> {
        if self.scheduled {
            return Err(Error::logic(
                "invocation is scheduled; arguments and parameters are frozen",
            ));
        }
        Ok(())
    }

    /// Add a marshalable argument under the given barrier.
    pub fn add_arg(
        &mut self,
        marshalable: &dyn Marshalable,
        barrier: ResourceBarrier,
    ) -> Result<()> {
        self.check_not_scheduled()?;
        marshalable.marshal(self, barrier)
    }

    /// Append a value or ref argument unchanged, with no device or barrier
    /// effect.
    pub fn add_ref(&mut self, value: impl Into<VmValue>) -> Result<()> {
        self.check_not_scheduled()?;
        self.args.push(value);
        Ok(())
    }

    /// Fold `affinity` into the device selection that drives scheduling.
    ///
    /// All barrier-participating arguments must land on one logical device,
    /// differing only by queue.
    pub fn device_select(&mut self, affinity: &DeviceAffinity) -> Result<()> {
        self.check_not_scheduled()?;
        if affinity.is_empty() {
            return Ok(());
        }
        let union = self.device_selection.clone() | affinity.clone();
        if union.is_empty() {
            return Err(Error::invalid_argument(format!(
                "argument device {affinity} conflicts with selection {}; \
                 cross-instance work requires separate invocations",
                self.device_selection
            )));
        }
        self.device_selection = union;
        Ok(())
    }

    /// Selected affinity used for scheduling.
    pub fn device_selection(&self) -> &DeviceAffinity {
        &self.device_selection
    }

    /// Insert a wait barrier: execution will not begin until `sem` reaches
    /// `timepoint`. The fence is allocated on first insertion; a timeline
    /// appears once at its highest timepoint.
    pub fn wait_insert(&mut self, sem: TimelineSemaphore, timepoint: u64) {
        self.wait_fence
            .get_or_insert_with(Fence::new)
            .insert(sem, timepoint);
    }

    /// Snapshot of the wait fence, if any barriers were inserted.
    pub fn wait_timepoints(&self) -> Vec<(TimelineSemaphore, u64)> {
        self.wait_fence
            .as_ref()
            .map(Fence::timepoints)
            .unwrap_or_default()
    }

    /// Transfer ownership to the owning worker and schedule the call.
    ///
    /// The returned future resolves to the invocation once the VM completes
    /// it, or to the failure status. Consuming the handle here is what makes
    /// one-shot scheduling structural: there is no handle left to mutate.
    pub fn invoke(invocation: InvocationPtr) -> InvocationFuture {
        let worker = Arc::clone(invocation.fiber.worker());
        let future = InvocationFuture::new(Arc::clone(&worker));
        let resolve = future.clone();
        worker.call_threadsafe(move || ProgramInvocation::schedule(invocation, resolve));
        future
    }

    /// Runs on the worker thread: finalize the calling convention, issue the
    /// async VM call, and arrange completion.
    fn schedule(mut invocation: InvocationPtr, future: InvocationFuture) {
        let state = std::mem::replace(&mut invocation.state, InvocationState::Scheduled);
        let InvocationState::Built {
            function,
            invocation_model,
        } = state
        else {
            complete(future, Err(Error::logic("invocation already scheduled")));
            return;
        };
        invocation.scheduled = true;

        let fences = invocation.finalize_calling_convention(invocation_model);
        let (wait_fence, signal_fence) = match fences {
            Ok(fences) => fences,
            Err(err) => {
                complete(future, Err(err));
                return;
            }
        };

        tracing::debug!(
            function = %invocation.qualified_name,
            model = ?invocation_model,
            selection = %invocation.device_selection,
            "invocation_scheduled"
        );

        let args = std::mem::take(&mut invocation.args);
        let worker = Arc::clone(invocation.fiber.worker());
        skein_vm::async_invoke(
            worker.sync_loop(),
            function,
            args,
            wait_fence,
            signal_fence,
            Box::new(move |result| match result {
                Ok(results) => {
                    invocation.result_list = Some(results);
                    complete(future, Ok(invocation));
                }
                Err(err) => complete(future, Err(err.into())),
            }),
        );
    }

    /// Apply the invocation model to the argument list. For coarse fences
    /// this appends the wait and signal fences as the final two arguments.
    ///
    /// Runs on the scheduling path, so mismatches are reported as statuses
    /// that fail the future rather than raised.
    fn finalize_calling_convention(
        &mut self,
        invocation_model: InvocationModel,
    ) -> Result<(Option<Fence>, Option<Fence>)> {
        match invocation_model {
            InvocationModel::CoarseFences => {
                if self.device_selection.is_empty() {
                    return Err(Error::Vm(VmError::CallingConvention {
                        function: self.qualified_name.clone(),
                        detail: "coarse-fences invocation requires a device selection".to_string(),
                    }));
                }
                let signal = self.fiber.allocate_coarse_signal(&self.device_selection)?;
                let wait_fence = self.wait_fence.take().unwrap_or_default();
                let signal_fence = Fence::from_timepoints(signal.fence_timepoints);
                self.signal_sem = Some(signal.sem);
                self.signal_timepoint = signal.timepoint;
                self.args.push(VmRef::new(wait_fence.clone()));
                self.args.push(VmRef::new(signal_fence.clone()));
                Ok((Some(wait_fence), Some(signal_fence)))
            }
            InvocationModel::None | InvocationModel::Unknown => Ok((None, None)),
        }
    }

    /// Number of results. Zero until the invocation resolves.
    pub fn results_size(&self) -> usize {
        self.result_list.as_ref().map(VmList::len).unwrap_or(0)
    }

    /// The i'th result as an opaque ref, or `None` when the slot holds a
    /// primitive scalar. Refs obtained this way are not marshaled and carry
    /// no barriers.
    pub fn result_ref(&self, index: usize) -> Option<VmRef> {
        self.result_list
            .as_ref()
            .and_then(|results| results.get_ref(index).cloned())
    }

    /// The resolved result list.
    pub fn results(&self) -> Option<&VmList> {
        self.result_list.as_ref()
    }

    /// Coarse signal of result availability: `(semaphore, timepoint)` for
    /// downstream chaining. `None` when the invocation did not use coarse
    /// fences. Valid after scheduling.
    pub fn coarse_signal(&self) -> Option<(TimelineSemaphore, u64)> {
        self.signal_sem
            .as_ref()
            .map(|sem| (sem.clone(), self.signal_timepoint))
    }
}

fn complete(future: InvocationFuture, result: Result<InvocationPtr>) {
    if future.complete(result).is_err() {
        tracing::error!("invocation future was already completed");
    }
}

impl fmt::Display for ProgramInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<ProgramInvocation {} scheduled={}>",
            self.qualified_name, self.scheduled
        )
    }
}

impl fmt::Debug for ProgramInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramInvocation")
            .field("function", &self.qualified_name)
            .field("scheduled", &self.scheduled)
            .field("args", &self.args.len())
            .field("selection", &self.device_selection)
            .finish()
    }
}
