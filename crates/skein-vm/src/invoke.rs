//! Function invocation: synchronous core plus loop-scheduled async form.

use skein_hal::{Fence, LoopCallback, LoopPriority, LoopStatus, SyncLoop};

use crate::context::VmFunction;
use crate::error::{VmError, VmResult};
use crate::isa;
use crate::module::FunctionBody;
use crate::value::VmList;

/// Completion callback for [`async_invoke`]. Runs on whatever thread drains
/// the loop; implementations must not panic through it.
pub type OnComplete = Box<dyn FnOnce(VmResult<VmList>) + Send>;

fn check_arguments(function: &VmFunction, args: &VmList) -> VmResult<()> {
    let signature = function.signature();
    if args.len() != signature.params.len() {
        return Err(VmError::CallingConvention {
            function: function.qualified_name(),
            detail: format!(
                "expected {} arguments, got {}",
                signature.params.len(),
                args.len()
            ),
        });
    }
    for (index, (value, ty)) in args.iter().zip(signature.params.iter()).enumerate() {
        if !value.satisfies(*ty) {
            return Err(VmError::CallingConvention {
                function: function.qualified_name(),
                detail: format!("argument {index} does not satisfy {ty}"),
            });
        }
    }
    Ok(())
}

fn check_results(function: &VmFunction, results: &VmList) -> VmResult<()> {
    let signature = function.signature();
    if results.len() != signature.results.len() {
        return Err(VmError::CallingConvention {
            function: function.qualified_name(),
            detail: format!(
                "expected {} results, got {}",
                signature.results.len(),
                results.len()
            ),
        });
    }
    Ok(())
}

/// Invoke a function synchronously on the calling thread.
pub fn invoke(function: &VmFunction, args: &VmList) -> VmResult<VmList> {
    check_arguments(function, args)?;
    let trace = function.context().trace_execution();
    if trace {
        tracing::trace!(target: "skein_vm::trace", function = %function.qualified_name(), "invoke");
    }
    let results = match &function.export().body {
        FunctionBody::Bytecode(code) => isa::execute(code, args, trace)?,
        FunctionBody::Host(host) => host(args)?,
    };
    check_results(function, &results)?;
    Ok(results)
}

/// Schedule a function against a sync loop.
///
/// Execution begins once `wait_fence` (if any) is satisfied. On success the
/// `signal_fence` (if any) is signaled before completion is delivered. All
/// failures, including calling convention mismatches, are delivered through
/// `on_complete` rather than returned: the caller has usually already handed
/// off ownership by the time the function runs.
pub fn async_invoke(
    sync_loop: &SyncLoop,
    function: VmFunction,
    args: VmList,
    wait_fence: Option<Fence>,
    signal_fence: Option<Fence>,
    on_complete: OnComplete,
) {
    let run: LoopCallback = Box::new(move |_loop: &SyncLoop, status: LoopStatus| {
        let result = if status == LoopStatus::DeadlineExceeded {
            Err(VmError::execution("wait fence deadline exceeded"))
        } else {
            invoke(&function, &args).and_then(|results| {
                if let Some(fence) = &signal_fence {
                    fence.signal_all()?;
                }
                Ok(results)
            })
        };
        on_complete(result);
        Ok(())
    });

    match wait_fence {
        Some(fence) if !fence.is_signaled() => {
            sync_loop.wait_one(fence.into(), None, run);
        }
        _ => sync_loop.call(LoopPriority::Default, run),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{VmContext, VmContextOptions};
    use crate::isa::{binary_scalar_body, Instruction};
    use crate::module::{FunctionSignature, VmModule};
    use crate::value::{VmType, VmValue};
    use skein_hal::TimelineSemaphore;
    use std::collections::BTreeMap;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    fn add_context() -> Arc<VmContext> {
        let module = VmModule::builder("m")
            .export_bytecode(
                "add",
                FunctionSignature::new(vec![VmType::I32, VmType::I32], vec![VmType::I32]),
                BTreeMap::new(),
                binary_scalar_body(|dst, a, b| Instruction::Add { dst, a, b }),
            )
            .build();
        VmContext::create(vec![module], VmContextOptions::default()).unwrap()
    }

    #[test]
    fn test_invoke_sync() {
        let context = add_context();
        let function = context.lookup_function("m.add").unwrap();
        let mut args = VmList::new();
        args.push(40i32);
        args.push(2i32);
        let results = invoke(&function, &args).unwrap();
        assert_eq!(results.get_i32(0).unwrap(), 42);
    }

    #[test]
    fn test_invoke_arity_mismatch() {
        let context = add_context();
        let function = context.lookup_function("m.add").unwrap();
        let err = invoke(&function, &VmList::new()).unwrap_err();
        assert!(matches!(err, VmError::CallingConvention { .. }));
    }

    #[test]
    fn test_invoke_type_mismatch() {
        let context = add_context();
        let function = context.lookup_function("m.add").unwrap();
        let mut args = VmList::new();
        args.push(1i32);
        args.push(VmValue::F32(2.0));
        let err = invoke(&function, &args).unwrap_err();
        assert!(matches!(err, VmError::CallingConvention { .. }));
    }

    #[test]
    fn test_async_invoke_waits_for_fence() {
        let context = add_context();
        let function = context.lookup_function("m.add").unwrap();
        let sync_loop = SyncLoop::new();

        let sem = TimelineSemaphore::new(0);
        let wait_fence = Fence::from_timepoints([(sem.clone(), 1)]);
        let signal_sem = TimelineSemaphore::new(0);
        let signal_fence = Fence::from_timepoints([(signal_sem.clone(), 1)]);

        let mut args = VmList::new();
        args.push(20i32);
        args.push(22i32);

        let (tx, rx) = mpsc::channel();
        async_invoke(
            &sync_loop,
            function,
            args,
            Some(wait_fence),
            Some(signal_fence),
            Box::new(move |result| {
                tx.send(result.map(|r| r.get_i32(0).unwrap())).unwrap();
            }),
        );

        // Not satisfied yet: a bounded drain should not complete it.
        sync_loop.drain(Some(Duration::from_millis(30))).unwrap();
        assert!(rx.try_recv().is_err());

        sem.signal(1).unwrap();
        sync_loop.drain(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(rx.recv().unwrap().unwrap(), 42);
        assert_eq!(signal_sem.query(), 1);
    }

    #[test]
    fn test_async_invoke_failure_reaches_completion() {
        let context = add_context();
        let function = context.lookup_function("m.add").unwrap();
        let sync_loop = SyncLoop::new();

        let (tx, rx) = mpsc::channel();
        async_invoke(
            &sync_loop,
            function,
            VmList::new(),
            None,
            None,
            Box::new(move |result| {
                tx.send(result.map(|_| ())).unwrap();
            }),
        );
        sync_loop.drain(Some(Duration::from_secs(1))).unwrap();
        assert!(matches!(
            rx.recv().unwrap(),
            Err(VmError::CallingConvention { .. })
        ));
    }
}
