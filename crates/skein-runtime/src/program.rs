//! Programs, modules, and functions.
//!
//! A module is the unit of loading (from a serialized container on disk or
//! built in-process); a program is a set of modules linked into a VM context
//! and bound to a fiber; a function is an export resolved within a program,
//! annotated with the invocation model scheduling uses.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use skein_vm::{
    FunctionSignature, VmContext, VmContextOptions, VmFunction, VmList, VmModule, VmRef, VmType,
    ABI_MODEL_COARSE_FENCES, ATTR_ABI_MODEL,
};

use crate::error::{Error, Result};
use crate::fiber::Fiber;
use crate::invocation::{InvocationPtr, ProgramInvocation};
use crate::params::StaticProgramParameters;
use crate::system::System;

/// How a function expects to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationModel {
    /// The last two arguments are a wait and a signal fence, enabling
    /// caller-side scheduling without per-op host synchronization.
    CoarseFences,
    /// Unannotated and trivially synchronous.
    None,
    /// Unannotated with a signature the runtime cannot classify.
    Unknown,
}

/// A loaded module, shareable across programs.
#[derive(Clone)]
pub struct ProgramModule {
    module: Arc<VmModule>,
}

impl ProgramModule {
    /// Load a serialized module from the filesystem, optionally through a
    /// memory mapping.
    pub fn load(_system: &System, path: impl AsRef<Path>, mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        let module = if mmap {
            let file = fs::File::open(path)?;
            // Safety: the mapping is read-only and dropped before return;
            // the container bytes are fully decoded into owned structures.
            let mapped = unsafe { memmap2::Mmap::map(&file) }?;
            VmModule::from_bytes(&mapped)?
        } else {
            let bytes = fs::read(path)?;
            VmModule::from_bytes(&bytes)?
        };
        tracing::info!(path = %path.display(), mmap, module = module.name(), "module_loaded");
        Ok(Self { module })
    }

    /// Wrap parameter pools as a module satisfying the imports of modules
    /// loaded after it.
    ///
    /// The module is named `io_parameters` and exports `load`, which takes a
    /// ref to a `"scope/key"` string and returns a ref to the parameter
    /// bytes.
    pub fn parameter_provider(
        _system: &System,
        params: &[&StaticProgramParameters],
    ) -> Result<Self> {
        let pools: Vec<StaticProgramParameters> = params.iter().map(|p| (*p).clone()).collect();
        let module = VmModule::builder("io_parameters")
            .export_host(
                "load",
                FunctionSignature::new(vec![VmType::Ref], vec![VmType::Ref]),
                Default::default(),
                move |args: &VmList| {
                    let key = args
                        .get_ref(0)
                        .and_then(|r| r.downcast_ref::<String>())
                        .ok_or_else(|| {
                            skein_vm::VmError::execution("load expects a string key ref")
                        })?;
                    let (scope, name) = key.split_once('/').ok_or_else(|| {
                        skein_vm::VmError::execution(format!(
                            "parameter key '{key}' is not of the form scope/key"
                        ))
                    })?;
                    let entry = pools
                        .iter()
                        .find(|pool| pool.scope() == scope)
                        .and_then(|pool| pool.get(name))
                        .ok_or_else(|| {
                            skein_vm::VmError::execution(format!(
                                "no parameter '{name}' in scope '{scope}'"
                            ))
                        })?;
                    let mut results = VmList::new();
                    results.push(VmRef::new(entry.bytes().to_vec()));
                    Ok(results)
                },
            )
            .build();
        Ok(Self { module })
    }

    /// Wrap an in-process module.
    pub fn from_vm_module(module: Arc<VmModule>) -> Self {
        Self { module }
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    /// Names of all exported functions.
    pub fn exports(&self) -> Vec<String> {
        self.module.export_names()
    }

    pub fn vm_module(&self) -> &Arc<VmModule> {
        &self.module
    }
}

impl std::fmt::Debug for ProgramModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<ProgramModule {}>", self.name())
    }
}

/// Options applied when loading a [`Program`].
#[derive(Debug, Clone, Default)]
pub struct ProgramLoadOptions {
    /// Enable per-step execution tracing for the program's context.
    pub trace_execution: bool,
}

/// Modules linked together and bound to a fiber.
///
/// Invocations on a program take place in the fiber's logical order; the
/// fiber's worker owns all mutation of in-flight state.
pub struct Program {
    fiber: Arc<Fiber>,
    context: Arc<VmContext>,
}

impl Program {
    /// Link `modules` in order into a context bound to `fiber`.
    pub fn load(
        fiber: Arc<Fiber>,
        modules: &[ProgramModule],
        options: ProgramLoadOptions,
    ) -> Result<Self> {
        let vm_modules = modules.iter().map(|m| m.module.clone()).collect();
        let context = VmContext::create(
            vm_modules,
            VmContextOptions {
                trace_execution: options.trace_execution,
            },
        )
        .map_err(|err| Error::invalid_argument(err.to_string()))?;
        Ok(Self { fiber, context })
    }

    pub fn fiber(&self) -> &Arc<Fiber> {
        &self.fiber
    }

    /// Look up a public function by fully qualified `module.function` name.
    pub fn lookup_function(&self, name: &str) -> Option<ProgramFunction> {
        let function = self.context.lookup_function(name)?;
        let invocation_model = derive_invocation_model(&function);
        Some(ProgramFunction {
            fiber: Arc::clone(&self.fiber),
            function,
            invocation_model,
        })
    }

    /// Like [`Program::lookup_function`] but failing on a miss.
    pub fn lookup_required_function(&self, name: &str) -> Result<ProgramFunction> {
        self.lookup_function(name).ok_or_else(|| {
            Error::invalid_argument(format!("program exports no function '{name}'"))
        })
    }

    /// Fully qualified names of all exported functions.
    pub fn exports(&self) -> Vec<String> {
        self.context.export_names()
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("fiber", &self.fiber)
            .field("exports", &self.exports())
            .finish()
    }
}

/// Classify a function from its attributes, falling back to its signature.
fn derive_invocation_model(function: &VmFunction) -> InvocationModel {
    match function.attr(ATTR_ABI_MODEL) {
        Some(model) if model == ABI_MODEL_COARSE_FENCES => InvocationModel::CoarseFences,
        Some(_) => InvocationModel::Unknown,
        None => {
            let signature = function.signature();
            let trivially_synchronous = signature
                .params
                .iter()
                .chain(signature.results.iter())
                .all(|ty| *ty != VmType::Ref);
            if trivially_synchronous {
                InvocationModel::None
            } else {
                InvocationModel::Unknown
            }
        }
    }
}

/// A function resolved within a [`Program`].
#[derive(Clone)]
pub struct ProgramFunction {
    fiber: Arc<Fiber>,
    function: VmFunction,
    invocation_model: InvocationModel,
}

impl ProgramFunction {
    pub fn name(&self) -> &str {
        self.function.name()
    }

    pub fn calling_convention(&self) -> String {
        self.function.calling_convention()
    }

    pub fn invocation_model(&self) -> InvocationModel {
        self.invocation_model
    }

    /// Begin building an invocation of this function.
    pub fn create_invocation(&self) -> InvocationPtr {
        ProgramInvocation::new(
            Arc::clone(&self.fiber),
            self.function.clone(),
            self.invocation_model,
        )
    }
}

impl std::fmt::Debug for ProgramFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<ProgramFunction {} {} {:?}>",
            self.function.qualified_name(),
            self.calling_convention(),
            self.invocation_model
        )
    }
}
