//! Contexts: modules linked together and made invocable.

use std::fmt;
use std::sync::Arc;

use crate::error::{VmError, VmResult};
use crate::module::{Export, FunctionSignature, VmModule};

/// Options applied when creating a context.
#[derive(Debug, Clone, Default)]
pub struct VmContextOptions {
    /// Emit per-step execution tracing for every function run in this
    /// context.
    pub trace_execution: bool,
}

/// A set of modules linked in order.
///
/// Linking resolves each module's imports against the exports of modules
/// loaded before it; a leftover import fails context creation. Contexts are
/// immutable and shareable.
pub struct VmContext {
    modules: Vec<Arc<VmModule>>,
    trace_execution: bool,
}

impl VmContext {
    /// Link `modules` in order into a new context.
    pub fn create(
        modules: Vec<Arc<VmModule>>,
        options: VmContextOptions,
    ) -> VmResult<Arc<VmContext>> {
        for (position, module) in modules.iter().enumerate() {
            for import in module.imports() {
                let resolved = modules[..position].iter().any(|earlier| {
                    import
                        .strip_prefix(earlier.name())
                        .and_then(|rest| rest.strip_prefix('.'))
                        .is_some_and(|function| earlier.find_export(function).is_some())
                });
                if !resolved {
                    return Err(VmError::UnresolvedImport {
                        module: module.name().to_string(),
                        import: import.clone(),
                    });
                }
            }
        }
        tracing::debug!(
            module_count = modules.len(),
            trace_execution = options.trace_execution,
            "context_created"
        );
        Ok(Arc::new(VmContext {
            modules,
            trace_execution: options.trace_execution,
        }))
    }

    pub fn modules(&self) -> &[Arc<VmModule>] {
        &self.modules
    }

    pub fn trace_execution(&self) -> bool {
        self.trace_execution
    }

    /// Fully qualified names of every export across all modules, in module
    /// load order.
    pub fn export_names(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|module| {
                module
                    .exports()
                    .iter()
                    .map(move |export| format!("{}.{}", module.name(), export.name))
            })
            .collect()
    }

    /// Resolve a fully qualified `module.function` name.
    pub fn lookup_function(self: &Arc<Self>, qualified_name: &str) -> Option<VmFunction> {
        let (module_name, function_name) = qualified_name.split_once('.')?;
        let module = self
            .modules
            .iter()
            .find(|module| module.name() == module_name)?;
        let (export_index, _) = module.find_export(function_name)?;
        Some(VmFunction {
            context: Arc::clone(self),
            module: Arc::clone(module),
            export_index,
        })
    }
}

impl fmt::Debug for VmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmContext")
            .field(
                "modules",
                &self
                    .modules
                    .iter()
                    .map(|m| m.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("trace_execution", &self.trace_execution)
            .finish()
    }
}

/// A function resolved within a context.
#[derive(Clone)]
pub struct VmFunction {
    context: Arc<VmContext>,
    module: Arc<VmModule>,
    export_index: usize,
}

impl VmFunction {
    pub fn context(&self) -> &Arc<VmContext> {
        &self.context
    }

    pub(crate) fn export(&self) -> &Export {
        &self.module.exports()[self.export_index]
    }

    pub fn name(&self) -> &str {
        &self.export().name
    }

    pub fn module_name(&self) -> &str {
        self.module.name()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module_name(), self.name())
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.export().signature
    }

    /// Rendered signature string.
    pub fn calling_convention(&self) -> String {
        self.signature().to_string()
    }

    /// Look up a function attribute by key.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.export().attrs.get(key).map(String::as_str)
    }
}

impl fmt::Debug for VmFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VmFunction({} {})",
            self.qualified_name(),
            self.calling_convention()
        )
    }
}
