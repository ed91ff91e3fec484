//! Modules: named collections of exported functions.
//!
//! Think of a module as a shared library: it has a name, exports functions
//! that can be resolved and invoked, and imports functions that must be
//! satisfied by previously loaded modules. Modules are immutable once built
//! and are shared between contexts behind `Arc`.
//!
//! Two kinds of function bodies exist: bytecode (serializable, loaded from
//! module containers on disk) and host closures (built in-process, e.g. for
//! parameter providers).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{VmError, VmResult};
use crate::isa::Instruction;
use crate::value::{VmList, VmType};

/// Attribute key carrying a function's ABI model.
pub const ATTR_ABI_MODEL: &str = "abi.model";
/// ABI model value selecting the coarse-fences calling convention.
pub const ABI_MODEL_COARSE_FENCES: &str = "coarse-fences";

/// Container tag identifying serialized module bytes.
const CONTAINER_TAG: &str = "skein.module.v1";

/// Parameter and result kinds of a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub params: Vec<VmType>,
    pub results: Vec<VmType>,
}

impl FunctionSignature {
    pub fn new(params: Vec<VmType>, results: Vec<VmType>) -> Self {
        Self { params, results }
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |types: &[VmType]| {
            types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", render(&self.params), render(&self.results))
    }
}

/// A host-function body.
pub type HostFn = Arc<dyn Fn(&VmList) -> VmResult<VmList> + Send + Sync>;

/// How an export executes.
#[derive(Clone)]
pub enum FunctionBody {
    Bytecode(Arc<Vec<Instruction>>),
    Host(HostFn),
}

impl fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionBody::Bytecode(code) => write!(f, "Bytecode({} instructions)", code.len()),
            FunctionBody::Host(_) => write!(f, "Host"),
        }
    }
}

/// One exported function.
#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub signature: FunctionSignature,
    pub attrs: BTreeMap<String, String>,
    pub body: FunctionBody,
}

/// An immutable, shareable module.
#[derive(Debug)]
pub struct VmModule {
    name: String,
    imports: Vec<String>,
    exports: Vec<Export>,
}

impl VmModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified names this module requires from earlier modules.
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    /// Names of all exported functions.
    pub fn export_names(&self) -> Vec<String> {
        self.exports.iter().map(|e| e.name.clone()).collect()
    }

    /// Find an export by unqualified name.
    pub fn find_export(&self, name: &str) -> Option<(usize, &Export)> {
        self.exports
            .iter()
            .enumerate()
            .find(|(_, export)| export.name == name)
    }

    /// Decode a module from serialized container bytes.
    pub fn from_bytes(bytes: &[u8]) -> VmResult<Arc<VmModule>> {
        let manifest: ModuleManifest = serde_json::from_slice(bytes)
            .map_err(|err| VmError::Parse(err.to_string()))?;
        if manifest.container != CONTAINER_TAG {
            return Err(VmError::Parse(format!(
                "unrecognized container tag '{}'",
                manifest.container
            )));
        }
        let exports = manifest
            .exports
            .into_iter()
            .map(|export| Export {
                name: export.name,
                signature: export.signature,
                attrs: export.attrs,
                body: FunctionBody::Bytecode(Arc::new(export.code)),
            })
            .collect();
        tracing::debug!(module = %manifest.name, "module_decoded");
        Ok(Arc::new(VmModule {
            name: manifest.name,
            imports: manifest.imports,
            exports,
        }))
    }

    /// Encode this module to container bytes. Fails for host-function
    /// exports, which have no serialized form.
    pub fn to_bytes(&self) -> VmResult<Vec<u8>> {
        let exports = self
            .exports
            .iter()
            .map(|export| match &export.body {
                FunctionBody::Bytecode(code) => Ok(ExportManifest {
                    name: export.name.clone(),
                    signature: export.signature.clone(),
                    attrs: export.attrs.clone(),
                    code: code.as_ref().clone(),
                }),
                FunctionBody::Host(_) => Err(VmError::Parse(format!(
                    "host export '{}' cannot be serialized",
                    export.name
                ))),
            })
            .collect::<VmResult<Vec<_>>>()?;
        let manifest = ModuleManifest {
            container: CONTAINER_TAG.to_string(),
            name: self.name.clone(),
            imports: self.imports.clone(),
            exports,
        };
        serde_json::to_vec_pretty(&manifest).map_err(|err| VmError::Parse(err.to_string()))
    }

    pub fn builder(name: impl Into<String>) -> VmModuleBuilder {
        VmModuleBuilder {
            name: name.into(),
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ModuleManifest {
    container: String,
    name: String,
    #[serde(default)]
    imports: Vec<String>,
    exports: Vec<ExportManifest>,
}

#[derive(Serialize, Deserialize)]
struct ExportManifest {
    name: String,
    signature: FunctionSignature,
    #[serde(default)]
    attrs: BTreeMap<String, String>,
    code: Vec<Instruction>,
}

/// Builds modules in-process.
pub struct VmModuleBuilder {
    name: String,
    imports: Vec<String>,
    exports: Vec<Export>,
}

impl VmModuleBuilder {
    /// Declare a fully qualified import (`module.function`).
    pub fn import(mut self, qualified_name: impl Into<String>) -> Self {
        self.imports.push(qualified_name.into());
        self
    }

    /// Export a bytecode function.
    pub fn export_bytecode(
        mut self,
        name: impl Into<String>,
        signature: FunctionSignature,
        attrs: BTreeMap<String, String>,
        code: Vec<Instruction>,
    ) -> Self {
        self.exports.push(Export {
            name: name.into(),
            signature,
            attrs,
            body: FunctionBody::Bytecode(Arc::new(code)),
        });
        self
    }

    /// Export a host closure.
    pub fn export_host(
        mut self,
        name: impl Into<String>,
        signature: FunctionSignature,
        attrs: BTreeMap<String, String>,
        body: impl Fn(&VmList) -> VmResult<VmList> + Send + Sync + 'static,
    ) -> Self {
        self.exports.push(Export {
            name: name.into(),
            signature,
            attrs,
            body: FunctionBody::Host(Arc::new(body)),
        });
        self
    }

    pub fn build(self) -> Arc<VmModule> {
        Arc::new(VmModule {
            name: self.name,
            imports: self.imports,
            exports: self.exports,
        })
    }
}

/// Attribute map with the coarse-fences ABI model set.
pub fn coarse_fences_attrs() -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    attrs.insert(
        ATTR_ABI_MODEL.to_string(),
        ABI_MODEL_COARSE_FENCES.to_string(),
    );
    attrs
}
