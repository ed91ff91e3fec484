//! Static program parameters: named pools of model weights.
//!
//! Each [`StaticProgramParameters`] owns one parameter index bound to a
//! scope name. Files are added with [`StaticProgramParameters::load`];
//! recognized formats are `irpa`, `gguf`, and `safetensors`, inferred from
//! the extension when not given. Loading the same file into the same scope
//! twice is a visibility no-op; distinct scopes keep independent indices.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::system::System;

/// Default bound on concurrent index operations.
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 16;

/// Options for [`StaticProgramParameters::load`].
#[derive(Debug, Clone)]
pub struct ParameterLoadOptions {
    /// File format; inferred from the extension when empty. Recognized:
    /// `"irpa"`, `"gguf"`, `"safetensors"`.
    pub format: String,
    /// Whether the backing file can be read.
    pub readable: bool,
    /// Whether the backing file can be written. Not supported; reserved.
    pub writable: bool,
    /// Whether to mmap the file instead of reading it into memory.
    pub mmap: bool,
}

impl Default for ParameterLoadOptions {
    fn default() -> Self {
        Self {
            format: String::new(),
            readable: true,
            writable: false,
            mmap: true,
        }
    }
}

enum Backing {
    Mapped(memmap2::Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Mapped(map) => map,
            Backing::Owned(bytes) => bytes,
        }
    }
}

/// One named parameter within a scope.
#[derive(Clone)]
pub struct ParameterEntry {
    name: String,
    format: &'static str,
    backing: Arc<Backing>,
    start: usize,
    end: usize,
}

impl ParameterEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &'static str {
        self.format
    }

    /// The parameter's bytes within the backing file.
    pub fn bytes(&self) -> &[u8] {
        &self.backing.as_slice()[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl std::fmt::Debug for ParameterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<ParameterEntry '{}' {} bytes ({})>",
            self.name,
            self.len(),
            self.format
        )
    }
}

struct IndexInner {
    entries: BTreeMap<String, ParameterEntry>,
    loaded_paths: HashSet<PathBuf>,
}

/// A parameter pool bound to one scope name.
///
/// Cloning shares the underlying index; a parameter-provider module holds
/// clones of the pools it serves.
#[derive(Clone)]
pub struct StaticProgramParameters {
    scope: String,
    max_concurrent_operations: usize,
    index: Arc<Mutex<IndexInner>>,
}

impl StaticProgramParameters {
    pub fn new(
        _system: &System,
        scope: impl Into<String>,
        max_concurrent_operations: usize,
    ) -> Self {
        Self {
            scope: scope.into(),
            max_concurrent_operations,
            index: Arc::new(Mutex::new(IndexInner {
                entries: BTreeMap::new(),
                loaded_paths: HashSet::new(),
            })),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn max_concurrent_operations(&self) -> usize {
        self.max_concurrent_operations
    }

    /// Number of parameters in the index.
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of all parameters in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.index.lock().entries.keys().cloned().collect()
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<ParameterEntry> {
        self.index.lock().entries.get(name).cloned()
    }

    /// Add a file to the index, applying no name transformation.
    pub fn load(&self, path: impl AsRef<Path>, options: ParameterLoadOptions) -> Result<()> {
        let path = path.as_ref();
        if !options.readable {
            return Err(Error::invalid_argument(
                "parameter files must be readable",
            ));
        }
        if options.writable {
            return Err(Error::invalid_argument(
                "writable parameter files are not supported",
            ));
        }
        let format = infer_format(path, &options.format)?;
        let canonical = fs::canonicalize(path)?;

        {
            let inner = self.index.lock();
            if inner.loaded_paths.contains(&canonical) {
                tracing::debug!(
                    scope = %self.scope,
                    path = %path.display(),
                    "parameter_file_already_indexed"
                );
                return Ok(());
            }
        }

        let backing = if options.mmap {
            let file = fs::File::open(&canonical)?;
            // Safety: mapping is read-only and kept alive by the entries
            // that reference it.
            let mapped = unsafe { memmap2::Mmap::map(&file) }?;
            Arc::new(Backing::Mapped(mapped))
        } else {
            Arc::new(Backing::Owned(fs::read(&canonical)?))
        };

        let entries = match format {
            "safetensors" => index_safetensors(&canonical, &backing)?,
            // Opaque single-blob formats: the archive is the parameter.
            "irpa" | "gguf" => vec![whole_file_entry(&canonical, format, &backing)?],
            _ => unreachable!("infer_format only returns recognized formats"),
        };

        let mut inner = self.index.lock();
        for entry in entries {
            tracing::debug!(
                scope = %self.scope,
                name = %entry.name(),
                bytes = entry.len(),
                format,
                "parameter_indexed"
            );
            inner.entries.insert(entry.name().to_string(), entry);
        }
        inner.loaded_paths.insert(canonical);
        Ok(())
    }
}

impl std::fmt::Debug for StaticProgramParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<StaticProgramParameters scope='{}' entries={}>",
            self.scope,
            self.len()
        )
    }
}

fn infer_format(path: &Path, requested: &str) -> Result<&'static str> {
    let format = if requested.is_empty() {
        path.extension().and_then(|ext| ext.to_str()).unwrap_or("")
    } else {
        requested
    };
    match format {
        "irpa" => Ok("irpa"),
        "gguf" => Ok("gguf"),
        "safetensors" => Ok("safetensors"),
        other => Err(Error::invalid_argument(format!(
            "unrecognized parameter format '{other}' for '{}'",
            path.display()
        ))),
    }
}

fn whole_file_entry(
    path: &Path,
    format: &'static str,
    backing: &Arc<Backing>,
) -> Result<ParameterEntry> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| {
            Error::invalid_argument(format!("cannot derive a name from '{}'", path.display()))
        })?;
    Ok(ParameterEntry {
        name: name.to_string(),
        format,
        backing: Arc::clone(backing),
        start: 0,
        end: backing.as_slice().len(),
    })
}

/// Index a safetensors file: an 8-byte little-endian header length, a JSON
/// header mapping tensor names to byte ranges, then the data section.
fn index_safetensors(path: &Path, backing: &Arc<Backing>) -> Result<Vec<ParameterEntry>> {
    let bytes = backing.as_slice();
    let malformed = |detail: String| {
        Error::invalid_argument(format!("malformed safetensors '{}': {detail}", path.display()))
    };
    if bytes.len() < 8 {
        return Err(malformed("shorter than the header length field".into()));
    }
    let header_len = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
    let data_start = 8usize
        .checked_add(header_len)
        .filter(|start| *start <= bytes.len())
        .ok_or_else(|| malformed(format!("header length {header_len} exceeds file")))?;

    let header: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&bytes[8..data_start]).map_err(|err| malformed(err.to_string()))?;

    let mut entries = Vec::new();
    for (name, value) in header {
        if name == "__metadata__" {
            continue;
        }
        let offsets = value
            .get("data_offsets")
            .and_then(|v| v.as_array())
            .ok_or_else(|| malformed(format!("tensor '{name}' lacks data_offsets")))?;
        let begin = offsets.first().and_then(|v| v.as_u64()).unwrap_or(u64::MAX) as usize;
        let end = offsets.get(1).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let start = data_start.checked_add(begin);
        let stop = data_start.checked_add(end);
        match (start, stop) {
            (Some(start), Some(stop)) if start <= stop && stop <= bytes.len() => {
                entries.push(ParameterEntry {
                    name,
                    format: "safetensors",
                    backing: Arc::clone(backing),
                    start,
                    end: stop,
                });
            }
            _ => {
                return Err(malformed(format!(
                    "tensor '{name}' has out-of-range offsets [{begin}, {end})"
                )))
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::HostCpuSystemBuilder;

    fn test_system() -> Arc<System> {
        HostCpuSystemBuilder::new().build().unwrap()
    }

    fn write_safetensors(dir: &Path) -> PathBuf {
        let header = serde_json::json!({
            "__metadata__": {"producer": "test"},
            "weight": {"dtype": "F32", "shape": [2], "data_offsets": [0, 8]},
            "bias": {"dtype": "F32", "shape": [1], "data_offsets": [8, 12]},
        });
        let header_bytes = serde_json::to_vec(&header).unwrap();
        let mut file = Vec::new();
        file.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
        file.extend_from_slice(&header_bytes);
        file.extend_from_slice(&1.0f32.to_le_bytes());
        file.extend_from_slice(&2.0f32.to_le_bytes());
        file.extend_from_slice(&3.0f32.to_le_bytes());
        let path = dir.join("model.safetensors");
        fs::write(&path, file).unwrap();
        path
    }

    #[test]
    fn test_safetensors_index() {
        let system = test_system();
        let dir = tempfile::tempdir().unwrap();
        let path = write_safetensors(dir.path());

        let params = StaticProgramParameters::new(&system, "model", 4);
        params.load(&path, ParameterLoadOptions::default()).unwrap();
        assert_eq!(params.keys(), vec!["bias", "weight"]);
        assert_eq!(params.get("weight").unwrap().len(), 8);
        assert_eq!(params.get("bias").unwrap().bytes(), &3.0f32.to_le_bytes()[..]);
        assert!(params.get("absent").is_none());
    }

    #[test]
    fn test_double_load_same_scope_is_noop() {
        let system = test_system();
        let dir = tempfile::tempdir().unwrap();
        let path = write_safetensors(dir.path());

        let params = StaticProgramParameters::new(&system, "model", 4);
        params.load(&path, ParameterLoadOptions::default()).unwrap();
        let before = params.len();
        params.load(&path, ParameterLoadOptions::default()).unwrap();
        assert_eq!(params.len(), before);
    }

    #[test]
    fn test_scopes_are_independent() {
        let system = test_system();
        let dir = tempfile::tempdir().unwrap();
        let path = write_safetensors(dir.path());

        let a = StaticProgramParameters::new(&system, "a", 4);
        let b = StaticProgramParameters::new(&system, "b", 4);
        a.load(&path, ParameterLoadOptions::default()).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn test_opaque_format_single_blob() {
        let system = test_system();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.gguf");
        fs::write(&path, b"opaque-bytes").unwrap();

        let params = StaticProgramParameters::new(&system, "model", 4);
        let options = ParameterLoadOptions {
            mmap: false,
            ..Default::default()
        };
        params.load(&path, options).unwrap();
        assert_eq!(params.keys(), vec!["weights"]);
        assert_eq!(params.get("weights").unwrap().bytes(), b"opaque-bytes");
    }

    #[test]
    fn test_unrecognized_format_rejected() {
        let system = test_system();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        fs::write(&path, b"x").unwrap();

        let params = StaticProgramParameters::new(&system, "model", 4);
        let err = params
            .load(&path, ParameterLoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        // An explicit format overrides the extension.
        let options = ParameterLoadOptions {
            format: "irpa".to_string(),
            ..Default::default()
        };
        params.load(&path, options).unwrap();
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_malformed_safetensors_rejected() {
        let system = test_system();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        fs::write(&path, [0xffu8; 4]).unwrap();

        let params = StaticProgramParameters::new(&system, "model", 4);
        assert!(params.load(&path, ParameterLoadOptions::default()).is_err());
    }

    #[test]
    fn test_writable_rejected() {
        let system = test_system();
        let dir = tempfile::tempdir().unwrap();
        let path = write_safetensors(dir.path());
        let params = StaticProgramParameters::new(&system, "model", 4);
        let options = ParameterLoadOptions {
            writable: true,
            ..Default::default()
        };
        assert!(matches!(
            params.load(&path, options),
            Err(Error::InvalidArgument(_))
        ));
    }
}
