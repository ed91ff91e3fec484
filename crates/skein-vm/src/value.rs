//! VM values, opaque references, and variant lists.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{VmError, VmResult};

/// Value kinds the VM traffics in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmType {
    I32,
    I64,
    F32,
    F64,
    Ref,
}

impl fmt::Display for VmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VmType::I32 => "i32",
            VmType::I64 => "i64",
            VmType::F32 => "f32",
            VmType::F64 => "f64",
            VmType::Ref => "ref",
        };
        write!(f, "{name}")
    }
}

/// A reference-counted opaque host object held by the VM.
///
/// Refs are type-erased; consumers downcast to the concrete type they expect.
#[derive(Clone)]
pub struct VmRef {
    object: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl VmRef {
    /// Wrap a host object.
    pub fn new<T: Any + Send + Sync>(object: T) -> Self {
        Self {
            object: Arc::new(object),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Borrow the wrapped object if it is a `T`.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    /// Whether the wrapped object is a `T`.
    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        self.object.is::<T>()
    }

    /// Concrete type name of the wrapped object.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether two refs point at the same object.
    pub fn same_object(&self, other: &VmRef) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VmRef<{}>", self.type_name)
    }
}

/// A VM value: a primitive scalar, an opaque ref, or null.
#[derive(Debug, Clone, Default)]
pub enum VmValue {
    #[default]
    Null,
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Ref(VmRef),
}

impl VmValue {
    /// The [`VmType`] of this value, or `None` for null.
    pub fn vm_type(&self) -> Option<VmType> {
        match self {
            VmValue::Null => None,
            VmValue::I32(_) => Some(VmType::I32),
            VmValue::I64(_) => Some(VmType::I64),
            VmValue::F32(_) => Some(VmType::F32),
            VmValue::F64(_) => Some(VmType::F64),
            VmValue::Ref(_) => Some(VmType::Ref),
        }
    }

    /// Whether this value may occupy a slot of `ty`. Null satisfies ref
    /// slots only.
    pub fn satisfies(&self, ty: VmType) -> bool {
        match (self, ty) {
            (VmValue::Null, VmType::Ref) => true,
            (value, ty) => value.vm_type() == Some(ty),
        }
    }

    pub fn as_i32(&self) -> VmResult<i32> {
        match self {
            VmValue::I32(v) => Ok(*v),
            other => Err(VmError::type_mismatch("i32", other.describe())),
        }
    }

    pub fn as_i64(&self) -> VmResult<i64> {
        match self {
            VmValue::I64(v) => Ok(*v),
            other => Err(VmError::type_mismatch("i64", other.describe())),
        }
    }

    pub fn as_f32(&self) -> VmResult<f32> {
        match self {
            VmValue::F32(v) => Ok(*v),
            other => Err(VmError::type_mismatch("f32", other.describe())),
        }
    }

    pub fn as_f64(&self) -> VmResult<f64> {
        match self {
            VmValue::F64(v) => Ok(*v),
            other => Err(VmError::type_mismatch("f64", other.describe())),
        }
    }

    /// The ref payload, or `None` for any other kind.
    pub fn as_ref_object(&self) -> Option<&VmRef> {
        match self {
            VmValue::Ref(r) => Some(r),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self.vm_type() {
            Some(ty) => ty.to_string(),
            None => "null".to_string(),
        }
    }
}

impl From<i32> for VmValue {
    fn from(v: i32) -> Self {
        VmValue::I32(v)
    }
}

impl From<i64> for VmValue {
    fn from(v: i64) -> Self {
        VmValue::I64(v)
    }
}

impl From<f32> for VmValue {
    fn from(v: f32) -> Self {
        VmValue::F32(v)
    }
}

impl From<f64> for VmValue {
    fn from(v: f64) -> Self {
        VmValue::F64(v)
    }
}

impl From<VmRef> for VmValue {
    fn from(r: VmRef) -> Self {
        VmValue::Ref(r)
    }
}

/// A growable list of VM values, used for argument and result lists.
#[derive(Debug, Clone, Default)]
pub struct VmList {
    items: Vec<VmValue>,
}

impl VmList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: impl Into<VmValue>) {
        self.items.push(value.into());
    }

    pub fn get(&self, index: usize) -> Option<&VmValue> {
        self.items.get(index)
    }

    pub fn get_i32(&self, index: usize) -> VmResult<i32> {
        self.items
            .get(index)
            .ok_or_else(|| VmError::execution(format!("list index {index} out of range")))?
            .as_i32()
    }

    pub fn get_ref(&self, index: usize) -> Option<&VmRef> {
        self.items.get(index).and_then(VmValue::as_ref_object)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VmValue> {
        self.items.iter()
    }
}

impl FromIterator<VmValue> for VmList {
    fn from_iter<I: IntoIterator<Item = VmValue>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}
