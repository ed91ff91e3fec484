//! Device-tied byte storage: the marshalable the binding layers use.
//!
//! Storage is a dense allocation bound to a [`ScopedDevice`]. Typed access
//! goes through `bytemuck` `Pod` views. When added to an invocation with a
//! barrier, storage implicates its device queues in the invocation's device
//! selection and wait fence.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::fiber::ScopedDevice;
use crate::invocation::{Marshalable, ProgramInvocation, ResourceBarrier};
use skein_vm::VmRef;

/// A byte buffer allocated against a scoped device.
///
/// Cloning shares the allocation. The buffer is borrowed, not owned, by
/// invocations it is marshaled into and must outlive their resolution.
#[derive(Clone)]
pub struct Storage {
    device: ScopedDevice,
    data: Arc<RwLock<Vec<u8>>>,
}

impl Storage {
    /// Allocate zero-filled device storage.
    pub fn allocate_device(device: &ScopedDevice, size_bytes: usize) -> Self {
        tracing::debug!(size_bytes, device = %device, "storage_allocated");
        Self {
            device: device.clone(),
            data: Arc::new(RwLock::new(vec![0u8; size_bytes])),
        }
    }

    pub fn device(&self) -> &ScopedDevice {
        &self.device
    }

    pub fn size_bytes(&self) -> usize {
        self.data.read().len()
    }

    /// Overwrite the buffer from a typed slice. The sizes must match.
    pub fn copy_from_slice<T: bytemuck::Pod>(&self, src: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(src);
        let mut data = self.data.write();
        if bytes.len() != data.len() {
            return Err(Error::invalid_argument(format!(
                "source is {} bytes but storage holds {}",
                bytes.len(),
                data.len()
            )));
        }
        data.copy_from_slice(bytes);
        Ok(())
    }

    /// Read the buffer as a vector of `T`. The size must divide evenly.
    pub fn to_vec<T: bytemuck::Pod>(&self) -> Result<Vec<T>> {
        let data = self.data.read();
        if data.len() % std::mem::size_of::<T>() != 0 {
            return Err(Error::invalid_argument(format!(
                "storage of {} bytes does not divide into {}-byte elements",
                data.len(),
                std::mem::size_of::<T>()
            )));
        }
        Ok(bytemuck::cast_slice(&data).to_vec())
    }

    /// Write raw bytes at an offset.
    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        let end = offset
            .checked_add(src.len())
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "write of {} bytes at offset {offset} exceeds storage of {} bytes",
                    src.len(),
                    data.len()
                ))
            })?;
        data[offset..end].copy_from_slice(src);
        Ok(())
    }

    /// Snapshot the raw bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Whether two handles share one allocation.
    pub fn same_allocation(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl Marshalable for Storage {
    /// Append a ref to this storage and, under a barrier, implicate the
    /// storage's queues in device selection and the wait fence.
    fn marshal(&self, invocation: &mut ProgramInvocation, barrier: ResourceBarrier) -> Result<()> {
        invocation.add_ref(VmRef::new(self.clone()))?;
        if barrier == ResourceBarrier::None {
            return Ok(());
        }

        let affinity = self.device.affinity();
        invocation.device_select(affinity)?;
        let device = affinity
            .device()
            .ok_or_else(|| Error::invalid_argument("storage device has empty affinity"))?;
        let fiber = self.device.fiber();
        for queue in affinity.queue_ordinals() {
            let (sem, tip) = fiber.account_timepoint(device, queue)?;
            invocation.wait_insert(sem, tip);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<Storage {} bytes on {}>",
            self.size_bytes(),
            self.device
        )
    }
}
