//! Driver and device handle seams.
//!
//! Runtimes consume devices through the [`HalDevice`] trait and discover them
//! through [`Driver`]s. The host-CPU driver here is the reference
//! implementation; accelerator drivers plug in behind the same traits.

use std::fmt;
use std::sync::Arc;

use crate::error::{HalError, Result};
use crate::semaphore::TimelineSemaphore;

/// An opened device as seen by a runtime.
pub trait HalDevice: Send + Sync + fmt::Debug {
    /// Number of independently schedulable queues.
    fn queue_count(&self) -> usize;

    /// Create a timeline semaphore on this device.
    fn create_semaphore(&self, initial: u64) -> Result<TimelineSemaphore>;
}

/// A device discovered during driver enumeration, before the runtime wraps
/// it with an address.
pub struct DiscoveredDevice {
    /// Stable class shared by devices that can be scheduled together
    /// (e.g. `"hostcpu"`).
    pub system_device_class: String,
    /// Class used for default logical naming (e.g. `"cpu"`).
    pub logical_device_class: String,
    /// Ordinal of the physical instance within the driver.
    pub instance_ordinal: usize,
    /// Queue this entry addresses on the instance.
    pub queue_ordinal: usize,
    /// Position within the instance topology (package, cluster, ...).
    pub instance_topology_address: Vec<usize>,
    /// NUMA node the device prefers, or -1 when unpinned.
    pub node_affinity: i32,
    /// Whether allocations should be locked to the node.
    pub node_locked: bool,
    /// The opened device handle.
    pub handle: Arc<dyn HalDevice>,
}

/// Enumerates and opens devices of one family.
pub trait Driver: Send + Sync {
    /// Short prefix identifying the driver family (e.g. `"local-task"`).
    fn prefix(&self) -> &str;

    /// Enumerate all devices this driver can open.
    fn enumerate(&self) -> Result<Vec<DiscoveredDevice>>;
}

/// The in-process host-CPU device.
#[derive(Debug)]
pub struct HostCpuDevice {
    queue_count: usize,
}

impl HostCpuDevice {
    pub fn new(queue_count: usize) -> Result<Arc<Self>> {
        if queue_count == 0 || queue_count > 64 {
            return Err(HalError::driver(format!(
                "host-cpu queue count must be in 1..=64, got {queue_count}"
            )));
        }
        Ok(Arc::new(Self { queue_count }))
    }
}

impl HalDevice for HostCpuDevice {
    fn queue_count(&self) -> usize {
        self.queue_count
    }

    fn create_semaphore(&self, initial: u64) -> Result<TimelineSemaphore> {
        Ok(TimelineSemaphore::new(initial))
    }
}

/// Options for the host-CPU driver.
#[derive(Debug, Clone)]
pub struct HostCpuDriverOptions {
    /// Number of host devices to expose. Each models one NUMA node.
    pub device_count: usize,
    /// Queues per device.
    pub queues_per_device: usize,
    /// Pin allocations to the owning node.
    pub node_locked: bool,
}

impl Default for HostCpuDriverOptions {
    fn default() -> Self {
        Self {
            device_count: 1,
            queues_per_device: 1,
            node_locked: false,
        }
    }
}

/// Reference driver exposing host-CPU executor devices.
pub struct HostCpuDriver {
    options: HostCpuDriverOptions,
}

impl HostCpuDriver {
    pub fn new(options: HostCpuDriverOptions) -> Self {
        Self { options }
    }
}

impl Driver for HostCpuDriver {
    fn prefix(&self) -> &str {
        "local-task"
    }

    fn enumerate(&self) -> Result<Vec<DiscoveredDevice>> {
        let mut devices = Vec::new();
        for instance in 0..self.options.device_count {
            let handle = HostCpuDevice::new(self.options.queues_per_device)?;
            for queue in 0..self.options.queues_per_device {
                devices.push(DiscoveredDevice {
                    system_device_class: "hostcpu".to_string(),
                    logical_device_class: "cpu".to_string(),
                    instance_ordinal: instance,
                    queue_ordinal: queue,
                    instance_topology_address: vec![instance],
                    node_affinity: instance as i32,
                    node_locked: self.options.node_locked,
                    handle: handle.clone() as Arc<dyn HalDevice>,
                });
            }
        }
        tracing::debug!(
            device_count = self.options.device_count,
            queues_per_device = self.options.queues_per_device,
            "host_cpu_driver_enumerated"
        );
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_cpu_enumeration() {
        let driver = HostCpuDriver::new(HostCpuDriverOptions {
            device_count: 2,
            queues_per_device: 3,
            node_locked: false,
        });
        let devices = driver.enumerate().unwrap();
        assert_eq!(devices.len(), 6);
        assert_eq!(devices[0].system_device_class, "hostcpu");
        assert_eq!(devices[0].instance_ordinal, 0);
        assert_eq!(devices[5].instance_ordinal, 1);
        assert_eq!(devices[5].queue_ordinal, 2);
        assert_eq!(devices[5].node_affinity, 1);
    }

    #[test]
    fn test_queue_count_bounds() {
        assert!(HostCpuDevice::new(0).is_err());
        assert!(HostCpuDevice::new(65).is_err());
        assert_eq!(HostCpuDevice::new(64).unwrap().queue_count(), 64);
    }
}
