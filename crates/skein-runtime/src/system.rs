//! The process-wide device and driver registry.
//!
//! A [`System`] is built once through a builder, after which its device set
//! is frozen. Fibers borrow `Arc<Device>` handles from it; the system owns
//! the drivers for as long as any runtime object is alive.

use std::collections::HashMap;
use std::sync::Arc;

use skein_hal::{Driver, HostCpuDriver, HostCpuDriverOptions};

use crate::device::{Device, DeviceAddress};
use crate::error::{Error, Result};

/// Immutable registry of devices and the drivers that opened them.
pub struct System {
    devices: Vec<Arc<Device>>,
    devices_by_name: HashMap<String, Arc<Device>>,
    #[allow(dead_code)]
    drivers: Vec<Arc<dyn Driver>>,
}

impl System {
    /// All devices in registration order.
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Canonical device names in registration order.
    pub fn device_names(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.name().to_string()).collect()
    }

    /// Look up a device by canonical name.
    pub fn device_by_name(&self, name: &str) -> Option<Arc<Device>> {
        self.devices_by_name.get(name).cloned()
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("devices", &self.device_names())
            .finish()
    }
}

/// Assembles a [`System`] from drivers. Consumed by `build`; the resulting
/// system can never grow.
pub struct SystemBuilder {
    drivers: Vec<Arc<dyn Driver>>,
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Register a driver. Devices are enumerated in driver order.
    pub fn add_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.drivers.push(driver);
        self
    }

    pub fn build(self) -> Result<Arc<System>> {
        let mut devices = Vec::new();
        let mut devices_by_name = HashMap::new();
        for driver in &self.drivers {
            for discovered in driver.enumerate()? {
                let address = DeviceAddress::new(
                    discovered.system_device_class,
                    discovered.logical_device_class,
                    driver.prefix(),
                    discovered.instance_ordinal,
                    discovered.queue_ordinal,
                    discovered.instance_topology_address,
                );
                let name = address.device_name().to_string();
                let device = Device::new(
                    address,
                    discovered.handle,
                    discovered.node_affinity,
                    discovered.node_locked,
                );
                if devices_by_name
                    .insert(name.clone(), Arc::clone(&device))
                    .is_some()
                {
                    return Err(Error::invalid_argument(format!(
                        "duplicate device name '{name}'"
                    )));
                }
                devices.push(device);
            }
        }
        tracing::info!(device_count = devices.len(), "system_built");
        Ok(Arc::new(System {
            devices,
            devices_by_name,
            drivers: self.drivers,
        }))
    }
}

impl Default for SystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience builder for a purely host-CPU system.
///
/// Accelerator systems register their drivers through [`SystemBuilder`] and
/// may stack this on top for heterogeneous CPU execution.
pub struct HostCpuSystemBuilder {
    options: HostCpuDriverOptions,
}

impl HostCpuSystemBuilder {
    pub fn new() -> Self {
        Self {
            options: HostCpuDriverOptions::default(),
        }
    }

    /// Number of host devices to expose (one per NUMA node).
    pub fn device_count(mut self, count: usize) -> Self {
        self.options.device_count = count;
        self
    }

    /// Queues per host device.
    pub fn queues_per_device(mut self, queues: usize) -> Self {
        self.options.queues_per_device = queues;
        self
    }

    /// Pin allocations to the owning node.
    pub fn node_locked(mut self, locked: bool) -> Self {
        self.options.node_locked = locked;
        self
    }

    pub fn build(self) -> Result<Arc<System>> {
        SystemBuilder::new()
            .add_driver(Arc::new(HostCpuDriver::new(self.options)))
            .build()
    }
}

impl Default for HostCpuSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}
