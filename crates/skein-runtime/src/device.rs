//! Devices, their addresses, and scheduling affinity.
//!
//! Each [`Device`] names one queue of one physical instance. Several devices
//! of the same instance differ only by `queue_ordinal`; a [`DeviceAffinity`]
//! recombines them into an instance plus a queue bitmask for scheduling.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use skein_hal::HalDevice;

/// The stable, structured address of a device within a system.
#[derive(Debug, Clone)]
pub struct DeviceAddress {
    /// Class shared by devices that can be scheduled together
    /// (e.g. `"hostcpu"`, `"gpu"`).
    pub system_device_class: String,
    /// Class used for logical naming within a fiber (e.g. `"cpu"`).
    pub logical_device_class: String,
    /// Prefix of the driver that opened the device.
    pub hal_driver_prefix: String,
    /// Ordinal of the physical instance within the driver.
    pub instance_ordinal: usize,
    /// Queue this address names on the instance.
    pub queue_ordinal: usize,
    /// Position within the instance topology.
    pub instance_topology_address: Vec<usize>,
    device_name: String,
}

impl DeviceAddress {
    pub fn new(
        system_device_class: impl Into<String>,
        logical_device_class: impl Into<String>,
        hal_driver_prefix: impl Into<String>,
        instance_ordinal: usize,
        queue_ordinal: usize,
        instance_topology_address: Vec<usize>,
    ) -> Self {
        let system_device_class = system_device_class.into();
        let topology = instance_topology_address
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let device_name =
            format!("{system_device_class}:{instance_ordinal}:{queue_ordinal}@{topology}");
        Self {
            system_device_class,
            logical_device_class: logical_device_class.into(),
            hal_driver_prefix: hal_driver_prefix.into(),
            instance_ordinal,
            queue_ordinal,
            instance_topology_address,
            device_name,
        }
    }

    /// The canonical `{class}:{instance}:{queue}@{topology}` name, unique
    /// within a system.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.device_name)
    }
}

/// One schedulable device queue owned by a [`crate::System`].
pub struct Device {
    address: DeviceAddress,
    hal: Arc<dyn HalDevice>,
    node_affinity: i32,
    node_locked: bool,
}

impl Device {
    pub(crate) fn new(
        address: DeviceAddress,
        hal: Arc<dyn HalDevice>,
        node_affinity: i32,
        node_locked: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            address,
            hal,
            node_affinity,
            node_locked,
        })
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn name(&self) -> &str {
        self.address.device_name()
    }

    pub fn hal(&self) -> &Arc<dyn HalDevice> {
        &self.hal
    }

    pub fn node_affinity(&self) -> i32 {
        self.node_affinity
    }

    pub fn node_locked(&self) -> bool {
        self.node_locked
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Device {}>", self.name())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A device plus a queue bitmask, the unit of scheduling placement.
///
/// Affinities combine with `|`. Devices participating in one affinity must
/// agree on `(system_device_class, instance_ordinal)`; a conflicting union
/// collapses to the empty affinity, which callers treat as an error.
#[derive(Clone, Default)]
pub struct DeviceAffinity {
    device: Option<Arc<Device>>,
    queue_mask: u64,
}

impl DeviceAffinity {
    /// The empty affinity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Affinity naming `device`'s queue.
    pub fn for_device(device: &Arc<Device>) -> Self {
        Self {
            queue_mask: 1u64 << device.address().queue_ordinal,
            device: Some(Arc::clone(device)),
        }
    }

    /// Fold `device` into this affinity. Returns `false` (leaving `self`
    /// unchanged) when the device cannot be combined.
    pub fn add_device(&mut self, device: &Arc<Device>) -> bool {
        match &self.device {
            None => {
                self.device = Some(Arc::clone(device));
                self.queue_mask |= 1u64 << device.address().queue_ordinal;
                true
            }
            Some(existing) => {
                let a = existing.address();
                let b = device.address();
                if a.system_device_class != b.system_device_class
                    || a.instance_ordinal != b.instance_ordinal
                {
                    return false;
                }
                self.queue_mask |= 1u64 << b.queue_ordinal;
                true
            }
        }
    }

    /// Representative device, if any.
    pub fn device(&self) -> Option<&Arc<Device>> {
        self.device.as_ref()
    }

    pub fn queue_mask(&self) -> u64 {
        self.queue_mask
    }

    pub fn is_empty(&self) -> bool {
        self.device.is_none() && self.queue_mask == 0
    }

    /// Lowest selected queue ordinal; the scheduling timeline lives there.
    pub fn primary_queue_ordinal(&self) -> Option<usize> {
        if self.queue_mask == 0 {
            return None;
        }
        Some(self.queue_mask.trailing_zeros() as usize)
    }

    /// Iterate the selected queue ordinals in ascending order.
    pub fn queue_ordinals(&self) -> impl Iterator<Item = usize> + '_ {
        (0..64).filter(|bit| self.queue_mask & (1u64 << bit) != 0)
    }
}

impl BitOr for DeviceAffinity {
    type Output = DeviceAffinity;

    /// Union. A conflict between instances yields the empty affinity.
    fn bitor(self, rhs: DeviceAffinity) -> DeviceAffinity {
        match (&self.device, &rhs.device) {
            (None, _) => rhs,
            (_, None) => self,
            (Some(a), Some(b)) => {
                let aa = a.address();
                let bb = b.address();
                if aa.system_device_class != bb.system_device_class
                    || aa.instance_ordinal != bb.instance_ordinal
                {
                    return DeviceAffinity::new();
                }
                DeviceAffinity {
                    device: self.device.clone(),
                    queue_mask: self.queue_mask | rhs.queue_mask,
                }
            }
        }
    }
}

impl PartialEq for DeviceAffinity {
    fn eq(&self, other: &Self) -> bool {
        let same_device = match (&self.device, &other.device) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                let aa = a.address();
                let bb = b.address();
                aa.system_device_class == bb.system_device_class
                    && aa.instance_ordinal == bb.instance_ordinal
            }
            _ => false,
        };
        same_device && self.queue_mask == other.queue_mask
    }
}

impl fmt::Debug for DeviceAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            None => write!(f, "DeviceAffinity(empty)"),
            Some(device) => write!(
                f,
                "DeviceAffinity({}[0x{:x}])",
                device.name(),
                self.queue_mask
            ),
        }
    }
}

impl fmt::Display for DeviceAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            None => write!(f, "<empty affinity>"),
            Some(device) => write!(f, "{}[0x{:x}]", device.name(), self.queue_mask),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_hal::HostCpuDevice;

    fn device(class: &str, instance: usize, queue: usize) -> Arc<Device> {
        let address = DeviceAddress::new(class, "cpu", "local-task", instance, queue, vec![
            instance,
        ]);
        Device::new(
            address,
            HostCpuDevice::new(8).unwrap(),
            instance as i32,
            false,
        )
    }

    #[test]
    fn test_device_name_grammar() {
        let address = DeviceAddress::new("gpu", "gpu", "vk", 1, 2, vec![0, 3]);
        assert_eq!(address.device_name(), "gpu:1:2@0,3");
        assert_eq!(
            DeviceAddress::new("hostcpu", "cpu", "local-task", 0, 0, vec![0]).device_name(),
            "hostcpu:0:0@0"
        );
    }

    #[test]
    fn test_affinity_union_same_instance() {
        let q0 = device("gpu", 0, 0);
        let q1 = device("gpu", 0, 1);
        let union = DeviceAffinity::for_device(&q0) | DeviceAffinity::for_device(&q1);
        assert!(!union.is_empty());
        assert_eq!(union.queue_mask(), 0b11);
        assert_eq!(union.primary_queue_ordinal(), Some(0));
    }

    #[test]
    fn test_affinity_union_cross_instance_collapses() {
        let a = device("gpu", 0, 0);
        let b = device("gpu", 1, 0);
        let union = DeviceAffinity::for_device(&a) | DeviceAffinity::for_device(&b);
        assert!(union.is_empty());
    }

    #[test]
    fn test_affinity_union_cross_class_collapses() {
        let a = device("gpu", 0, 0);
        let b = device("hostcpu", 0, 0);
        let union = DeviceAffinity::for_device(&a) | DeviceAffinity::for_device(&b);
        assert!(union.is_empty());
    }

    #[test]
    fn test_empty_is_identity() {
        let a = device("gpu", 0, 3);
        let affinity = DeviceAffinity::new() | DeviceAffinity::for_device(&a);
        assert_eq!(affinity.queue_mask(), 0b1000);
        let affinity = DeviceAffinity::for_device(&a) | DeviceAffinity::new();
        assert_eq!(affinity.queue_mask(), 0b1000);
    }

    #[test]
    fn test_add_device_rejects_conflict() {
        let a = device("gpu", 0, 0);
        let b = device("gpu", 1, 0);
        let mut affinity = DeviceAffinity::for_device(&a);
        assert!(!affinity.add_device(&b));
        // Unchanged on rejection.
        assert_eq!(affinity.queue_mask(), 0b1);
    }

    #[test]
    fn test_queue_ordinals_iteration() {
        let q0 = device("gpu", 0, 0);
        let q2 = device("gpu", 0, 2);
        let mut affinity = DeviceAffinity::for_device(&q0);
        assert!(affinity.add_device(&q2));
        assert_eq!(affinity.queue_ordinals().collect::<Vec<_>>(), vec![0, 2]);
    }
}
