//! Fibers: a worker binding plus a named selection of devices.
//!
//! A fiber is a logical thread of execution. It pins one worker, names a
//! subset of the system's devices, and owns the per-(device, queue)
//! scheduling timelines used by coarse-fences invocations. Cross-fiber
//! sharing of a queue timeline is forbidden; each fiber accounts for its
//! queues independently.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use skein_hal::TimelineSemaphore;

use crate::device::{Device, DeviceAffinity};
use crate::error::{Error, Result};
use crate::worker::Worker;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccountKey {
    system_device_class: String,
    instance_ordinal: usize,
    queue_ordinal: usize,
}

impl AccountKey {
    fn new(device: &Device, queue_ordinal: usize) -> Self {
        let address = device.address();
        Self {
            system_device_class: address.system_device_class.clone(),
            instance_ordinal: address.instance_ordinal,
            queue_ordinal,
        }
    }
}

struct Account {
    sem: TimelineSemaphore,
    idle_timepoint: u64,
}

/// A worker binding plus named devices and their schedule timelines.
pub struct Fiber {
    worker: Arc<Worker>,
    devices: Vec<Arc<Device>>,
    names: Vec<String>,
    by_name: HashMap<String, usize>,
    accounts: Mutex<HashMap<AccountKey, Account>>,
}

impl Fiber {
    /// Create a fiber over `devices`, naming each `<logical_class><index>`
    /// with the index counting per class from zero.
    pub fn new(
        worker: Arc<Worker>,
        devices: impl IntoIterator<Item = Arc<Device>>,
    ) -> Result<Arc<Self>> {
        let devices: Vec<_> = devices.into_iter().collect();
        let mut class_counts: HashMap<String, usize> = HashMap::new();
        let mut named = Vec::with_capacity(devices.len());
        for device in &devices {
            let class = device.address().logical_device_class.clone();
            let index = class_counts.entry(class.clone()).or_insert(0);
            named.push((format!("{class}{index}"), Arc::clone(device)));
            *index += 1;
        }
        Self::new_named(worker, named)
    }

    /// Create a fiber with custom logical names.
    pub fn new_named(
        worker: Arc<Worker>,
        devices: impl IntoIterator<Item = (String, Arc<Device>)>,
    ) -> Result<Arc<Self>> {
        let mut fiber_devices = Vec::new();
        let mut names = Vec::new();
        let mut by_name = HashMap::new();
        for (name, device) in devices {
            if by_name.insert(name.clone(), fiber_devices.len()).is_some() {
                return Err(Error::invalid_argument(format!(
                    "duplicate fiber device name '{name}'"
                )));
            }
            names.push(name);
            fiber_devices.push(device);
        }
        tracing::debug!(worker = worker.name(), devices = ?names, "fiber_created");
        Ok(Arc::new(Self {
            worker,
            devices: fiber_devices,
            names,
            by_name,
            accounts: Mutex::new(HashMap::new()),
        }))
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Devices in insertion order.
    pub fn raw_devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Logical names in insertion order.
    pub fn device_names(&self) -> &[String] {
        &self.names
    }

    /// Look up a device by logical name.
    pub fn raw_device(&self, name: &str) -> Result<Arc<Device>> {
        self.by_name
            .get(name)
            .map(|&index| Arc::clone(&self.devices[index]))
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "fiber has no device named '{name}' (have: {})",
                    self.names.join(", ")
                ))
            })
    }

    /// Look up a device by insertion index.
    pub fn raw_device_index(&self, index: usize) -> Result<Arc<Device>> {
        self.devices.get(index).cloned().ok_or_else(|| {
            Error::invalid_argument(format!(
                "fiber device index {index} out of range ({} devices)",
                self.devices.len()
            ))
        })
    }

    /// Build a [`ScopedDevice`] from a selector: a name, an index, a device,
    /// or a tuple of those. Accumulation ORs the per-device affinities and
    /// fails if any two selected devices live on different instances.
    pub fn device(self: &Arc<Self>, selector: impl DeviceSelector) -> Result<ScopedDevice> {
        let mut affinity = DeviceAffinity::new();
        selector.accumulate(self, &mut affinity)?;
        Ok(ScopedDevice {
            fiber: Arc::clone(self),
            affinity,
        })
    }

    /// Current idle timepoint of a queue timeline (zero when untouched).
    pub fn timeline_tip(&self, device: &Arc<Device>, queue_ordinal: usize) -> u64 {
        self.accounts
            .lock()
            .get(&AccountKey::new(device, queue_ordinal))
            .map(|account| account.idle_timepoint)
            .unwrap_or(0)
    }

    /// Semaphore and idle timepoint for a queue, creating the timeline on
    /// first use.
    pub(crate) fn account_timepoint(
        &self,
        device: &Arc<Device>,
        queue_ordinal: usize,
    ) -> Result<(TimelineSemaphore, u64)> {
        let mut accounts = self.accounts.lock();
        let key = AccountKey::new(device, queue_ordinal);
        if !accounts.contains_key(&key) {
            let sem = device.hal().create_semaphore(0)?;
            accounts.insert(
                key.clone(),
                Account {
                    sem,
                    idle_timepoint: 0,
                },
            );
        }
        let account = &accounts[&key];
        Ok((account.sem.clone(), account.idle_timepoint))
    }

    /// Allocate the signal timepoint for a coarse-fences submission over
    /// `affinity` and advance every implicated queue to it.
    ///
    /// The timepoint is one past the highest idle timepoint across the
    /// selected queues, which keeps each queue's sequence strictly
    /// increasing. The reported semaphore is the primary (lowest) queue's;
    /// the fence timepoints cover every implicated queue so each timeline
    /// stays observable by later waiters.
    pub(crate) fn allocate_coarse_signal(
        &self,
        affinity: &DeviceAffinity,
    ) -> Result<CoarseSignal> {
        let device = affinity
            .device()
            .ok_or_else(|| Error::invalid_argument("affinity names no device"))?;
        let primary = affinity
            .primary_queue_ordinal()
            .ok_or_else(|| Error::invalid_argument("affinity selects no queues"))?;

        let mut accounts = self.accounts.lock();
        let mut max_tip = 0;
        for queue in affinity.queue_ordinals() {
            let key = AccountKey::new(device, queue);
            if !accounts.contains_key(&key) {
                let sem = device.hal().create_semaphore(0)?;
                accounts.insert(
                    key,
                    Account {
                        sem,
                        idle_timepoint: 0,
                    },
                );
            }
        }
        for queue in affinity.queue_ordinals() {
            let key = AccountKey::new(device, queue);
            max_tip = max_tip.max(accounts[&key].idle_timepoint);
        }
        let signal_timepoint = max_tip + 1;
        let mut fence_timepoints = Vec::new();
        for queue in affinity.queue_ordinals() {
            let key = AccountKey::new(device, queue);
            let account = accounts.get_mut(&key).unwrap();
            account.idle_timepoint = signal_timepoint;
            fence_timepoints.push((account.sem.clone(), signal_timepoint));
        }
        let sem = accounts[&AccountKey::new(device, primary)].sem.clone();
        Ok(CoarseSignal {
            sem,
            timepoint: signal_timepoint,
            fence_timepoints,
        })
    }
}

/// Signal allocation for one coarse-fences submission.
pub(crate) struct CoarseSignal {
    /// Primary queue's semaphore, reported through `coarse_signal()`.
    pub sem: TimelineSemaphore,
    pub timepoint: u64,
    /// Every implicated queue at the signal timepoint.
    pub fence_timepoints: Vec<(TimelineSemaphore, u64)>,
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Fiber worker='{}' devices=[{}]>",
            self.worker.name(),
            self.names.join(", ")
        )
    }
}

/// A fiber plus a device affinity: the shorthand all placement APIs take.
#[derive(Clone)]
pub struct ScopedDevice {
    fiber: Arc<Fiber>,
    affinity: DeviceAffinity,
}

impl ScopedDevice {
    pub fn fiber(&self) -> &Arc<Fiber> {
        &self.fiber
    }

    pub fn affinity(&self) -> &DeviceAffinity {
        &self.affinity
    }

    pub fn raw_device(&self) -> Option<&Arc<Device>> {
        self.affinity.device()
    }
}

impl PartialEq for ScopedDevice {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fiber, &other.fiber) && self.affinity == other.affinity
    }
}

impl fmt::Debug for ScopedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopedDevice({})", self.affinity)
    }
}

impl fmt::Display for ScopedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.affinity)
    }
}

/// Anything that can contribute devices to a [`ScopedDevice`].
pub trait DeviceSelector {
    fn accumulate(&self, fiber: &Fiber, affinity: &mut DeviceAffinity) -> Result<()>;
}

fn fold_device(affinity: &mut DeviceAffinity, device: &Arc<Device>) -> Result<()> {
    if !affinity.add_device(device) {
        let existing = affinity
            .device()
            .map(|d| d.name().to_string())
            .unwrap_or_default();
        return Err(Error::invalid_argument(format!(
            "cannot combine device '{}' with '{existing}': scheduling spans \
             instances; submit separate invocations instead",
            device.name(),
        )));
    }
    Ok(())
}

impl DeviceSelector for &str {
    fn accumulate(&self, fiber: &Fiber, affinity: &mut DeviceAffinity) -> Result<()> {
        let device = fiber.raw_device(self)?;
        fold_device(affinity, &device)
    }
}

impl DeviceSelector for String {
    fn accumulate(&self, fiber: &Fiber, affinity: &mut DeviceAffinity) -> Result<()> {
        self.as_str().accumulate(fiber, affinity)
    }
}

impl DeviceSelector for usize {
    fn accumulate(&self, fiber: &Fiber, affinity: &mut DeviceAffinity) -> Result<()> {
        let device = fiber.raw_device_index(*self)?;
        fold_device(affinity, &device)
    }
}

impl DeviceSelector for Arc<Device> {
    fn accumulate(&self, _fiber: &Fiber, affinity: &mut DeviceAffinity) -> Result<()> {
        fold_device(affinity, self)
    }
}

impl DeviceSelector for &Arc<Device> {
    fn accumulate(&self, _fiber: &Fiber, affinity: &mut DeviceAffinity) -> Result<()> {
        fold_device(affinity, self)
    }
}

impl<A: DeviceSelector, B: DeviceSelector> DeviceSelector for (A, B) {
    fn accumulate(&self, fiber: &Fiber, affinity: &mut DeviceAffinity) -> Result<()> {
        self.0.accumulate(fiber, affinity)?;
        self.1.accumulate(fiber, affinity)
    }
}

impl<A: DeviceSelector, B: DeviceSelector, C: DeviceSelector> DeviceSelector for (A, B, C) {
    fn accumulate(&self, fiber: &Fiber, affinity: &mut DeviceAffinity) -> Result<()> {
        self.0.accumulate(fiber, affinity)?;
        self.1.accumulate(fiber, affinity)?;
        self.2.accumulate(fiber, affinity)
    }
}

impl<A, B, C, D> DeviceSelector for (A, B, C, D)
where
    A: DeviceSelector,
    B: DeviceSelector,
    C: DeviceSelector,
    D: DeviceSelector,
{
    fn accumulate(&self, fiber: &Fiber, affinity: &mut DeviceAffinity) -> Result<()> {
        self.0.accumulate(fiber, affinity)?;
        self.1.accumulate(fiber, affinity)?;
        self.2.accumulate(fiber, affinity)?;
        self.3.accumulate(fiber, affinity)
    }
}

impl<S: DeviceSelector> DeviceSelector for &[S] {
    fn accumulate(&self, fiber: &Fiber, affinity: &mut DeviceAffinity) -> Result<()> {
        for selector in self.iter() {
            selector.accumulate(fiber, affinity)?;
        }
        Ok(())
    }
}
