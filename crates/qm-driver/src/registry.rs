use std::collections::HashMap;
use std::sync::Arc;

use qm_domain::DriverKind;

use crate::device::DeviceDriver;
use crate::error::DriverError;
use crate::host::HostDriver;
use crate::local::LocalDriver;

/// Looks up the host/device driver pair for a `Device.driver` identifier.
/// An `Arc<dyn Driver>` map keyed by target, with `register`/lookup methods
/// for each side, keyed by `DriverKind` rather than a cloud provider name.
#[derive(Default)]
pub struct DriverRegistry {
    host_drivers: HashMap<DriverKind, Arc<dyn HostDriver>>,
    device_drivers: HashMap<DriverKind, Arc<dyn DeviceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: DriverKind,
        host: Arc<dyn HostDriver>,
        device: Arc<dyn DeviceDriver>,
    ) -> &mut Self {
        self.host_drivers.insert(kind, host);
        self.device_drivers.insert(kind, device);
        self
    }

    pub fn host_driver(&self, kind: DriverKind) -> Result<Arc<dyn HostDriver>, DriverError> {
        self.host_drivers
            .get(&kind)
            .cloned()
            .ok_or_else(|| DriverError::NotRegistered(kind.to_string()))
    }

    pub fn device_driver(&self, kind: DriverKind) -> Result<Arc<dyn DeviceDriver>, DriverError> {
        self.device_drivers
            .get(&kind)
            .cloned()
            .ok_or_else(|| DriverError::NotRegistered(kind.to_string()))
    }

    pub fn registered_kinds(&self) -> Vec<DriverKind> {
        self.host_drivers.keys().copied().collect()
    }
}

/// Client-side analogue of [`DriverRegistry`]: one [`LocalDriver`] per
/// identifier, selected by the `--driver` the client is invoked with.
#[derive(Default)]
pub struct LocalDriverRegistry {
    drivers: HashMap<DriverKind, Arc<dyn LocalDriver>>,
}

impl LocalDriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: DriverKind, driver: Arc<dyn LocalDriver>) -> &mut Self {
        self.drivers.insert(kind, driver);
        self
    }

    pub fn get(&self, kind: DriverKind) -> Result<Arc<dyn LocalDriver>, DriverError> {
        self.drivers
            .get(&kind)
            .cloned()
            .ok_or_else(|| DriverError::NotRegistered(kind.to_string()))
    }
}
