use std::collections::HashMap;

use async_trait::async_trait;
use qm_domain::{Device, DeviceId, DriverKind, RemoteHost};

use crate::error::HostError;

/// What a host-side driver observed about one device during a reconcile pass.
/// `qm-scheduler` persists `online` and decides whether a share/unshare call
/// is needed based on the matching `Resource.in_use()`; the driver layer
/// itself never touches the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceObservation {
    pub device_id: DeviceId,
    pub online: bool,
}

/// Coordinates operations that act on many devices on one host at once
/// (status polling, nickname checks). Grounded on
/// `AbstractRemoteHostDriver` (`USB_Quartermaster_common.Driver`).
#[async_trait]
pub trait HostDriver: Send + Sync + 'static {
    fn identifier(&self) -> DriverKind;

    async fn is_reachable(&self, host: &RemoteHost) -> bool;

    /// Poll every device's online/offline state in as few round trips to the
    /// host as the underlying protocol allows.
    async fn observe_devices(
        &self,
        host: &RemoteHost,
        devices: &[Device],
    ) -> Result<Vec<DeviceObservation>, HostError>;

    /// Observed device nickname, for drivers whose remote side can rename a
    /// device (VirtualHere). Default is empty: USBIP has no nickname concept,
    /// so the nickname-maintenance job simply finds nothing to compare.
    async fn observed_nicknames(
        &self,
        _host: &RemoteHost,
        _devices: &[Device],
    ) -> Result<HashMap<DeviceId, String>, HostError> {
        Ok(HashMap::new())
    }
}
