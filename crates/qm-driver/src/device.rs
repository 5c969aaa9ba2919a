use async_trait::async_trait;
use qm_domain::{Device, RemoteHost};

use crate::error::DeviceError;

/// Acts on a single device on a remote host. `share`/`unshare` are idempotent
/// wrappers around `start_sharing`/`stop_sharing` guarded by `is_shared` —
/// matching `AbstractShareableDeviceDriver.share`/`.unshare()`, which only
/// calls the underlying start/stop when the current state disagrees.
#[async_trait]
pub trait DeviceDriver: Send + Sync + 'static {
    async fn is_shared(&self, host: &RemoteHost, device: &Device) -> Result<bool, DeviceError>;

    async fn start_sharing(&self, host: &RemoteHost, device: &Device) -> Result<(), DeviceError>;

    async fn stop_sharing(&self, host: &RemoteHost, device: &Device) -> Result<(), DeviceError>;

    /// VirtualHere renames the device on the host to match `Device.name`;
    /// USBIP has no such concept, so the default is a no-op.
    async fn set_nickname(&self, _host: &RemoteHost, _device: &Device) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn share(&self, host: &RemoteHost, device: &Device) -> Result<(), DeviceError> {
        if !self.is_shared(host, device).await? {
            tracing::info!(device_id = %device.id, "sharing device");
            self.start_sharing(host, device).await?;
        }
        Ok(())
    }

    async fn unshare(&self, host: &RemoteHost, device: &Device) -> Result<(), DeviceError> {
        if self.is_shared(host, device).await? {
            tracing::info!(device_id = %device.id, "un-sharing device");
            self.stop_sharing(host, device).await?;
        }
        Ok(())
    }

    /// Renew a share that may have been lost for some reason. Unlike `share`,
    /// this unconditionally re-issues `start_sharing`.
    async fn refresh(&self, host: &RemoteHost, device: &Device) -> Result<(), DeviceError> {
        self.start_sharing(host, device).await
    }
}
