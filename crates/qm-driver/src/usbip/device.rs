use std::sync::Arc;

use async_trait::async_trait;
use qm_domain::{Device, RemoteHost};

use super::host::UsbipHost;
use crate::device::DeviceDriver;
use crate::error::DeviceError;

fn bus_id(device: &Device) -> Result<&str, DeviceError> {
    device
        .config
        .get("bus_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DeviceError::NotFound(device.id.to_string()))
}

pub struct UsbipDevice {
    host: Arc<UsbipHost>,
}

impl UsbipDevice {
    pub fn new(host: Arc<UsbipHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl DeviceDriver for UsbipDevice {
    async fn is_shared(&self, host: &RemoteHost, device: &Device) -> Result<bool, DeviceError> {
        let id = bus_id(device)?;
        let shared = self.host.shared_bus_ids(host).await?;
        Ok(shared.contains(id))
    }

    async fn start_sharing(&self, host: &RemoteHost, device: &Device) -> Result<(), DeviceError> {
        let id = bus_id(device)?;
        self.host.run(host, &format!("sudo usbip bind -b {id}")).await?;
        Ok(())
    }

    async fn stop_sharing(&self, host: &RemoteHost, device: &Device) -> Result<(), DeviceError> {
        let id = bus_id(device)?;
        self.host.run(host, &format!("sudo usbip unbind -b {id}")).await?;
        Ok(())
    }
}
