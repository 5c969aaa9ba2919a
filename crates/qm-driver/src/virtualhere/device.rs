use std::sync::Arc;

use async_trait::async_trait;
use qm_domain::{Device, RemoteHost};

use super::host::VirtualHereHost;
use crate::device::DeviceDriver;
use crate::error::DeviceError;

fn device_address(device: &Device) -> Result<&str, DeviceError> {
    device
        .config
        .get("device_address")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DeviceError::NotFound(device.id.to_string()))
}

pub struct VirtualHereDevice {
    host: Arc<VirtualHereHost>,
}

impl VirtualHereDevice {
    pub fn new(host: Arc<VirtualHereHost>) -> Self {
        Self { host }
    }

    pub async fn nickname(&self, host: &RemoteHost, device: &Device) -> Result<String, DeviceError> {
        let address = device_address(device)?;
        let states = self.host.get_states(host).await?;
        states
            .get(address)
            .map(|info| info.nickname.clone())
            .ok_or_else(|| DeviceError::NotFound(address.to_string()))
    }
}

#[async_trait]
impl DeviceDriver for VirtualHereDevice {
    async fn is_shared(&self, host: &RemoteHost, device: &Device) -> Result<bool, DeviceError> {
        let address = device_address(device)?;
        let states = self.host.get_states(host).await?;
        states
            .get(address)
            .map(|info| info.shared)
            .ok_or_else(|| DeviceError::NotFound(address.to_string()))
    }

    /// VirtualHere devices are always shared; access is controlled by the
    /// use_password instead, so there is nothing to do here.
    async fn start_sharing(&self, _host: &RemoteHost, _device: &Device) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn stop_sharing(&self, host: &RemoteHost, device: &Device) -> Result<(), DeviceError> {
        let address = device_address(device)?;
        self.host.vh_command(host, &format!("STOP USING,{address}")).await?;
        Ok(())
    }

    async fn set_nickname(&self, host: &RemoteHost, device: &Device) -> Result<(), DeviceError> {
        let address = device_address(device)?;
        self.host
            .vh_command(host, &format!("DEVICE RENAME,{address},{}", device.name))
            .await?;
        Ok(())
    }
}
