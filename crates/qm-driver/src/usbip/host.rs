use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use qm_communicator::Communicator;
use qm_domain::{Device, DriverKind, RemoteHost};

use crate::error::HostError;
use crate::host::{DeviceObservation, HostDriver};

const USBIPD_NOT_RUNNING: &str = "error: could not connect to localhost:3240";
const MISSING_KERNEL_MODULE: &str = "error: unable to bind device on ";
const SHARED_BUS_IDS_PATH: &str = "/sys/bus/usb/drivers/usbip-host/";

/// Parses `usbip list -l` output into the set of bus ids currently exported
/// on the remote host. Grounded on
/// `USB_Quartermaster_Usbip.driver.UsbipOverSSHHost.get_device_list`.
fn parse_device_list(stdout: &str) -> HashSet<String> {
    let mut devices = HashSet::new();
    for chunk in stdout.split(" - ").skip(1) {
        if let Some(bus_id) = chunk.split_whitespace().nth(1) {
            devices.insert(bus_id.to_string());
        }
    }
    devices
}

/// Parses `ls -1 /sys/bus/usb/drivers/usbip-host/` output into the set of bus
/// ids currently bound (shared) on the remote host.
fn parse_shared_bus_ids(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .filter(|line| line.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(|line| line.to_string())
        .collect()
}

pub struct UsbipHost {
    communicator: Arc<dyn Communicator>,
}

impl UsbipHost {
    pub fn new(communicator: Arc<dyn Communicator>) -> Self {
        Self { communicator }
    }

    pub(crate) async fn run(&self, host: &RemoteHost, command: &str) -> Result<String, HostError> {
        let response = self
            .communicator
            .execute_command(host, command)
            .await
            .map_err(|e| HostError::Connection(e.to_string()))?;
        if response.return_code != 0 {
            if response.stderr.contains(USBIPD_NOT_RUNNING) {
                return Err(HostError::UsbipdNotRunning(host.address.clone()));
            }
            if response.stderr.contains(MISSING_KERNEL_MODULE) {
                return Err(HostError::UsbipMissingKernelModule(host.address.clone()));
            }
            return Err(HostError::Command(format!(
                "host={} command={command} rc={} stdout={} stderr={}",
                host.address, response.return_code, response.stdout, response.stderr
            )));
        }
        Ok(response.stdout)
    }

    pub(crate) async fn shared_bus_ids(&self, host: &RemoteHost) -> Result<HashSet<String>, HostError> {
        let stdout = self.run(host, &format!("ls -1 {SHARED_BUS_IDS_PATH}")).await?;
        Ok(parse_shared_bus_ids(&stdout))
    }

    async fn device_list(&self, host: &RemoteHost) -> Result<HashSet<String>, HostError> {
        let stdout = self.run(host, "usbip list -l").await?;
        Ok(parse_device_list(&stdout))
    }
}

#[async_trait]
impl HostDriver for UsbipHost {
    fn identifier(&self) -> DriverKind {
        DriverKind::Usbip
    }

    async fn is_reachable(&self, host: &RemoteHost) -> bool {
        self.communicator.is_reachable(host).await
    }

    async fn observe_devices(
        &self,
        host: &RemoteHost,
        devices: &[Device],
    ) -> Result<Vec<DeviceObservation>, HostError> {
        let remote_devices = self.device_list(host).await?;
        Ok(devices
            .iter()
            .map(|d| {
                let bus_id = d.config.get("bus_id").and_then(|v| v.as_str()).unwrap_or_default();
                DeviceObservation {
                    device_id: d.id.clone(),
                    online: remote_devices.contains(bus_id),
                }
            })
            .collect())
    }
}
