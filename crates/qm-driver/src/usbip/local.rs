use std::path::PathBuf;

use async_trait::async_trait;
use qm_domain::DriverKind;
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::error::LocalDriverError;
use crate::local::LocalDriver;

const SETUP_INFO: &str = "Linux is the only supported platform for USBIP. To use these devices on a \
Debian/Ubuntu based host you need to run once, as root: apt-get install linux-tools-generic; \
modprobe vhci-hcd; echo 'vhci-hcd' >> /etc/modules";

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).map(|dir| dir.join(name)).find(|p| p.is_file())
}

/// Parses `usbip port` output, returning the port number the given bus id is
/// attached on, if any. Grounded on `USB_Quartermaster_Usbip.driver.UsbipLocal.get_port`.
fn parse_port(output: &str, bus_id: &str) -> Option<u32> {
    let needle = format!("/{bus_id}\n");
    output
        .split("\nPort ")
        .skip(1)
        .find(|chunk| chunk.contains(&needle))
        .and_then(|chunk| chunk.split(':').next())
        .and_then(|p| p.trim().parse().ok())
}

pub struct UsbipLocalDriver {
    host_address: String,
    bus_id: String,
    usbip_path: RwLock<Option<PathBuf>>,
}

impl UsbipLocalDriver {
    pub fn new(host_address: impl Into<String>, bus_id: impl Into<String>) -> Self {
        Self {
            host_address: host_address.into(),
            bus_id: bus_id.into(),
            usbip_path: RwLock::new(None),
        }
    }

    async fn run_usbip(&self, args: &[&str]) -> Result<String, LocalDriverError> {
        let path = self
            .usbip_path
            .read()
            .await
            .clone()
            .ok_or_else(|| LocalDriverError::CommandNotFound("usbip".to_string()))?;

        let output = Command::new("sudo")
            .arg(&path)
            .args(args)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(LocalDriverError::CommandFailed {
                command: format!("usbip {}", args.join(" ")),
                rc: output.status.code().unwrap_or(-1),
                stdout,
                stderr,
            });
        }
        Ok(stdout)
    }

    async fn get_port(&self) -> Result<Option<u32>, LocalDriverError> {
        let output = self.run_usbip(&["port"]).await?;
        Ok(parse_port(&output, &self.bus_id))
    }
}

#[async_trait]
impl LocalDriver for UsbipLocalDriver {
    fn identifier(&self) -> DriverKind {
        DriverKind::Usbip
    }

    async fn preflight_check(&self) -> Result<(), LocalDriverError> {
        if !cfg!(target_os = "linux") {
            return Err(LocalDriverError::UnsupportedPlatform(
                "'usbip' is only available on Linux".to_string(),
            ));
        }
        let path = find_in_path("usbip").ok_or_else(|| LocalDriverError::CommandNotFound("usbip".to_string()))?;
        *self.usbip_path.write().await = Some(path);
        Ok(())
    }

    async fn connect(&self, _device_address: &str) -> Result<(), LocalDriverError> {
        self.run_usbip(&["attach", "-r", &self.host_address, "-b", &self.bus_id]).await?;
        Ok(())
    }

    async fn disconnect(&self, _device_address: &str) -> Result<(), LocalDriverError> {
        if let Some(port) = self.get_port().await? {
            self.run_usbip(&["detach", "-p", &port.to_string()]).await?;
        }
        Ok(())
    }

    async fn connected(&self, _device_address: &str) -> Result<bool, LocalDriverError> {
        Ok(self.get_port().await?.is_some())
    }

    fn setup_information(&self) -> &'static str {
        SETUP_INFO
    }
}
