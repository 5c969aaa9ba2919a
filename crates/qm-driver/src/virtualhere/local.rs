use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use qm_domain::DriverKind;
use regex::Regex;
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::error::LocalDriverError;
use crate::local::LocalDriver;

const SETUP_INFO: &str = "To use these VirtualHere resources you must have the VirtualHere client \
installed and running. You can download the client at https://virtualhere.com/usb_client_software";
const MAC_APP_FRAGMENT: &str = "VirtualHere.app/Contents/MacOS/VirtualHere";

fn ok_matcher() -> Regex {
    Regex::new(r"(?m)^OK$").expect("valid regex")
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).map(|dir| dir.join(name)).find(|p| p.is_file())
}

fn linux_client_name() -> String {
    format!("vhclient{}", std::env::consts::ARCH)
}

async fn run(command: &str, args: &[&str]) -> Result<std::process::Output, LocalDriverError> {
    Ok(Command::new(command).args(args).output().await?)
}

async fn mac_find_vh() -> Option<String> {
    let output = run("pgrep", &["-lf", MAC_APP_FRAGMENT]).await.ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout.lines().next()?;
    let re = Regex::new(r"^\d+\s+(?P<cmd>.+VirtualHere\.app/Contents/MacOS/VirtualHere)").ok()?;
    re.captures(first_line).map(|c| c["cmd"].to_string())
}

/// Runs on the client machine, driving VirtualHere's command-line client.
/// Grounded on `USB_Quartermaster_VirtualHere.driver.VirtualHereLocal`.
pub struct VirtualHereLocalDriver {
    host_address: String,
    device_address: String,
    vh_path: RwLock<Option<PathBuf>>,
}

impl VirtualHereLocalDriver {
    pub fn new(host_address: impl Into<String>, device_address: impl Into<String>) -> Self {
        Self {
            host_address: host_address.into(),
            device_address: device_address.into(),
            vh_path: RwLock::new(None),
        }
    }

    async fn setup_mac_client(&self) -> Result<(), LocalDriverError> {
        if mac_find_vh().await.is_none() {
            run("open", &["-ga", "VirtualHere"])
                .await?
                .status
                .success()
                .then_some(())
                .ok_or_else(|| LocalDriverError::CommandNotFound("VirtualHere.app".to_string()))?;
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        let path = mac_find_vh()
            .await
            .ok_or_else(|| LocalDriverError::CommandNotFound("VirtualHere.app".to_string()))?;
        *self.vh_path.write().await = Some(PathBuf::from(path));
        Ok(())
    }

    async fn setup_linux_client(&self) -> Result<(), LocalDriverError> {
        find_in_path("sudo").ok_or_else(|| LocalDriverError::CommandNotFound("sudo".to_string()))?;
        let client_name = linux_client_name();
        let vh_path = find_in_path(&client_name)
            .ok_or_else(|| LocalDriverError::CommandNotFound(client_name.clone()))?;

        let running = run("pgrep", &[&client_name]).await.map(|o| o.status.success()).unwrap_or(false);
        if !running {
            let path_str = vh_path.to_string_lossy().into_owned();
            run("sudo", &[&path_str, "-n"]).await?;
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        *self.vh_path.write().await = Some(vh_path);
        Ok(())
    }

    async fn run_vh(&self, args: &[&str]) -> Result<String, LocalDriverError> {
        let path = self
            .vh_path
            .read()
            .await
            .clone()
            .ok_or_else(|| LocalDriverError::CommandNotFound("VirtualHere client".to_string()))?;
        let output = Command::new(&path).args(args).output().await?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if !output.status.success() {
            return Err(LocalDriverError::CommandFailed {
                command: format!("{} {}", path.display(), args.join(" ")),
                rc: output.status.code().unwrap_or(-1),
                stdout: combined,
                stderr: String::new(),
            });
        }
        Ok(combined)
    }

    async fn attach_hub(&self) -> Result<(), LocalDriverError> {
        let hub_list = self.run_vh(&["-t", "MANUAL HUB LIST"]).await?;
        if hub_list.lines().any(|line| line.starts_with(&self.host_address)) {
            return Ok(());
        }
        let output = self
            .run_vh(&["-t", &format!("MANUAL HUB ADD,{}", self.host_address)])
            .await?;
        if !ok_matcher().is_match(&output) {
            return Err(LocalDriverError::CommandFailed {
                command: format!("MANUAL HUB ADD,{}", self.host_address),
                rc: 0,
                stdout: output,
                stderr: String::new(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LocalDriver for VirtualHereLocalDriver {
    fn identifier(&self) -> DriverKind {
        DriverKind::VirtualHere
    }

    async fn preflight_check(&self) -> Result<(), LocalDriverError> {
        match std::env::consts::OS {
            "macos" => self.setup_mac_client().await,
            "linux" => self.setup_linux_client().await,
            other => Err(LocalDriverError::UnsupportedPlatform(other.to_string())),
        }
    }

    async fn async_init(&self) -> Result<(), LocalDriverError> {
        self.attach_hub().await
    }

    async fn connect(&self, _device_address: &str) -> Result<(), LocalDriverError> {
        let output = self.run_vh(&["-t", &format!("USE,{}", self.device_address)]).await?;
        if !ok_matcher().is_match(&output) {
            return Err(LocalDriverError::CommandFailed {
                command: format!("USE,{}", self.device_address),
                rc: 0,
                stdout: output,
                stderr: String::new(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self, _device_address: &str) -> Result<(), LocalDriverError> {
        let output = self.run_vh(&["-t", &format!("STOP USING,{}", self.device_address)]).await?;
        if !ok_matcher().is_match(&output) {
            return Err(LocalDriverError::CommandFailed {
                command: format!("STOP USING,{}", self.device_address),
                rc: 0,
                stdout: output,
                stderr: String::new(),
            });
        }
        Ok(())
    }

    async fn connected(&self, _device_address: &str) -> Result<bool, LocalDriverError> {
        let output = self.run_vh(&["-t", &format!("DEVICE INFO,{}", self.device_address)]).await?;
        Ok(!output.contains("IN USE BY: NO ONE"))
    }

    fn setup_information(&self) -> &'static str {
        SETUP_INFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_matcher_matches_bare_ok_line() {
        assert!(ok_matcher().is_match("some preamble\nOK\n"));
        assert!(!ok_matcher().is_match("NOT OK"));
    }

    #[test]
    fn linux_client_name_uses_arch() {
        assert!(linux_client_name().starts_with("vhclient"));
    }
}
