use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qm_communicator::Communicator;
use qm_domain::{Device, DriverKind, HostType, RemoteHost};

use super::xml::parse_client_state;
use crate::error::HostError;
use crate::host::{DeviceObservation, HostDriver};

const SERVICE_DOWN_FRAGMENTS: [&str; 3] = [
    "IPC client, server response open failed",
    "An existing client is not running.",
    "No response from IPC server",
];

/// One device as last reported by `GET CLIENT STATE`, keyed in
/// [`VirtualHereHost::get_states`] by `{hostname}.{device_address}`.
/// Grounded on `USB_Quartermaster_VirtualHere.driver.DeviceInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub nickname: String,
    /// So far as the original driver could tell: 1=Unused, 3=Used.
    pub shared: bool,
}

fn vh_client_cmd(host: &RemoteHost) -> String {
    if let Some(cmd) = host.config.get("virtualhere_command").and_then(|v| v.as_str()) {
        return cmd.to_string();
    }
    match host.host_type {
        HostType::LinuxAmd64 => "vhclientx86_64".to_string(),
        HostType::Windows => "vhui64.exe".to_string(),
        HostType::Darwin => "/Applications/VirtualHere.app/Contents/MacOS/VirtualHere".to_string(),
    }
}

fn client_service_not_running(output: &str) -> bool {
    SERVICE_DOWN_FRAGMENTS.iter().any(|fragment| output.contains(fragment))
}

pub struct VirtualHereHost {
    communicator: Arc<dyn Communicator>,
}

impl VirtualHereHost {
    pub fn new(communicator: Arc<dyn Communicator>) -> Self {
        Self { communicator }
    }

    async fn ssh(&self, host: &RemoteHost, command: &str) -> Result<String, HostError> {
        let response = self
            .communicator
            .execute_command(host, command)
            .await
            .map_err(|e| HostError::Connection(e.to_string()))?;
        if response.return_code != 0 {
            return Err(HostError::Command(format!(
                "host={} command={command} rc={} stdout={} stderr={}",
                host.address, response.return_code, response.stdout, response.stderr
            )));
        }
        Ok(response.stdout)
    }

    /// Runs one VirtualHere client command (`-t "<command>"`), applying the
    /// Windows-specific shell wrapper needed to wait for the client's output.
    pub(crate) async fn vh_command(&self, host: &RemoteHost, command: &str) -> Result<String, HostError> {
        let client = vh_client_cmd(host);
        let full_command = if matches!(host.host_type, HostType::Windows) {
            format!(
                "start \"quartermaster\" /W {client} -t \"{command}\" -r \"quartermaster.tmp\" & type quartermaster.tmp & del quartermaster.tmp"
            )
        } else {
            format!("{client} -t \"{command}\"")
        };

        match self.ssh(host, &full_command).await {
            Ok(stdout) => Ok(stdout),
            Err(HostError::Command(message)) if client_service_not_running(&message) => {
                Err(HostError::VirtualHereServiceDown(host.address.clone()))
            }
            Err(e) => Err(e),
        }
    }

    async fn state_data(&self, host: &RemoteHost) -> Result<super::xml::ClientState, HostError> {
        let stdout = self.vh_command(host, "GET CLIENT STATE").await?;
        parse_client_state(&stdout)
    }

    pub(crate) async fn get_states(&self, host: &RemoteHost) -> Result<HashMap<String, DeviceInfo>, HostError> {
        let mut state = self.state_data(host).await?;

        // Sometimes the client doesn't have the local hub registered; add one
        // and retry once before giving up.
        if state.localhost_hostname.is_none() {
            let response = self.vh_command(host, "MANUAL HUB ADD,127.0.0.1").await?;
            if response.starts_with("OK") {
                state = self.state_data(host).await?;
            } else {
                return Err(HostError::VirtualHereNoLocalHub(host.address.clone()));
            }
        }

        let hostname = state
            .localhost_hostname
            .ok_or_else(|| HostError::VirtualHereNoLocalHub(host.address.clone()))?;

        let mut devices = HashMap::new();
        for raw in state.devices {
            let address = format!("{hostname}.{}", raw.address);
            devices.insert(
                address,
                DeviceInfo {
                    nickname: raw.nickname,
                    shared: raw.state != "1",
                },
            );
        }
        Ok(devices)
    }
}

#[async_trait]
impl HostDriver for VirtualHereHost {
    fn identifier(&self) -> DriverKind {
        DriverKind::VirtualHere
    }

    async fn is_reachable(&self, host: &RemoteHost) -> bool {
        self.communicator.is_reachable(host).await
    }

    async fn observe_devices(
        &self,
        host: &RemoteHost,
        devices: &[Device],
    ) -> Result<Vec<DeviceObservation>, HostError> {
        let states = self.get_states(host).await?;
        Ok(devices
            .iter()
            .map(|d| {
                let address = d.config.get("device_address").and_then(|v| v.as_str()).unwrap_or_default();
                DeviceObservation {
                    device_id: d.id.clone(),
                    online: states.contains_key(address),
                }
            })
            .collect())
    }

    async fn observed_nicknames(
        &self,
        host: &RemoteHost,
        devices: &[Device],
    ) -> Result<HashMap<qm_domain::DeviceId, String>, HostError> {
        let states = self.get_states(host).await?;
        Ok(devices
            .iter()
            .filter_map(|d| {
                let address = d.config.get("device_address").and_then(|v| v.as_str())?;
                states.get(address).map(|info| (d.id.clone(), info.nickname.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_service_not_running_matches_known_fragments() {
        assert!(client_service_not_running("No response from IPC server"));
        assert!(!client_service_not_running("OK"));
    }

    #[test]
    fn vh_client_cmd_honors_config_override() {
        let host = RemoteHost {
            id: qm_domain::HostId::new("h1"),
            address: "10.0.0.1".into(),
            communicator: qm_domain::CommunicatorKind::Ssh,
            host_type: HostType::LinuxAmd64,
            config: serde_json::json!({"virtualhere_command": "/custom/vh"}),
        };
        assert_eq!(vh_client_cmd(&host), "/custom/vh");
    }

    #[test]
    fn vh_client_cmd_defaults_by_host_type() {
        let mut host = RemoteHost {
            id: qm_domain::HostId::new("h1"),
            address: "10.0.0.1".into(),
            communicator: qm_domain::CommunicatorKind::Ssh,
            host_type: HostType::Darwin,
            config: serde_json::json!({}),
        };
        assert!(vh_client_cmd(&host).contains("VirtualHere.app"));
        host.host_type = HostType::Windows;
        assert_eq!(vh_client_cmd(&host), "vhui64.exe");
    }
}
