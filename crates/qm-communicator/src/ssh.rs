use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use qm_domain::RemoteHost;
use serde::Deserialize;
use ssh2::Session;

use crate::communicator::{CommandResponse, Communicator};
use crate::error::CommunicatorError;

/// `RemoteHost.config` shape required by the SSH communicator.
/// Grounded on `USB_Quartermaster_SSH.communicator.SSH.CONFIGURATION_KEYS`.
#[derive(Debug, Clone, Deserialize)]
struct SshHostConfig {
    host_key: String,
    host_key_type: String,
    username: String,
    private_key: String,
    #[serde(default)]
    private_key_type: Option<String>,
}

fn parse_config(host: &RemoteHost) -> Result<SshHostConfig, CommunicatorError> {
    serde_json::from_value(host.config.clone()).map_err(|e| CommunicatorError::InvalidKey {
        address: host.address.clone(),
        message: format!("malformed SSH config: {e}"),
    })
}

/// Compares a handshake-presented host key against the base64-encoded key
/// recorded in `RemoteHost.config`. Separated from `connect_and_auth` so the
/// pinning logic is testable without a live TCP connection.
fn verify_host_key(
    presented: &[u8],
    expected_b64: &str,
    expected_key_type: &str,
    address: &str,
) -> Result<(), CommunicatorError> {
    let expected_key = BASE64.decode(expected_b64.trim()).map_err(|e| CommunicatorError::InvalidKey {
        address: address.to_string(),
        message: format!("host_key is not valid base64: {e}"),
    })?;
    if presented != expected_key.as_slice() {
        return Err(CommunicatorError::ConnectionFailed {
            address: address.to_string(),
            message: format!("host key mismatch for {address} (expected type {expected_key_type})"),
        });
    }
    Ok(())
}

/// SSH transport for remote host commands. ssh2 (libssh2) is a synchronous,
/// blocking library; every call is wrapped in `tokio::task::spawn_blocking`
/// so it doesn't stall the executor, mirroring how other blocking transports
/// in this workspace are kept off the async runtime's worker threads.
pub struct SshCommunicator {
    connect_timeout: Duration,
    exec_timeout: Duration,
}

impl SshCommunicator {
    pub fn new(connect_timeout: Duration, exec_timeout: Duration) -> Self {
        Self { connect_timeout, exec_timeout }
    }

    fn connect_and_auth(&self, host: &RemoteHost) -> Result<Session, CommunicatorError> {
        let config = parse_config(host)?;

        let tcp = TcpStream::connect_timeout(
            &format!("{}:22", host.address)
                .parse()
                .map_err(|e| CommunicatorError::ConnectionFailed {
                    address: host.address.clone(),
                    message: format!("invalid address: {e}"),
                })?,
            self.connect_timeout,
        )
        .map_err(|e| CommunicatorError::ConnectionFailed {
            address: host.address.clone(),
            message: e.to_string(),
        })?;
        tcp.set_read_timeout(Some(self.exec_timeout)).ok();

        let mut session = Session::new().map_err(|e| CommunicatorError::ConnectionFailed {
            address: host.address.clone(),
            message: e.to_string(),
        })?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| CommunicatorError::ConnectionFailed {
            address: host.address.clone(),
            message: format!("SSH handshake failed: {e}"),
        })?;

        // Host-key pinning: compare the key presented during handshake against
        // the one recorded for this host. We never fall back to an
        // auto-accept/trust-on-first-use policy.
        let (presented_key, _kind) =
            session.host_key().ok_or_else(|| CommunicatorError::ConnectionFailed {
                address: host.address.clone(),
                message: "server did not present a host key".to_string(),
            })?;
        verify_host_key(presented_key, &config.host_key, &config.host_key_type, &host.address)?;

        session
            .userauth_pubkey_memory(&config.username, None, &config.private_key, None)
            .map_err(|e| CommunicatorError::ConnectionFailed {
                address: host.address.clone(),
                message: format!("public key auth failed: {e}"),
            })?;

        Ok(session)
    }

    fn run_blocking(&self, host: &RemoteHost, command: &str) -> Result<CommandResponse, CommunicatorError> {
        let session = self.connect_and_auth(host)?;
        let mut channel = session.channel_session().map_err(|e| CommunicatorError::ExecutionFailed {
            address: host.address.clone(),
            message: e.to_string(),
        })?;
        channel.exec(command).map_err(|e| CommunicatorError::ExecutionFailed {
            address: host.address.clone(),
            message: e.to_string(),
        })?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| CommunicatorError::ExecutionFailed {
                address: host.address.clone(),
                message: format!("reading stdout: {e}"),
            })?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| CommunicatorError::ExecutionFailed {
                address: host.address.clone(),
                message: format!("reading stderr: {e}"),
            })?;

        channel.wait_close().ok();
        let return_code = channel.exit_status().unwrap_or(-1);

        if return_code != 0 {
            tracing::info!(
                host = %host.address, command, return_code, stdout = %stdout, stderr = %stderr,
                "ssh command returned non-zero exit status"
            );
        }

        Ok(CommandResponse { return_code, stdout, stderr })
    }
}

#[async_trait]
impl Communicator for SshCommunicator {
    fn identifier(&self) -> &'static str {
        "SSH"
    }

    async fn execute_command(
        &self,
        host: &RemoteHost,
        command: &str,
    ) -> Result<CommandResponse, CommunicatorError> {
        let host = host.clone();
        let command = command.to_string();
        let connect_timeout = self.connect_timeout;
        let exec_timeout = self.exec_timeout;
        tokio::task::spawn_blocking(move || {
            let communicator = SshCommunicator::new(connect_timeout, exec_timeout);
            communicator.run_blocking(&host, &command)
        })
        .await
        .map_err(|e| CommunicatorError::JoinError(e.to_string()))?
    }

    async fn is_reachable(&self, host: &RemoteHost) -> bool {
        let probe = if matches!(host.host_type, qm_domain::HostType::Windows) {
            "date /t"
        } else {
            "true"
        };
        self.execute_command(host, probe).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qm_domain::{CommunicatorKind, HostId, HostType};

    fn host_with_config(config: serde_json::Value) -> RemoteHost {
        RemoteHost {
            id: HostId::new("h1"),
            address: "198.51.100.10".to_string(),
            communicator: CommunicatorKind::Ssh,
            host_type: HostType::LinuxAmd64,
            config,
        }
    }

    #[test]
    fn parse_config_rejects_missing_fields() {
        let host = host_with_config(serde_json::json!({"username": "svc"}));
        let err = parse_config(&host).unwrap_err();
        assert!(matches!(err, CommunicatorError::InvalidKey { .. }));
    }

    #[test]
    fn parse_config_accepts_full_shape() {
        let host = host_with_config(serde_json::json!({
            "host_key": "aGVsbG8=",
            "host_key_type": "ssh-ed25519",
            "username": "svc",
            "private_key": "-----BEGIN KEY-----",
            "private_key_type": "Ed25519",
        }));
        let config = parse_config(&host).unwrap();
        assert_eq!(config.username, "svc");
    }

    #[test]
    fn verify_host_key_accepts_matching_key() {
        let expected = BASE64.encode(b"fake-host-key-bytes");
        assert!(verify_host_key(b"fake-host-key-bytes", &expected, "ssh-ed25519", "h1").is_ok());
    }

    #[test]
    fn verify_host_key_rejects_mismatch() {
        let expected = BASE64.encode(b"fake-host-key-bytes");
        let err = verify_host_key(b"different-bytes", &expected, "ssh-ed25519", "h1").unwrap_err();
        assert!(matches!(err, CommunicatorError::ConnectionFailed { .. }));
    }

    #[test]
    fn verify_host_key_rejects_invalid_base64() {
        let err = verify_host_key(b"anything", "not base64!!", "ssh-ed25519", "h1").unwrap_err();
        assert!(matches!(err, CommunicatorError::InvalidKey { .. }));
    }
}
