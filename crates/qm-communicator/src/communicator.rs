use async_trait::async_trait;
use qm_domain::RemoteHost;

use crate::error::CommunicatorError;

/// Result of running a single command on a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResponse {
    pub fn succeeded(&self) -> bool {
        self.return_code == 0
    }
}

/// How the server talks to a `RemoteHost`'s command line. Every driver's host
/// side (qm-driver) goes through a `Communicator` rather than opening its own
/// transport, so a new transport (e.g. a future WinRM communicator) only needs
/// an impl of this trait to be usable by every driver.
#[async_trait]
pub trait Communicator: Send + Sync + 'static {
    fn identifier(&self) -> &'static str;

    async fn execute_command(
        &self,
        host: &RemoteHost,
        command: &str,
    ) -> Result<CommandResponse, CommunicatorError>;

    async fn is_reachable(&self, host: &RemoteHost) -> bool;
}
