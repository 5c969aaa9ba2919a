use async_trait::async_trait;
use qm_domain::DriverKind;

use crate::error::LocalDriverError;

/// Runs on the client machine: attaches, manages, and detaches devices over
/// whichever USB-sharing technology this driver wraps. Grounded on
/// `AbstractLocalDriver` (`USB_Quartermaster_common.Driver`).
#[async_trait]
pub trait LocalDriver: Send + Sync + 'static {
    fn identifier(&self) -> DriverKind;

    /// Confirm the client binary/tooling this driver needs is installed and
    /// runnable. Called once before the client's main loop starts.
    async fn preflight_check(&self) -> Result<(), LocalDriverError>;

    /// One-time setup that must happen after `preflight_check` but before any
    /// `connect` call (e.g. attaching a hub connection). Default is a no-op.
    async fn async_init(&self) -> Result<(), LocalDriverError> {
        Ok(())
    }

    async fn connect(&self, device_address: &str) -> Result<(), LocalDriverError>;
    async fn disconnect(&self, device_address: &str) -> Result<(), LocalDriverError>;
    async fn connected(&self, device_address: &str) -> Result<bool, LocalDriverError>;

    /// Human-readable setup instructions surfaced when `preflight_check` fails.
    fn setup_information(&self) -> &'static str;
}
