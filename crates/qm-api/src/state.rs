use std::sync::Arc;

use qm_driver::DriverRegistry;
use qm_store::Repository;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub drivers: Arc<DriverRegistry>,
    pub auth_token: Arc<String>,
    pub server_base_url: Arc<String>,
}
