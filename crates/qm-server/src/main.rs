mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use qm_communicator::{Communicator, SshCommunicator};
use qm_config::{LogFormat, ServerConfig};
use qm_domain::DriverKind;
use qm_driver::usbip::{UsbipDevice, UsbipHost};
use qm_driver::virtualhere::{VirtualHereDevice, VirtualHereHost};
use qm_driver::DriverRegistry;
use qm_store::{InMemoryRepository, PostgresRepository, Repository};
use tracing_subscriber::EnvFilter;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::load(cli.config.as_deref()).context("failed to load server config")?;

    init_tracing(cli.json_logs, config.log_format);

    let repo: Arc<dyn Repository> = match &cli.database_url {
        Some(url) => {
            tracing::info!("connecting to Postgres repository");
            Arc::new(PostgresRepository::connect(url).await.context("failed to connect to Postgres")?)
        }
        None => {
            tracing::warn!("no DATABASE_URL set, using in-memory repository (state is not persisted)");
            Arc::new(InMemoryRepository::new())
        }
    };

    let drivers = Arc::new(build_driver_registry(&config));

    let scheduler = qm_scheduler::spawn(repo.clone(), drivers.clone(), config.reservation_max, config.checkin_timeout);

    let ci_jobs = config.teamcity.clone().map(|tc| {
        tracing::info!(host = %tc.host, "TeamCity integration enabled, starting CI jobs");
        qm_ci::spawn(repo.clone(), drivers.clone(), tc)
    });

    let auth_token = Arc::new(config.auth_token.clone());
    let app = qm_api::build_app(repo.clone(), drivers.clone(), auth_token, config.server_base_url.clone());

    tracing::info!(addr = %config.bind_addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    let result = axum::serve(listener, app).await.context("server error");

    scheduler.abort();
    if let Some(ci_jobs) = ci_jobs {
        ci_jobs.abort();
    }

    result
}

fn build_driver_registry(config: &ServerConfig) -> DriverRegistry {
    let communicator: Arc<dyn Communicator> =
        Arc::new(SshCommunicator::new(config.ssh_connect_timeout, config.ssh_exec_timeout));

    let usbip_host = Arc::new(UsbipHost::new(communicator.clone()));
    let usbip_device = Arc::new(UsbipDevice::new(usbip_host.clone()));

    let vh_host = Arc::new(VirtualHereHost::new(communicator.clone()));
    let vh_device = Arc::new(VirtualHereDevice::new(vh_host.clone()));

    let mut registry = DriverRegistry::new();
    registry.register(DriverKind::Usbip, usbip_host, usbip_device);
    registry.register(DriverKind::VirtualHere, vh_host, vh_device);
    registry
}

fn init_tracing(json_logs_flag: bool, configured_format: LogFormat) {
    let json = json_logs_flag || matches!(configured_format, LogFormat::Json);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}
