mod cli;
mod device;
mod error;
mod http;
mod runtime;
mod teardown;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use device::Device;
use error::ClientError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = cli.validate() {
        eprintln!("error: {e}");
        return ExitCode::from(2);
    }

    let filter = if cli.debug { EnvFilter::new("debug") } else { EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")) };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if cli.stop_client {
        let code = runtime::initiate_teardown(cli.listen_ip, cli.listen_port).await;
        return ExitCode::from(code as u8);
    }

    let url = cli.quartermaster_url.clone().expect("clap guarantees this when --stop_client is absent");
    run_reservation(cli, url).await
}

async fn run_reservation(cli: Cli, url: String) -> ExitCode {
    let http_client = match http::build_http_client(cli.disable_validation) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    let reservation_message = cli
        .reservation_message
        .clone()
        .or_else(qm_config::used_for_from_environment);

    let reservation = match http::get_quartermaster_reservation(
        &http_client,
        &url,
        reservation_message.as_deref(),
        cli.auth_token.as_deref(),
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    tracing::info!(resource_url = %reservation.resource_url, "reservation active");

    match prepare_and_run(&http_client, &cli, &reservation).await {
        Ok(error_counter) => {
            println!("Cleanup done");
            cancel_reservation_best_effort(&http_client, &reservation).await;
            ExitCode::from(error_counter as u8)
        }
        Err(e) => {
            eprintln!("{e}");
            cancel_reservation_best_effort(&http_client, &reservation).await;
            ExitCode::from(1)
        }
    }
}

async fn prepare_and_run(http_client: &reqwest::Client, cli: &Cli, reservation: &http::Reservation) -> Result<usize, ClientError> {
    let devices: Vec<Device> = reservation
        .devices
        .iter()
        .map(Device::new)
        .collect::<Result<_, _>>()?;

    runtime::preflight_checks(&devices).await?;

    let error_counter = runtime::run(
        devices,
        http_client.clone(),
        reservation.resource_url.clone(),
        reservation.auth_token.clone(),
        std::time::Duration::from_secs(cli.device_polling),
        std::time::Duration::from_secs(cli.reservation_polling),
        cli.listen_ip,
        cli.listen_port,
    )
    .await;

    Ok(error_counter)
}

async fn cancel_reservation_best_effort(http_client: &reqwest::Client, reservation: &http::Reservation) {
    println!("Canceling reservation for resource {}, please wait", reservation.resource_url);
    if let Err(e) = http::cancel_reservation(http_client, &reservation.reservation_url, reservation.auth_token.as_deref()).await {
        eprintln!("got an exception while trying to cancel our reservation: {e}");
    } else {
        println!("Reservation canceled successfully");
    }
}
