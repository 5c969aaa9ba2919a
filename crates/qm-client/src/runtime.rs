use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::device::Device;
use crate::error::ClientError;
use crate::http;
use crate::teardown::TeardownSignal;

const TEARDOWN_CR: &[u8] = b"teardown\r";
const TEARDOWN_LF: &[u8] = b"teardown\n";
const TEARDOWN_ACK: &[u8] = b"Teardown started";
const REFRESH_RETRY_LIMIT: u32 = 3;
const REFRESH_RETRY_SLEEP: Duration = Duration::from_secs(10);

/// Runs every registered driver's `preflight_check` once per distinct
/// driver kind before any device connects, so a missing client tool is
/// caught before we've half-attached a reservation. Grounded on
/// `client.py`'s `preflight_checks`.
pub async fn preflight_checks(devices: &[Device]) -> Result<(), ClientError> {
    let mut checked = HashSet::new();
    for device in devices {
        let kind = device.driver_kind();
        if !checked.insert(kind) {
            continue;
        }
        tracing::info!(driver = %kind, "preflight checking");
        device.preflight_check().await?;
    }
    Ok(())
}

async fn manage_devices(devices: Arc<Vec<Device>>, polling_interval: Duration, teardown: Arc<TeardownSignal>) {
    for device in devices.iter() {
        if let Err(e) = device.async_init().await {
            tracing::error!(device = %device.name, error = %e, "failed to initialize device, triggering teardown");
            teardown.set();
            return;
        }
    }
    tracing::info!("setup complete, reservation is now active");

    loop {
        for device in devices.iter() {
            if let Err(e) = device.connect().await {
                tracing::warn!(device = %device.name, error = %e, "connect attempt failed, will retry next tick");
            }
        }
        tokio::time::sleep(polling_interval).await;
    }
}

async fn get_resource_status(
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
    polling_interval: Duration,
    teardown: Arc<TeardownSignal>,
) {
    loop {
        let mut refresh_successful = None;
        for _ in 0..REFRESH_RETRY_LIMIT {
            match http::refresh_reservation(&client, &url, auth_token.as_deref()).await {
                Ok(alive) => {
                    refresh_successful = Some(alive);
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "refresh attempt failed, retrying");
                    tokio::time::sleep(REFRESH_RETRY_SLEEP).await;
                }
            }
        }

        match refresh_successful {
            Some(true) => {
                tokio::time::sleep(polling_interval).await;
            }
            Some(false) => {
                tracing::info!("reservation expired, triggering teardown");
                teardown.set();
            }
            None => {
                tracing::error!(tries = REFRESH_RETRY_LIMIT, "failed to reach quartermaster server, triggering teardown");
                teardown.set();
            }
        }
    }
}

async fn process_command(mut stream: TcpStream, teardown: Arc<TeardownSignal>) {
    let mut buf = [0u8; 100];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let data = &buf[..n];
        tracing::debug!(?data, "command received");
        if data.starts_with(TEARDOWN_CR) || data.starts_with(TEARDOWN_LF) {
            let _ = stream.write_all(TEARDOWN_ACK).await;
            let _ = stream.flush().await;
            tracing::info!("teardown requested over local control socket");
            teardown.set();
            return;
        }
    }
}

async fn wait_for_commands(listen_ip: IpAddr, listen_port: u16, teardown: Arc<TeardownSignal>) {
    while !teardown.is_set() {
        let listener = match TcpListener::bind((listen_ip, listen_port)).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "could not start local command listener, triggering teardown");
                teardown.set();
                return;
            }
        };
        tracing::debug!(%listen_ip, listen_port, "listening for local commands");

        loop {
            if teardown.is_set() {
                return;
            }
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(process_command(stream, teardown.clone()));
                }
                Err(e) => {
                    tracing::error!(error = %e, "command listener accept failed, triggering teardown");
                    teardown.set();
                    return;
                }
            }
        }
    }
}

/// Opens its own connection to a running client's control socket and asks
/// it to tear down. Grounded on `client.py`'s `initiate_teardown`.
pub async fn initiate_teardown(listen_ip: IpAddr, listen_port: u16) -> i32 {
    let mut stream = match TcpStream::connect((listen_ip, listen_port)).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("could not reach client at {listen_ip}:{listen_port}: {e}");
            return 1;
        }
    };

    if let Err(e) = stream.write_all(b"teardown\r").await {
        eprintln!("failed to send teardown command: {e}");
        return 1;
    }

    let mut buf = [0u8; 100];
    let n = stream.read(&mut buf).await.unwrap_or(0);
    let response = &buf[..n];
    println!("{}", String::from_utf8_lossy(response));

    if response == TEARDOWN_ACK {
        0
    } else {
        eprintln!("unexpected response from client at {listen_ip}:{listen_port}");
        1
    }
}

async fn disconnect_devices(devices: &[Device]) -> usize {
    let mut error_counter = 0;
    for device in devices {
        if device.connect_complete() {
            tracing::info!(device = %device.name, "disconnecting");
            if let Err(e) = device.disconnect().await {
                error_counter += 1;
                tracing::warn!(device = %device.name, error = %e, "failed to disconnect, continuing with the rest");
            }
        } else {
            tracing::info!(device = %device.name, "skipping disconnect, it never finished connecting");
        }
    }
    error_counter
}

fn install_signal_handlers(teardown: Arc<TeardownSignal>) {
    let ctrl_c_signal = teardown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_signal.set();
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        for kind in [SignalKind::terminate(), SignalKind::hangup()] {
            let signal_teardown = teardown.clone();
            if let Ok(mut stream) = signal(kind) {
                tokio::spawn(async move {
                    stream.recv().await;
                    signal_teardown.set();
                });
            }
        }
    }
}

/// Supervises the three concurrent loops (device connect/keepalive, lease
/// refresh, local command listener) until any of them (or a signal, or the
/// local control socket) requests teardown, then cancels the rest and
/// disconnects every device that finished connecting. Returns the number of
/// disconnect errors encountered, which becomes the process exit code.
/// Grounded on `client.py`'s `start_tasks`/`perform_teardown`, adapted to
/// `JoinHandle::abort` as the idiomatic stand-in for `asyncio.Task.cancel`.
pub async fn run(
    devices: Vec<Device>,
    client: reqwest::Client,
    resource_url: String,
    auth_token: Option<String>,
    device_polling: Duration,
    reservation_polling: Duration,
    listen_ip: IpAddr,
    listen_port: u16,
) -> usize {
    let devices = Arc::new(devices);
    let teardown = Arc::new(TeardownSignal::new());

    let manage_handle = tokio::spawn(manage_devices(devices.clone(), device_polling, teardown.clone()));
    let lease_handle = tokio::spawn(get_resource_status(client, resource_url, auth_token, reservation_polling, teardown.clone()));
    let command_handle = tokio::spawn(wait_for_commands(listen_ip, listen_port, teardown.clone()));

    install_signal_handlers(teardown.clone());

    teardown.wait().await;

    manage_handle.abort();
    lease_handle.abort();
    command_handle.abort();
    let _ = manage_handle.await;
    let _ = lease_handle.await;
    let _ = command_handle.await;

    disconnect_devices(&devices).await
}
