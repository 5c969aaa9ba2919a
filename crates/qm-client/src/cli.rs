use std::net::IpAddr;

use clap::Parser;

/// Reserves a USB resource and keeps the local drivers attached for as long
/// as the reservation lives. Run with `--stop_client` against a running
/// client's control socket to tear it down cleanly instead.
#[derive(Debug, Parser)]
#[command(name = "quartermaster-client", about = "USB device reservation client", version)]
pub struct Cli {
    /// URL to a quartermaster server reservation.
    pub quartermaster_url: Option<String>,

    /// Stop a running quartermaster client instead of starting a new one;
    /// uses --listen_ip/--listen_port to find it.
    #[arg(long)]
    pub stop_client: bool,

    /// Quartermaster server authentication token, only needed when the
    /// reservation URL doesn't already carry credentials.
    #[arg(long, env = "QM_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Message displayed with the reservation.
    #[arg(long)]
    pub reservation_message: Option<String>,

    /// How many seconds to wait between checks to ensure devices are connected.
    #[arg(long, default_value_t = 5)]
    pub device_polling: u64,

    /// How many seconds to wait between checks to ensure the reservation is still active.
    #[arg(long, default_value_t = 60)]
    pub reservation_polling: u64,

    /// Disable TLS validation of the server's certificate.
    #[arg(long)]
    pub disable_validation: bool,

    /// Where to listen for local teardown commands.
    #[arg(long, default_value = "127.0.0.1")]
    pub listen_ip: IpAddr,

    /// What port to listen on for local teardown commands.
    #[arg(long, default_value_t = 4242)]
    pub listen_port: u16,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// `quartermaster_url` and `--stop_client` are mutually exclusive and
    /// one is required; clap's derive doesn't express that across a
    /// positional and a flag cleanly, so it's checked here instead.
    pub fn validate(&self) -> Result<(), String> {
        match (self.quartermaster_url.is_some(), self.stop_client) {
            (true, true) => Err("cannot pass both quartermaster_url and --stop_client".to_string()),
            (false, false) => Err("either quartermaster_url or --stop_client is required".to_string()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Cli {
        Cli::parse_from(["quartermaster-client", "--stop_client"])
    }

    #[test]
    fn rejects_neither_url_nor_stop() {
        let cli = Cli::parse_from(["quartermaster-client"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn rejects_both_url_and_stop() {
        let cli = Cli::parse_from(["quartermaster-client", "http://x", "--stop_client"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn accepts_stop_client_alone() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn accepts_url_alone() {
        let cli = Cli::parse_from(["quartermaster-client", "http://x/api/reservation/r1"]);
        assert!(cli.validate().is_ok());
    }
}
