use std::path::PathBuf;

use clap::Parser;

/// Runs the reservation server: HTTP API plus the background reconciliation,
/// expiry, and CI jobs, all in one process instead of a separate web process
/// and task-queue workers.
#[derive(Debug, Parser)]
#[command(name = "quartermaster-server", about = "USB device reservation broker", version)]
pub struct Cli {
    /// Path to a YAML server config file; unset fields fall back to
    /// environment variables, then built-in defaults.
    #[arg(long, env = "QM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Postgres connection string. When unset, an in-memory repository is
    /// used (state lost on restart) — handy for local development.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Emit structured JSON logs instead of the default text format.
    #[arg(long, env = "QM_JSON_LOGS")]
    pub json_logs: bool,
}
