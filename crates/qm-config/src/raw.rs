use serde::Deserialize;

/// On-disk YAML shape for the server config file. All fields optional; any
/// field left unset falls back to its environment variable, then to the
/// built-in default (see `ServerConfig::from_sources`).
#[derive(Debug, Default, Deserialize)]
pub struct RawServerConfig {
    pub bind_addr: Option<String>,
    pub server_base_url: Option<String>,
    pub reservation_max_secs: Option<i64>,
    pub checkin_timeout_secs: Option<i64>,
    pub ssh_connect_timeout_secs: Option<u64>,
    pub ssh_exec_timeout_secs: Option<u64>,
    pub auth_token: Option<String>,
    pub log_format: Option<String>,
    pub teamcity: Option<RawTeamCityConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RawTeamCityConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub reservation_username: String,
}
