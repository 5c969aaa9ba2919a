use crate::error::ConfigError;
use crate::raw::RawServerConfig;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct TeamCityConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub reservation_username: String,
}

/// Server-side runtime configuration. Layered: YAML file < environment
/// variables < built-in default, flattened to a single settings object
/// rather than a directory of per-module settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Externally reachable base URL stamped into `reservation_url`/
    /// `resource_url` response fields, matching the original's
    /// `settings.SERVER_BASE_URL`.
    pub server_base_url: String,
    pub reservation_max: Duration,
    pub checkin_timeout: Duration,
    pub ssh_connect_timeout: Duration,
    pub ssh_exec_timeout: Duration,
    pub auth_token: String,
    pub log_format: LogFormat,
    pub teamcity: Option<TeamCityConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0:8000".to_string(),
            server_base_url: "http://localhost:8000".to_string(),
            reservation_max: Duration::from_secs(600),
            checkin_timeout: Duration::from_secs(300),
            ssh_connect_timeout: Duration::from_secs(10),
            ssh_exec_timeout: Duration::from_secs(30),
            auth_token: String::new(),
            log_format: LogFormat::Text,
            teamcity: None,
        }
    }
}

impl ServerConfig {
    /// Load from an optional YAML file, then apply environment overrides on
    /// top, then fall back to defaults for anything still unset.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let raw = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                    path: p.display().to_string(),
                    source,
                })?;
                serde_yaml::from_str::<RawServerConfig>(&text).map_err(|source| {
                    ConfigError::YamlParse {
                        path: p.display().to_string(),
                        source,
                    }
                })?
            }
            None => RawServerConfig::default(),
        };
        Self::from_raw_and_env(raw)
    }

    fn from_raw_and_env(raw: RawServerConfig) -> Result<Self, ConfigError> {
        let default = ServerConfig::default();

        let bind_addr = raw
            .bind_addr
            .or_else(|| std::env::var("QM_BIND_ADDR").ok())
            .unwrap_or(default.bind_addr);

        let server_base_url = raw
            .server_base_url
            .or_else(|| std::env::var("QM_SERVER_BASE_URL").ok())
            .unwrap_or(default.server_base_url);

        let reservation_max = match raw
            .reservation_max_secs
            .or_else(|| env_i64("QM_RESERVATION_MAX_SECS"))
        {
            Some(secs) => parse_secs("QM_RESERVATION_MAX_SECS", secs)?,
            None => default.reservation_max,
        };

        let checkin_timeout = match raw
            .checkin_timeout_secs
            .or_else(|| env_i64("QM_CHECKIN_TIMEOUT_SECS"))
        {
            Some(secs) => parse_secs("QM_CHECKIN_TIMEOUT_SECS", secs)?,
            None => default.checkin_timeout,
        };

        let ssh_connect_timeout = raw
            .ssh_connect_timeout_secs
            .or_else(|| env_u64("QM_SSH_CONNECT_TIMEOUT_SECS"))
            .map(Duration::from_secs)
            .unwrap_or(default.ssh_connect_timeout);

        let ssh_exec_timeout = raw
            .ssh_exec_timeout_secs
            .or_else(|| env_u64("QM_SSH_EXEC_TIMEOUT_SECS"))
            .map(Duration::from_secs)
            .unwrap_or(default.ssh_exec_timeout);

        let auth_token = raw
            .auth_token
            .or_else(|| std::env::var("QM_AUTH_TOKEN").ok())
            .unwrap_or(default.auth_token);

        let log_format = match raw
            .log_format
            .or_else(|| std::env::var("QM_LOG_FORMAT").ok())
        {
            Some(s) => parse_log_format(&s)?,
            None => default.log_format,
        };

        let teamcity = match raw.teamcity {
            Some(t) => Some(TeamCityConfig {
                host: t.host,
                user: t.user,
                password: t.password,
                reservation_username: t.reservation_username,
            }),
            None => teamcity_from_env(),
        };

        Ok(ServerConfig {
            bind_addr,
            server_base_url,
            reservation_max,
            checkin_timeout,
            ssh_connect_timeout,
            ssh_exec_timeout,
            auth_token,
            log_format,
            teamcity,
        })
    }
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn parse_secs(key: &str, secs: i64) -> Result<Duration, ConfigError> {
    u64::try_from(secs)
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::Conversion {
            key: key.to_string(),
            message: format!("must be a non-negative number of seconds, got {secs}"),
        })
}

fn parse_log_format(s: &str) -> Result<LogFormat, ConfigError> {
    match s {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(ConfigError::Conversion {
            key: "QM_LOG_FORMAT".to_string(),
            message: format!("unknown log format '{other}', expected 'text' or 'json'"),
        }),
    }
}

fn teamcity_from_env() -> Option<TeamCityConfig> {
    let host = std::env::var("QM_TEAMCITY_HOST").ok()?;
    let user = std::env::var("QM_TEAMCITY_USER").ok()?;
    let password = std::env::var("QM_TEAMCITY_PASSWORD").ok()?;
    let reservation_username = std::env::var("QM_TEAMCITY_RESERVATION_USERNAME").ok()?;
    Some(TeamCityConfig {
        host,
        user,
        password,
        reservation_username,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = ServerConfig::load(None).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
        assert_eq!(cfg.reservation_max, Duration::from_secs(600));
    }

    #[test]
    fn loads_yaml_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "bind_addr: 127.0.0.1:9000\nreservation_max_secs: 1200").unwrap();
        let cfg = ServerConfig::load(Some(f.path())).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.reservation_max, Duration::from_secs(1200));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "log_format: xml").unwrap();
        let err = ServerConfig::load(Some(f.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Conversion { .. }));
    }
}
