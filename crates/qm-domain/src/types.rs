use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId(pub String);

impl PoolId {
    pub fn new(s: impl Into<String>) -> Self {
        PoolId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(s: impl Into<String>) -> Self {
        ResourceId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId(pub String);

impl HostId {
    pub fn new(s: impl Into<String>) -> Self {
        HostId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(s: impl Into<String>) -> Self {
        DeviceId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enums ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommunicatorKind {
    Ssh,
}

impl std::fmt::Display for CommunicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommunicatorKind::Ssh => write!(f, "SSH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostType {
    Darwin,
    #[serde(rename = "Linux_AMD64")]
    LinuxAmd64,
    Windows,
}

impl std::fmt::Display for HostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostType::Darwin => write!(f, "Darwin"),
            HostType::LinuxAmd64 => write!(f, "Linux_AMD64"),
            HostType::Windows => write!(f, "Windows"),
        }
    }
}

/// Driver family identifier. Matches the `IDENTIFIER` constant each driver
/// plugin declares (spec §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    #[serde(rename = "USBIP")]
    Usbip,
    VirtualHere,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverKind::Usbip => write!(f, "USBIP"),
            DriverKind::VirtualHere => write!(f, "VirtualHere"),
        }
    }
}

/// SSH private/public key encoding, named to match RemoteHost.config's
/// `private_key_type`/`host_key_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "DSS")]
    Dss,
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "ECDSA")]
    Ecdsa,
    #[serde(rename = "Ed25519")]
    Ed25519,
}

// ── Core structs ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub pool_id: PoolId,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub user: Option<String>,
    pub used_for: String,
    pub use_password: String,
    pub last_reserved: Option<DateTime<Utc>>,
    pub last_check_in: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn new(id: ResourceId, pool_id: PoolId, name: impl Into<String>) -> Self {
        Resource {
            id,
            pool_id,
            name: name.into(),
            description: String::new(),
            enabled: true,
            user: None,
            used_for: String::new(),
            use_password: String::new(),
            last_reserved: None,
            last_check_in: None,
        }
    }

    /// Resource.in_use ≡ user ≠ null (spec §3).
    pub fn in_use(&self) -> bool {
        self.user.is_some()
    }

    pub fn reservation_expiration(&self, reservation_max: chrono::Duration) -> Option<DateTime<Utc>> {
        self.last_reserved.map(|t| t + reservation_max)
    }

    pub fn checkin_expiration(&self, checkin_timeout: chrono::Duration) -> Option<DateTime<Utc>> {
        self.last_check_in.map(|t| t + checkin_timeout)
    }

    pub fn is_expired(
        &self,
        now: DateTime<Utc>,
        reservation_max: chrono::Duration,
        checkin_timeout: chrono::Duration,
    ) -> bool {
        if self.last_check_in.is_none() {
            return false;
        }
        let reservation_expired = self
            .reservation_expiration(reservation_max)
            .is_some_and(|exp| now > exp);
        let checkin_expired = self
            .checkin_expiration(checkin_timeout)
            .is_some_and(|exp| now > exp);
        reservation_expired || checkin_expired
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHost {
    pub id: HostId,
    pub address: String,
    pub communicator: CommunicatorKind,
    pub host_type: HostType,
    /// Opaque, communicator-specific configuration blob (e.g. SSH key material).
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub resource_id: Option<ResourceId>,
    pub host_id: HostId,
    pub name: String,
    pub driver: DriverKind,
    /// Opaque, driver-specific configuration blob (`bus_id` or `device_address`).
    pub config: serde_json::Value,
    pub online: bool,
}

impl Device {
    /// Resource.is_online ≡ all its Devices have online=true is evaluated by
    /// the repository layer across a Resource's device set; a single Device's
    /// online flag is just this field.
    pub fn required_config_keys(driver: DriverKind) -> &'static [&'static str] {
        match driver {
            DriverKind::Usbip => &["bus_id"],
            DriverKind::VirtualHere => &["device_address"],
        }
    }

    pub fn validate_configuration(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let obj = match self.config.as_object() {
            Some(o) => o,
            None => {
                errors.push("device config must be a JSON object".to_string());
                return errors;
            }
        };
        let required = Self::required_config_keys(self.driver);
        for key in required {
            if !obj.contains_key(*key) {
                errors.push(format!("missing required config key '{key}'"));
            }
        }
        for key in obj.keys() {
            if !required.contains(&key.as_str()) {
                errors.push(format!("unknown config key '{key}'"));
            }
        }
        errors
    }
}

/// Named mapping from a TeamCity blocked-resource name to a local Pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamCityPool {
    pub name: String,
    pub pool_id: PoolId,
    pub shared_resource_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NewDeviceConfig {
    pub fields: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn resource_in_use_reflects_user() {
        let mut r = Resource::new(ResourceId::new("r1"), PoolId::new("p1"), "r1");
        assert!(!r.in_use());
        r.user = Some("alice".to_string());
        assert!(r.in_use());
    }

    #[test]
    fn resource_not_expired_without_check_in() {
        let r = Resource::new(ResourceId::new("r1"), PoolId::new("p1"), "r1");
        assert!(!r.is_expired(Utc::now(), Duration::minutes(10), Duration::minutes(5)));
    }

    #[test]
    fn resource_expired_past_checkin_timeout() {
        let mut r = Resource::new(ResourceId::new("r1"), PoolId::new("p1"), "r1");
        let t0 = Utc::now();
        r.last_reserved = Some(t0);
        r.last_check_in = Some(t0);
        let later = t0 + Duration::minutes(6);
        assert!(r.is_expired(later, Duration::minutes(10), Duration::minutes(5)));
    }

    #[test]
    fn device_validate_configuration_reports_missing_and_unknown_keys() {
        let mut d = Device {
            id: DeviceId::new("d1"),
            resource_id: None,
            host_id: HostId::new("h1"),
            name: "d1".into(),
            driver: DriverKind::Usbip,
            config: serde_json::json!({"unexpected": "value"}),
            online: false,
        };
        let errors = d.validate_configuration();
        assert!(errors.iter().any(|e| e.contains("missing required config key 'bus_id'")));
        assert!(errors.iter().any(|e| e.contains("unknown config key 'unexpected'")));

        d.config = serde_json::json!({"bus_id": "1-11"});
        assert!(d.validate_configuration().is_empty());
    }
}
