use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use qm_domain::DriverKind;
use qm_driver::usbip::UsbipLocalDriver;
use qm_driver::virtualhere::VirtualHereLocalDriver;
use qm_driver::LocalDriver;
use serde_json::Value;

use crate::error::ClientError;

fn required_str<'a>(conf: &'a Value, key: &'static str, name: &str) -> Result<&'a str, ClientError> {
    conf.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::MissingDeviceConfig(name.to_string(), key))
}

fn build_driver(conf: &Value, name: &str) -> Result<Arc<dyn LocalDriver>, ClientError> {
    let kind: DriverKind = serde_json::from_value(conf["driver"].clone())
        .map_err(|_| ClientError::UnknownDriver(conf["driver"].to_string()))?;
    let host_address = required_str(conf, "host_address", name)?;

    let driver: Arc<dyn LocalDriver> = match kind {
        DriverKind::Usbip => {
            let bus_id = required_str(conf, "bus_id", name)?;
            Arc::new(UsbipLocalDriver::new(host_address, bus_id))
        }
        DriverKind::VirtualHere => {
            let device_address = required_str(conf, "device_address", name)?;
            Arc::new(VirtualHereLocalDriver::new(host_address, device_address))
        }
    };
    Ok(driver)
}

/// One reserved device on the client machine. Grounded on `client.py`'s
/// `Device` class: `connect()`/`disconnect()` are lazy (no-op if already in
/// the desired state), and `connect_complete` records whether this device
/// ever finished connecting, so teardown knows whether it's safe to try
/// disconnecting it.
pub struct Device {
    pub name: String,
    device_address: String,
    driver: Arc<dyn LocalDriver>,
    connect_complete: AtomicBool,
}

impl Device {
    pub fn new(conf: &Value) -> Result<Self, ClientError> {
        let name = conf["name"].as_str().unwrap_or("<unnamed>").to_string();
        let driver = build_driver(conf, &name)?;
        let device_address = conf
            .get("bus_id")
            .or_else(|| conf.get("device_address"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self { name, device_address, driver, connect_complete: AtomicBool::new(false) })
    }

    pub async fn async_init(&self) -> Result<(), ClientError> {
        self.driver.async_init().await?;
        self.connect().await
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        if !self.connected().await? {
            tracing::info!(device = %self.name, "connecting");
            self.driver.connect(&self.device_address).await?;
            self.connect_complete.store(true, Ordering::SeqCst);
            tracing::info!(device = %self.name, "done connecting");
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        if self.connected().await? {
            tracing::info!(device = %self.name, "disconnecting");
            self.driver.disconnect(&self.device_address).await?;
            tracing::info!(device = %self.name, "done disconnecting");
        }
        Ok(())
    }

    pub async fn connected(&self) -> Result<bool, ClientError> {
        Ok(self.driver.connected(&self.device_address).await?)
    }

    pub fn connect_complete(&self) -> bool {
        self.connect_complete.load(Ordering::SeqCst)
    }

    pub async fn preflight_check(&self) -> Result<(), ClientError> {
        Ok(self.driver.preflight_check().await?)
    }

    pub fn driver_kind(&self) -> DriverKind {
        self.driver.identifier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_usbip_driver_from_device_blob() {
        let conf = json!({
            "driver": "USBIP",
            "name": "my-device",
            "bus_id": "1-11",
            "host_address": "10.0.0.5",
        });
        let device = Device::new(&conf).unwrap();
        assert_eq!(device.name, "my-device");
        assert_eq!(device.driver_kind(), DriverKind::Usbip);
    }

    #[test]
    fn builds_virtualhere_driver_from_device_blob() {
        let conf = json!({
            "driver": "VirtualHere",
            "name": "vh-device",
            "device_address": "hub.4",
            "host_address": "10.0.0.6",
        });
        let device = Device::new(&conf).unwrap();
        assert_eq!(device.driver_kind(), DriverKind::VirtualHere);
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let conf = json!({"driver": "USBIP", "name": "d", "host_address": "10.0.0.5"});
        let err = Device::new(&conf).unwrap_err();
        assert!(matches!(err, ClientError::MissingDeviceConfig(name, "bus_id") if name == "d"));
    }

    #[test]
    fn unknown_driver_kind_is_an_error() {
        let conf = json!({"driver": "NOT_A_REAL_DRIVER", "name": "d", "host_address": "10.0.0.5"});
        assert!(matches!(Device::new(&conf).unwrap_err(), ClientError::UnknownDriver(_)));
    }
}
