use qm_domain::DriverKind;
use qm_driver::DriverRegistry;
use qm_store::Repository;

/// Every 15 minutes, compares each VirtualHere device's observed nickname to
/// `Device.name` and renames the remote share on mismatch.
///
/// Grounded on the host-level variant of the original's `check_device_nicknames`
/// task (`USB_Quartermaster_VirtualHere/tasks.py`, driven by `get_states()`):
/// one query per host rather than one per device.
pub async fn tick(repo: &dyn Repository, drivers: &DriverRegistry) {
    let host_driver = match drivers.host_driver(DriverKind::VirtualHere) {
        Ok(driver) => driver,
        Err(_) => return,
    };
    let device_driver = match drivers.device_driver(DriverKind::VirtualHere) {
        Ok(driver) => driver,
        Err(_) => return,
    };

    let hosts = match repo.list_hosts().await {
        Ok(hosts) => hosts,
        Err(e) => {
            tracing::warn!(error = %e, "listing hosts for nickname maintenance failed");
            return;
        }
    };

    for host in hosts {
        let devices = match repo.list_devices_for_host(&host.id).await {
            Ok(devices) => devices.into_iter().filter(|d| d.driver == DriverKind::VirtualHere).collect::<Vec<_>>(),
            Err(e) => {
                tracing::warn!(host_id = %host.id, error = %e, "listing devices for host failed");
                continue;
            }
        };
        if devices.is_empty() {
            continue;
        }

        let observed = match host_driver.observed_nicknames(&host, &devices).await {
            Ok(observed) => observed,
            Err(e) => {
                tracing::warn!(host_id = %host.id, error = %e, "reading device nicknames failed");
                continue;
            }
        };

        for device in &devices {
            let Some(nickname) = observed.get(&device.id) else {
                continue;
            };
            if nickname == &device.name {
                continue;
            }
            tracing::warn!(
                device_id = %device.id, observed = %nickname, expected = %device.name,
                "device nickname mismatch, renaming",
            );
            if let Err(e) = device_driver.set_nickname(&host, device).await {
                tracing::warn!(device_id = %device.id, error = %e, "failed to rename device");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use qm_domain::{Device, DeviceId, HostId, HostType, Pool, PoolId, RemoteHost, ResourceId};
    use qm_driver::{DeviceDriver, DeviceError, DeviceObservation, HostDriver, HostError};
    use qm_store::InMemoryRepository;

    use super::*;

    struct NicknameHostDriver {
        nicknames: HashMap<DeviceId, String>,
    }

    #[async_trait]
    impl HostDriver for NicknameHostDriver {
        fn identifier(&self) -> DriverKind {
            DriverKind::VirtualHere
        }
        async fn is_reachable(&self, _host: &RemoteHost) -> bool {
            true
        }
        async fn observe_devices(&self, _host: &RemoteHost, _devices: &[Device]) -> Result<Vec<DeviceObservation>, HostError> {
            Ok(Vec::new())
        }
        async fn observed_nicknames(
            &self,
            _host: &RemoteHost,
            _devices: &[Device],
        ) -> Result<HashMap<DeviceId, String>, HostError> {
            Ok(self.nicknames.clone())
        }
    }

    struct RecordingDeviceDriver {
        renamed: Mutex<Vec<DeviceId>>,
    }

    #[async_trait]
    impl DeviceDriver for RecordingDeviceDriver {
        async fn is_shared(&self, _host: &RemoteHost, _device: &Device) -> Result<bool, DeviceError> {
            Ok(true)
        }
        async fn start_sharing(&self, _host: &RemoteHost, _device: &Device) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn stop_sharing(&self, _host: &RemoteHost, _device: &Device) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn set_nickname(&self, _host: &RemoteHost, device: &Device) -> Result<(), DeviceError> {
            self.renamed.lock().unwrap().push(device.id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn renames_device_with_mismatched_nickname() {
        let repo = InMemoryRepository::new();
        repo.upsert_pool(&Pool { id: PoolId::new("p1"), name: "pool".into() }).await.unwrap();
        repo.upsert_host(&RemoteHost {
            id: HostId::new("h1"),
            address: "10.0.0.1".into(),
            communicator: qm_domain::CommunicatorKind::Ssh,
            host_type: HostType::LinuxAmd64,
            config: serde_json::json!({}),
        })
        .await
        .unwrap();
        repo.upsert_device(&Device {
            id: DeviceId::new("d1"),
            resource_id: Some(ResourceId::new("r1")),
            host_id: HostId::new("h1"),
            name: "expected-name".into(),
            driver: DriverKind::VirtualHere,
            config: serde_json::json!({"device_address": "host.1"}),
            online: true,
        })
        .await
        .unwrap();

        let mut nicknames = HashMap::new();
        nicknames.insert(DeviceId::new("d1"), "wrong-name".to_string());
        let device_driver = Arc::new(RecordingDeviceDriver { renamed: Mutex::new(Vec::new()) });

        let mut drivers = DriverRegistry::new();
        drivers.register(DriverKind::VirtualHere, Arc::new(NicknameHostDriver { nicknames }), device_driver.clone());

        tick(&repo, &drivers).await;

        assert_eq!(*device_driver.renamed.lock().unwrap(), vec![DeviceId::new("d1")]);
    }

    #[tokio::test]
    async fn leaves_matching_nickname_untouched() {
        let repo = InMemoryRepository::new();
        repo.upsert_pool(&Pool { id: PoolId::new("p1"), name: "pool".into() }).await.unwrap();
        repo.upsert_host(&RemoteHost {
            id: HostId::new("h1"),
            address: "10.0.0.1".into(),
            communicator: qm_domain::CommunicatorKind::Ssh,
            host_type: HostType::LinuxAmd64,
            config: serde_json::json!({}),
        })
        .await
        .unwrap();
        repo.upsert_device(&Device {
            id: DeviceId::new("d1"),
            resource_id: Some(ResourceId::new("r1")),
            host_id: HostId::new("h1"),
            name: "expected-name".into(),
            driver: DriverKind::VirtualHere,
            config: serde_json::json!({"device_address": "host.1"}),
            online: true,
        })
        .await
        .unwrap();

        let mut nicknames = HashMap::new();
        nicknames.insert(DeviceId::new("d1"), "expected-name".to_string());
        let device_driver = Arc::new(RecordingDeviceDriver { renamed: Mutex::new(Vec::new()) });

        let mut drivers = DriverRegistry::new();
        drivers.register(DriverKind::VirtualHere, Arc::new(NicknameHostDriver { nicknames }), device_driver.clone());

        tick(&repo, &drivers).await;

        assert!(device_driver.renamed.lock().unwrap().is_empty());
    }
}
