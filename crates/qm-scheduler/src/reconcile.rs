use std::collections::HashMap;

use chrono::Utc;
use qm_domain::{Device, DriverKind};
use qm_driver::DriverRegistry;
use qm_store::{AuditEvent, Repository};
use uuid::Uuid;

fn group_by_driver(devices: Vec<Device>) -> HashMap<DriverKind, Vec<Device>> {
    let mut grouped: HashMap<DriverKind, Vec<Device>> = HashMap::new();
    for device in devices {
        grouped.entry(device.driver).or_default().push(device);
    }
    grouped
}

/// Converges every RemoteHost's observed device state with the intended one.
///
/// Grounded on `update_device_states` (USBIP/VirtualHere `driver.py`): poll
/// online/offline in as few round trips as the driver allows, then for every
/// Device whose Resource is reserved but not shared, share it; for every
/// Device whose Resource isn't reserved but is shared, unshare it. A single
/// unreachable host or failing device never aborts the sweep.
pub async fn tick(repo: &dyn Repository, drivers: &DriverRegistry) {
    let hosts = match repo.list_hosts().await {
        Ok(hosts) => hosts,
        Err(e) => {
            tracing::warn!(error = %e, "listing hosts for reconciliation failed");
            return;
        }
    };

    for host in hosts {
        let devices = match repo.list_devices_for_host(&host.id).await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(host_id = %host.id, error = %e, "listing devices for host failed");
                continue;
            }
        };

        for (kind, devices) in group_by_driver(devices) {
            let host_driver = match drivers.host_driver(kind) {
                Ok(driver) => driver,
                Err(e) => {
                    tracing::warn!(host_id = %host.id, driver = %kind, error = %e, "no driver registered");
                    continue;
                }
            };

            if !host_driver.is_reachable(&host).await {
                tracing::warn!(host_id = %host.id, "host unreachable, marking its devices offline");
                for device in &devices {
                    if let Err(e) = repo.set_device_online(&device.id, false).await {
                        tracing::warn!(device_id = %device.id, error = %e, "failed to mark device offline");
                    }
                }
                let _ = repo
                    .append_event(&AuditEvent::HostUnreachable { id: Uuid::new_v4(), at: Utc::now(), host_id: host.id.clone() })
                    .await;
                continue;
            }

            if devices.is_empty() {
                continue;
            }

            let observations = match host_driver.observe_devices(&host, &devices).await {
                Ok(observations) => observations,
                Err(e) => {
                    tracing::warn!(host_id = %host.id, driver = %kind, error = %e, "observing devices failed");
                    continue;
                }
            };
            for observation in &observations {
                if let Err(e) = repo.set_device_online(&observation.device_id, observation.online).await {
                    tracing::warn!(device_id = %observation.device_id, error = %e, "failed to persist online state");
                }
            }

            let device_driver = match drivers.device_driver(kind) {
                Ok(driver) => driver,
                Err(e) => {
                    tracing::warn!(host_id = %host.id, driver = %kind, error = %e, "no device driver registered");
                    continue;
                }
            };

            for device in &devices {
                let in_use = match &device.resource_id {
                    Some(resource_id) => repo
                        .get_resource(resource_id)
                        .await
                        .ok()
                        .flatten()
                        .is_some_and(|r| r.in_use()),
                    None => false,
                };

                let result = if in_use {
                    device_driver.share(&host, device).await
                } else {
                    device_driver.unshare(&host, device).await
                };
                if let Err(e) = result {
                    tracing::warn!(device_id = %device.id, error = %e, "failed to converge device share state");
                }
            }

            let _ = repo
                .append_event(&AuditEvent::HostReconciled {
                    id: Uuid::new_v4(),
                    at: Utc::now(),
                    host_id: host.id.clone(),
                    devices_checked: devices.len(),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use qm_domain::{DeviceId, HostId, HostType, Pool, PoolId, Resource, ResourceId};
    use qm_driver::{DeviceDriver, DeviceError, DeviceObservation, HostDriver, HostError};
    use qm_store::InMemoryRepository;

    use super::*;

    struct RecordingDeviceDriver {
        shared: Mutex<bool>,
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl DeviceDriver for RecordingDeviceDriver {
        async fn is_shared(&self, _host: &qm_domain::RemoteHost, _device: &Device) -> Result<bool, DeviceError> {
            Ok(*self.shared.lock().unwrap())
        }
        async fn start_sharing(&self, _host: &qm_domain::RemoteHost, _device: &Device) -> Result<(), DeviceError> {
            *self.shared.lock().unwrap() = true;
            self.calls.lock().unwrap().push("start");
            Ok(())
        }
        async fn stop_sharing(&self, _host: &qm_domain::RemoteHost, _device: &Device) -> Result<(), DeviceError> {
            *self.shared.lock().unwrap() = false;
            self.calls.lock().unwrap().push("stop");
            Ok(())
        }
    }

    struct StaticHostDriver {
        reachable: bool,
    }

    #[async_trait]
    impl HostDriver for StaticHostDriver {
        fn identifier(&self) -> DriverKind {
            DriverKind::Usbip
        }
        async fn is_reachable(&self, _host: &qm_domain::RemoteHost) -> bool {
            self.reachable
        }
        async fn observe_devices(
            &self,
            _host: &qm_domain::RemoteHost,
            devices: &[Device],
        ) -> Result<Vec<DeviceObservation>, HostError> {
            Ok(devices.iter().map(|d| DeviceObservation { device_id: d.id.clone(), online: true }).collect())
        }
    }

    async fn seeded_repo() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.upsert_pool(&Pool { id: PoolId::new("p1"), name: "pool".into() }).await.unwrap();
        repo.upsert_host(&qm_domain::RemoteHost {
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
            name: "d1".into(),
            driver: DriverKind::Usbip,
            config: serde_json::json!({"bus_id": "1-1"}),
            online: false,
        })
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn shares_device_whose_resource_is_reserved() {
        let repo = seeded_repo().await;
        let mut r = Resource::new(ResourceId::new("r1"), PoolId::new("p1"), "r1");
        r.user = Some("alice".into());
        repo.upsert_resource(&r).await.unwrap();

        let device_driver = Arc::new(RecordingDeviceDriver { shared: Mutex::new(false), calls: Mutex::new(Vec::new()) });
        let mut drivers = DriverRegistry::new();
        drivers.register(DriverKind::Usbip, Arc::new(StaticHostDriver { reachable: true }), device_driver.clone());

        tick(&repo, &drivers).await;

        assert_eq!(*device_driver.calls.lock().unwrap(), vec!["start"]);
        let device = repo.get_device(&DeviceId::new("d1")).await.unwrap().unwrap();
        assert!(device.online);
    }

    #[tokio::test]
    async fn unshares_device_whose_resource_is_free() {
        let repo = seeded_repo().await;
        repo.upsert_resource(&Resource::new(ResourceId::new("r1"), PoolId::new("p1"), "r1")).await.unwrap();

        let device_driver = Arc::new(RecordingDeviceDriver { shared: Mutex::new(true), calls: Mutex::new(Vec::new()) });
        let mut drivers = DriverRegistry::new();
        drivers.register(DriverKind::Usbip, Arc::new(StaticHostDriver { reachable: true }), device_driver.clone());

        tick(&repo, &drivers).await;

        assert_eq!(*device_driver.calls.lock().unwrap(), vec!["stop"]);
    }

    #[tokio::test]
    async fn marks_devices_offline_when_host_unreachable() {
        let repo = seeded_repo().await;
        repo.upsert_resource(&Resource::new(ResourceId::new("r1"), PoolId::new("p1"), "r1")).await.unwrap();

        let device_driver = Arc::new(RecordingDeviceDriver { shared: Mutex::new(false), calls: Mutex::new(Vec::new()) });
        let mut drivers = DriverRegistry::new();
        drivers.register(DriverKind::Usbip, Arc::new(StaticHostDriver { reachable: false }), device_driver.clone());

        tick(&repo, &drivers).await;

        assert!(device_driver.calls.lock().unwrap().is_empty());
        let device = repo.get_device(&DeviceId::new("d1")).await.unwrap().unwrap();
        assert!(!device.online);
    }
}
