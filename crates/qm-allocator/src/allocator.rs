use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use qm_domain::ResourceId;
use qm_driver::DriverRegistry;
use qm_store::{AuditEvent, ReleaseReason, Repository};
use rand::RngCore;
use uuid::Uuid;

use crate::error::AllocatorError;
use crate::report::ReservationOutcome;

enum DeviceAction {
    Share,
    Unshare,
    Refresh,
}

/// `token_urlsafe(nbytes=10)`-equivalent: 10 bytes of entropy, URL-safe
/// base64 with no padding. Grounded on `quartermaster.allocator.make_reservation`.
fn generate_use_password() -> String {
    let mut bytes = [0u8; 10];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

async fn apply_to_devices(
    repo: &dyn Repository,
    drivers: &DriverRegistry,
    resource_id: &ResourceId,
    action: DeviceAction,
) -> Vec<String> {
    let mut errors = Vec::new();
    let devices = match repo.list_devices_for_resource(resource_id).await {
        Ok(devices) => devices,
        Err(e) => return vec![format!("listing devices for {resource_id}: {e}")],
    };

    for device in devices {
        let host = match repo.get_host(&device.host_id).await {
            Ok(Some(host)) => host,
            Ok(None) => {
                errors.push(format!("device {}: host {} not found", device.id, device.host_id));
                continue;
            }
            Err(e) => {
                errors.push(format!("device {}: {e}", device.id));
                continue;
            }
        };

        let driver = match drivers.device_driver(device.driver) {
            Ok(driver) => driver,
            Err(e) => {
                errors.push(format!("device {}: {e}", device.id));
                continue;
            }
        };

        let result = match action {
            DeviceAction::Share => driver.share(&host, &device).await,
            DeviceAction::Unshare => driver.unshare(&host, &device).await,
            DeviceAction::Refresh => driver.refresh(&host, &device).await,
        };
        if let Err(e) = result {
            tracing::warn!(device_id = %device.id, error = %e, "device share/unshare call failed");
            errors.push(format!("device {}: {e}", device.id));
        }
    }
    errors
}

/// Reserve `resource_id` for `user`. Set-then-share ordering: the
/// reservation fields are committed first, devices are shared afterward.
pub async fn make_reservation(
    repo: &dyn Repository,
    drivers: &DriverRegistry,
    resource_id: &ResourceId,
    user: &str,
    used_for: &str,
) -> Result<ReservationOutcome, AllocatorError> {
    let now = Utc::now();
    let use_password = generate_use_password();

    tracing::info!(resource_id = %resource_id, user, used_for, "making reservation");

    let resource = repo
        .try_make_reservation(resource_id, user, used_for, &use_password, now)
        .await?
        .ok_or_else(|| AllocatorError::AlreadyReserved(resource_id.to_string()))?;

    repo.append_event(&AuditEvent::ReservationMade {
        id: Uuid::new_v4(),
        at: now,
        resource_id: resource_id.clone(),
        user: user.to_string(),
        used_for: used_for.to_string(),
    })
    .await?;

    let share_errors = apply_to_devices(repo, drivers, resource_id, DeviceAction::Share).await;
    Ok(ReservationOutcome { resource, share_errors })
}

/// Record a check-in without otherwise touching the reservation.
pub async fn update_reservation(
    repo: &dyn Repository,
    resource_id: &ResourceId,
) -> Result<ReservationOutcome, AllocatorError> {
    let now = Utc::now();
    let resource = repo.touch_check_in(resource_id, now).await?;
    repo.append_event(&AuditEvent::ReservationCheckedIn {
        id: Uuid::new_v4(),
        at: now,
        resource_id: resource_id.clone(),
    })
    .await?;
    Ok(ReservationOutcome { resource, share_errors: Vec::new() })
}

/// Record a check-in and force every device share to be re-issued, in case a
/// share was lost without the reservation itself expiring.
pub async fn refresh_reservation(
    repo: &dyn Repository,
    drivers: &DriverRegistry,
    resource_id: &ResourceId,
) -> Result<ReservationOutcome, AllocatorError> {
    let now = Utc::now();
    let resource = repo.touch_check_in(resource_id, now).await?;
    let share_errors = apply_to_devices(repo, drivers, resource_id, DeviceAction::Refresh).await;
    repo.append_event(&AuditEvent::ReservationRefreshed {
        id: Uuid::new_v4(),
        at: now,
        resource_id: resource_id.clone(),
    })
    .await?;
    Ok(ReservationOutcome { resource, share_errors })
}

/// Release `resource_id`. Unshare-then-clear ordering: devices are unshared
/// first, reservation fields are cleared afterward. This asymmetry with
/// `make_reservation`'s set-then-share order is intentional, not a bug.
pub async fn release_reservation(
    repo: &dyn Repository,
    drivers: &DriverRegistry,
    resource_id: &ResourceId,
    reason: ReleaseReason,
) -> Result<ReservationOutcome, AllocatorError> {
    tracing::info!(resource_id = %resource_id, ?reason, "releasing reservation");

    let share_errors = apply_to_devices(repo, drivers, resource_id, DeviceAction::Unshare).await;
    let resource = repo.clear_reservation(resource_id).await?;

    repo.append_event(&AuditEvent::ReservationReleased {
        id: Uuid::new_v4(),
        at: Utc::now(),
        resource_id: resource_id.clone(),
        reason,
    })
    .await?;

    Ok(ReservationOutcome { resource, share_errors })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use qm_domain::{Device, DeviceId, DriverKind, HostId, HostType, Pool, PoolId, RemoteHost, Resource, ResourceId};
    use qm_driver::{DeviceDriver, DeviceError, DeviceObservation, HostDriver, HostError};
    use qm_store::InMemoryRepository;

    use super::*;

    struct StubDeviceDriver {
        shared: Mutex<bool>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl StubDeviceDriver {
        fn new(initially_shared: bool) -> Self {
            Self { shared: Mutex::new(initially_shared), calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl DeviceDriver for StubDeviceDriver {
        async fn is_shared(&self, _host: &RemoteHost, _device: &Device) -> Result<bool, DeviceError> {
            Ok(*self.shared.lock().unwrap())
        }

        async fn start_sharing(&self, _host: &RemoteHost, _device: &Device) -> Result<(), DeviceError> {
            *self.shared.lock().unwrap() = true;
            self.calls.lock().unwrap().push("start");
            Ok(())
        }

        async fn stop_sharing(&self, _host: &RemoteHost, _device: &Device) -> Result<(), DeviceError> {
            *self.shared.lock().unwrap() = false;
            self.calls.lock().unwrap().push("stop");
            Ok(())
        }
    }

    struct StubHostDriver;

    #[async_trait]
    impl HostDriver for StubHostDriver {
        fn identifier(&self) -> DriverKind {
            DriverKind::Usbip
        }

        async fn is_reachable(&self, _host: &RemoteHost) -> bool {
            true
        }

        async fn observe_devices(
            &self,
            _host: &RemoteHost,
            _devices: &[Device],
        ) -> Result<Vec<DeviceObservation>, HostError> {
            Ok(Vec::new())
        }
    }

    async fn seeded_repo_and_drivers() -> (InMemoryRepository, DriverRegistry, Arc<StubDeviceDriver>) {
        let repo = InMemoryRepository::new();
        repo.upsert_pool(&Pool { id: PoolId::new("p1"), name: "pool".into() }).await.unwrap();
        repo.upsert_resource(&Resource::new(ResourceId::new("r1"), PoolId::new("p1"), "r1")).await.unwrap();
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
            name: "d1".into(),
            driver: DriverKind::Usbip,
            config: serde_json::json!({"bus_id": "1-1"}),
            online: true,
        })
        .await
        .unwrap();

        let device_driver = Arc::new(StubDeviceDriver::new(false));
        let mut drivers = DriverRegistry::new();
        drivers.register(DriverKind::Usbip, Arc::new(StubHostDriver), device_driver.clone());

        (repo, drivers, device_driver)
    }

    #[tokio::test]
    async fn make_reservation_sets_fields_and_shares_devices() {
        let (repo, drivers, device_driver) = seeded_repo_and_drivers().await;

        let outcome = make_reservation(&repo, &drivers, &ResourceId::new("r1"), "alice", "testing")
            .await
            .unwrap();

        assert_eq!(outcome.resource.user.as_deref(), Some("alice"));
        assert!(!outcome.resource.use_password.is_empty());
        assert!(outcome.share_errors.is_empty());
        assert_eq!(*device_driver.shared.lock().unwrap(), true);
        assert_eq!(*device_driver.calls.lock().unwrap(), vec!["start"]);
    }

    #[tokio::test]
    async fn make_reservation_fails_when_already_reserved() {
        let (repo, drivers, _) = seeded_repo_and_drivers().await;
        make_reservation(&repo, &drivers, &ResourceId::new("r1"), "alice", "t1").await.unwrap();

        let err = make_reservation(&repo, &drivers, &ResourceId::new("r1"), "bob", "t2")
            .await
            .unwrap_err();
        assert!(matches!(err, AllocatorError::AlreadyReserved(_)));
    }

    #[tokio::test]
    async fn release_reservation_unshares_before_clearing() {
        let (repo, drivers, device_driver) = seeded_repo_and_drivers().await;
        make_reservation(&repo, &drivers, &ResourceId::new("r1"), "alice", "t1").await.unwrap();

        let outcome = release_reservation(&repo, &drivers, &ResourceId::new("r1"), ReleaseReason::Explicit)
            .await
            .unwrap();

        assert!(outcome.resource.user.is_none());
        assert_eq!(*device_driver.shared.lock().unwrap(), false);
        assert_eq!(*device_driver.calls.lock().unwrap(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn update_reservation_only_touches_check_in() {
        let (repo, drivers, device_driver) = seeded_repo_and_drivers().await;
        make_reservation(&repo, &drivers, &ResourceId::new("r1"), "alice", "t1").await.unwrap();
        device_driver.calls.lock().unwrap().clear();

        let outcome = update_reservation(&repo, &ResourceId::new("r1")).await.unwrap();
        assert!(outcome.resource.last_check_in.is_some());
        assert!(device_driver.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_reservation_reissues_share() {
        let (repo, drivers, device_driver) = seeded_repo_and_drivers().await;
        make_reservation(&repo, &drivers, &ResourceId::new("r1"), "alice", "t1").await.unwrap();
        device_driver.calls.lock().unwrap().clear();

        refresh_reservation(&repo, &drivers, &ResourceId::new("r1")).await.unwrap();
        assert_eq!(*device_driver.calls.lock().unwrap(), vec!["start"]);
    }
}
