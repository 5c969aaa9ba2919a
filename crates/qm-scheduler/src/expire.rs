use chrono::{Duration as ChronoDuration, Utc};
use qm_driver::DriverRegistry;
use qm_store::{ReleaseReason, Repository};

/// Releases every Resource whose reservation or check-in has timed out.
/// Walks the full, unfiltered Resource set (`list_all_resources`) rather than
/// the "available" listing, matching the original `update_reservations` task
/// which scans `Resource.objects.filter(last_check_in__isnull=False)` without
/// regard to whether any of the Resource's Devices are currently offline.
pub async fn tick(
    repo: &dyn Repository,
    drivers: &DriverRegistry,
    reservation_max: ChronoDuration,
    checkin_timeout: ChronoDuration,
) {
    let resources = match repo.list_all_resources().await {
        Ok(resources) => resources,
        Err(e) => {
            tracing::warn!(error = %e, "listing resources for expiry failed");
            return;
        }
    };

    let now = Utc::now();
    for resource in resources {
        if resource.last_check_in.is_none() {
            continue;
        }

        let reservation_expired = resource
            .reservation_expiration(reservation_max)
            .is_some_and(|exp| now > exp);
        let checkin_expired = resource
            .checkin_expiration(checkin_timeout)
            .is_some_and(|exp| now > exp);
        if !reservation_expired && !checkin_expired {
            continue;
        }

        let reason = if reservation_expired {
            ReleaseReason::ReservationExpired
        } else {
            ReleaseReason::CheckInExpired
        };

        tracing::info!(resource_id = %resource.id, ?reason, "expiring reservation");
        if let Err(e) = qm_allocator::release_reservation(repo, drivers, &resource.id, reason).await {
            tracing::warn!(resource_id = %resource.id, error = %e, "failed to expire reservation");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use qm_domain::{Device, DeviceId, DriverKind, HostId, HostType, Pool, PoolId, RemoteHost, Resource, ResourceId};
    use qm_driver::{DeviceDriver, DeviceError, DeviceObservation, HostDriver, HostError};
    use qm_store::InMemoryRepository;

    use super::*;

    struct NoopDeviceDriver;

    #[async_trait]
    impl DeviceDriver for NoopDeviceDriver {
        async fn is_shared(&self, _host: &RemoteHost, _device: &Device) -> Result<bool, DeviceError> {
            Ok(false)
        }
        async fn start_sharing(&self, _host: &RemoteHost, _device: &Device) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn stop_sharing(&self, _host: &RemoteHost, _device: &Device) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    struct NoopHostDriver;

    #[async_trait]
    impl HostDriver for NoopHostDriver {
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

    #[tokio::test]
    async fn expires_reservation_past_checkin_timeout() {
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
            name: "d1".into(),
            driver: DriverKind::Usbip,
            config: serde_json::json!({"bus_id": "1-1"}),
            online: true,
        })
        .await
        .unwrap();

        let mut r = Resource::new(ResourceId::new("r1"), PoolId::new("p1"), "r1");
        let long_ago = Utc::now() - ChronoDuration::hours(2);
        r.user = Some("alice".into());
        r.last_reserved = Some(long_ago);
        r.last_check_in = Some(long_ago);
        repo.upsert_resource(&r).await.unwrap();

        let mut drivers = DriverRegistry::new();
        drivers.register(DriverKind::Usbip, Arc::new(NoopHostDriver), Arc::new(NoopDeviceDriver));

        tick(&repo, &drivers, ChronoDuration::minutes(10), ChronoDuration::minutes(5)).await;

        let after = repo.get_resource(&ResourceId::new("r1")).await.unwrap().unwrap();
        assert!(after.user.is_none());
    }

    #[tokio::test]
    async fn leaves_fresh_reservation_untouched() {
        let repo = InMemoryRepository::new();
        repo.upsert_pool(&Pool { id: PoolId::new("p1"), name: "pool".into() }).await.unwrap();

        let mut r = Resource::new(ResourceId::new("r1"), PoolId::new("p1"), "r1");
        let now = Utc::now();
        r.user = Some("alice".into());
        r.last_reserved = Some(now);
        r.last_check_in = Some(now);
        repo.upsert_resource(&r).await.unwrap();

        let drivers = DriverRegistry::new();
        tick(&repo, &drivers, ChronoDuration::minutes(10), ChronoDuration::minutes(5)).await;

        let after = repo.get_resource(&ResourceId::new("r1")).await.unwrap().unwrap();
        assert_eq!(after.user.as_deref(), Some("alice"));
    }
}
