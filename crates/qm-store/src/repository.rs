use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qm_domain::{Device, DeviceId, HostId, Pool, PoolId, RemoteHost, Resource, ResourceId, TeamCityPool};

use crate::error::StoreError;
use crate::state::AuditEvent;

/// Transactional CRUD for pools, resources, hosts, and devices, plus the
/// atomic reservation-field mutators the Allocator (qm-allocator) relies on.
///
/// Each reservation mutator runs in one serializable DB transaction; here
/// that transaction boundary is the single trait method call itself, a
/// one-call upsert granularity rather than exposing an explicit transaction
/// handle (which would make this trait non-object-safe).
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    async fn get_pool(&self, id: &PoolId) -> Result<Option<Pool>, StoreError>;
    async fn list_pools(&self) -> Result<Vec<Pool>, StoreError>;
    async fn upsert_pool(&self, pool: &Pool) -> Result<(), StoreError>;
    async fn delete_pool(&self, id: &PoolId) -> Result<(), StoreError>;

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>, StoreError>;

    /// All enabled Resources. Resources with at least one offline Device are
    /// excluded from this default listing.
    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError>;

    /// Every Resource regardless of `enabled` or device online state. The
    /// expiry job walks this set (the original's `update_reservations` task
    /// scans the unfiltered `Resource` table), since a reservation must still
    /// expire even on a Resource whose devices have gone offline.
    async fn list_all_resources(&self) -> Result<Vec<Resource>, StoreError>;

    async fn list_resources_in_pool(&self, pool_id: &PoolId) -> Result<Vec<Resource>, StoreError>;
    async fn upsert_resource(&self, resource: &Resource) -> Result<(), StoreError>;
    async fn delete_resource(&self, id: &ResourceId) -> Result<(), StoreError>;

    /// Atomically set reservation fields iff `resource.user` is currently
    /// null. Returns `Ok(None)` (precondition failed) if already reserved.
    async fn try_make_reservation(
        &self,
        id: &ResourceId,
        user: &str,
        used_for: &str,
        use_password: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Resource>, StoreError>;

    /// Atomically set `last_check_in = now`. Does not touch any other field.
    async fn touch_check_in(&self, id: &ResourceId, now: DateTime<Utc>) -> Result<Resource, StoreError>;

    /// Atomically clear `user`, `used_for`, `use_password`, `last_check_in`.
    async fn clear_reservation(&self, id: &ResourceId) -> Result<Resource, StoreError>;

    async fn get_host(&self, id: &HostId) -> Result<Option<RemoteHost>, StoreError>;
    async fn list_hosts(&self) -> Result<Vec<RemoteHost>, StoreError>;
    async fn upsert_host(&self, host: &RemoteHost) -> Result<(), StoreError>;
    async fn delete_host(&self, id: &HostId) -> Result<(), StoreError>;

    async fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, StoreError>;

    /// Devices default to filtering `online=true`; callers that need the
    /// full set (e.g. the reconciler) use `list_devices`.
    async fn list_devices_for_resource(&self, resource_id: &ResourceId) -> Result<Vec<Device>, StoreError>;
    async fn list_devices_for_host(&self, host_id: &HostId) -> Result<Vec<Device>, StoreError>;
    async fn list_devices(&self) -> Result<Vec<Device>, StoreError>;
    async fn upsert_device(&self, device: &Device) -> Result<(), StoreError>;
    async fn set_device_online(&self, id: &DeviceId, online: bool) -> Result<(), StoreError>;
    async fn delete_device(&self, id: &DeviceId) -> Result<(), StoreError>;

    async fn get_teamcity_pool(&self, name: &str) -> Result<Option<TeamCityPool>, StoreError>;
    async fn list_teamcity_pools(&self) -> Result<Vec<TeamCityPool>, StoreError>;
    async fn upsert_teamcity_pool(&self, pool: &TeamCityPool) -> Result<(), StoreError>;

    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError>;
    async fn list_events(
        &self,
        resource_id: Option<&ResourceId>,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, StoreError>;
}
