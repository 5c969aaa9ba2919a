use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qm_domain::{Device, DeviceId, HostId, Pool, PoolId, RemoteHost, Resource, ResourceId, TeamCityPool};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::repository::Repository;
use crate::state::AuditEvent;

#[derive(Debug, Default)]
struct Inner {
    pools: HashMap<PoolId, Pool>,
    resources: HashMap<ResourceId, Resource>,
    hosts: HashMap<HostId, RemoteHost>,
    devices: HashMap<DeviceId, Device>,
    teamcity_pools: HashMap<String, TeamCityPool>,
    events: Vec<AuditEvent>,
}

/// In-memory [`Repository`]. All data is lost on process exit. Used in unit
/// and handler tests across the workspace.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_pool(&self, id: &PoolId) -> Result<Option<Pool>, StoreError> {
        Ok(self.inner.read().await.pools.get(id).cloned())
    }

    async fn list_pools(&self) -> Result<Vec<Pool>, StoreError> {
        Ok(self.inner.read().await.pools.values().cloned().collect())
    }

    async fn upsert_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        self.inner.write().await.pools.insert(pool.id.clone(), pool.clone());
        Ok(())
    }

    async fn delete_pool(&self, id: &PoolId) -> Result<(), StoreError> {
        self.inner.write().await.pools.remove(id);
        Ok(())
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>, StoreError> {
        Ok(self.inner.read().await.resources.get(id).cloned())
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        let guard = self.inner.read().await;
        let out = guard
            .resources
            .values()
            .filter(|r| r.enabled)
            .filter(|r| {
                !guard
                    .devices
                    .values()
                    .any(|d| d.resource_id.as_ref() == Some(&r.id) && !d.online)
            })
            .cloned()
            .collect();
        Ok(out)
    }

    async fn list_all_resources(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.inner.read().await.resources.values().cloned().collect())
    }

    async fn list_resources_in_pool(&self, pool_id: &PoolId) -> Result<Vec<Resource>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .resources
            .values()
            .filter(|r| &r.pool_id == pool_id)
            .cloned()
            .collect())
    }

    async fn upsert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .resources
            .insert(resource.id.clone(), resource.clone());
        Ok(())
    }

    async fn delete_resource(&self, id: &ResourceId) -> Result<(), StoreError> {
        self.inner.write().await.resources.remove(id);
        Ok(())
    }

    async fn try_make_reservation(
        &self,
        id: &ResourceId,
        user: &str,
        used_for: &str,
        use_password: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Resource>, StoreError> {
        let mut guard = self.inner.write().await;
        let resource = guard
            .resources
            .get_mut(id)
            .ok_or_else(|| StoreError::ResourceNotFound(id.to_string()))?;
        if resource.user.is_some() {
            return Ok(None);
        }
        resource.user = Some(user.to_string());
        resource.used_for = used_for.to_string();
        resource.use_password = use_password.to_string();
        resource.last_reserved = Some(now);
        resource.last_check_in = Some(now);
        Ok(Some(resource.clone()))
    }

    async fn touch_check_in(&self, id: &ResourceId, now: DateTime<Utc>) -> Result<Resource, StoreError> {
        let mut guard = self.inner.write().await;
        let resource = guard
            .resources
            .get_mut(id)
            .ok_or_else(|| StoreError::ResourceNotFound(id.to_string()))?;
        resource.last_check_in = Some(now);
        Ok(resource.clone())
    }

    async fn clear_reservation(&self, id: &ResourceId) -> Result<Resource, StoreError> {
        let mut guard = self.inner.write().await;
        let resource = guard
            .resources
            .get_mut(id)
            .ok_or_else(|| StoreError::ResourceNotFound(id.to_string()))?;
        resource.user = None;
        resource.used_for = String::new();
        resource.use_password = String::new();
        resource.last_check_in = None;
        Ok(resource.clone())
    }

    async fn get_host(&self, id: &HostId) -> Result<Option<RemoteHost>, StoreError> {
        Ok(self.inner.read().await.hosts.get(id).cloned())
    }

    async fn list_hosts(&self) -> Result<Vec<RemoteHost>, StoreError> {
        Ok(self.inner.read().await.hosts.values().cloned().collect())
    }

    async fn upsert_host(&self, host: &RemoteHost) -> Result<(), StoreError> {
        self.inner.write().await.hosts.insert(host.id.clone(), host.clone());
        Ok(())
    }

    async fn delete_host(&self, id: &HostId) -> Result<(), StoreError> {
        self.inner.write().await.hosts.remove(id);
        Ok(())
    }

    async fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, StoreError> {
        Ok(self.inner.read().await.devices.get(id).cloned())
    }

    async fn list_devices_for_resource(&self, resource_id: &ResourceId) -> Result<Vec<Device>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .devices
            .values()
            .filter(|d| d.resource_id.as_ref() == Some(resource_id))
            .cloned()
            .collect())
    }

    async fn list_devices_for_host(&self, host_id: &HostId) -> Result<Vec<Device>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .devices
            .values()
            .filter(|d| &d.host_id == host_id)
            .cloned()
            .collect())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.inner.read().await.devices.values().cloned().collect())
    }

    async fn upsert_device(&self, device: &Device) -> Result<(), StoreError> {
        self.inner.write().await.devices.insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn set_device_online(&self, id: &DeviceId, online: bool) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let device = guard
            .devices
            .get_mut(id)
            .ok_or_else(|| StoreError::DeviceNotFound(id.to_string()))?;
        device.online = online;
        Ok(())
    }

    async fn delete_device(&self, id: &DeviceId) -> Result<(), StoreError> {
        self.inner.write().await.devices.remove(id);
        Ok(())
    }

    async fn get_teamcity_pool(&self, name: &str) -> Result<Option<TeamCityPool>, StoreError> {
        Ok(self.inner.read().await.teamcity_pools.get(name).cloned())
    }

    async fn list_teamcity_pools(&self) -> Result<Vec<TeamCityPool>, StoreError> {
        Ok(self.inner.read().await.teamcity_pools.values().cloned().collect())
    }

    async fn upsert_teamcity_pool(&self, pool: &TeamCityPool) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .teamcity_pools
            .insert(pool.name.clone(), pool.clone());
        Ok(())
    }

    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.inner.write().await.events.push(event.clone());
        Ok(())
    }

    async fn list_events(
        &self,
        resource_id: Option<&ResourceId>,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let guard = self.inner.read().await;
        let filtered: Vec<AuditEvent> = guard
            .events
            .iter()
            .filter(|ev| match resource_id {
                Some(rid) => ev.resource_id() == Some(rid),
                None => true,
            })
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit as usize);
        Ok(filtered[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qm_domain::DriverKind;

    fn dummy_resource(id: &str) -> Resource {
        Resource::new(ResourceId::new(id), PoolId::new("p1"), id)
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let repo = InMemoryRepository::new();
        repo.upsert_resource(&dummy_resource("r1")).await.unwrap();
        let got = repo.get_resource(&ResourceId::new("r1")).await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn try_make_reservation_fails_when_already_reserved() {
        let repo = InMemoryRepository::new();
        let mut r = dummy_resource("r1");
        r.user = Some("bob".to_string());
        repo.upsert_resource(&r).await.unwrap();

        let result = repo
            .try_make_reservation(&ResourceId::new("r1"), "alice", "test", "pw", Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn try_make_reservation_succeeds_when_free() {
        let repo = InMemoryRepository::new();
        repo.upsert_resource(&dummy_resource("r1")).await.unwrap();

        let now = Utc::now();
        let result = repo
            .try_make_reservation(&ResourceId::new("r1"), "alice", "test", "pw", now)
            .await
            .unwrap();
        let r = result.unwrap();
        assert_eq!(r.user.as_deref(), Some("alice"));
        assert_eq!(r.last_reserved, Some(now));
    }

    #[tokio::test]
    async fn clear_reservation_resets_fields() {
        let repo = InMemoryRepository::new();
        let mut r = dummy_resource("r1");
        r.user = Some("alice".to_string());
        r.used_for = "test".to_string();
        r.use_password = "pw".to_string();
        r.last_check_in = Some(Utc::now());
        repo.upsert_resource(&r).await.unwrap();

        let cleared = repo.clear_reservation(&ResourceId::new("r1")).await.unwrap();
        assert!(cleared.user.is_none());
        assert_eq!(cleared.used_for, "");
        assert_eq!(cleared.use_password, "");
        assert!(cleared.last_check_in.is_none());
    }

    #[tokio::test]
    async fn list_resources_excludes_resources_with_offline_devices() {
        let repo = InMemoryRepository::new();
        repo.upsert_resource(&dummy_resource("r1")).await.unwrap();
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

        let listed = repo.list_resources().await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn events_filtered_by_resource() {
        use chrono::Utc;
        use uuid::Uuid;

        let repo = InMemoryRepository::new();
        repo.append_event(&AuditEvent::ReservationMade {
            id: Uuid::new_v4(),
            at: Utc::now(),
            resource_id: ResourceId::new("a"),
            user: "alice".into(),
            used_for: "test".into(),
        })
        .await
        .unwrap();
        repo.append_event(&AuditEvent::ReservationMade {
            id: Uuid::new_v4(),
            at: Utc::now(),
            resource_id: ResourceId::new("b"),
            user: "bob".into(),
            used_for: "test".into(),
        })
        .await
        .unwrap();

        let all = repo.list_events(None, 100).await.unwrap();
        assert_eq!(all.len(), 2);

        let for_a = repo.list_events(Some(&ResourceId::new("a")), 100).await.unwrap();
        assert_eq!(for_a.len(), 1);
    }
}
