use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qm_domain::{
    CommunicatorKind, Device, DeviceId, DriverKind, HostId, HostType, Pool, PoolId, RemoteHost,
    Resource, ResourceId, TeamCityPool,
};
use sqlx::PgPool;
use sqlx::Row;

use crate::error::StoreError;
use crate::repository::Repository;
use crate::state::AuditEvent;

// DDL — idempotent; run at every startup via migrate(). The reservation
// columns on `resources` are plain columns (not a JSONB blob) so that
// `try_make_reservation` can express its precondition as a single
// `UPDATE ... WHERE "user" IS NULL` statement, keeping each reservation
// mutation to one serializable transaction without needing an explicit
// row lock held across an await point.
const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS pools (
    id   TEXT PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS resources (
    id             TEXT PRIMARY KEY,
    pool_id        TEXT NOT NULL REFERENCES pools(id),
    name           TEXT NOT NULL,
    description    TEXT NOT NULL DEFAULT '',
    enabled        BOOLEAN NOT NULL DEFAULT TRUE,
    "user"         TEXT,
    used_for       TEXT NOT NULL DEFAULT '',
    use_password   TEXT NOT NULL DEFAULT '',
    last_reserved  TIMESTAMPTZ,
    last_check_in  TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS remote_hosts (
    id           TEXT PRIMARY KEY,
    address      TEXT NOT NULL,
    communicator TEXT NOT NULL,
    host_type    TEXT NOT NULL,
    config       JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS devices (
    id          TEXT PRIMARY KEY,
    resource_id TEXT REFERENCES resources(id),
    host_id     TEXT NOT NULL REFERENCES remote_hosts(id),
    name        TEXT NOT NULL,
    driver      TEXT NOT NULL,
    config      JSONB NOT NULL,
    online      BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE INDEX IF NOT EXISTS idx_devices_resource ON devices (resource_id);
CREATE INDEX IF NOT EXISTS idx_devices_host ON devices (host_id);

CREATE TABLE IF NOT EXISTS teamcity_pools (
    name                TEXT PRIMARY KEY,
    pool_id             TEXT NOT NULL REFERENCES pools(id),
    shared_resource_url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_events (
    seq         BIGSERIAL PRIMARY KEY,
    resource_id TEXT,
    event       JSONB NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_audit_events_resource
    ON audit_events (resource_id) WHERE resource_id IS NOT NULL;
"#;

/// Persistent [`Repository`] backed by PostgreSQL. All tables are created
/// automatically on first connect (`PostgresRepository::connect`).
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url)
            .await
            .map_err(StoreError::Database)?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(MIGRATIONS)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(())
    }
}

fn row_to_resource(row: &sqlx::postgres::PgRow) -> Resource {
    Resource {
        id: ResourceId::new(row.get::<String, _>("id")),
        pool_id: PoolId::new(row.get::<String, _>("pool_id")),
        name: row.get("name"),
        description: row.get("description"),
        enabled: row.get("enabled"),
        user: row.get("user"),
        used_for: row.get("used_for"),
        use_password: row.get("use_password"),
        last_reserved: row.get("last_reserved"),
        last_check_in: row.get("last_check_in"),
    }
}

fn row_to_device(row: &sqlx::postgres::PgRow) -> Result<Device, StoreError> {
    let driver: String = row.get("driver");
    let driver = match driver.as_str() {
        "USBIP" => DriverKind::Usbip,
        "VirtualHere" => DriverKind::VirtualHere,
        other => return Err(StoreError::Internal(format!("unknown driver '{other}' in row"))),
    };
    Ok(Device {
        id: DeviceId::new(row.get::<String, _>("id")),
        resource_id: row.get::<Option<String>, _>("resource_id").map(ResourceId::new),
        host_id: HostId::new(row.get::<String, _>("host_id")),
        name: row.get("name"),
        driver,
        config: row.get("config"),
        online: row.get("online"),
    })
}

fn row_to_host(row: &sqlx::postgres::PgRow) -> Result<RemoteHost, StoreError> {
    let communicator: String = row.get("communicator");
    let communicator = match communicator.as_str() {
        "SSH" => CommunicatorKind::Ssh,
        other => return Err(StoreError::Internal(format!("unknown communicator '{other}' in row"))),
    };
    let host_type: String = row.get("host_type");
    let host_type = match host_type.as_str() {
        "Darwin" => HostType::Darwin,
        "Linux_AMD64" => HostType::LinuxAmd64,
        "Windows" => HostType::Windows,
        other => return Err(StoreError::Internal(format!("unknown host_type '{other}' in row"))),
    };
    Ok(RemoteHost {
        id: HostId::new(row.get::<String, _>("id")),
        address: row.get("address"),
        communicator,
        host_type,
        config: row.get("config"),
    })
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_pool(&self, id: &PoolId) -> Result<Option<Pool>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM pools WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(row.map(|r| Pool {
            id: PoolId::new(r.get::<String, _>("id")),
            name: r.get("name"),
        }))
    }

    async fn list_pools(&self) -> Result<Vec<Pool>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM pools")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(rows
            .iter()
            .map(|r| Pool {
                id: PoolId::new(r.get::<String, _>("id")),
                name: r.get("name"),
            })
            .collect())
    }

    async fn upsert_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO pools (id, name) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(pool.id.as_str())
        .bind(&pool.name)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn delete_pool(&self, id: &PoolId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pools WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>, StoreError> {
        let row = sqlx::query("SELECT * FROM resources WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(row.map(|r| row_to_resource(&r)))
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT r.* FROM resources r
               WHERE r.enabled
                 AND NOT EXISTS (
                     SELECT 1 FROM devices d
                     WHERE d.resource_id = r.id AND NOT d.online
                 )"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(rows.iter().map(row_to_resource).collect())
    }

    async fn list_all_resources(&self) -> Result<Vec<Resource>, StoreError> {
        let rows = sqlx::query("SELECT * FROM resources")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(rows.iter().map(row_to_resource).collect())
    }

    async fn list_resources_in_pool(&self, pool_id: &PoolId) -> Result<Vec<Resource>, StoreError> {
        let rows = sqlx::query("SELECT * FROM resources WHERE pool_id = $1")
            .bind(pool_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(rows.iter().map(row_to_resource).collect())
    }

    async fn upsert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO resources
                 (id, pool_id, name, description, enabled, "user", used_for, use_password, last_reserved, last_check_in)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (id) DO UPDATE SET
                 pool_id = EXCLUDED.pool_id, name = EXCLUDED.name, description = EXCLUDED.description,
                 enabled = EXCLUDED.enabled, "user" = EXCLUDED."user", used_for = EXCLUDED.used_for,
                 use_password = EXCLUDED.use_password, last_reserved = EXCLUDED.last_reserved,
                 last_check_in = EXCLUDED.last_check_in"#,
        )
        .bind(resource.id.as_str())
        .bind(resource.pool_id.as_str())
        .bind(&resource.name)
        .bind(&resource.description)
        .bind(resource.enabled)
        .bind(&resource.user)
        .bind(&resource.used_for)
        .bind(&resource.use_password)
        .bind(resource.last_reserved)
        .bind(resource.last_check_in)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn delete_resource(&self, id: &ResourceId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
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
        let row = sqlx::query(
            r#"UPDATE resources
               SET "user" = $2, used_for = $3, use_password = $4, last_reserved = $5, last_check_in = $5
               WHERE id = $1 AND "user" IS NULL
               RETURNING *"#,
        )
        .bind(id.as_str())
        .bind(user)
        .bind(used_for)
        .bind(use_password)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(row.map(|r| row_to_resource(&r)))
    }

    async fn touch_check_in(&self, id: &ResourceId, now: DateTime<Utc>) -> Result<Resource, StoreError> {
        let row = sqlx::query(
            r#"UPDATE resources SET last_check_in = $2 WHERE id = $1 RETURNING *"#,
        )
        .bind(id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?
        .ok_or_else(|| StoreError::ResourceNotFound(id.to_string()))?;
        Ok(row_to_resource(&row))
    }

    async fn clear_reservation(&self, id: &ResourceId) -> Result<Resource, StoreError> {
        let row = sqlx::query(
            r#"UPDATE resources
               SET "user" = NULL, used_for = '', use_password = '', last_check_in = NULL
               WHERE id = $1
               RETURNING *"#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?
        .ok_or_else(|| StoreError::ResourceNotFound(id.to_string()))?;
        Ok(row_to_resource(&row))
    }

    async fn get_host(&self, id: &HostId) -> Result<Option<RemoteHost>, StoreError> {
        let row = sqlx::query("SELECT * FROM remote_hosts WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        row.map(|r| row_to_host(&r)).transpose()
    }

    async fn list_hosts(&self) -> Result<Vec<RemoteHost>, StoreError> {
        let rows = sqlx::query("SELECT * FROM remote_hosts")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        rows.iter().map(row_to_host).collect()
    }

    async fn upsert_host(&self, host: &RemoteHost) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO remote_hosts (id, address, communicator, host_type, config)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
               address = EXCLUDED.address, communicator = EXCLUDED.communicator,
               host_type = EXCLUDED.host_type, config = EXCLUDED.config",
        )
        .bind(host.id.as_str())
        .bind(&host.address)
        .bind(host.communicator.to_string())
        .bind(host.host_type.to_string())
        .bind(&host.config)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn delete_host(&self, id: &HostId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM remote_hosts WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, StoreError> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        row.map(|r| row_to_device(&r)).transpose()
    }

    async fn list_devices_for_resource(&self, resource_id: &ResourceId) -> Result<Vec<Device>, StoreError> {
        let rows = sqlx::query("SELECT * FROM devices WHERE resource_id = $1")
            .bind(resource_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        rows.iter().map(row_to_device).collect()
    }

    async fn list_devices_for_host(&self, host_id: &HostId) -> Result<Vec<Device>, StoreError> {
        let rows = sqlx::query("SELECT * FROM devices WHERE host_id = $1")
            .bind(host_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        rows.iter().map(row_to_device).collect()
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let rows = sqlx::query("SELECT * FROM devices")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        rows.iter().map(row_to_device).collect()
    }

    async fn upsert_device(&self, device: &Device) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO devices (id, resource_id, host_id, name, driver, config, online)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
               resource_id = EXCLUDED.resource_id, host_id = EXCLUDED.host_id, name = EXCLUDED.name,
               driver = EXCLUDED.driver, config = EXCLUDED.config, online = EXCLUDED.online",
        )
        .bind(device.id.as_str())
        .bind(device.resource_id.as_ref().map(|r| r.as_str()))
        .bind(device.host_id.as_str())
        .bind(&device.name)
        .bind(device.driver.to_string())
        .bind(&device.config)
        .bind(device.online)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn set_device_online(&self, id: &DeviceId, online: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE devices SET online = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(online)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DeviceNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_device(&self, id: &DeviceId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn get_teamcity_pool(&self, name: &str) -> Result<Option<TeamCityPool>, StoreError> {
        let row = sqlx::query("SELECT * FROM teamcity_pools WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(row.map(|r| TeamCityPool {
            name: r.get("name"),
            pool_id: PoolId::new(r.get::<String, _>("pool_id")),
            shared_resource_url: r.get("shared_resource_url"),
        }))
    }

    async fn list_teamcity_pools(&self) -> Result<Vec<TeamCityPool>, StoreError> {
        let rows = sqlx::query("SELECT * FROM teamcity_pools")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(rows
            .iter()
            .map(|r| TeamCityPool {
                name: r.get("name"),
                pool_id: PoolId::new(r.get::<String, _>("pool_id")),
                shared_resource_url: r.get("shared_resource_url"),
            })
            .collect())
    }

    async fn upsert_teamcity_pool(&self, pool: &TeamCityPool) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO teamcity_pools (name, pool_id, shared_resource_url) VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET
               pool_id = EXCLUDED.pool_id, shared_resource_url = EXCLUDED.shared_resource_url",
        )
        .bind(&pool.name)
        .bind(pool.pool_id.as_str())
        .bind(&pool.shared_resource_url)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let resource_id = event.resource_id().map(|r| r.as_str().to_string());
        let payload = serde_json::to_value(event).map_err(StoreError::Serialization)?;
        sqlx::query("INSERT INTO audit_events (resource_id, event) VALUES ($1, $2)")
            .bind(resource_id)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn list_events(
        &self,
        resource_id: Option<&ResourceId>,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = match resource_id {
            Some(rid) => {
                sqlx::query("SELECT event FROM audit_events WHERE resource_id = $1 ORDER BY seq DESC LIMIT $2")
                    .bind(rid.as_str())
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT event FROM audit_events ORDER BY seq DESC LIMIT $1")
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(StoreError::Database)?;

        let mut events: Vec<AuditEvent> = rows
            .iter()
            .map(|r| serde_json::from_value(r.get("event")).map_err(StoreError::Serialization))
            .collect::<Result<_, _>>()?;
        events.reverse();
        Ok(events)
    }
}
