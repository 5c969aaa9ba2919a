use chrono::{DateTime, Utc};
use qm_domain::{DeviceId, HostId, PoolId, ResourceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit trail of runtime-mutated state. Append-only; never updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AuditEvent {
    ReservationMade {
        id: Uuid,
        at: DateTime<Utc>,
        resource_id: ResourceId,
        user: String,
        used_for: String,
    },
    ReservationCheckedIn {
        id: Uuid,
        at: DateTime<Utc>,
        resource_id: ResourceId,
    },
    ReservationRefreshed {
        id: Uuid,
        at: DateTime<Utc>,
        resource_id: ResourceId,
    },
    ReservationReleased {
        id: Uuid,
        at: DateTime<Utc>,
        resource_id: ResourceId,
        reason: ReleaseReason,
    },
    HostReconciled {
        id: Uuid,
        at: DateTime<Utc>,
        host_id: HostId,
        devices_checked: usize,
    },
    HostUnreachable {
        id: Uuid,
        at: DateTime<Utc>,
        host_id: HostId,
    },
    DeviceShareChanged {
        id: Uuid,
        at: DateTime<Utc>,
        device_id: DeviceId,
        shared: bool,
    },
    PoolCreated {
        id: Uuid,
        at: DateTime<Utc>,
        pool_id: PoolId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseReason {
    Explicit,
    ReservationExpired,
    CheckInExpired,
    CiBuildFinished,
}

impl AuditEvent {
    pub fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            AuditEvent::ReservationMade { resource_id, .. } => Some(resource_id),
            AuditEvent::ReservationCheckedIn { resource_id, .. } => Some(resource_id),
            AuditEvent::ReservationRefreshed { resource_id, .. } => Some(resource_id),
            AuditEvent::ReservationReleased { resource_id, .. } => Some(resource_id),
            _ => None,
        }
    }
}
