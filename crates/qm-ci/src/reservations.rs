use qm_domain::{PoolId, Resource, ResourceId};
use qm_driver::DriverRegistry;
use qm_store::{ReleaseReason, Repository};
use serde_json::{json, Value};

use crate::client::TeamCityClient;
use crate::error::CiError;

const USED_FOR_PREFIX: &str = "Teamcity_ID=";

/// Synthetic `used_for` value the allocator stamps on CI-made reservations,
/// grounded on `Teamcity/tc_allocator.py`'s `f"Teamcity_ID={job_id}"`.
pub fn used_for(job_id: i64) -> String {
    format!("{USED_FOR_PREFIX}{job_id}")
}

fn parse_job_id(used_for: &str) -> Option<i64> {
    used_for.strip_prefix(USED_FOR_PREFIX)?.parse().ok()
}

/// Reservations made by the CI allocator are tagged with this user, so the
/// manage-reservations job can find its own Resources among everyone else's.
pub const CI_RESERVATION_USER: &str = "teamcity";

fn quota_value(quota: &Value) -> i64 {
    quota.get("value").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// Finds a free Resource in `pool_id` and reserves it for the build, bumping
/// the remote shared-resource quota by one. Idempotent against `used_for`:
/// a Resource already reserved under this exact `used_for` is left alone.
/// Grounded on `Teamcity/tc_allocator.py`'s `teamcity_make_reservation`.
pub async fn teamcity_make_reservation(
    repo: &dyn Repository,
    drivers: &DriverRegistry,
    client: &TeamCityClient,
    pool_id: &PoolId,
    shared_resource_url: &str,
    job_id: i64,
    reservation_user: &str,
) -> Result<(), CiError> {
    let used_for = used_for(job_id);

    let resources = repo.list_resources_in_pool(pool_id).await?;
    if resources.iter().any(|r| r.used_for == used_for) {
        tracing::debug!(job_id, "reservation already exists for this build");
        return Ok(());
    }

    let free = resources.into_iter().find(|r| r.user.is_none());
    let Some(free) = free else {
        tracing::info!(job_id, pool = %pool_id, "no free resource available for blocked build");
        return Ok(());
    };

    let quota = client.get_quota(shared_resource_url).await?;
    let incremented = quota_value(&quota) + 1;
    let body = json!({ "name": "quota", "value": incremented.to_string() });

    qm_allocator::make_reservation(repo, drivers, &free.id, reservation_user, &used_for).await?;

    if let Err(e) = client.put_quota(shared_resource_url, &body).await {
        tracing::warn!(job_id, error = %e, "quota PUT failed after reservation, rolling back");
        qm_allocator::release_reservation(repo, drivers, &free.id, ReleaseReason::Explicit).await?;
        return Err(e);
    }

    Ok(())
}

/// Releases a Resource reserved by the CI allocator and decrements (or
/// self-heals) the remote shared-resource quota. Grounded on
/// `Teamcity/tc_allocator.py`'s `teamcity_release_reservation`.
pub async fn teamcity_release_reservation(
    repo: &dyn Repository,
    drivers: &DriverRegistry,
    client: &TeamCityClient,
    shared_resource_url: &str,
    resource_id: &ResourceId,
) -> Result<(), CiError> {
    let quota = client.get_quota(shared_resource_url).await?;
    let v = quota_value(&quota);

    if v > 0 {
        let body = json!({ "name": "quota", "value": (v - 1).to_string() });
        client.put_quota(shared_resource_url, &body).await?;
    } else if v < 0 {
        let body = json!({ "name": "quota", "value": "0" });
        client.put_quota(shared_resource_url, &body).await?;
    }

    qm_allocator::release_reservation(repo, drivers, resource_id, ReleaseReason::CiBuildFinished).await?;
    Ok(())
}

/// Resources currently held by the CI allocator with a parseable build id.
pub fn ci_owned_resources(resources: Vec<Resource>) -> Vec<(Resource, i64)> {
    resources
        .into_iter()
        .filter(|r| r.user.as_deref() == Some(CI_RESERVATION_USER))
        .filter_map(|r| parse_job_id(&r.used_for).map(|job_id| (r, job_id)))
        .collect()
}
