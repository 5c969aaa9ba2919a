use std::sync::Arc;
use std::time::Duration;

use qm_config::TeamCityConfig;
use qm_driver::DriverRegistry;
use qm_store::Repository;
use qm_scheduler::spawn_periodic;
use tokio::task::JoinHandle;

use crate::client::TeamCityClient;
use crate::reservations::{ci_owned_resources, teamcity_make_reservation, teamcity_release_reservation};

const JOB_PERIOD: Duration = Duration::from_secs(60);

/// Join handles for the two CI background jobs. Only spawned when a server
/// is configured with a TeamCity integration (`ServerConfig::teamcity`).
pub struct CiJobs {
    pub manage_reservations: JoinHandle<()>,
    pub monitor_queue: JoinHandle<()>,
}

impl CiJobs {
    pub fn abort(&self) {
        self.manage_reservations.abort();
        self.monitor_queue.abort();
    }
}

pub fn spawn(repo: Arc<dyn Repository>, drivers: Arc<DriverRegistry>, config: TeamCityConfig) -> CiJobs {
    let client = TeamCityClient::new(config.host.clone(), config.user.clone(), config.password.clone());

    let manage_reservations = {
        let repo = repo.clone();
        let drivers = drivers.clone();
        let client = client.clone();
        spawn_periodic("manage_ci_reservations", JOB_PERIOD, move || {
            let repo = repo.clone();
            let drivers = drivers.clone();
            let client = client.clone();
            async move { manage_ci_reservations(repo.as_ref(), drivers.as_ref(), &client).await }
        })
    };

    let monitor_queue = {
        let repo = repo.clone();
        let drivers = drivers.clone();
        let client = client.clone();
        let reservation_user = config.reservation_username.clone();
        spawn_periodic("monitor_ci_queue", JOB_PERIOD, move || {
            let repo = repo.clone();
            let drivers = drivers.clone();
            let client = client.clone();
            let reservation_user = reservation_user.clone();
            async move { monitor_ci_queue(repo.as_ref(), drivers.as_ref(), &client, &reservation_user).await }
        })
    };

    CiJobs { manage_reservations, monitor_queue }
}

/// For every Resource the CI allocator currently holds, ask TeamCity whether
/// the build has finished and release it if so. Per-resource failures are
/// logged and do not stop the sweep.
async fn manage_ci_reservations(repo: &dyn Repository, drivers: &DriverRegistry, client: &TeamCityClient) {
    let resources = match repo.list_all_resources().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "manage_ci_reservations: failed to list resources");
            return;
        }
    };

    for (resource, job_id) in ci_owned_resources(resources) {
        let shared_resource_url = match resource_pool_url(repo, &resource).await {
            Some(url) => url,
            None => {
                tracing::warn!(resource_id = %resource.id, job_id, "no TeamCityPool found for reserved resource");
                continue;
            }
        };

        let done = match client.job_is_done(job_id).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "failed to query TeamCity build state");
                continue;
            }
        };

        if !done {
            continue;
        }

        if let Err(e) =
            teamcity_release_reservation(repo, drivers, client, &shared_resource_url, &resource.id).await
        {
            tracing::warn!(resource_id = %resource.id, job_id, error = %e, "failed to release finished CI reservation");
        }
    }
}

/// Finds queued builds blocked on a named pool and tries to reserve a
/// Resource for each.
async fn monitor_ci_queue(
    repo: &dyn Repository,
    drivers: &DriverRegistry,
    client: &TeamCityClient,
    reservation_user: &str,
) {
    let blocked = match client.blocked_jobs().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "monitor_ci_queue: failed to fetch TeamCity build queue");
            return;
        }
    };

    for (build, pool_name) in blocked {
        let tc_pool = match repo.get_teamcity_pool(&pool_name).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                tracing::warn!(pool_name, "blocked build references unknown TeamCityPool");
                continue;
            }
            Err(e) => {
                tracing::warn!(pool_name, error = %e, "failed to look up TeamCityPool");
                continue;
            }
        };

        let result = teamcity_make_reservation(
            repo,
            drivers,
            client,
            &tc_pool.pool_id,
            &tc_pool.shared_resource_url,
            build.id,
            reservation_user,
        )
        .await;

        if let Err(e) = result {
            tracing::warn!(job_id = build.id, pool_name, error = %e, "failed to make CI reservation");
        }
    }
}

async fn resource_pool_url(repo: &dyn Repository, resource: &qm_domain::Resource) -> Option<String> {
    let pools = repo.list_teamcity_pools().await.ok()?;
    pools
        .into_iter()
        .find(|p| p.pool_id == resource.pool_id)
        .map(|p| p.shared_resource_url)
}
