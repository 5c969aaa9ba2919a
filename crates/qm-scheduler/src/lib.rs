mod expire;
pub mod job;
mod nicknames;
mod reconcile;

pub use job::spawn_periodic;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use qm_driver::DriverRegistry;
use qm_store::Repository;
use tokio::task::JoinHandle;

const RECONCILE_PERIOD: Duration = Duration::from_secs(60);
const EXPIRE_PERIOD: Duration = Duration::from_secs(60);
const NICKNAME_PERIOD: Duration = Duration::from_secs(15 * 60);

/// Join handles for the three background jobs, kept alive for the lifetime
/// of the server process.
pub struct Scheduler {
    pub expire: JoinHandle<()>,
    pub reconcile: JoinHandle<()>,
    pub nicknames: JoinHandle<()>,
}

impl Scheduler {
    pub fn abort(&self) {
        self.expire.abort();
        self.reconcile.abort();
        self.nicknames.abort();
    }
}

/// Spawns the expiry, reconciliation, and nickname-maintenance jobs.
pub fn spawn(
    repo: Arc<dyn Repository>,
    drivers: Arc<DriverRegistry>,
    reservation_max: Duration,
    checkin_timeout: Duration,
) -> Scheduler {
    let reservation_max = ChronoDuration::from_std(reservation_max).unwrap_or(ChronoDuration::zero());
    let checkin_timeout = ChronoDuration::from_std(checkin_timeout).unwrap_or(ChronoDuration::zero());

    let expire = {
        let repo = repo.clone();
        let drivers = drivers.clone();
        job::spawn_periodic("expire_reservations", EXPIRE_PERIOD, move || {
            let repo = repo.clone();
            let drivers = drivers.clone();
            async move { expire::tick(repo.as_ref(), drivers.as_ref(), reservation_max, checkin_timeout).await }
        })
    };

    let reconcile = {
        let repo = repo.clone();
        let drivers = drivers.clone();
        job::spawn_periodic("reconcile_host_state", RECONCILE_PERIOD, move || {
            let repo = repo.clone();
            let drivers = drivers.clone();
            async move { reconcile::tick(repo.as_ref(), drivers.as_ref()).await }
        })
    };

    let nicknames = {
        let repo = repo.clone();
        let drivers = drivers.clone();
        job::spawn_periodic("maintain_nicknames", NICKNAME_PERIOD, move || {
            let repo = repo.clone();
            let drivers = drivers.clone();
            async move { nicknames::tick(repo.as_ref(), drivers.as_ref()).await }
        })
    };

    Scheduler { expire, reconcile, nicknames }
}
