use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Runs `tick` on a fixed period, skipping missed ticks rather than queueing
/// them up (a slow iteration delays the next run instead of piling up).
///
/// `name` is held for the lifetime of each tick behind a per-job
/// [`tokio::sync::Mutex`], giving the "at most one instance of this job runs
/// at a time" guarantee a distributed deployment would get from a named
/// database lock, without needing one here since this workspace runs a
/// single server process.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let lock = Arc::new(Mutex::new(()));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let _guard = lock.lock().await;
            let span = tracing::info_span!("scheduler_job", job = name);
            tick().instrument(span).await;
        }
    })
}
