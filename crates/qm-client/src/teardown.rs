use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// `asyncio.Event`-equivalent: a sticky, shareable "please stop" flag that
/// every concurrent loop in [`crate::runtime`] polls between iterations.
/// `tokio::sync::Notify` alone only wakes tasks already waiting when
/// `notify_waiters` fires, so the flag is what makes a `set()` that happens
/// before anyone is waiting still observed by a later `wait()`.
#[derive(Default)]
pub struct TeardownSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl TeardownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_before_wait_is_still_observed() {
        let signal = Arc::new(TeardownSignal::new());
        signal.set();
        tokio::time::timeout(std::time::Duration::from_millis(100), signal.wait())
            .await
            .expect("wait should return immediately once set");
    }

    #[tokio::test]
    async fn wait_unblocks_when_set_concurrently() {
        let signal = Arc::new(TeardownSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        signal.set();
        tokio::time::timeout(std::time::Duration::from_millis(100), waiter)
            .await
            .expect("task should complete")
            .unwrap();
    }
}
