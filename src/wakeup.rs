//! Cross-task notification that lets a poll addition or deletion
//! interrupt the scheduler's current sleep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Shared handle; cloning is cheap and every clone observes the same
/// underlying notification.
#[derive(Clone, Default)]
pub struct Wakeup {
    notify: Arc<Notify>,
}

impl Wakeup {
    pub fn new() -> Self {
        Wakeup {
            notify: Arc::new(Notify::new()),
        }
    }

    /// Raised by the registry's Add/Delete paths.
    pub fn signal(&self) {
        self.notify.notify_one();
    }

    /// Sleep for `duration`, returning early if [`Wakeup::signal`] is
    /// called in the meantime. The remaining time is discarded either
    /// way, matching the outer driver re-computing its deadline on the
    /// next tick.
    pub async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.notify.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn signal_shortens_sleep() {
        let wakeup = Wakeup::new();
        let w2 = wakeup.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            w2.signal();
        });
        let start = Instant::now();
        wakeup.sleep(Duration::from_secs(600)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sleep_without_signal_runs_full_duration() {
        let wakeup = Wakeup::new();
        let start = Instant::now();
        wakeup.sleep(Duration::from_millis(30)).await;
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
