//! One-shot timers for quarantine expiry

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Run `action` once after `delay` on its own task
///
/// Fire-and-forget: no handle is returned, so a scheduled action cannot be
/// cancelled. Must be called from within a tokio runtime.
pub fn after<F>(delay: Duration, action: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    debug!(?delay, "quarantine::after: scheduling");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        action.await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_action_runs_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        after(Duration::from_secs(30), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
