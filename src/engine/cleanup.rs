use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::store::BlobStore;

/// Best-effort delete of a partial archive. Attempted once, bounded by
/// `timeout`; failures are logged and reported as `false`.
pub(crate) async fn discard(store: &dyn BlobStore, target: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, store.delete_if_exists(target)).await {
        Ok(Ok(true)) => {
            info!(archive = target, "removed partial archive");
            true
        }
        Ok(Ok(false)) => true,
        Ok(Err(e)) => {
            warn!(archive = target, error = %e, "failed to remove partial archive");
            false
        }
        Err(_) => {
            warn!(
                archive = target,
                timeout_ms = timeout.as_millis() as u64,
                "timed out removing partial archive"
            );
            false
        }
    }
}

/// Deletes the output object if a run is dropped before it settles.
///
/// The engine disarms the guard once it has either committed the archive or
/// finished its own cleanup, so this only fires when the run's future is
/// dropped mid-flight, including while that cleanup is still in progress.
pub(crate) struct CleanupGuard {
    store: Arc<dyn BlobStore>,
    target: Option<String>,
    timeout: Duration,
}

impl CleanupGuard {
    pub(crate) fn arm(store: Arc<dyn BlobStore>, target: &str, timeout: Duration) -> Self {
        CleanupGuard {
            store,
            target: Some(target.to_string()),
            timeout,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.target = None;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(target) = self.target.take() else {
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(archive = %target, "run dropped outside a runtime; partial archive left behind");
            return;
        };

        warn!(archive = %target, "run dropped before completion; removing partial archive");
        let store = Arc::clone(&self.store);
        let timeout = self.timeout;
        handle.spawn(async move {
            discard(store.as_ref(), &target, timeout).await;
        });
    }
}
