//! Scoped lock ownership

use crate::{error::LockResult, item::LockItem, service::LockService};
use std::sync::Arc;
use tracing::{debug, warn};

/// RAII guard for a held lock.
///
/// Prefer [`LockGuard::release`], which reports failures. A guard dropped
/// without being released spawns a best-effort release on the current tokio
/// runtime; outside a runtime the lock's TTL reclaims it.
#[derive(Debug)]
pub struct LockGuard {
    service: Arc<LockService>,
    item: LockItem,
    released: bool,
}

impl LockGuard {
    pub(crate) fn new(service: Arc<LockService>, item: LockItem) -> Self {
        Self {
            service,
            item,
            released: false,
        }
    }

    #[must_use]
    pub fn item(&self) -> &LockItem {
        &self.item
    }

    /// Renew the held lock when little of its window remains
    pub async fn renew_if_expiring(&mut self, threshold_fraction: f64) -> LockResult<()> {
        self.item = self
            .service
            .renew_if_expiring(&self.item, threshold_fraction)
            .await?;
        Ok(())
    }

    pub async fn release(mut self) -> LockResult<()> {
        self.released = true;
        self.service.release(&self.item).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(key = %self.item.key, "no runtime to release dropped lock guard");
            return;
        };

        let service = Arc::clone(&self.service);
        let item = self.item.clone();
        handle.spawn(async move {
            if let Err(e) = service.release(&item).await {
                warn!(key = %item.key, error = %e, "release of dropped lock guard failed");
            }
        });
    }
}
