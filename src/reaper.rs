//! Background housekeeping tasks.
//!
//! Two independent periodic jobs: the expiry reaper releases leases past
//! their expiry (bounded staleness of one interval — no timer per lease),
//! and the retention sweep deletes messages older than the configured age.
//! Errors are logged and the loops keep running.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::pool::NumberPool;
use crate::store::Store;

/// Spawn the periodic lease reaper.
pub fn spawn_expiry_reaper(pool: Arc<NumberPool>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match pool.reap_expired().await {
                Ok(0) => debug!("Reaper pass: nothing expired"),
                Ok(count) => info!(count, "Reaper released expired leases"),
                Err(e) => error!(error = %e, "Reaper pass failed"),
            }
        }
    })
}

/// Spawn the periodic message-retention sweep.
pub fn spawn_retention_sweep(
    store: Arc<dyn Store>,
    interval: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let max_age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match store.delete_messages_older_than(Utc::now() - max_age).await {
                Ok(0) => debug!("Retention pass: nothing to delete"),
                Ok(count) => info!(count, "Retention sweep deleted old messages"),
                Err(e) => error!(error = %e, "Retention sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::NotificationHub;
    use crate::pool::model::NumberStatus;
    use crate::store::LibSqlStore;

    #[tokio::test]
    async fn reaper_task_releases_expired_lease() {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let hub = NotificationHub::new();
        let pool = NumberPool::new(Arc::clone(&store), hub);

        let number = pool.provision("+15551230001", "US", None).await.unwrap();
        let past = Utc::now() - chrono::Duration::hours(2);
        store
            .try_assign_number(number.id, "alice", past, past + chrono::Duration::hours(1))
            .await
            .unwrap();

        let handle = spawn_expiry_reaper(Arc::clone(&pool), Duration::from_millis(20));

        // Within a couple of intervals the lease must be gone.
        let mut released = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if pool.get(number.id).await.unwrap().status == NumberStatus::Available {
                released = true;
                break;
            }
        }
        handle.abort();
        assert!(released, "reaper should release the expired lease");
    }
}
