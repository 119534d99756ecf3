//! The number pool — exclusive owner of PhoneNumber mutation.
//!
//! Lease transitions (assign/release/extend/reap) are linearizable per
//! number: a per-number async lock serializes read-modify-write flows, and
//! every status flip goes through a conditional store update (compare-and-swap
//! on status), so even a backend shared with other writers cannot produce two
//! winners for the same number. Cross-number operations interleave freely.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{MAX_LEASE_HOURS, MIN_LEASE_HOURS};
use crate::error::PoolError;
use crate::hub::events::{Event, Topic};
use crate::hub::registry::NotificationHub;
use crate::pool::model::{
    LeasedNumberView, NumberStatus, PhoneNumber, PoolStats, is_valid_e164, normalize_number,
};
use crate::store::Store;

/// Upper bound for a single list-available page.
const MAX_PAGE_SIZE: u32 = 100;

pub struct NumberPool {
    store: Arc<dyn Store>,
    hub: Arc<NotificationHub>,
    /// Per-number locks, created lazily. Numbers are never deleted, so the
    /// map only grows with the pool itself.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl NumberPool {
    pub fn new(store: Arc<dyn Store>, hub: Arc<NotificationHub>) -> Arc<Self> {
        Arc::new(Self {
            store,
            hub,
            locks: Mutex::new(HashMap::new()),
        })
    }

    async fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(id).or_default())
    }

    fn validate_duration(hours: u32) -> Result<Duration, PoolError> {
        if !(MIN_LEASE_HOURS..=MAX_LEASE_HOURS).contains(&hours) {
            return Err(PoolError::InvalidDuration {
                min: MIN_LEASE_HOURS,
                max: MAX_LEASE_HOURS,
                got: hours,
            });
        }
        Ok(Duration::hours(i64::from(hours)))
    }

    /// Emit a status-change event for the number and the user it concerns.
    /// Best-effort: a failed delivery never affects the state transition.
    async fn notify_status_change(&self, number: &PhoneNumber, user: Option<&str>) {
        let event = Event::NumberStatusChange {
            number: number.clone(),
        };
        if let Some(user) = user {
            self.hub
                .publish(&Topic::User(user.to_string()), event.clone())
                .await;
        }
        self.hub.publish(&Topic::Number(number.id), event).await;
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Available numbers, paged. No side effects.
    pub async fn list_available(
        &self,
        country_code: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PhoneNumber>, PoolError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        Ok(self
            .store
            .list_available_numbers(country_code, limit, offset)
            .await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<PhoneNumber, PoolError> {
        self.store
            .get_number(id)
            .await?
            .ok_or(PoolError::NotFound(id))
    }

    /// Resolve a canonical E.164 string to its pooled number, if registered.
    pub async fn resolve(&self, phone_number: &str) -> Result<Option<PhoneNumber>, PoolError> {
        Ok(self.store.get_number_by_e164(phone_number).await?)
    }

    /// The numbers a user currently holds, with message counts and expiry
    /// flags.
    pub async fn list_for_holder(
        &self,
        user_id: &str,
    ) -> Result<Vec<LeasedNumberView>, PoolError> {
        let numbers = self.store.list_numbers_by_holder(user_id).await?;
        let mut views = Vec::with_capacity(numbers.len());
        for number in numbers {
            let message_count = self.store.count_messages_for_number(number.id).await?;
            let is_expired = number.is_expired();
            views.push(LeasedNumberView {
                number,
                message_count,
                is_expired,
            });
        }
        Ok(views)
    }

    pub async fn stats(&self, user_id: &str) -> Result<PoolStats, PoolError> {
        Ok(self.store.pool_stats(user_id, Utc::now()).await?)
    }

    // ── Lease transitions ───────────────────────────────────────────

    /// Lease a number to a user for `duration_hours`.
    ///
    /// A user may hold at most one unexpired lease system-wide. Exactly one
    /// of two racing callers wins the same number; the loser sees
    /// NotAvailable.
    pub async fn assign(
        &self,
        number_id: Uuid,
        user_id: &str,
        duration_hours: u32,
    ) -> Result<PhoneNumber, PoolError> {
        let duration = Self::validate_duration(duration_hours)?;

        let lock = self.lock_for(number_id).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        if let Some(existing) = self.store.find_active_lease(user_id, now).await? {
            if existing.id != number_id {
                return Err(PoolError::AlreadyLeased {
                    user: user_id.to_string(),
                });
            }
        }

        let assigned = self
            .store
            .try_assign_number(number_id, user_id, now, now + duration)
            .await?;
        if !assigned {
            // Distinguish a missing row from a lost race.
            return match self.store.get_number(number_id).await? {
                Some(_) => Err(PoolError::NotAvailable(number_id)),
                None => Err(PoolError::NotFound(number_id)),
            };
        }

        let number = self.get(number_id).await?;
        info!(
            number = %number.phone_number,
            user = user_id,
            expires_at = ?number.expires_at,
            "Number assigned"
        );
        self.notify_status_change(&number, Some(user_id)).await;
        Ok(number)
    }

    /// Return a leased number to the pool.
    pub async fn release(&self, number_id: Uuid, user_id: &str) -> Result<(), PoolError> {
        let lock = self.lock_for(number_id).await;
        let _guard = lock.lock().await;

        let number = self.get(number_id).await?;
        if number.holder.as_deref() != Some(user_id) {
            return Err(PoolError::NotOwner(number_id));
        }

        self.store.release_number(number_id).await?;
        let released = self.get(number_id).await?;
        info!(number = %released.phone_number, user = user_id, "Number released");
        self.notify_status_change(&released, Some(user_id)).await;
        Ok(())
    }

    /// Extend a lease by `additional_hours`.
    ///
    /// An unexpired lease extends from its current expiry; an expired but
    /// not-yet-reaped lease re-bases from now (a grace re-lease rather than
    /// compounding on a stale expiry).
    pub async fn extend(
        &self,
        number_id: Uuid,
        user_id: &str,
        additional_hours: u32,
    ) -> Result<PhoneNumber, PoolError> {
        let duration = Self::validate_duration(additional_hours)?;

        let lock = self.lock_for(number_id).await;
        let _guard = lock.lock().await;

        let number = self.get(number_id).await?;
        if number.status != NumberStatus::Assigned {
            return Err(PoolError::NotAssigned(number_id));
        }
        if number.holder.as_deref() != Some(user_id) {
            return Err(PoolError::NotOwner(number_id));
        }

        let now = Utc::now();
        let base = match number.expires_at {
            Some(expires_at) if expires_at > now => expires_at,
            _ => now,
        };
        let updated = self.store.update_expiry(number_id, base + duration).await?;
        if !updated {
            // The reaper got here between our read and the update.
            return Err(PoolError::NotAssigned(number_id));
        }

        let number = self.get(number_id).await?;
        info!(
            number = %number.phone_number,
            user = user_id,
            expires_at = ?number.expires_at,
            "Lease extended"
        );
        self.notify_status_change(&number, Some(user_id)).await;
        Ok(number)
    }

    /// Release every expired lease. Returns the number released.
    ///
    /// Safe to run concurrently with assign/release/extend: each release is a
    /// conditional update that only fires while the lease is still assigned
    /// and expired, so a concurrent extend cannot be lost and nothing is
    /// released twice.
    pub async fn reap_expired(&self) -> Result<usize, PoolError> {
        let now = Utc::now();
        let expired = self.store.list_expired_numbers(now).await?;

        let mut released = 0;
        for number in expired {
            let lock = self.lock_for(number.id).await;
            let _guard = lock.lock().await;

            if self.store.release_if_expired(number.id, now).await? {
                released += 1;
                let previous_holder = number.holder.clone();
                match self.store.get_number(number.id).await? {
                    Some(reaped) => {
                        info!(
                            number = %reaped.phone_number,
                            previous_holder = ?previous_holder,
                            "Expired lease reaped"
                        );
                        self.notify_status_change(&reaped, previous_holder.as_deref())
                            .await;
                    }
                    None => warn!(number_id = %number.id, "Reaped number vanished"),
                }
            }
        }

        if released > 0 {
            info!(count = released, "Reaped expired leases");
        }
        Ok(released)
    }

    // ── Provisioning ────────────────────────────────────────────────

    /// Admin provisioning: register a new number into the pool.
    pub async fn provision(
        &self,
        raw_number: &str,
        country_code: &str,
        provider_id: Option<Uuid>,
    ) -> Result<PhoneNumber, PoolError> {
        let canonical = normalize_number(raw_number);
        if !is_valid_e164(&canonical) {
            return Err(PoolError::InvalidNumber(raw_number.to_string()));
        }

        let mut number = PhoneNumber::new(canonical.clone(), country_code.to_uppercase());
        if let Some(provider_id) = provider_id {
            number = number.with_provider(provider_id);
        }

        match self.store.insert_number(&number).await {
            Ok(()) => {
                info!(number = %number.phone_number, "Number provisioned");
                Ok(number)
            }
            Err(crate::error::StoreError::Constraint(_)) => {
                Err(PoolError::DuplicateNumber(canonical))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlStore;

    async fn pool() -> (Arc<NumberPool>, Arc<dyn Store>, Arc<NotificationHub>) {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let hub = NotificationHub::new();
        (
            NumberPool::new(Arc::clone(&store), Arc::clone(&hub)),
            store,
            hub,
        )
    }

    async fn seeded(pool: &NumberPool, e164: &str) -> PhoneNumber {
        pool.provision(e164, "US", None).await.unwrap()
    }

    #[tokio::test]
    async fn assign_sets_full_lease_state() {
        let (pool, _store, _hub) = pool().await;
        let n = seeded(&pool, "+15551230001").await;

        let leased = pool.assign(n.id, "alice", 2).await.unwrap();
        assert_eq!(leased.status, NumberStatus::Assigned);
        assert_eq!(leased.holder.as_deref(), Some("alice"));
        assert!(leased.assigned_at.is_some());
        let expires = leased.expires_at.unwrap();
        let assigned = leased.assigned_at.unwrap();
        assert_eq!((expires - assigned).num_hours(), 2);
    }

    #[tokio::test]
    async fn assign_rejects_out_of_range_duration() {
        let (pool, _store, _hub) = pool().await;
        let n = seeded(&pool, "+15551230001").await;

        assert!(matches!(
            pool.assign(n.id, "alice", 0).await,
            Err(PoolError::InvalidDuration { .. })
        ));
        assert!(matches!(
            pool.assign(n.id, "alice", 25).await,
            Err(PoolError::InvalidDuration { .. })
        ));
    }

    #[tokio::test]
    async fn assign_unknown_number_is_not_found() {
        let (pool, _store, _hub) = pool().await;
        assert!(matches!(
            pool.assign(Uuid::new_v4(), "alice", 1).await,
            Err(PoolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn assign_taken_number_is_not_available() {
        let (pool, _store, _hub) = pool().await;
        let n = seeded(&pool, "+15551230001").await;
        pool.assign(n.id, "alice", 1).await.unwrap();

        assert!(matches!(
            pool.assign(n.id, "bob", 1).await,
            Err(PoolError::NotAvailable(_))
        ));
    }

    #[tokio::test]
    async fn one_active_lease_per_user() {
        let (pool, _store, _hub) = pool().await;
        let n1 = seeded(&pool, "+15551230001").await;
        let n2 = seeded(&pool, "+15551230002").await;

        pool.assign(n1.id, "alice", 1).await.unwrap();
        assert!(matches!(
            pool.assign(n2.id, "alice", 1).await,
            Err(PoolError::AlreadyLeased { .. })
        ));

        // After releasing, the same user can lease another number.
        pool.release(n1.id, "alice").await.unwrap();
        pool.assign(n2.id, "alice", 1).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_assign_has_exactly_one_winner() {
        let (pool, _store, _hub) = pool().await;
        let n = seeded(&pool, "+15551230001").await;

        let p1 = Arc::clone(&pool);
        let p2 = Arc::clone(&pool);
        let id = n.id;
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { p1.assign(id, "alice", 1).await }),
            tokio::spawn(async move { p2.assign(id, "bob", 1).await }),
        );
        let r1 = r1.unwrap();
        let r2 = r2.unwrap();

        let winners = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one concurrent assign must win");
        for r in [r1, r2] {
            if let Err(e) = r {
                assert!(matches!(e, PoolError::NotAvailable(_)));
            }
        }
    }

    #[tokio::test]
    async fn release_requires_ownership() {
        let (pool, _store, _hub) = pool().await;
        let n = seeded(&pool, "+15551230001").await;
        pool.assign(n.id, "alice", 1).await.unwrap();

        assert!(matches!(
            pool.release(n.id, "bob").await,
            Err(PoolError::NotOwner(_))
        ));

        pool.release(n.id, "alice").await.unwrap();
        let released = pool.get(n.id).await.unwrap();
        assert_eq!(released.status, NumberStatus::Available);
        assert!(released.holder.is_none());
        assert!(released.assigned_at.is_none());
        assert!(released.expires_at.is_none());

        // Released numbers have no owner to release again.
        assert!(matches!(
            pool.release(n.id, "alice").await,
            Err(PoolError::NotOwner(_))
        ));
    }

    #[tokio::test]
    async fn extend_adds_to_future_expiry() {
        let (pool, _store, _hub) = pool().await;
        let n = seeded(&pool, "+15551230001").await;
        let leased = pool.assign(n.id, "alice", 2).await.unwrap();
        let original_expiry = leased.expires_at.unwrap();

        let extended = pool.extend(n.id, "alice", 3).await.unwrap();
        assert_eq!(extended.expires_at.unwrap(), original_expiry + Duration::hours(3));
    }

    #[tokio::test]
    async fn extend_rebases_expired_lease_from_now() {
        let (pool, store, _hub) = pool().await;
        let n = seeded(&pool, "+15551230001").await;
        // Backdate an expired-but-unreaped lease directly through the store.
        let past = Utc::now() - Duration::hours(3);
        store
            .try_assign_number(n.id, "alice", past, past + Duration::hours(1))
            .await
            .unwrap();

        let before = Utc::now();
        let extended = pool.extend(n.id, "alice", 2).await.unwrap();
        let new_expiry = extended.expires_at.unwrap();
        assert!(new_expiry >= before + Duration::hours(2));
        assert!(new_expiry <= Utc::now() + Duration::hours(2));
    }

    #[tokio::test]
    async fn extend_checks_state_and_owner() {
        let (pool, _store, _hub) = pool().await;
        let n = seeded(&pool, "+15551230001").await;

        assert!(matches!(
            pool.extend(n.id, "alice", 1).await,
            Err(PoolError::NotAssigned(_))
        ));

        pool.assign(n.id, "alice", 1).await.unwrap();
        assert!(matches!(
            pool.extend(n.id, "bob", 1).await,
            Err(PoolError::NotOwner(_))
        ));
    }

    #[tokio::test]
    async fn reap_releases_only_expired_and_is_idempotent() {
        let (pool, store, _hub) = pool().await;
        let expired = seeded(&pool, "+15551230001").await;
        let live = seeded(&pool, "+15551230002").await;

        let past = Utc::now() - Duration::hours(3);
        store
            .try_assign_number(expired.id, "alice", past, past + Duration::hours(1))
            .await
            .unwrap();
        pool.assign(live.id, "bob", 4).await.unwrap();

        assert_eq!(pool.reap_expired().await.unwrap(), 1);
        assert_eq!(
            pool.get(expired.id).await.unwrap().status,
            NumberStatus::Available
        );
        assert_eq!(pool.get(live.id).await.unwrap().status, NumberStatus::Assigned);

        // No intervening assignments: second pass reaps nothing.
        assert_eq!(pool.reap_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn user_can_lease_again_after_reap() {
        let (pool, store, _hub) = pool().await;
        let n1 = seeded(&pool, "+15551230001").await;
        let n2 = seeded(&pool, "+15551230002").await;

        let past = Utc::now() - Duration::hours(3);
        store
            .try_assign_number(n1.id, "alice", past, past + Duration::hours(1))
            .await
            .unwrap();

        pool.reap_expired().await.unwrap();
        pool.assign(n2.id, "alice", 1).await.unwrap();
    }

    #[tokio::test]
    async fn assign_publishes_status_change() {
        let (pool, _store, hub) = pool().await;
        let n = seeded(&pool, "+15551230001").await;
        let (_conn, mut rx) = hub.register("alice").await;

        pool.assign(n.id, "alice", 1).await.unwrap();

        match rx.recv().await {
            Some(Event::NumberStatusChange { number }) => {
                assert_eq!(number.id, n.id);
                assert_eq!(number.status, NumberStatus::Assigned);
            }
            other => panic!("expected NumberStatusChange, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reap_notifies_previous_holder() {
        let (pool, store, hub) = pool().await;
        let n = seeded(&pool, "+15551230001").await;
        let past = Utc::now() - Duration::hours(3);
        store
            .try_assign_number(n.id, "alice", past, past + Duration::hours(1))
            .await
            .unwrap();

        let (_conn, mut rx) = hub.register("alice").await;
        pool.reap_expired().await.unwrap();

        match rx.recv().await {
            Some(Event::NumberStatusChange { number }) => {
                assert_eq!(number.status, NumberStatus::Available);
            }
            other => panic!("expected NumberStatusChange, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn provision_validates_and_normalizes() {
        let (pool, _store, _hub) = pool().await;

        let n = pool
            .provision("+1 (555) 123-0001", "us", None)
            .await
            .unwrap();
        assert_eq!(n.phone_number, "+15551230001");
        assert_eq!(n.country_code, "US");

        assert!(matches!(
            pool.provision("garbage", "US", None).await,
            Err(PoolError::InvalidNumber(_))
        ));
        assert!(matches!(
            pool.provision("+15551230001", "US", None).await,
            Err(PoolError::DuplicateNumber(_))
        ));
    }

    #[tokio::test]
    async fn list_available_excludes_assigned() {
        let (pool, _store, _hub) = pool().await;
        let n1 = seeded(&pool, "+15551230001").await;
        seeded(&pool, "+15551230002").await;

        assert_eq!(pool.list_available(None, 10, 0).await.unwrap().len(), 2);
        pool.assign(n1.id, "alice", 1).await.unwrap();
        let available = pool.list_available(None, 10, 0).await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].phone_number, "+15551230002");
    }
}
