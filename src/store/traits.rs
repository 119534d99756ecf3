//! The `Store` repository trait — single async interface for all persistence.
//!
//! The core components (pool, ingestor, message queries) call through this
//! trait; the shipped backend is libSQL. Per-row atomicity for lease
//! transitions is provided by conditional updates (compare-and-swap on
//! status), so the trait can back onto any transactional store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::classify::Category;
use crate::error::StoreError;
use crate::messages::model::{Message, MessageFilter, MessageStats, NewMessage};
use crate::pool::model::{PhoneNumber, PoolStats};
use crate::providers::SmsProvider;

/// Backend-agnostic persistence trait covering numbers, messages, providers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Phone numbers ───────────────────────────────────────────────

    /// Insert a freshly provisioned number. Fails on duplicate E.164.
    async fn insert_number(&self, number: &PhoneNumber) -> Result<(), StoreError>;

    async fn get_number(&self, id: Uuid) -> Result<Option<PhoneNumber>, StoreError>;

    /// Look up a number by its canonical E.164 string.
    async fn get_number_by_e164(
        &self,
        phone_number: &str,
    ) -> Result<Option<PhoneNumber>, StoreError>;

    /// Available numbers, ordered by creation, paged.
    async fn list_available_numbers(
        &self,
        country_code: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PhoneNumber>, StoreError>;

    /// Numbers currently held by the given user, most recently assigned first.
    async fn list_numbers_by_holder(&self, user_id: &str)
    -> Result<Vec<PhoneNumber>, StoreError>;

    /// The user's unexpired lease, if any. At most one exists by invariant.
    async fn find_active_lease(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PhoneNumber>, StoreError>;

    /// Conditionally assign: succeeds only if the row is still Available.
    /// Returns false when the row was missing or already taken — the caller
    /// distinguishes the two with a follow-up read.
    async fn try_assign_number(
        &self,
        id: Uuid,
        user_id: &str,
        assigned_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Conditionally release: succeeds only if the row is currently Assigned.
    async fn release_number(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Release only if the lease is Assigned AND expired at `now`. Used by the
    /// reaper so a concurrent Extend cannot be clobbered.
    async fn release_if_expired(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Move an assigned lease's expiry. Succeeds only while status=Assigned.
    async fn update_expiry(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// All assigned numbers whose expiry has passed.
    async fn list_expired_numbers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PhoneNumber>, StoreError>;

    /// Pool counts for the stats endpoint, scoped to one user plus the global
    /// available count.
    async fn pool_stats(&self, user_id: &str, now: DateTime<Utc>)
    -> Result<PoolStats, StoreError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Persist a new message and return the stored row.
    async fn insert_message(&self, new: &NewMessage) -> Result<Message, StoreError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError>;

    /// A message visible to `user_id` (i.e. on a number they currently hold).
    async fn get_message_for_user(
        &self,
        id: Uuid,
        user_id: &str,
    ) -> Result<Option<Message>, StoreError>;

    /// Duplicate-delivery lookup on (provider, provider-assigned message id).
    async fn find_message_by_provider_ref(
        &self,
        provider_id: Uuid,
        provider_message_id: &str,
    ) -> Result<Option<Message>, StoreError>;

    /// Filtered listing, newest first.
    async fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>, StoreError>;

    /// Total row count matching the filter (ignores limit/offset).
    async fn count_messages(&self, filter: &MessageFilter) -> Result<u64, StoreError>;

    /// Case-insensitive content search within the filter scope.
    /// Returns (page, total).
    async fn search_messages(
        &self,
        filter: &MessageFilter,
        query: &str,
    ) -> Result<(Vec<Message>, u64), StoreError>;

    /// Flip the read flag. Returns false if the message is not visible to the
    /// user.
    async fn mark_message_read(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError>;

    /// Mark every unread message in scope as read; returns the count updated.
    async fn mark_all_read(
        &self,
        user_id: &str,
        phone_number_id: Option<Uuid>,
        category: Option<Category>,
    ) -> Result<u64, StoreError>;

    async fn message_stats(&self, user_id: &str) -> Result<MessageStats, StoreError>;

    async fn count_messages_for_number(&self, number_id: Uuid) -> Result<u64, StoreError>;

    /// Retention sweep: delete messages received before `cutoff`.
    async fn delete_messages_older_than(&self, cutoff: DateTime<Utc>)
    -> Result<u64, StoreError>;

    // ── Providers ───────────────────────────────────────────────────

    /// Insert a provider if its name is not present yet (startup seeding).
    async fn seed_provider(&self, provider: &SmsProvider) -> Result<(), StoreError>;

    async fn get_provider_by_name(&self, name: &str)
    -> Result<Option<SmsProvider>, StoreError>;

    /// Active providers ordered by priority (lowest first).
    async fn list_active_providers(&self) -> Result<Vec<SmsProvider>, StoreError>;
}
