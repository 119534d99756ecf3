//! Inbound message domain model and query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::Category;

/// A persisted inbound SMS.
///
/// Created exclusively by the webhook ingestor (or the dev injection route);
/// only `is_read` is mutable afterwards. The category is derived once at
/// creation and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub phone_number_id: Uuid,
    pub sender_number: String,
    pub content: String,
    pub category: Category,
    pub received_at: DateTime<Utc>,
    pub provider_id: Option<Uuid>,
    /// Provider-assigned id, used to deduplicate re-deliveries.
    pub provider_message_id: Option<String>,
    pub is_read: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a message. The ingestor classifies the body before
/// handing it to the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub phone_number_id: Uuid,
    pub sender_number: String,
    pub content: String,
    pub category: Category,
    pub provider_id: Option<Uuid>,
    pub provider_message_id: Option<String>,
    pub metadata: serde_json::Value,
}

/// Filters for the message list/search surface. All queries are scoped to the
/// numbers the given user currently holds.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    pub user_id: String,
    pub phone_number_id: Option<Uuid>,
    pub category: Option<Category>,
    pub is_read: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl MessageFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            phone_number_id: None,
            category: None,
            is_read: None,
            since: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Per-number message count, part of the stats response.
#[derive(Debug, Clone, Serialize)]
pub struct NumberMessageCount {
    pub phone_number_id: Uuid,
    pub phone_number: String,
    pub message_count: u64,
}

/// Counts by category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryCounts {
    pub sms: u64,
    pub otp: u64,
    pub verification: u64,
}

/// Aggregate statistics over a user's messages.
#[derive(Debug, Clone, Serialize)]
pub struct MessageStats {
    pub total_messages: u64,
    pub unread_messages: u64,
    pub messages_by_category: CategoryCounts,
    pub recent_messages_24h: u64,
    pub per_number: Vec<NumberMessageCount>,
}
