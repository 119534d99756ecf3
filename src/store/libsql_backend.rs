//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. `libsql::Connection` is
//! `Send + Sync` and safe for concurrent async use; lease transitions rely on
//! conditional UPDATEs (status compare-and-swap), so no connection-level
//! locking is needed here.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params, params_from_iter};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use uuid::Uuid;

use crate::classify::Category;
use crate::error::StoreError;
use crate::messages::model::{
    CategoryCounts, Message, MessageFilter, MessageStats, NewMessage, NumberMessageCount,
};
use crate::pool::model::{NumberStatus, PhoneNumber, PoolStats};
use crate::providers::SmsProvider;
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_db(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_db(db).await
    }

    async fn from_db(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical datetime write format: RFC 3339 UTC with fixed microsecond
/// precision, so lexicographic string comparison matches chronological order.
fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 datetime string written by `fmt_dt`.
fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_opt_dt(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_dt(s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_opt_uuid(s: &Option<String>) -> Option<Uuid> {
    s.as_ref().map(|s| parse_uuid(s))
}

fn parse_metadata(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
}

fn query_err(e: libsql::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

const NUMBER_COLUMNS: &str = "id, phone_number, country_code, provider_id, holder, status, \
                              assigned_at, expires_at, created_at, metadata";

fn row_to_number(row: &libsql::Row) -> Result<PhoneNumber, libsql::Error> {
    let id: String = row.get(0)?;
    let phone_number: String = row.get(1)?;
    let country_code: String = row.get(2)?;
    let provider_id: Option<String> = row.get(3)?;
    let holder: Option<String> = row.get(4)?;
    let status: String = row.get(5)?;
    let assigned_at: Option<String> = row.get(6)?;
    let expires_at: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    let metadata: String = row.get(9)?;

    Ok(PhoneNumber {
        id: parse_uuid(&id),
        phone_number,
        country_code,
        provider_id: parse_opt_uuid(&provider_id),
        holder,
        status: status.parse().unwrap_or(NumberStatus::Available),
        assigned_at: parse_opt_dt(&assigned_at),
        expires_at: parse_opt_dt(&expires_at),
        created_at: parse_dt(&created_at),
        metadata: parse_metadata(&metadata),
    })
}

const MESSAGE_COLUMNS: &str = "m.id, m.phone_number_id, m.sender_number, m.content, m.category, \
                               m.received_at, m.provider_id, m.provider_message_id, m.is_read, \
                               m.metadata, m.created_at";

fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let id: String = row.get(0)?;
    let phone_number_id: String = row.get(1)?;
    let sender_number: String = row.get(2)?;
    let content: String = row.get(3)?;
    let category: String = row.get(4)?;
    let received_at: String = row.get(5)?;
    let provider_id: Option<String> = row.get(6)?;
    let provider_message_id: Option<String> = row.get(7)?;
    let is_read: i64 = row.get(8)?;
    let metadata: String = row.get(9)?;
    let created_at: String = row.get(10)?;

    Ok(Message {
        id: parse_uuid(&id),
        phone_number_id: parse_uuid(&phone_number_id),
        sender_number,
        content,
        category: category.parse().unwrap_or(Category::Sms),
        received_at: parse_dt(&received_at),
        provider_id: parse_opt_uuid(&provider_id),
        provider_message_id,
        is_read: is_read != 0,
        metadata: parse_metadata(&metadata),
        created_at: parse_dt(&created_at),
    })
}

fn row_to_provider(row: &libsql::Row) -> Result<SmsProvider, libsql::Error> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let is_active: i64 = row.get(2)?;
    let priority: i64 = row.get(3)?;
    let rate_limit: i64 = row.get(4)?;
    let api_key: Option<String> = row.get(5)?;
    let webhook_url_template: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(SmsProvider {
        id: parse_uuid(&id),
        name,
        is_active: is_active != 0,
        priority,
        rate_limit_per_minute: rate_limit,
        api_key: api_key.map(SecretString::from),
        webhook_url_template,
        created_at: parse_dt(&created_at),
    })
}

/// Build the WHERE clause + params for a message filter. The scoping join on
/// the number's current holder is always present.
fn message_filter_sql(filter: &MessageFilter) -> (String, Vec<libsql::Value>) {
    let mut sql = String::from("n.holder = ?1");
    let mut values: Vec<libsql::Value> = vec![filter.user_id.clone().into()];

    if let Some(number_id) = filter.phone_number_id {
        values.push(number_id.to_string().into());
        sql.push_str(&format!(" AND m.phone_number_id = ?{}", values.len()));
    }
    if let Some(category) = filter.category {
        values.push(category.as_str().to_string().into());
        sql.push_str(&format!(" AND m.category = ?{}", values.len()));
    }
    if let Some(is_read) = filter.is_read {
        values.push(i64::from(is_read).into());
        sql.push_str(&format!(" AND m.is_read = ?{}", values.len()));
    }
    if let Some(since) = filter.since {
        values.push(fmt_dt(since).into());
        sql.push_str(&format!(" AND m.received_at >= ?{}", values.len()));
    }

    (sql, values)
}

async fn single_count(
    conn: &Connection,
    sql: &str,
    values: Vec<libsql::Value>,
) -> Result<u64, StoreError> {
    let mut rows = conn
        .query(sql, params_from_iter(values))
        .await
        .map_err(query_err)?;
    let row = rows
        .next()
        .await
        .map_err(query_err)?
        .ok_or_else(|| StoreError::Query("count query returned no rows".into()))?;
    let count: i64 = row.get(0).map_err(query_err)?;
    Ok(count.max(0) as u64)
}

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Phone numbers ───────────────────────────────────────────────

    async fn insert_number(&self, number: &PhoneNumber) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO phone_numbers \
                 (id, phone_number, country_code, provider_id, holder, status, \
                  assigned_at, expires_at, created_at, metadata) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    number.id.to_string(),
                    number.phone_number.clone(),
                    number.country_code.clone(),
                    number.provider_id.map(|p| p.to_string()),
                    number.holder.clone(),
                    number.status.as_str(),
                    number.assigned_at.map(fmt_dt),
                    number.expires_at.map(fmt_dt),
                    fmt_dt(number.created_at),
                    number.metadata.to_string(),
                ],
            )
            .await
            .map_err(|e| {
                let text = e.to_string();
                if text.contains("UNIQUE") {
                    StoreError::Constraint(format!(
                        "phone number {} already exists",
                        number.phone_number
                    ))
                } else {
                    StoreError::Query(text)
                }
            })?;
        Ok(())
    }

    async fn get_number(&self, id: Uuid) -> Result<Option<PhoneNumber>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {NUMBER_COLUMNS} FROM phone_numbers WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_number(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn get_number_by_e164(
        &self,
        phone_number: &str,
    ) -> Result<Option<PhoneNumber>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {NUMBER_COLUMNS} FROM phone_numbers WHERE phone_number = ?1"),
                params![phone_number],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_number(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn list_available_numbers(
        &self,
        country_code: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PhoneNumber>, StoreError> {
        let (sql, values): (String, Vec<libsql::Value>) = match country_code {
            Some(cc) => (
                format!(
                    "SELECT {NUMBER_COLUMNS} FROM phone_numbers \
                     WHERE status = 'available' AND country_code = ?1 \
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
                ),
                vec![
                    cc.to_string().into(),
                    i64::from(limit).into(),
                    i64::from(offset).into(),
                ],
            ),
            None => (
                format!(
                    "SELECT {NUMBER_COLUMNS} FROM phone_numbers \
                     WHERE status = 'available' \
                     ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
                ),
                vec![i64::from(limit).into(), i64::from(offset).into()],
            ),
        };

        let mut rows = self
            .conn()
            .query(&sql, params_from_iter(values))
            .await
            .map_err(query_err)?;

        let mut numbers = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            numbers.push(row_to_number(&row).map_err(query_err)?);
        }
        Ok(numbers)
    }

    async fn list_numbers_by_holder(
        &self,
        user_id: &str,
    ) -> Result<Vec<PhoneNumber>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {NUMBER_COLUMNS} FROM phone_numbers \
                     WHERE holder = ?1 ORDER BY assigned_at DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(query_err)?;

        let mut numbers = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            numbers.push(row_to_number(&row).map_err(query_err)?);
        }
        Ok(numbers)
    }

    async fn find_active_lease(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PhoneNumber>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {NUMBER_COLUMNS} FROM phone_numbers \
                     WHERE holder = ?1 AND status = 'assigned' AND expires_at > ?2 \
                     LIMIT 1"
                ),
                params![user_id, fmt_dt(now)],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_number(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn try_assign_number(
        &self,
        id: Uuid,
        user_id: &str,
        assigned_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE phone_numbers \
                 SET holder = ?2, status = 'assigned', assigned_at = ?3, expires_at = ?4 \
                 WHERE id = ?1 AND status = 'available'",
                params![id.to_string(), user_id, fmt_dt(assigned_at), fmt_dt(expires_at)],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn release_number(&self, id: Uuid) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE phone_numbers \
                 SET holder = NULL, status = 'available', assigned_at = NULL, expires_at = NULL \
                 WHERE id = ?1 AND status = 'assigned'",
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn release_if_expired(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE phone_numbers \
                 SET holder = NULL, status = 'available', assigned_at = NULL, expires_at = NULL \
                 WHERE id = ?1 AND status = 'assigned' AND expires_at < ?2",
                params![id.to_string(), fmt_dt(now)],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn update_expiry(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE phone_numbers SET expires_at = ?2 \
                 WHERE id = ?1 AND status = 'assigned'",
                params![id.to_string(), fmt_dt(expires_at)],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn list_expired_numbers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PhoneNumber>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {NUMBER_COLUMNS} FROM phone_numbers \
                     WHERE status = 'assigned' AND expires_at < ?1"
                ),
                params![fmt_dt(now)],
            )
            .await
            .map_err(query_err)?;

        let mut numbers = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            numbers.push(row_to_number(&row).map_err(query_err)?);
        }
        Ok(numbers)
    }

    async fn pool_stats(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PoolStats, StoreError> {
        let total = single_count(
            self.conn(),
            "SELECT COUNT(*) FROM phone_numbers WHERE holder = ?1",
            vec![user_id.to_string().into()],
        )
        .await?;
        let active = single_count(
            self.conn(),
            "SELECT COUNT(*) FROM phone_numbers WHERE holder = ?1 AND status = 'assigned'",
            vec![user_id.to_string().into()],
        )
        .await?;
        let expired = single_count(
            self.conn(),
            "SELECT COUNT(*) FROM phone_numbers \
             WHERE holder = ?1 AND status = 'assigned' AND expires_at < ?2",
            vec![user_id.to_string().into(), fmt_dt(now).into()],
        )
        .await?;
        let available = single_count(
            self.conn(),
            "SELECT COUNT(*) FROM phone_numbers WHERE status = 'available'",
            vec![],
        )
        .await?;

        Ok(PoolStats {
            total_numbers: total,
            active_numbers: active,
            expired_numbers: expired,
            available_numbers: available,
        })
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, new: &NewMessage) -> Result<Message, StoreError> {
        let message = Message {
            id: Uuid::new_v4(),
            phone_number_id: new.phone_number_id,
            sender_number: new.sender_number.clone(),
            content: new.content.clone(),
            category: new.category,
            received_at: Utc::now(),
            provider_id: new.provider_id,
            provider_message_id: new.provider_message_id.clone(),
            is_read: false,
            metadata: new.metadata.clone(),
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO messages \
                 (id, phone_number_id, sender_number, content, category, received_at, \
                  provider_id, provider_message_id, is_read, metadata, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10)",
                params![
                    message.id.to_string(),
                    message.phone_number_id.to_string(),
                    message.sender_number.clone(),
                    message.content.clone(),
                    message.category.as_str(),
                    fmt_dt(message.received_at),
                    message.provider_id.map(|p| p.to_string()),
                    message.provider_message_id.clone(),
                    message.metadata.to_string(),
                    fmt_dt(message.created_at),
                ],
            )
            .await
            .map_err(query_err)?;

        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_message(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn get_message_for_user(
        &self,
        id: Uuid,
        user_id: &str,
    ) -> Result<Option<Message>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages m \
                     JOIN phone_numbers n ON n.id = m.phone_number_id \
                     WHERE m.id = ?1 AND n.holder = ?2"
                ),
                params![id.to_string(), user_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_message(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn find_message_by_provider_ref(
        &self,
        provider_id: Uuid,
        provider_message_id: &str,
    ) -> Result<Option<Message>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages m \
                     WHERE m.provider_id = ?1 AND m.provider_message_id = ?2"
                ),
                params![provider_id.to_string(), provider_message_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_message(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>, StoreError> {
        let (where_sql, mut values) = message_filter_sql(filter);
        values.push(i64::from(filter.limit).into());
        let limit_pos = values.len();
        values.push(i64::from(filter.offset).into());
        let offset_pos = values.len();

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             JOIN phone_numbers n ON n.id = m.phone_number_id \
             WHERE {where_sql} \
             ORDER BY m.received_at DESC LIMIT ?{limit_pos} OFFSET ?{offset_pos}"
        );

        let mut rows = self
            .conn()
            .query(&sql, params_from_iter(values))
            .await
            .map_err(query_err)?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            messages.push(row_to_message(&row).map_err(query_err)?);
        }
        Ok(messages)
    }

    async fn count_messages(&self, filter: &MessageFilter) -> Result<u64, StoreError> {
        let (where_sql, values) = message_filter_sql(filter);
        let sql = format!(
            "SELECT COUNT(*) FROM messages m \
             JOIN phone_numbers n ON n.id = m.phone_number_id \
             WHERE {where_sql}"
        );
        single_count(self.conn(), &sql, values).await
    }

    async fn search_messages(
        &self,
        filter: &MessageFilter,
        query: &str,
    ) -> Result<(Vec<Message>, u64), StoreError> {
        let (where_sql, mut values) = message_filter_sql(filter);
        values.push(format!("%{query}%").into());
        let like_pos = values.len();
        let where_sql = format!("{where_sql} AND m.content LIKE ?{like_pos}");

        let total = single_count(
            self.conn(),
            &format!(
                "SELECT COUNT(*) FROM messages m \
                 JOIN phone_numbers n ON n.id = m.phone_number_id \
                 WHERE {where_sql}"
            ),
            values.clone(),
        )
        .await?;

        values.push(i64::from(filter.limit).into());
        let limit_pos = values.len();
        values.push(i64::from(filter.offset).into());
        let offset_pos = values.len();

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             JOIN phone_numbers n ON n.id = m.phone_number_id \
             WHERE {where_sql} \
             ORDER BY m.received_at DESC LIMIT ?{limit_pos} OFFSET ?{offset_pos}"
        );

        let mut rows = self
            .conn()
            .query(&sql, params_from_iter(values))
            .await
            .map_err(query_err)?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            messages.push(row_to_message(&row).map_err(query_err)?);
        }
        Ok((messages, total))
    }

    async fn mark_message_read(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET is_read = 1 \
                 WHERE id = ?1 AND phone_number_id IN \
                   (SELECT id FROM phone_numbers WHERE holder = ?2)",
                params![id.to_string(), user_id],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn mark_all_read(
        &self,
        user_id: &str,
        phone_number_id: Option<Uuid>,
        category: Option<Category>,
    ) -> Result<u64, StoreError> {
        let mut sql = String::from(
            "UPDATE messages SET is_read = 1 \
             WHERE is_read = 0 AND phone_number_id IN \
               (SELECT id FROM phone_numbers WHERE holder = ?1)",
        );
        let mut values: Vec<libsql::Value> = vec![user_id.to_string().into()];

        if let Some(number_id) = phone_number_id {
            values.push(number_id.to_string().into());
            sql.push_str(&format!(" AND phone_number_id = ?{}", values.len()));
        }
        if let Some(category) = category {
            values.push(category.as_str().to_string().into());
            sql.push_str(&format!(" AND category = ?{}", values.len()));
        }

        let affected = self
            .conn()
            .execute(&sql, params_from_iter(values))
            .await
            .map_err(query_err)?;
        Ok(affected)
    }

    async fn message_stats(&self, user_id: &str) -> Result<MessageStats, StoreError> {
        let scope = "FROM messages m JOIN phone_numbers n ON n.id = m.phone_number_id \
                     WHERE n.holder = ?1";

        let total = single_count(
            self.conn(),
            &format!("SELECT COUNT(*) {scope}"),
            vec![user_id.to_string().into()],
        )
        .await?;
        let unread = single_count(
            self.conn(),
            &format!("SELECT COUNT(*) {scope} AND m.is_read = 0"),
            vec![user_id.to_string().into()],
        )
        .await?;
        let recent = single_count(
            self.conn(),
            &format!("SELECT COUNT(*) {scope} AND m.received_at >= ?2"),
            vec![
                user_id.to_string().into(),
                fmt_dt(Utc::now() - chrono::Duration::hours(24)).into(),
            ],
        )
        .await?;

        let mut by_category = CategoryCounts::default();
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT m.category, COUNT(*) {scope} GROUP BY m.category"),
                params![user_id],
            )
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let category: String = row.get(0).map_err(query_err)?;
            let count: i64 = row.get(1).map_err(query_err)?;
            let count = count.max(0) as u64;
            match category.parse().unwrap_or(Category::Sms) {
                Category::Sms => by_category.sms += count,
                Category::Otp => by_category.otp += count,
                Category::Verification => by_category.verification += count,
            }
        }

        let mut per_number = Vec::new();
        let mut rows = self
            .conn()
            .query(
                "SELECT n.id, n.phone_number, COUNT(m.id) \
                 FROM phone_numbers n JOIN messages m ON m.phone_number_id = n.id \
                 WHERE n.holder = ?1 \
                 GROUP BY n.id, n.phone_number",
                params![user_id],
            )
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id: String = row.get(0).map_err(query_err)?;
            let phone_number: String = row.get(1).map_err(query_err)?;
            let count: i64 = row.get(2).map_err(query_err)?;
            per_number.push(NumberMessageCount {
                phone_number_id: parse_uuid(&id),
                phone_number,
                message_count: count.max(0) as u64,
            });
        }

        Ok(MessageStats {
            total_messages: total,
            unread_messages: unread,
            messages_by_category: by_category,
            recent_messages_24h: recent,
            per_number,
        })
    }

    async fn count_messages_for_number(&self, number_id: Uuid) -> Result<u64, StoreError> {
        single_count(
            self.conn(),
            "SELECT COUNT(*) FROM messages WHERE phone_number_id = ?1",
            vec![number_id.to_string().into()],
        )
        .await
    }

    async fn delete_messages_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM messages WHERE received_at < ?1",
                params![fmt_dt(cutoff)],
            )
            .await
            .map_err(query_err)?;
        Ok(affected)
    }

    // ── Providers ───────────────────────────────────────────────────

    async fn seed_provider(&self, provider: &SmsProvider) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO sms_providers \
                 (id, name, is_active, priority, rate_limit_per_minute, api_key, \
                  webhook_url_template, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    provider.id.to_string(),
                    provider.name.clone(),
                    i64::from(provider.is_active),
                    provider.priority,
                    provider.rate_limit_per_minute,
                    provider.api_key.as_ref().map(|k| k.expose_secret().to_string()),
                    provider.webhook_url_template.clone(),
                    fmt_dt(provider.created_at),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_provider_by_name(
        &self,
        name: &str,
    ) -> Result<Option<SmsProvider>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, is_active, priority, rate_limit_per_minute, api_key, \
                        webhook_url_template, created_at \
                 FROM sms_providers WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_provider(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn list_active_providers(&self) -> Result<Vec<SmsProvider>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, is_active, priority, rate_limit_per_minute, api_key, \
                        webhook_url_template, created_at \
                 FROM sms_providers WHERE is_active = 1 ORDER BY priority ASC",
                (),
            )
            .await
            .map_err(query_err)?;

        let mut providers = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            providers.push(row_to_provider(&row).map_err(query_err)?);
        }
        Ok(providers)
    }
}
