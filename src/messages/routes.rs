//! REST endpoints for the message query surface.
//!
//! All read paths are scoped to numbers the caller currently holds; the only
//! mutations are the mark-read variants.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::model::MessageFilter;
use crate::auth::{TokenVerifier, require_user};
use crate::classify::Category;
use crate::error::ErrorBody;
use crate::store::Store;

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct MessagesState {
    pub store: Arc<dyn Store>,
    pub verifier: Arc<dyn TokenVerifier>,
}

/// Build the message API router.
pub fn message_routes(store: Arc<dyn Store>, verifier: Arc<dyn TokenVerifier>) -> Router {
    let state = MessagesState { store, verifier };

    Router::new()
        .route("/api/messages", get(list_messages))
        .route("/api/messages/search", get(search_messages))
        .route("/api/messages/stats", get(message_stats))
        .route("/api/messages/read-all", patch(mark_all_read))
        .route("/api/messages/{id}", get(get_message))
        .route("/api/messages/{id}/read", patch(mark_read))
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn forbidden(message: impl Into<String>) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn default_limit() -> u32 {
    50
}

#[derive(Deserialize)]
struct ListQuery {
    phone_number_id: Option<Uuid>,
    category: Option<String>,
    is_read: Option<bool>,
    since: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
    q: Option<String>,
}

/// Turn query parameters into a scoped `MessageFilter`, validating the
/// category and timestamp formats and the caller's access to the number.
async fn build_filter(
    state: &MessagesState,
    user_id: &str,
    query: &ListQuery,
) -> Result<MessageFilter, Response> {
    let category = match &query.category {
        Some(raw) => Some(
            raw.parse::<Category>()
                .map_err(|e| bad_request(e))?,
        ),
        None => None,
    };

    let since = match &query.since {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| bad_request(format!("invalid since timestamp: {raw}")))?,
        ),
        None => None,
    };

    if let Some(number_id) = query.phone_number_id {
        let number = state
            .store
            .get_number(number_id)
            .await
            .map_err(|e| crate::error::Error::from(e).into_response())?;
        match number {
            Some(number) if number.holder.as_deref() == Some(user_id) => {}
            _ => return Err(forbidden("access denied to this phone number")),
        }
    }

    Ok(MessageFilter {
        user_id: user_id.to_string(),
        phone_number_id: query.phone_number_id,
        category,
        is_read: query.is_read,
        since,
        limit: query.limit.clamp(1, MAX_PAGE_SIZE),
        offset: query.offset,
    })
}

async fn list_messages(
    State(state): State<MessagesState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let filter = match build_filter(&state, &identity.user_id, &query).await {
        Ok(filter) => filter,
        Err(response) => return response,
    };

    let messages = match state.store.list_messages(&filter).await {
        Ok(messages) => messages,
        Err(e) => return crate::error::Error::from(e).into_response(),
    };
    let total = match state.store.count_messages(&filter).await {
        Ok(total) => total,
        Err(e) => return crate::error::Error::from(e).into_response(),
    };

    Json(serde_json::json!({
        "messages": messages,
        "total": total,
        "limit": filter.limit,
        "offset": filter.offset,
    }))
    .into_response()
}

async fn search_messages(
    State(state): State<MessagesState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) else {
        return bad_request("search query is required");
    };
    let q = q.to_string();

    let filter = match build_filter(&state, &identity.user_id, &query).await {
        Ok(filter) => filter,
        Err(response) => return response,
    };

    match state.store.search_messages(&filter, &q).await {
        Ok((messages, total)) => Json(serde_json::json!({
            "messages": messages,
            "total": total,
            "limit": filter.limit,
            "offset": filter.offset,
            "query": q,
        }))
        .into_response(),
        Err(e) => crate::error::Error::from(e).into_response(),
    }
}

async fn message_stats(State(state): State<MessagesState>, headers: HeaderMap) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    match state.store.message_stats(&identity.user_id).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => crate::error::Error::from(e).into_response(),
    }
}

async fn get_message(
    State(state): State<MessagesState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    match state.store.get_message_for_user(id, &identity.user_id).await {
        Ok(Some(message)) => Json(message).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "message not found".into(),
            }),
        )
            .into_response(),
        Err(e) => crate::error::Error::from(e).into_response(),
    }
}

async fn mark_read(
    State(state): State<MessagesState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    match state.store.mark_message_read(id, &identity.user_id).await {
        Ok(true) => Json(serde_json::json!({ "marked_read": id })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "message not found".into(),
            }),
        )
            .into_response(),
        Err(e) => crate::error::Error::from(e).into_response(),
    }
}

#[derive(Deserialize)]
struct MarkAllQuery {
    phone_number_id: Option<Uuid>,
    category: Option<String>,
}

async fn mark_all_read(
    State(state): State<MessagesState>,
    headers: HeaderMap,
    Query(query): Query<MarkAllQuery>,
) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let category = match &query.category {
        Some(raw) => match raw.parse::<Category>() {
            Ok(category) => Some(category),
            Err(e) => return bad_request(e),
        },
        None => None,
    };

    match state
        .store
        .mark_all_read(&identity.user_id, query.phone_number_id, category)
        .await
    {
        Ok(updated) => Json(serde_json::json!({ "updated_count": updated })).into_response(),
        Err(e) => crate::error::Error::from(e).into_response(),
    }
}
