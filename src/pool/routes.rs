//! REST endpoints for the lease API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use super::leasing::NumberPool;
use crate::auth::{TokenVerifier, require_admin, require_user};
use crate::error::PoolError;

#[derive(Clone)]
pub struct PoolState {
    pub pool: Arc<NumberPool>,
    pub verifier: Arc<dyn TokenVerifier>,
}

/// Build the lease API router.
pub fn pool_routes(pool: Arc<NumberPool>, verifier: Arc<dyn TokenVerifier>) -> Router {
    let state = PoolState { pool, verifier };

    Router::new()
        .route("/api/numbers/available", get(list_available))
        .route("/api/numbers/assign", post(assign_number))
        .route("/api/numbers/mine", get(list_mine))
        .route("/api/numbers/stats", get(pool_stats))
        .route("/api/numbers/reap", post(reap_now))
        .route("/api/numbers/{id}", get(get_number).delete(release_number))
        .route("/api/numbers/{id}/extend", post(extend_lease))
        .route("/api/numbers", post(provision_number))
        .with_state(state)
}

fn default_limit() -> u32 {
    10
}

#[derive(Deserialize)]
struct AvailableQuery {
    country_code: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

async fn list_available(
    State(state): State<PoolState>,
    headers: HeaderMap,
    Query(query): Query<AvailableQuery>,
) -> Response {
    if let Err(e) = require_user(&headers, state.verifier.as_ref()) {
        return e.into_response();
    }

    match state
        .pool
        .list_available(query.country_code.as_deref(), query.limit, query.offset)
        .await
    {
        Ok(numbers) => {
            let count = numbers.len();
            Json(serde_json::json!({
                "numbers": numbers,
                "count": count,
                "limit": query.limit,
                "offset": query.offset,
            }))
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn default_duration() -> u32 {
    1
}

#[derive(Deserialize)]
struct AssignRequest {
    /// Specific number to lease; when absent, the first available one is
    /// picked (optionally narrowed by country).
    number_id: Option<Uuid>,
    country_code: Option<String>,
    #[serde(default = "default_duration")]
    duration_hours: u32,
}

async fn assign_number(
    State(state): State<PoolState>,
    headers: HeaderMap,
    Json(body): Json<AssignRequest>,
) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let result = match body.number_id {
        Some(number_id) => {
            state
                .pool
                .assign(number_id, &identity.user_id, body.duration_hours)
                .await
        }
        None => {
            assign_any(
                &state.pool,
                &identity.user_id,
                body.country_code.as_deref(),
                body.duration_hours,
            )
            .await
        }
    };

    match result {
        Ok(number) => (StatusCode::OK, Json(number)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Pick-any assignment: try a small batch of available numbers so a lost race
/// on one candidate falls through to the next.
async fn assign_any(
    pool: &NumberPool,
    user_id: &str,
    country_code: Option<&str>,
    duration_hours: u32,
) -> Result<super::model::PhoneNumber, PoolError> {
    let candidates = pool.list_available(country_code, 5, 0).await?;
    if candidates.is_empty() {
        return Err(PoolError::NoneAvailable);
    }

    let mut last_race = None;
    for candidate in candidates {
        match pool.assign(candidate.id, user_id, duration_hours).await {
            Err(PoolError::NotAvailable(id)) => last_race = Some(PoolError::NotAvailable(id)),
            other => return other,
        }
    }
    Err(last_race.unwrap_or(PoolError::NoneAvailable))
}

async fn get_number(
    State(state): State<PoolState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    if let Err(e) = require_user(&headers, state.verifier.as_ref()) {
        return e.into_response();
    }

    match state.pool.get(id).await {
        Ok(number) => Json(number).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn release_number(
    State(state): State<PoolState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    match state.pool.release(id, &identity.user_id).await {
        Ok(()) => Json(serde_json::json!({ "released": id })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_mine(State(state): State<PoolState>, headers: HeaderMap) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    match state.pool.list_for_holder(&identity.user_id).await {
        Ok(views) => Json(serde_json::json!({ "assignments": views })).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
struct ExtendRequest {
    duration_hours: u32,
}

async fn extend_lease(
    State(state): State<PoolState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ExtendRequest>,
) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    match state
        .pool
        .extend(id, &identity.user_id, body.duration_hours)
        .await
    {
        Ok(number) => Json(number).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn pool_stats(State(state): State<PoolState>, headers: HeaderMap) -> Response {
    let identity = match require_user(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    match state.pool.stats(&identity.user_id).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
struct ProvisionRequest {
    phone_number: String,
    country_code: String,
    provider_id: Option<Uuid>,
}

async fn provision_number(
    State(state): State<PoolState>,
    headers: HeaderMap,
    Json(body): Json<ProvisionRequest>,
) -> Response {
    if let Err(e) = require_admin(&headers, state.verifier.as_ref()) {
        return e.into_response();
    }

    match state
        .pool
        .provision(&body.phone_number, &body.country_code, body.provider_id)
        .await
    {
        Ok(number) => (StatusCode::CREATED, Json(number)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn reap_now(State(state): State<PoolState>, headers: HeaderMap) -> Response {
    if let Err(e) = require_admin(&headers, state.verifier.as_ref()) {
        return e.into_response();
    }

    match state.pool.reap_expired().await {
        Ok(count) => Json(serde_json::json!({ "reaped": count })).into_response(),
        Err(e) => e.into_response(),
    }
}
