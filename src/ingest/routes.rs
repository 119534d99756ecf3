//! Webhook HTTP endpoints.
//!
//! Providers POST form-encoded or JSON bodies to one shared route, selected
//! by a `provider` query parameter. Acknowledgements are provider-specific:
//! Twilio expects an empty TwiML document, everyone else a plain `OK`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, warn};

use super::adapters::RawPayload;
use super::ingestor::WebhookIngestor;
use crate::error::IngestError;
use crate::providers::ProviderView;
use crate::store::Store;

const TWILIO_ACK: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

#[derive(Clone)]
pub struct WebhookState {
    pub ingestor: Arc<WebhookIngestor>,
    pub store: Arc<dyn Store>,
    pub dev_routes: bool,
}

/// Build the webhook router.
pub fn webhook_routes(
    ingestor: Arc<WebhookIngestor>,
    store: Arc<dyn Store>,
    dev_routes: bool,
) -> Router {
    let state = WebhookState {
        ingestor,
        store,
        dev_routes,
    };

    Router::new()
        .route("/api/webhooks/sms", post(receive_sms))
        .route("/api/webhooks/status", get(webhook_status))
        .route("/api/webhooks/test/message", post(inject_test_message))
        .with_state(state)
}

#[derive(Deserialize)]
struct ProviderQuery {
    provider: Option<String>,
}

/// Decode the body according to its Content-Type. Form-encoded is the webhook
/// default; JSON is accepted when declared.
fn parse_body(headers: &HeaderMap, body: &Bytes) -> Result<RawPayload, IngestError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let payload = if content_type.contains("json") {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| IngestError::MalformedPayload(format!("invalid JSON body: {e}")))?;
        RawPayload::from_json(value)?
    } else {
        RawPayload::from_pairs(url::form_urlencoded::parse(body).into_owned())
    };

    if payload.is_empty() {
        return Err(IngestError::MalformedPayload("empty payload".into()));
    }
    Ok(payload)
}

async fn receive_sms(
    State(state): State<WebhookState>,
    Query(query): Query<ProviderQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(provider) = query.provider.filter(|p| !p.is_empty()) else {
        return IngestError::MalformedPayload("missing provider parameter".into()).into_response();
    };
    let provider = provider.to_lowercase();

    let payload = match parse_body(&headers, &body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(provider = %provider, error = %e, "Rejected webhook body");
            return e.into_response();
        }
    };

    match state.ingestor.ingest(&provider, &payload).await {
        Ok(message_id) => {
            info!(provider = %provider, message_id = %message_id, "Webhook processed");
            provider_ack(&provider)
        }
        Err(e) => {
            warn!(provider = %provider, error = %e, "Webhook processing failed");
            e.into_response()
        }
    }
}

/// The acknowledgement body each provider expects on success.
fn provider_ack(provider: &str) -> Response {
    if provider == "twilio" {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/xml")],
            TWILIO_ACK,
        )
            .into_response()
    } else {
        (StatusCode::OK, "OK").into_response()
    }
}

async fn webhook_status(State(state): State<WebhookState>) -> Response {
    let providers = match state.store.list_active_providers().await {
        Ok(providers) => providers,
        Err(e) => return crate::error::Error::from(e).into_response(),
    };

    Json(serde_json::json!({
        "status": "active",
        "endpoints": {
            "sms": "/api/webhooks/sms?provider={provider}",
        },
        "active_providers": providers.iter().map(ProviderView::from).collect::<Vec<_>>(),
        "supported_content_types": [
            "application/x-www-form-urlencoded",
            "application/json",
        ],
    }))
    .into_response()
}

#[derive(Deserialize)]
struct TestMessageRequest {
    to: String,
    from: String,
    message: String,
}

/// Dev-only injection route; hidden unless `BURNER_SMS_DEV_ROUTES` is set.
async fn inject_test_message(
    State(state): State<WebhookState>,
    Json(body): Json<TestMessageRequest>,
) -> Response {
    if !state.dev_routes {
        return StatusCode::NOT_FOUND.into_response();
    }

    match state
        .ingestor
        .inject(&body.to, &body.from, &body.message)
        .await
    {
        Ok(message_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "message_id": message_id })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
