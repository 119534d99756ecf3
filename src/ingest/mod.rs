//! Webhook ingestion — provider adapters, pipeline, HTTP endpoints.

pub mod adapters;
pub mod ingestor;
pub mod routes;

pub use adapters::{AdapterRegistry, CanonicalSms, PayloadAdapter, RawPayload};
pub use ingestor::WebhookIngestor;
