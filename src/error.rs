//! Error types for burner-sms.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lease error: {0}")]
    Pool(#[from] PoolError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

/// How an error maps onto the transport boundary.
///
/// Every core failure is classified into exactly one kind; the HTTP layer
/// translates kinds to status codes and never sees raw store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input — the caller's fault.
    Validation,
    /// The request is incompatible with current state (already leased, etc.).
    Conflict,
    /// Authenticated but not entitled to the resource.
    Forbidden,
    /// The referenced entity does not exist.
    NotFound,
    /// Unexpected failure; details are logged, the response is sanitized.
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence errors surfaced by the `Store` trait.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Lease state-machine errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Phone number {0} not found")]
    NotFound(Uuid),

    #[error("Phone number {0} is not available")]
    NotAvailable(Uuid),

    #[error("No phone numbers available")]
    NoneAvailable,

    #[error("User {user} already holds an active lease on another number")]
    AlreadyLeased { user: String },

    #[error("Phone number {0} is not leased by the requesting user")]
    NotOwner(Uuid),

    #[error("Phone number {0} is not currently assigned")]
    NotAssigned(Uuid),

    #[error("Lease duration must be between {min} and {max} hours, got {got}")]
    InvalidDuration { min: u32, max: u32, got: u32 },

    #[error("Invalid phone number: {0}")]
    InvalidNumber(String),

    #[error("Phone number {0} is already registered")]
    DuplicateNumber(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::NotFound(_) | PoolError::NoneAvailable => ErrorKind::NotFound,
            PoolError::NotAvailable(_)
            | PoolError::AlreadyLeased { .. }
            | PoolError::NotAssigned(_)
            | PoolError::DuplicateNumber(_) => ErrorKind::Conflict,
            PoolError::NotOwner(_) => ErrorKind::Forbidden,
            PoolError::InvalidDuration { .. } | PoolError::InvalidNumber(_) => {
                ErrorKind::Validation
            }
            PoolError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Webhook ingestion errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Provider {0} is not configured")]
    UnknownProvider(String),

    #[error("Provider {0} is inactive")]
    ProviderInactive(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Recipient number {0} is not registered")]
    UnregisteredNumber(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::UnknownProvider(_) | IngestError::MalformedPayload(_) => {
                ErrorKind::Validation
            }
            IngestError::ProviderInactive(_) => ErrorKind::Conflict,
            IngestError::UnregisteredNumber(_) => ErrorKind::NotFound,
            IngestError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Authentication errors at the transport seam.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Admin privileges required")]
    AdminRequired,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Forbidden
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Store(_) => ErrorKind::Internal,
            Error::Pool(e) => e.kind(),
            Error::Ingest(e) => e.kind(),
            Error::Auth(e) => e.kind(),
        }
    }
}

/// JSON error body returned by every failing route.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match kind {
            // Internal details are logged, not leaked.
            ErrorKind::Internal => {
                tracing::error!(error = %self, "Internal error");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };
        (kind.status(), Json(ErrorBody { error: message })).into_response()
    }
}

impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        Error::from(self).into_response()
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        Error::from(self).into_response()
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        Error::from(self).into_response()
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        Error::from(self).into_response()
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_error_kinds() {
        let id = Uuid::nil();
        assert_eq!(PoolError::NotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(PoolError::NotAvailable(id).kind(), ErrorKind::Conflict);
        assert_eq!(
            PoolError::AlreadyLeased { user: "u1".into() }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(PoolError::NotOwner(id).kind(), ErrorKind::Forbidden);
        assert_eq!(
            PoolError::InvalidDuration { min: 1, max: 24, got: 0 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PoolError::Store(StoreError::Query("boom".into())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn ingest_error_kinds() {
        assert_eq!(
            IngestError::UnknownProvider("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            IngestError::ProviderInactive("x".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            IngestError::UnregisteredNumber("+1".into()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(ErrorKind::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorKind::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
