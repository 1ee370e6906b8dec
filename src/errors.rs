use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard JSON error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    #[schema(example = "Conflict")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "plan 550e8400-e29b-41d4-a716-446655440000 is not cancellable")]
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2026-01-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Operation not legal in the current plan/payment state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The plan has reached a terminal state; no further payment
    /// activity is accepted.
    #[error("Plan closed: {0}")]
    PlanClosed(String),

    /// Payment processor failure. `retryable` decides whether the
    /// autopay orchestrator may re-attempt the charge.
    #[error("Gateway error: {message} (retryable: {retryable})")]
    GatewayError { message: String, retryable: bool },

    /// Sales tax collaborator unavailable or rejected the request.
    /// Never retried locally; plan creation aborts.
    #[error("Tax service error: {0}")]
    TaxServiceError(String),

    /// A ledger consistency guarantee was broken. Fatal to the
    /// operation, logged for manual reconciliation, never auto-corrected.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn gateway(message: impl Into<String>, retryable: bool) -> Self {
        ServiceError::GatewayError {
            message: message.into(),
            retryable,
        }
    }

    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InvalidState(_) | Self::InvariantViolation(_) => StatusCode::CONFLICT,
            Self::PlanClosed(_) => StatusCode::GONE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::GatewayError { retryable: true, .. } => StatusCode::BAD_GATEWAY,
            Self::GatewayError { retryable: false, .. } => StatusCode::PAYMENT_REQUIRED,
            Self::TaxServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message suitable for HTTP responses. Internal errors return a
    /// generic message instead of leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_statuses() {
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InvariantViolation("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::PlanClosed("x".into()).status_code(),
            StatusCode::GONE
        );
        assert_eq!(
            ServiceError::gateway("busy", true).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::gateway("declined", false).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ServiceError::InternalError("sqlx pool exhausted".into());
        assert_eq!(err.response_message(), "Internal server error");
    }
}
