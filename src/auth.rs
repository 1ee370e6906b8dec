use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Resolved customer identity for the current request.
///
/// Session issuance and validation belong to the surrounding
/// application; the engine only consumes a resolved identity. The
/// bearer token is the customer id itself, which is exactly what a
/// reverse proxy terminating real authentication would inject.
#[derive(Debug, Clone)]
pub struct AuthenticatedCustomer {
    pub customer_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedCustomer
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("missing Authorization header".to_string())
            })?;

        let token = header_value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or_else(|| {
                ServiceError::Unauthorized("expected a Bearer token".to_string())
            })?;

        let customer_id = Uuid::parse_str(token).map_err(|_| {
            ServiceError::Unauthorized("bearer token is not a customer identity".to_string())
        })?;

        Ok(AuthenticatedCustomer { customer_id })
    }
}
