use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ServiceError;

/// A charge request against a stored payment instrument.
///
/// The idempotency key is fixed per logical payment, so a re-attempt
/// after a timeout can never double-charge: processors deduplicate on
/// the key and return the original result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Amount in minor currency units
    pub amount_minor: i64,
    /// ISO 4217 currency code
    pub currency: String,
    /// Processor token for the instrument on file
    pub method_token: String,
    /// Deduplication key, stable across retries of the same payment
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeReceipt {
    /// Processor-assigned transaction reference
    pub transaction_id: String,
}

/// Uniform interface over heterogeneous payment processors (card,
/// PayPal, buy-now-pay-later). Failures surface as
/// `ServiceError::GatewayError { retryable }`; the caller decides the
/// retry policy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, ServiceError>;

    async fn refund(
        &self,
        transaction_id: &str,
        amount_minor: i64,
    ) -> Result<ChargeReceipt, ServiceError>;
}

/// Deterministic gateway for development and tests. Outcomes are driven
/// by the instrument token, mirroring processor sandbox conventions:
///
/// - `tok_decline*`  -> permanent decline (non-retryable)
/// - `tok_busy*`     -> processor busy (retryable)
/// - anything else   -> success, transaction id derived from the
///   idempotency key so replays return the same reference
pub struct SandboxGateway;

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, ServiceError> {
        debug!(
            token = %request.method_token,
            key = %request.idempotency_key,
            amount = request.amount_minor,
            "sandbox charge"
        );

        if request.amount_minor <= 0 {
            return Err(ServiceError::gateway("invalid charge amount", false));
        }
        if request.method_token.starts_with("tok_decline") {
            return Err(ServiceError::gateway("card declined", false));
        }
        if request.method_token.starts_with("tok_busy") {
            return Err(ServiceError::gateway("processor busy", true));
        }

        Ok(ChargeReceipt {
            transaction_id: format!("txn_{}", request.idempotency_key),
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount_minor: i64,
    ) -> Result<ChargeReceipt, ServiceError> {
        if amount_minor <= 0 {
            return Err(ServiceError::gateway("invalid refund amount", false));
        }
        Ok(ChargeReceipt {
            transaction_id: format!("rfnd_{}", transaction_id),
        })
    }
}
