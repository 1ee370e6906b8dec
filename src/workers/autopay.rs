use crate::{
    config::LayawayPolicy, errors::ServiceError, gateway::PaymentGateway,
    services::ledger::LedgerService,
};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Autopay orchestrator: on a fixed cadence, finds due scheduled
/// payments on autopay-enabled plans and drives each one to `paid` or
/// `failed` through the ledger.
///
/// Work is dispatched per payment and plans never block each other; the
/// ledger's conditional claim guarantees at most one in-flight attempt
/// per payment even with several orchestrator processes running.
pub fn spawn(
    ledger: Arc<LedgerService>,
    gateway: Arc<dyn PaymentGateway>,
    policy: LayawayPolicy,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = policy.autopay_poll_interval_secs,
            "autopay orchestrator started"
        );
        loop {
            match run_once(&ledger, gateway.as_ref(), &policy).await {
                Ok(charged) if charged > 0 => {
                    debug!(charged, "autopay pass finished");
                }
                Ok(_) => {}
                Err(e) => error!("autopay pass failed: {}", e),
            }
            sleep(policy.autopay_poll_interval()).await;
        }
    })
}

/// One orchestrator pass. Returns the number of payments successfully
/// charged; individual failures are recorded by the ledger and do not
/// abort the pass.
pub async fn run_once(
    ledger: &LedgerService,
    gateway: &dyn PaymentGateway,
    policy: &LayawayPolicy,
) -> Result<usize, ServiceError> {
    let due = ledger
        .due_autopay_payments(Utc::now(), policy.autopay_batch_size)
        .await?;
    if due.is_empty() {
        return Ok(0);
    }
    debug!(count = due.len(), "due autopay payments found");

    let attempts = due.into_iter().map(|(payment, plan)| async move {
        let payment_id = payment.id;
        match ledger.attempt_charge(gateway, &plan, &payment, true).await {
            Ok(_) => true,
            // Lost the claim race to another worker: not an error.
            Err(ServiceError::InvalidState(_)) => {
                debug!(%payment_id, "skipped: claimed by another worker");
                false
            }
            // Recorded by the ledger; retry/backoff already scheduled
            // where applicable.
            Err(ServiceError::GatewayError { message, retryable }) => {
                debug!(%payment_id, retryable, "charge failed: {}", message);
                false
            }
            // A charge may have gone through without being recorded
            // (e.g. the plan reached a terminal state mid-flight).
            // Surfaced for manual reconciliation, never auto-corrected.
            Err(e) => {
                error!(%payment_id, "autopay attempt needs manual review: {}", e);
                false
            }
        }
    });

    let results = join_all(attempts).await;
    Ok(results.into_iter().filter(|ok| *ok).count())
}
