use crate::{
    config::LayawayPolicy,
    db::DbPool,
    entities::layaway_payment::{self, Entity as PaymentEntity, Model as PaymentModel},
    entities::layaway_plan::{self, Entity as PlanEntity, Model as PlanModel},
    entities::{PaymentMethod, PaymentStatus, PlanStatus},
    errors::ServiceError,
    events::{EventSender, LayawayEvent},
    gateway::{ChargeRequest, PaymentGateway},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Derives a plan's status from its payments' statuses.
///
/// Pure and forward-only: a terminal plan never changes, a failed
/// payment defaults the plan, a fully paid schedule completes it, and
/// the first paid installment activates it. Anything else leaves the
/// current status in place.
pub fn derived_plan_status(current: PlanStatus, payments: &[PaymentStatus]) -> PlanStatus {
    if current.is_terminal() {
        return current;
    }
    if payments.iter().any(|s| *s == PaymentStatus::Failed) {
        return PlanStatus::Defaulted;
    }
    if !payments.is_empty() && payments.iter().all(|s| *s == PaymentStatus::Paid) {
        return PlanStatus::Completed;
    }
    if payments.iter().any(|s| *s == PaymentStatus::Paid) {
        return PlanStatus::Active;
    }
    current
}

/// The authoritative record of plans and their payments.
///
/// Every terminal payment-status write in the system goes through this
/// service, and every write is a conditional update keyed on the
/// expected prior state. That single entry point is what makes the
/// ledger invariants enforceable.
#[derive(Clone)]
pub struct LedgerService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    policy: LayawayPolicy,
}

impl LedgerService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, policy: LayawayPolicy) -> Self {
        Self {
            db,
            event_sender,
            policy,
        }
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> Result<PlanModel, ServiceError> {
        PlanEntity::find_by_id(plan_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("plan {} not found", plan_id)))
    }

    pub async fn get_payment(
        &self,
        plan_id: Uuid,
        payment_id: Uuid,
    ) -> Result<PaymentModel, ServiceError> {
        PaymentEntity::find_by_id(payment_id)
            .filter(layaway_payment::Column::PlanId.eq(plan_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))
    }

    /// Claims a payment for a charge attempt: `scheduled -> attempting`.
    ///
    /// The update only matches rows still in `scheduled`, so two workers
    /// racing the same payment produce exactly one winner; the loser
    /// sees zero rows affected and returns `false`.
    pub async fn claim_for_attempt(&self, payment_id: Uuid) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let result = PaymentEntity::update_many()
            .col_expr(
                layaway_payment::Column::Status,
                Expr::value(PaymentStatus::Attempting),
            )
            .col_expr(
                layaway_payment::Column::LastAttemptAt,
                Expr::value(Some(now)),
            )
            .col_expr(layaway_payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(layaway_payment::Column::Id.eq(payment_id))
            .filter(layaway_payment::Column::Status.eq(PaymentStatus::Scheduled))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Records a successful charge. Idempotent per transaction id:
    /// replaying the same `(payment_id, transaction_id)` pair is a
    /// no-op; a different transaction id for an already-paid payment is
    /// an invariant violation surfaced for manual review.
    #[instrument(skip(self), fields(%plan_id, %payment_id))]
    pub async fn record_success(
        &self,
        plan_id: Uuid,
        payment_id: Uuid,
        transaction_id: &str,
        payment_method: PaymentMethod,
        is_autopay: bool,
    ) -> Result<PaymentModel, ServiceError> {
        if transaction_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "transaction id must not be empty".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let payment = PaymentEntity::find_by_id(payment_id)
            .filter(layaway_payment::Column::PlanId.eq(plan_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))?;
        let plan = PlanEntity::find_by_id(plan_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("plan {} not found", plan_id)))?;

        // Idempotent replay (duplicate gateway webhook) short-circuits
        // before any other check.
        if payment.status == PaymentStatus::Paid {
            return match payment.transaction_id.as_deref() {
                Some(stored) if stored == transaction_id => Ok(payment),
                _ => Err(ServiceError::InvariantViolation(format!(
                    "payment {} already paid under a different transaction id",
                    payment_id
                ))),
            };
        }

        if plan.status.is_terminal() {
            return Err(ServiceError::PlanClosed(format!(
                "plan {} is {}; no further payments accepted",
                plan_id, plan.status
            )));
        }

        if matches!(payment.status, PaymentStatus::Failed | PaymentStatus::Skipped) {
            return Err(ServiceError::InvalidState(format!(
                "payment {} is {} and cannot be paid",
                payment_id, payment.status
            )));
        }

        // Global dedup: a transaction id may never be reused by another
        // payment anywhere in the system.
        let reused = PaymentEntity::find()
            .filter(layaway_payment::Column::TransactionId.eq(transaction_id))
            .filter(layaway_payment::Column::Id.ne(payment_id))
            .one(&txn)
            .await?;
        if let Some(other) = reused {
            return Err(ServiceError::InvariantViolation(format!(
                "transaction id {} already recorded on payment {}",
                transaction_id, other.id
            )));
        }

        let now = Utc::now();
        let updated = PaymentEntity::update_many()
            .col_expr(
                layaway_payment::Column::Status,
                Expr::value(PaymentStatus::Paid),
            )
            .col_expr(
                layaway_payment::Column::TransactionId,
                Expr::value(Some(transaction_id.to_string())),
            )
            .col_expr(
                layaway_payment::Column::PaymentMethod,
                Expr::value(payment_method),
            )
            .col_expr(layaway_payment::Column::IsAutopay, Expr::value(is_autopay))
            .col_expr(layaway_payment::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(
                layaway_payment::Column::NextAttemptAt,
                Expr::value(None::<DateTime<Utc>>),
            )
            .col_expr(
                layaway_payment::Column::LastFailureReason,
                Expr::value(None::<String>),
            )
            .col_expr(layaway_payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(layaway_payment::Column::Id.eq(payment_id))
            .filter(
                layaway_payment::Column::Status
                    .is_in([PaymentStatus::Scheduled, PaymentStatus::Attempting]),
            )
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            // Lost a race since the read above; re-check for the
            // idempotent case before declaring a violation.
            let current = PaymentEntity::find_by_id(payment_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("payment {} not found", payment_id))
                })?;
            return match (&current.status, current.transaction_id.as_deref()) {
                (PaymentStatus::Paid, Some(stored)) if stored == transaction_id => Ok(current),
                _ => Err(ServiceError::InvariantViolation(format!(
                    "payment {} changed state concurrently while recording {}",
                    payment_id, transaction_id
                ))),
            };
        }

        let new_plan_status = self.rederive_plan_status(&txn, &plan).await?;
        txn.commit().await?;

        info!(%payment_id, %transaction_id, "payment recorded as paid");
        self.event_sender.emit(LayawayEvent::PaymentRecorded {
            plan_id,
            payment_id,
            transaction_id: transaction_id.to_string(),
            amount: payment.amount,
        });
        self.emit_plan_transition(plan_id, plan.status, new_plan_status);

        self.get_payment(plan_id, payment_id).await
    }

    /// Records a failed charge attempt and applies the retry policy: a
    /// retryable failure below the attempt budget goes back to
    /// `scheduled` with backoff, anything else fails the payment
    /// permanently and re-derives the plan (which may default it).
    #[instrument(skip(self, reason), fields(%plan_id, %payment_id))]
    pub async fn record_failure(
        &self,
        plan_id: Uuid,
        payment_id: Uuid,
        reason: &str,
        retryable: bool,
    ) -> Result<PaymentModel, ServiceError> {
        let txn = self.db.begin().await?;

        let payment = PaymentEntity::find_by_id(payment_id)
            .filter(layaway_payment::Column::PlanId.eq(plan_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))?;
        let plan = PlanEntity::find_by_id(plan_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("plan {} not found", plan_id)))?;

        if payment.status != PaymentStatus::Attempting {
            return Err(ServiceError::InvalidState(format!(
                "payment {} has no charge attempt in flight",
                payment_id
            )));
        }

        let now = Utc::now();
        let attempt_count = payment.attempt_count + 1;
        let exhausted = attempt_count >= self.policy.max_attempts as i32;
        let terminal = !retryable || exhausted;

        let update = PaymentEntity::update_many()
            .col_expr(
                layaway_payment::Column::AttemptCount,
                Expr::value(attempt_count),
            )
            .col_expr(
                layaway_payment::Column::LastFailureReason,
                Expr::value(Some(reason.to_string())),
            )
            .col_expr(
                layaway_payment::Column::LastAttemptAt,
                Expr::value(Some(now)),
            )
            .col_expr(layaway_payment::Column::UpdatedAt, Expr::value(Some(now)));

        let update = if terminal {
            update
                .col_expr(
                    layaway_payment::Column::Status,
                    Expr::value(PaymentStatus::Failed),
                )
                .col_expr(
                    layaway_payment::Column::NextAttemptAt,
                    Expr::value(None::<DateTime<Utc>>),
                )
        } else {
            let next_attempt =
                now + chrono::Duration::from_std(self.policy.backoff_after(attempt_count as u32))
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
            update
                .col_expr(
                    layaway_payment::Column::Status,
                    Expr::value(PaymentStatus::Scheduled),
                )
                .col_expr(
                    layaway_payment::Column::NextAttemptAt,
                    Expr::value(Some(next_attempt)),
                )
        };

        let result = update
            .filter(layaway_payment::Column::Id.eq(payment_id))
            .filter(layaway_payment::Column::Status.eq(PaymentStatus::Attempting))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InvariantViolation(format!(
                "payment {} left the attempting state concurrently",
                payment_id
            )));
        }

        let new_plan_status = self.rederive_plan_status(&txn, &plan).await?;
        txn.commit().await?;

        warn!(
            %payment_id,
            attempt_count,
            terminal,
            retryable,
            "charge attempt failed: {}",
            reason
        );
        self.event_sender.emit(LayawayEvent::PaymentFailed {
            plan_id,
            payment_id,
            attempt_count,
            terminal,
            reason: reason.to_string(),
        });
        self.emit_plan_transition(plan_id, plan.status, new_plan_status);

        self.get_payment(plan_id, payment_id).await
    }

    /// Claims, charges and records one payment end to end. Shared by
    /// the autopay orchestrator and the manual pay-now path.
    ///
    /// A gateway timeout has an unknown outcome; the fixed idempotency
    /// key (the payment id) makes re-attempting safe, so it is treated
    /// as a retryable failure.
    pub async fn attempt_charge(
        &self,
        gateway: &dyn PaymentGateway,
        plan: &PlanModel,
        payment: &PaymentModel,
        is_autopay: bool,
    ) -> Result<PaymentModel, ServiceError> {
        if plan.status.is_terminal() {
            return Err(ServiceError::PlanClosed(format!(
                "plan {} is {}; no further payments accepted",
                plan.id, plan.status
            )));
        }
        let method_token = plan.payment_method_token.clone().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "plan {} has no payment method on file",
                plan.id
            ))
        })?;

        if !self.claim_for_attempt(payment.id).await? {
            debug!(payment_id = %payment.id, "payment already claimed; skipping");
            return Err(ServiceError::InvalidState(format!(
                "payment {} already has a charge attempt in flight",
                payment.id
            )));
        }

        let request = ChargeRequest {
            amount_minor: payment.amount,
            currency: plan.currency.clone(),
            method_token,
            idempotency_key: payment.id.to_string(),
        };

        let outcome =
            tokio::time::timeout(self.policy.gateway_timeout(), gateway.charge(request)).await;

        match outcome {
            Ok(Ok(receipt)) => {
                self.record_success(
                    plan.id,
                    payment.id,
                    &receipt.transaction_id,
                    payment.payment_method,
                    is_autopay,
                )
                .await
            }
            Ok(Err(ServiceError::GatewayError { message, retryable })) => {
                self.record_failure(plan.id, payment.id, &message, retryable)
                    .await?;
                Err(ServiceError::GatewayError { message, retryable })
            }
            Ok(Err(other)) => {
                // Unclassified failure: outcome unknown, keep it
                // retryable rather than risk defaulting the plan.
                let message = other.to_string();
                self.record_failure(plan.id, payment.id, &message, true)
                    .await?;
                Err(other)
            }
            Err(_elapsed) => {
                let message = format!(
                    "gateway charge timed out after {}s",
                    self.policy.gateway_timeout_secs
                );
                self.record_failure(plan.id, payment.id, &message, true)
                    .await?;
                Err(ServiceError::gateway(message, true))
            }
        }
    }

    /// Due, unclaimed autopay work: scheduled payments past their due
    /// date (and past any retry backoff) whose plan is autopay-enabled,
    /// has an instrument on file, and is still open.
    pub async fn due_autopay_payments(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<(PaymentModel, PlanModel)>, ServiceError> {
        let rows = PaymentEntity::find()
            .find_also_related(PlanEntity)
            .filter(layaway_payment::Column::Status.eq(PaymentStatus::Scheduled))
            .filter(layaway_payment::Column::DueDate.lte(now))
            .filter(
                Condition::any()
                    .add(layaway_payment::Column::NextAttemptAt.is_null())
                    .add(layaway_payment::Column::NextAttemptAt.lte(now)),
            )
            .filter(layaway_plan::Column::AutopayEnabled.eq(true))
            .filter(layaway_plan::Column::PaymentMethodToken.is_not_null())
            .filter(
                layaway_plan::Column::Status.is_in([PlanStatus::Pending, PlanStatus::Active]),
            )
            .order_by_asc(layaway_payment::Column::DueDate)
            .limit(limit)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(payment, plan)| plan.map(|p| (payment, p)))
            .collect())
    }

    /// Recomputes and conditionally writes the plan's derived status.
    /// The write is keyed on the status read at the start of the
    /// enclosing transaction, so concurrent re-derivations cannot step
    /// backwards.
    async fn rederive_plan_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        plan: &PlanModel,
    ) -> Result<PlanStatus, ServiceError> {
        let statuses: Vec<PaymentStatus> = PaymentEntity::find()
            .filter(layaway_payment::Column::PlanId.eq(plan.id))
            .order_by_asc(layaway_payment::Column::SequenceIndex)
            .all(conn)
            .await?
            .into_iter()
            .map(|p| p.status)
            .collect();

        let next = derived_plan_status(plan.status, &statuses);
        if next == plan.status {
            return Ok(next);
        }

        let now = Utc::now();
        let update = PlanEntity::update_many()
            .col_expr(layaway_plan::Column::Status, Expr::value(next))
            .col_expr(layaway_plan::Column::UpdatedAt, Expr::value(Some(now)));
        let update = if next == PlanStatus::Completed {
            update.col_expr(layaway_plan::Column::CompletedAt, Expr::value(Some(now)))
        } else {
            update
        };
        let result = update
            .filter(layaway_plan::Column::Id.eq(plan.id))
            .filter(layaway_plan::Column::Status.eq(plan.status))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            // Another writer advanced the plan first; their derivation
            // saw at least as much payment state as ours.
            error!(plan_id = %plan.id, "plan status advanced concurrently during re-derivation");
            return Ok(plan.status);
        }

        Ok(next)
    }

    fn emit_plan_transition(&self, plan_id: Uuid, old: PlanStatus, new: PlanStatus) {
        if old != new {
            self.event_sender.emit(LayawayEvent::PlanStatusChanged {
                plan_id,
                old_status: old,
                new_status: new,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;
    use PlanStatus::*;

    #[test]
    fn all_paid_completes_the_plan() {
        assert_eq!(derived_plan_status(Active, &[Paid, Paid, Paid]), Completed);
    }

    #[test]
    fn any_failed_defaults_the_plan() {
        assert_eq!(derived_plan_status(Active, &[Paid, Failed, Scheduled]), Defaulted);
        // failure outranks completion of the rest
        assert_eq!(derived_plan_status(Active, &[Paid, Paid, Failed]), Defaulted);
    }

    #[test]
    fn first_paid_installment_activates_a_pending_plan() {
        assert_eq!(derived_plan_status(Pending, &[Paid, Scheduled]), Active);
    }

    #[test]
    fn untouched_schedule_leaves_status_alone() {
        assert_eq!(derived_plan_status(Pending, &[Scheduled, Scheduled]), Pending);
        assert_eq!(derived_plan_status(Active, &[Paid, Attempting]), Active);
    }

    #[test]
    fn terminal_states_never_move() {
        assert_eq!(derived_plan_status(Cancelled, &[Paid, Paid]), Cancelled);
        assert_eq!(derived_plan_status(Completed, &[Paid, Failed]), Completed);
        assert_eq!(derived_plan_status(Defaulted, &[Paid, Paid]), Defaulted);
    }
}
