use crate::{
    config::LayawayPolicy,
    db::DbPool,
    entities::layaway_payment::{self, Entity as PaymentEntity, Model as PaymentModel},
    entities::layaway_plan::{self, Entity as PlanEntity, Model as PlanModel},
    entities::{Cadence, PaymentMethod, PaymentStatus, PlanStatus},
    errors::ServiceError,
    events::{EventSender, LayawayEvent},
    tax::SalesTaxCalculator,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePlanRequest {
    /// Purchase amount before tax, in minor currency units
    #[schema(example = 25_000)]
    pub purchase_amount: i64,

    /// Number of installments the purchase is split into
    #[schema(example = 4)]
    pub installment_count: u32,

    #[schema(example = "biweekly")]
    pub cadence: Cadence,

    #[schema(example = "card")]
    pub payment_method: PaymentMethod,

    /// Customer's tax jurisdiction (two-letter US state code)
    #[validate(length(min = 2, max = 2, message = "Jurisdiction must be a 2-letter state code"))]
    #[schema(example = "TX")]
    pub jurisdiction: String,

    /// ISO 4217 currency code, defaults to USD
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: Option<String>,

    /// Enroll the plan in unattended charging
    #[serde(default)]
    pub autopay_enabled: bool,

    /// Gateway token for the instrument to keep on file; required when
    /// autopay is enabled
    pub payment_method_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub sequence_index: i32,
    pub due_date: DateTime<Utc>,
    pub amount: i64,
    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub attempt_count: i32,
    pub is_autopay: bool,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
}

impl From<PaymentModel> for PaymentResponse {
    fn from(model: PaymentModel) -> Self {
        Self {
            id: model.id,
            plan_id: model.plan_id,
            sequence_index: model.sequence_index,
            due_date: model.due_date,
            amount: model.amount,
            status: model.status,
            payment_method: model.payment_method,
            transaction_id: model.transaction_id,
            attempt_count: model.attempt_count,
            is_autopay: model.is_autopay,
            next_attempt_at: model.next_attempt_at,
            last_attempt_at: model.last_attempt_at,
            paid_at: model.paid_at,
            last_failure_reason: model.last_failure_reason,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlanResponse {
    pub id: Uuid,
    pub plan_number: String,
    pub customer_id: Uuid,
    pub total_amount: i64,
    pub tax_amount: i64,
    pub currency: String,
    pub status: PlanStatus,
    pub cadence: Cadence,
    pub autopay_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Installments in schedule order
    pub payments: Vec<PaymentResponse>,
}

impl PlanResponse {
    fn from_parts(plan: PlanModel, mut payments: Vec<PaymentModel>) -> Self {
        payments.sort_by_key(|p| p.sequence_index);
        Self {
            id: plan.id,
            plan_number: plan.plan_number,
            customer_id: plan.customer_id,
            total_amount: plan.total_amount,
            tax_amount: plan.tax_amount,
            currency: plan.currency,
            status: plan.status,
            cadence: plan.cadence,
            autopay_enabled: plan.autopay_enabled,
            created_at: plan.created_at,
            completed_at: plan.completed_at,
            payments: payments.into_iter().map(PaymentResponse::from).collect(),
        }
    }
}

/// Builds the installment schedule for a grand total (purchase + tax).
///
/// Even division in integer minor units; the remainder lands on the
/// final installment so the amounts always sum exactly to the total.
/// Due dates are `created_at + k * cadence` for `k = 0..n-1`; the first
/// installment is due immediately.
pub fn build_schedule(
    grand_total: i64,
    installment_count: u32,
    cadence: Cadence,
    created_at: DateTime<Utc>,
) -> Vec<(i64, DateTime<Utc>)> {
    let n = i64::from(installment_count);
    let per_installment = grand_total / n;
    let last = grand_total - per_installment * (n - 1);

    (0..installment_count)
        .map(|k| {
            let amount = if k == installment_count - 1 {
                last
            } else {
                per_installment
            };
            let due = created_at + cadence.interval() * (k as i32);
            (amount, due)
        })
        .collect()
}

fn generate_plan_number(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("LAY-{}-{}", now.format("%Y%m%d"), suffix)
}

/// Plan Manager: creates, reads and cancels layaway plans. All payment
/// status mutations live in `LedgerService`; this service only writes
/// plan rows and the initial schedule.
#[derive(Clone)]
pub struct PlanService {
    db: Arc<DbPool>,
    tax: Arc<dyn SalesTaxCalculator>,
    event_sender: EventSender,
    policy: LayawayPolicy,
}

impl PlanService {
    pub fn new(
        db: Arc<DbPool>,
        tax: Arc<dyn SalesTaxCalculator>,
        event_sender: EventSender,
        policy: LayawayPolicy,
    ) -> Self {
        Self {
            db,
            tax,
            event_sender,
            policy,
        }
    }

    pub fn policy(&self) -> &LayawayPolicy {
        &self.policy
    }

    /// Creates a plan with its full installment schedule in one
    /// transaction.
    #[instrument(skip(self, request), fields(customer_id = %customer_id))]
    pub async fn create_plan(
        &self,
        customer_id: Uuid,
        request: CreatePlanRequest,
    ) -> Result<PlanResponse, ServiceError> {
        request.validate()?;
        self.validate_against_policy(&request)?;

        // Tax collaborator failure or timeout aborts plan creation; no
        // local retry.
        let tax_amount = match tokio::time::timeout(
            self.policy.tax_timeout(),
            self.tax.compute(request.purchase_amount, &request.jurisdiction),
        )
        .await
        {
            Ok(result) => result?,
            Err(_elapsed) => {
                return Err(ServiceError::TaxServiceError(format!(
                    "tax lookup timed out after {}s",
                    self.policy.tax_timeout_secs
                )))
            }
        };

        let now = Utc::now();
        let plan_id = Uuid::new_v4();
        let currency = request
            .currency
            .unwrap_or_else(|| "USD".to_string())
            .to_ascii_uppercase();
        let grand_total = request.purchase_amount + tax_amount;
        let schedule = build_schedule(grand_total, request.installment_count, request.cadence, now);

        let txn = self.db.begin().await?;

        let plan_active = layaway_plan::ActiveModel {
            id: Set(plan_id),
            plan_number: Set(generate_plan_number(now)),
            customer_id: Set(customer_id),
            total_amount: Set(request.purchase_amount),
            tax_amount: Set(tax_amount),
            currency: Set(currency),
            status: Set(PlanStatus::Pending),
            cadence: Set(request.cadence),
            autopay_enabled: Set(request.autopay_enabled),
            payment_method_token: Set(request.payment_method_token.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            completed_at: Set(None),
        };
        let plan = plan_active.insert(&txn).await?;

        let payment_actives: Vec<layaway_payment::ActiveModel> = schedule
            .iter()
            .enumerate()
            .map(|(k, (amount, due_date))| layaway_payment::ActiveModel {
                id: Set(Uuid::new_v4()),
                plan_id: Set(plan_id),
                sequence_index: Set(k as i32),
                due_date: Set(*due_date),
                amount: Set(*amount),
                status: Set(PaymentStatus::Scheduled),
                payment_method: Set(request.payment_method),
                transaction_id: Set(None),
                attempt_count: Set(0),
                is_autopay: Set(false),
                next_attempt_at: Set(None),
                last_attempt_at: Set(None),
                paid_at: Set(None),
                last_failure_reason: Set(None),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            })
            .collect();
        PaymentEntity::insert_many(payment_actives).exec(&txn).await?;

        txn.commit().await?;

        info!(%plan_id, plan_number = %plan.plan_number, "layaway plan created");
        self.event_sender.emit(LayawayEvent::PlanCreated {
            plan_id,
            customer_id,
            installments: request.installment_count,
        });

        let payments = self.payments_of(plan_id).await?;
        Ok(PlanResponse::from_parts(plan, payments))
    }

    /// Fetches one plan with its ordered schedule.
    pub async fn get_plan(&self, plan_id: Uuid) -> Result<PlanResponse, ServiceError> {
        let plan = self.find_plan(plan_id).await?;
        let payments = self.payments_of(plan_id).await?;
        Ok(PlanResponse::from_parts(plan, payments))
    }

    /// Lists a customer's plans, newest first.
    pub async fn list_plans(&self, customer_id: Uuid) -> Result<Vec<PlanResponse>, ServiceError> {
        let rows = PlanEntity::find()
            .filter(layaway_plan::Column::CustomerId.eq(customer_id))
            .order_by_desc(layaway_plan::Column::CreatedAt)
            .find_with_related(PaymentEntity)
            .all(&*self.db)
            .await?;

        let mut plans: Vec<PlanResponse> = rows
            .into_iter()
            .map(|(plan, payments)| PlanResponse::from_parts(plan, payments))
            .collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    /// Cancels a plan. Permitted only while the plan is `pending` or
    /// `active` and no payment has an in-flight charge; remaining
    /// scheduled payments become `skipped`.
    #[instrument(skip(self))]
    pub async fn cancel_plan(&self, plan_id: Uuid) -> Result<PlanResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let plan = PlanEntity::find_by_id(plan_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("plan {} not found", plan_id)))?;

        if !matches!(plan.status, PlanStatus::Pending | PlanStatus::Active) {
            return Err(ServiceError::InvalidState(format!(
                "plan {} is {} and cannot be cancelled",
                plan_id, plan.status
            )));
        }

        // Never race an in-flight gateway charge; the caller retries
        // after the attempt resolves.
        let in_flight = PaymentEntity::find()
            .filter(layaway_payment::Column::PlanId.eq(plan_id))
            .filter(layaway_payment::Column::Status.eq(PaymentStatus::Attempting))
            .count(&txn)
            .await?;
        if in_flight > 0 {
            return Err(ServiceError::InvalidState(format!(
                "plan {} has a charge attempt in flight; retry after it resolves",
                plan_id
            )));
        }

        let now = Utc::now();
        let skipped = PaymentEntity::update_many()
            .col_expr(
                layaway_payment::Column::Status,
                Expr::value(PaymentStatus::Skipped),
            )
            .col_expr(layaway_payment::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(layaway_payment::Column::PlanId.eq(plan_id))
            .filter(layaway_payment::Column::Status.eq(PaymentStatus::Scheduled))
            .exec(&txn)
            .await?
            .rows_affected;

        let old_status = plan.status;
        let mut plan_active: layaway_plan::ActiveModel = plan.into();
        plan_active.status = Set(PlanStatus::Cancelled);
        plan_active.updated_at = Set(Some(now));
        let plan = plan_active.update(&txn).await?;

        txn.commit().await?;

        info!(%plan_id, skipped, "layaway plan cancelled");
        self.event_sender.emit(LayawayEvent::PlanStatusChanged {
            plan_id,
            old_status,
            new_status: PlanStatus::Cancelled,
        });
        self.event_sender.emit(LayawayEvent::PlanCancelled {
            plan_id,
            skipped_payments: skipped,
        });

        let payments = self.payments_of(plan_id).await?;
        Ok(PlanResponse::from_parts(plan, payments))
    }

    fn validate_against_policy(&self, request: &CreatePlanRequest) -> Result<(), ServiceError> {
        if request.purchase_amount <= 0 {
            return Err(ServiceError::ValidationError(
                "purchase amount must be positive".to_string(),
            ));
        }
        if request.purchase_amount < self.policy.min_order_amount {
            return Err(ServiceError::ValidationError(format!(
                "minimum order for layaway is {} minor units",
                self.policy.min_order_amount
            )));
        }
        if request.purchase_amount > self.policy.max_order_amount {
            return Err(ServiceError::ValidationError(format!(
                "maximum order for layaway is {} minor units",
                self.policy.max_order_amount
            )));
        }
        if request.installment_count == 0
            || request.installment_count > self.policy.max_installments
        {
            return Err(ServiceError::ValidationError(format!(
                "installment count must be between 1 and {}",
                self.policy.max_installments
            )));
        }
        if request.purchase_amount < i64::from(request.installment_count) {
            return Err(ServiceError::ValidationError(
                "purchase amount too small for the requested installment count".to_string(),
            ));
        }
        if request.autopay_enabled && request.payment_method_token.is_none() {
            return Err(ServiceError::ValidationError(
                "autopay requires a payment method on file".to_string(),
            ));
        }
        Ok(())
    }

    async fn find_plan(&self, plan_id: Uuid) -> Result<PlanModel, ServiceError> {
        PlanEntity::find_by_id(plan_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("plan {} not found", plan_id)))
    }

    async fn payments_of(&self, plan_id: Uuid) -> Result<Vec<PaymentModel>, ServiceError> {
        Ok(PaymentEntity::find()
            .filter(layaway_payment::Column::PlanId.eq(plan_id))
            .order_by_asc(layaway_payment::Column::SequenceIndex)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn remainder_lands_on_final_installment() {
        let now = Utc::now();
        let schedule = build_schedule(1_000, 3, Cadence::Weekly, now);
        let amounts: Vec<i64> = schedule.iter().map(|(a, _)| *a).collect();
        assert_eq!(amounts, vec![333, 333, 334]);
    }

    #[test]
    fn single_installment_takes_the_whole_total() {
        let now = Utc::now();
        let schedule = build_schedule(9_999, 1, Cadence::Monthly, now);
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule[0].0, 9_999);
        assert_eq!(schedule[0].1, now);
    }

    #[test]
    fn due_dates_step_by_cadence_and_start_immediately() {
        let now = Utc::now();
        let schedule = build_schedule(40_000, 4, Cadence::Biweekly, now);
        for (k, (_, due)) in schedule.iter().enumerate() {
            assert_eq!(*due, now + chrono::Duration::days(14 * k as i64));
        }
    }

    #[test]
    fn plan_numbers_carry_the_date_stamp() {
        let now = "2026-01-15T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let number = generate_plan_number(now);
        assert!(number.starts_with("LAY-20260115-"));
        assert_eq!(number.len(), "LAY-20260115-".len() + 6);
    }

    proptest! {
        /// Exact-sum invariant: installment amounts always sum to the
        /// grand total, and due dates are strictly increasing.
        #[test]
        fn schedule_sums_exactly_and_is_monotone(
            total in 1_000i64..=1_000_000,
            count in 1u32..=12,
        ) {
            let now = Utc::now();
            let schedule = build_schedule(total, count, Cadence::Weekly, now);

            prop_assert_eq!(schedule.len(), count as usize);
            prop_assert_eq!(schedule.iter().map(|(a, _)| *a).sum::<i64>(), total);
            for pair in schedule.windows(2) {
                prop_assert!(pair[0].1 < pair[1].1);
                // even split never differs by more than the remainder
                prop_assert!((pair[1].0 - pair[0].0).abs() < count as i64);
            }
            for (amount, _) in &schedule {
                prop_assert!(*amount > 0);
            }
        }
    }
}
