use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Installment lifecycle states.
///
/// `Attempting` marks an in-flight charge; the transition
/// `Scheduled -> Attempting` is a conditional update, so at most one
/// worker ever holds it for a given payment. `Paid`, `Failed` and
/// `Skipped` are terminal and may only be written by the ledger's
/// recorder.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "attempting")]
    Attempting,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "skipped")]
    Skipped,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Failed | Self::Skipped)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "paypal")]
    Paypal,
    /// Buy-now-pay-later provider
    #[sea_orm(string_value = "bnpl")]
    Bnpl,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "layaway_payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub plan_id: Uuid,

    /// 0-based position in the schedule; defines due-date order
    pub sequence_index: i32,

    pub due_date: DateTime<Utc>,

    /// Installment amount, in minor currency units
    pub amount: i64,

    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,

    /// Gateway transaction reference. Write-once: never overwritten and
    /// never shared with another payment (unique index).
    #[sea_orm(unique)]
    pub transaction_id: Option<String>,

    pub attempt_count: i32,
    pub is_autopay: bool,

    /// Earliest time the next charge attempt may run (retry backoff)
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,

    /// Failure reason from the most recent attempt, retained after the
    /// retry budget is exhausted
    pub last_failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::layaway_plan::Entity",
        from = "Column::PlanId",
        to = "super::layaway_plan::Column::Id"
    )]
    LayawayPlan,
}

impl Related<super::layaway_plan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LayawayPlan.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.updated_at {
            active_model.updated_at = Set(Some(Utc::now()));
        }
        Ok(active_model)
    }
}
