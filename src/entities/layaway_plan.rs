use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Plan lifecycle states. `Completed`, `Cancelled` and `Defaulted` are
/// terminal; transitions are forward-only and always derived from the
/// statuses of the plan's payments (see `services::ledger`).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlanStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "defaulted")]
    Defaulted,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Defaulted)
    }
}

/// Fixed installment interval.
///
/// "Monthly" is a fixed 30-day interval rather than calendar-month
/// arithmetic so that due dates stay strictly monotone regardless of
/// month length.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Cadence {
    #[sea_orm(string_value = "weekly")]
    Weekly,
    #[sea_orm(string_value = "biweekly")]
    Biweekly,
    #[sea_orm(string_value = "monthly")]
    Monthly,
}

impl Cadence {
    pub fn interval(&self) -> Duration {
        match self {
            Cadence::Weekly => Duration::days(7),
            Cadence::Biweekly => Duration::days(14),
            Cadence::Monthly => Duration::days(30),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "layaway_plans")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-facing reference, e.g. `LAY-20260115-9GX2QA`
    pub plan_number: String,

    pub customer_id: Uuid,

    /// Purchase amount before tax, in minor currency units
    pub total_amount: i64,

    /// Sales tax, in minor currency units
    pub tax_amount: i64,

    /// ISO 4217 currency code
    pub currency: String,

    pub status: PlanStatus,
    pub cadence: Cadence,

    pub autopay_enabled: bool,

    /// Gateway token for the instrument charged by autopay
    pub payment_method_token: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Model {
    /// The amount every payment of this plan must sum to, exact to the
    /// minor unit.
    pub fn grand_total(&self) -> i64 {
        self.total_amount + self.tax_amount
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::layaway_payment::Entity")]
    LayawayPayment,
}

impl Related<super::layaway_payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LayawayPayment.def()
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
