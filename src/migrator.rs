use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_create_layaway_plans_table::Migration),
            Box::new(m20260101_000002_create_layaway_payments_table::Migration),
        ]
    }
}

mod m20260101_000001_create_layaway_plans_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000001_create_layaway_plans_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(LayawayPlans::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(LayawayPlans::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LayawayPlans::PlanNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(LayawayPlans::CustomerId).uuid().not_null())
                        .col(
                            ColumnDef::new(LayawayPlans::TotalAmount)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LayawayPlans::TaxAmount)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LayawayPlans::Currency).string().not_null())
                        .col(ColumnDef::new(LayawayPlans::Status).string().not_null())
                        .col(ColumnDef::new(LayawayPlans::Cadence).string().not_null())
                        .col(
                            ColumnDef::new(LayawayPlans::AutopayEnabled)
                                .boolean()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LayawayPlans::PaymentMethodToken).string())
                        .col(
                            ColumnDef::new(LayawayPlans::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LayawayPlans::UpdatedAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(LayawayPlans::CompletedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_layaway_plans_customer_id")
                        .table(LayawayPlans::Table)
                        .col(LayawayPlans::CustomerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_layaway_plans_status")
                        .table(LayawayPlans::Table)
                        .col(LayawayPlans::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(LayawayPlans::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum LayawayPlans {
        Table,
        Id,
        PlanNumber,
        CustomerId,
        TotalAmount,
        TaxAmount,
        Currency,
        Status,
        Cadence,
        AutopayEnabled,
        PaymentMethodToken,
        CreatedAt,
        UpdatedAt,
        CompletedAt,
    }
}

mod m20260101_000002_create_layaway_payments_table {
    use sea_orm_migration::prelude::*;

    use super::m20260101_000001_create_layaway_plans_table::LayawayPlans;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000002_create_layaway_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(LayawayPayments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(LayawayPayments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LayawayPayments::PlanId).uuid().not_null())
                        .col(
                            ColumnDef::new(LayawayPayments::SequenceIndex)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LayawayPayments::DueDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LayawayPayments::Amount)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LayawayPayments::Status).string().not_null())
                        .col(
                            ColumnDef::new(LayawayPayments::PaymentMethod)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LayawayPayments::TransactionId).string())
                        .col(
                            ColumnDef::new(LayawayPayments::AttemptCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(LayawayPayments::IsAutopay)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(LayawayPayments::NextAttemptAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(LayawayPayments::LastAttemptAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(LayawayPayments::PaidAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(LayawayPayments::LastFailureReason).string())
                        .col(
                            ColumnDef::new(LayawayPayments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LayawayPayments::UpdatedAt).timestamp_with_time_zone())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_layaway_payments_plan_id")
                                .from(LayawayPayments::Table, LayawayPayments::PlanId)
                                .to(LayawayPlans::Table, LayawayPlans::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Global transaction-id dedup: a gateway reference may never
            // be shared by two payments.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_layaway_payments_transaction_id")
                        .table(LayawayPayments::Table)
                        .col(LayawayPayments::TransactionId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_layaway_payments_plan_sequence")
                        .table(LayawayPayments::Table)
                        .col(LayawayPayments::PlanId)
                        .col(LayawayPayments::SequenceIndex)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // Covering index for the autopay due-payment scan
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_layaway_payments_status_due")
                        .table(LayawayPayments::Table)
                        .col(LayawayPayments::Status)
                        .col(LayawayPayments::DueDate)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(LayawayPayments::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum LayawayPayments {
        Table,
        Id,
        PlanId,
        SequenceIndex,
        DueDate,
        Amount,
        Status,
        PaymentMethod,
        TransactionId,
        AttemptCount,
        IsAutopay,
        NextAttemptAt,
        LastAttemptAt,
        PaidAt,
        LastFailureReason,
        CreatedAt,
        UpdatedAt,
    }
}
