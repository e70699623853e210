use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Payments::IntakeId).uuid().not_null())
                    .col(
                        ColumnDef::new(Payments::GatewayPaymentRef)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Payments::Status)
                            .string()
                            .not_null()
                            .default("paid"),
                    )
                    .col(
                        ColumnDef::new(Payments::AmountCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Payments::RefundStatus)
                            .string()
                            .not_null()
                            .default("none"),
                    )
                    .col(
                        ColumnDef::new(Payments::RefundAmountCents)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(Payments::GatewayRefundRef).string().null())
                    .col(ColumnDef::new(Payments::RefundReason).text().null())
                    .col(ColumnDef::new(Payments::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Payments::UpdatedAt).timestamp().null())
                    .to_owned(),
            )
            .await?;

        // Refund path lookup: one paid payment per intake.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_payments_intake_id_status")
                    .table(Payments::Table)
                    .col(Payments::IntakeId)
                    .col(Payments::Status)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Payments {
    Table,
    Id,
    IntakeId,
    GatewayPaymentRef,
    Status,
    AmountCents,
    RefundStatus,
    RefundAmountCents,
    GatewayRefundRef,
    RefundReason,
    CreatedAt,
    UpdatedAt,
}
