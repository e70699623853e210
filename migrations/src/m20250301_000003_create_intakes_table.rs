use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Intakes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Intakes::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Intakes::PatientId).uuid().not_null())
                    .col(ColumnDef::new(Intakes::ServiceId).uuid().not_null())
                    .col(ColumnDef::new(Intakes::Category).string().not_null())
                    .col(ColumnDef::new(Intakes::Subtype).string().not_null())
                    .col(
                        ColumnDef::new(Intakes::Status)
                            .string()
                            .not_null()
                            .default("pending_payment"),
                    )
                    .col(
                        ColumnDef::new(Intakes::PaymentStatus)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Intakes::AmountCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Intakes::IdempotencyKey)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Intakes::PaymentSessionRef).string().null())
                    .col(ColumnDef::new(Intakes::CheckoutUrl).string().null())
                    .col(ColumnDef::new(Intakes::CheckoutError).text().null())
                    .col(ColumnDef::new(Intakes::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Intakes::UpdatedAt).timestamp().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_intakes_patient_id")
                    .table(Intakes::Table)
                    .col(Intakes::PatientId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_intakes_status")
                    .table(Intakes::Table)
                    .col(Intakes::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Intakes::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Intakes {
    Table,
    Id,
    PatientId,
    ServiceId,
    Category,
    Subtype,
    Status,
    PaymentStatus,
    AmountCents,
    IdempotencyKey,
    PaymentSessionRef,
    CheckoutUrl,
    CheckoutError,
    CreatedAt,
    UpdatedAt,
}
