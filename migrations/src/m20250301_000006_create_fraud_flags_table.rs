use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FraudFlags::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FraudFlags::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FraudFlags::IntakeId).uuid().not_null())
                    .col(ColumnDef::new(FraudFlags::PatientId).uuid().not_null())
                    .col(ColumnDef::new(FraudFlags::FlagKind).string().not_null())
                    .col(
                        ColumnDef::new(FraudFlags::Score)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(FraudFlags::Detail).text().null())
                    .col(ColumnDef::new(FraudFlags::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_fraud_flags_intake_id")
                    .table(FraudFlags::Table)
                    .col(FraudFlags::IntakeId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FraudFlags::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum FraudFlags {
    Table,
    Id,
    IntakeId,
    PatientId,
    FlagKind,
    Score,
    Detail,
    CreatedAt,
}
