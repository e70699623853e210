use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IntakeAnswers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IntakeAnswers::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntakeAnswers::IntakeId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(IntakeAnswers::Payload).json().not_null())
                    .col(
                        ColumnDef::new(IntakeAnswers::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IntakeAnswers::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum IntakeAnswers {
    Table,
    Id,
    IntakeId,
    Payload,
    CreatedAt,
}
