use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Conversations {
    Table,
    Id,
    Kind,
    ParticipantDetailsJson,
    LastMessageText,
    LastMessageSenderId,
    LastMessageAt,
    LastMessageRead,
    CreatedAt,
    UpdatedAt,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000001_create_conversations_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Conversations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Conversations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Conversations::Kind)
                            .string()
                            .not_null()
                            .default("direct"),
                    )
                    .col(
                        ColumnDef::new(Conversations::ParticipantDetailsJson)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Conversations::LastMessageText).text())
                    .col(ColumnDef::new(Conversations::LastMessageSenderId).string())
                    .col(ColumnDef::new(Conversations::LastMessageAt).big_integer())
                    .col(ColumnDef::new(Conversations::LastMessageRead).boolean())
                    .col(
                        ColumnDef::new(Conversations::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversations::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_conversations_updated_at")
                    .table(Conversations::Table)
                    .col(Conversations::UpdatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Conversations::Table).to_owned())
            .await
    }
}
