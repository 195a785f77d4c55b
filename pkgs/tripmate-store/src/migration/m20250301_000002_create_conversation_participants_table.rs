use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum ConversationParticipants {
    Table,
    ConversationId,
    UserId,
    Position,
    UnreadCount,
    LastReadAt,
}

#[derive(DeriveIden)]
enum Conversations {
    Table,
    Id,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000002_create_conversation_participants_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConversationParticipants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConversationParticipants::ConversationId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipants::UserId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipants::Position)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipants::UnreadCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ConversationParticipants::LastReadAt).big_integer())
                    .primary_key(
                        Index::create()
                            .col(ConversationParticipants::ConversationId)
                            .col(ConversationParticipants::UserId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_participants_conversation")
                            .from(
                                ConversationParticipants::Table,
                                ConversationParticipants::ConversationId,
                            )
                            .to(Conversations::Table, Conversations::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_participants_user")
                    .table(ConversationParticipants::Table)
                    .col(ConversationParticipants::UserId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(ConversationParticipants::Table)
                    .to_owned(),
            )
            .await
    }
}
