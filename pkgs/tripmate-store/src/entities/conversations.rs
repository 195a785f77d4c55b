//! Conversation entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String, // sorted participant ids joined with '_'
    pub kind: String,                     // "direct"
    pub participant_details_json: String, // uid -> {displayName, photoURL}
    pub last_message_text: Option<String>,
    pub last_message_sender_id: Option<String>,
    pub last_message_at: Option<i64>,
    pub last_message_read: Option<bool>,
    pub created_at: i64,
    pub updated_at: i64, // For sorting chats
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::conversation_participants::Entity")]
    Participants,
    #[sea_orm(has_many = "super::messages::Entity")]
    Messages,
}

impl Related<super::conversation_participants::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Participants.def()
    }
}

impl Related<super::messages::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Messages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
