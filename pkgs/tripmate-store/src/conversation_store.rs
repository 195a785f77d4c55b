//! Conversation store - direct conversations, their previews and unread state

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::*;
use tracing::{debug, info};

use crate::changes::{listen, ChangeEvent, Subscription};
use crate::clock::from_millis;
use crate::context::ChatContext;
use crate::entities::{conversation_participants, conversations};
use crate::error::{ChatError, Result};
use crate::identity::{derive_conversation_id, require_id};
use crate::models::{Conversation, ConversationKind, LastMessage, ParticipantDetails, TargetUser};

/// Conversation store
#[derive(Clone)]
pub struct ConversationStore {
    ctx: Arc<ChatContext>,
}

impl ConversationStore {
    pub fn new(ctx: Arc<ChatContext>) -> Self {
        Self { ctx }
    }

    /// Return the id of the conversation between `current_user_id` and `target`,
    /// creating it on first contact.
    ///
    /// An existing conversation is returned untouched; the target's profile
    /// snapshot is only written at creation.
    pub async fn get_or_create_conversation(
        &self,
        current_user_id: &str,
        target: &TargetUser,
    ) -> Result<String> {
        let id = derive_conversation_id(current_user_id, &target.uid)?;

        let txn = self.ctx.db().begin().await?;
        if conversations::Entity::find_by_id(id.clone())
            .one(&txn)
            .await?
            .is_some()
        {
            txn.commit().await?;
            debug!("Conversation '{}' already exists", id);
            return Ok(id);
        }

        let now = self.ctx.now_millis();
        let mut details = BTreeMap::new();
        details.insert(target.uid.clone(), target.details());

        let conversation = conversations::ActiveModel {
            id: Set(id.clone()),
            kind: Set(ConversationKind::Direct.as_str().to_string()),
            participant_details_json: Set(serde_json::to_string(&details)?),
            last_message_text: Set(None),
            last_message_sender_id: Set(None),
            last_message_at: Set(None),
            last_message_read: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let participants = [current_user_id, target.uid.as_str()];
        let members = participants
            .iter()
            .enumerate()
            .map(|(position, user_id)| conversation_participants::ActiveModel {
                conversation_id: Set(id.clone()),
                user_id: Set((*user_id).to_owned()),
                position: Set(position as i32),
                unread_count: Set(0),
                last_read_at: Set(None),
            });

        let inserted = async {
            conversations::Entity::insert(conversation)
                .exec_without_returning(&txn)
                .await?;
            conversation_participants::Entity::insert_many(members)
                .exec_without_returning(&txn)
                .await?;
            Ok::<_, DbErr>(())
        }
        .await;

        match inserted {
            Ok(()) => txn.commit().await?,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                // Lost a race against another creator of the same pair
                txn.rollback().await?;
                debug!("Conversation '{}' was created concurrently", id);
                return Ok(id);
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Created conversation '{}' between {} and {}",
            id, current_user_id, target.uid
        );
        self.ctx.changes().publish(ChangeEvent::Conversation {
            conversation_id: id.clone(),
            participants: participants.iter().map(|p| (*p).to_owned()).collect(),
        });

        Ok(id)
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        load_conversation(self.ctx.db(), conversation_id).await
    }

    /// Conversations `user_id` participates in, most recently updated first
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        require_id(user_id, "user id")?;
        list_for_user(self.ctx.db(), user_id).await
    }

    /// Deliver the user's conversation list now and again after every change
    /// to one of their conversations.
    pub async fn listen_to_conversations<F>(&self, user_id: &str, callback: F) -> Result<Subscription>
    where
        F: FnMut(Vec<Conversation>) + Send + 'static,
    {
        let user_id = require_id(user_id, "user id")?.to_string();
        let receiver = self.ctx.changes().subscribe();

        let watched = user_id.clone();
        let ctx = self.ctx.clone();
        listen(
            format!("conversations:{}", user_id),
            receiver,
            move |event| match event {
                ChangeEvent::Conversation { participants, .. } => participants.contains(&watched),
                ChangeEvent::Message { .. } => false,
            },
            move || {
                let ctx = ctx.clone();
                let user_id = user_id.clone();
                async move { list_for_user(ctx.db(), &user_id).await }
            },
            callback,
        )
        .await
    }

    /// Reset the user's unread counter and stamp their read marker
    pub async fn mark_conversation_as_read(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        require_id(conversation_id, "conversation id")?;
        require_id(user_id, "user id")?;

        let txn = self.ctx.db().begin().await?;
        let participants = load_participants(&txn, conversation_id).await?;
        if participants.is_empty() {
            return Err(missing_or_foreign(&txn, conversation_id, user_id).await?);
        }
        if !participants.iter().any(|p| p.user_id == user_id) {
            return Err(ChatError::NotParticipant {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        let now = self.ctx.now_millis();
        conversation_participants::Entity::update_many()
            .col_expr(conversation_participants::Column::UnreadCount, Expr::value(0i64))
            .col_expr(conversation_participants::Column::LastReadAt, Expr::value(now))
            .filter(conversation_participants::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participants::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        debug!("{} read conversation '{}'", user_id, conversation_id);
        self.ctx.changes().publish(ChangeEvent::Conversation {
            conversation_id: conversation_id.to_string(),
            participants: participants.into_iter().map(|p| p.user_id).collect(),
        });
        Ok(())
    }
}

/// Participant rows of a conversation in creation order
pub(crate) async fn load_participants<C: ConnectionTrait>(
    db: &C,
    conversation_id: &str,
) -> Result<Vec<conversation_participants::Model>> {
    let rows = conversation_participants::Entity::find()
        .filter(conversation_participants::Column::ConversationId.eq(conversation_id))
        .order_by_asc(conversation_participants::Column::Position)
        .all(db)
        .await?;
    Ok(rows)
}

/// Error for a conversation without a matching participant row
pub(crate) async fn missing_or_foreign<C: ConnectionTrait>(
    db: &C,
    conversation_id: &str,
    user_id: &str,
) -> Result<ChatError> {
    let exists = conversations::Entity::find_by_id(conversation_id.to_string())
        .one(db)
        .await?
        .is_some();
    Ok(if exists {
        ChatError::NotParticipant {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
        }
    } else {
        ChatError::ConversationNotFound(conversation_id.to_string())
    })
}

pub(crate) async fn load_conversation<C: ConnectionTrait>(
    db: &C,
    conversation_id: &str,
) -> Result<Option<Conversation>> {
    let Some(model) = conversations::Entity::find_by_id(conversation_id.to_string())
        .one(db)
        .await?
    else {
        return Ok(None);
    };
    let participants = load_participants(db, conversation_id).await?;
    to_conversation(model, participants).map(Some)
}

async fn list_for_user<C: ConnectionTrait>(db: &C, user_id: &str) -> Result<Vec<Conversation>> {
    let ids: Vec<String> = conversation_participants::Entity::find()
        .filter(conversation_participants::Column::UserId.eq(user_id))
        .all(db)
        .await?
        .into_iter()
        .map(|row| row.conversation_id)
        .collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let models = conversations::Entity::find()
        .filter(conversations::Column::Id.is_in(ids.clone()))
        .order_by_desc(conversations::Column::UpdatedAt)
        .order_by_asc(conversations::Column::Id)
        .all(db)
        .await?;

    let mut members: HashMap<String, Vec<conversation_participants::Model>> = HashMap::new();
    for row in conversation_participants::Entity::find()
        .filter(conversation_participants::Column::ConversationId.is_in(ids))
        .order_by_asc(conversation_participants::Column::Position)
        .all(db)
        .await?
    {
        members.entry(row.conversation_id.clone()).or_default().push(row);
    }

    models
        .into_iter()
        .map(|model| {
            let participants = members.remove(&model.id).unwrap_or_default();
            to_conversation(model, participants)
        })
        .collect()
}

fn to_conversation(
    model: conversations::Model,
    participants: Vec<conversation_participants::Model>,
) -> Result<Conversation> {
    let kind = ConversationKind::parse(&model.kind).ok_or_else(|| {
        ChatError::invalid(format!(
            "conversation '{}' has unknown type '{}'",
            model.id, model.kind
        ))
    })?;
    let participant_details: BTreeMap<String, ParticipantDetails> =
        serde_json::from_str(&model.participant_details_json)?;

    let last_message = match (
        model.last_message_text,
        model.last_message_sender_id,
        model.last_message_at,
    ) {
        (Some(text), Some(sender_id), Some(at)) => Some(LastMessage {
            text,
            sender_id,
            timestamp: from_millis(at),
            read: model.last_message_read.unwrap_or(false),
        }),
        _ => None,
    };

    let mut unread_counts = BTreeMap::new();
    let mut last_read = BTreeMap::new();
    let mut ids = Vec::with_capacity(participants.len());
    for participant in participants {
        unread_counts.insert(participant.user_id.clone(), participant.unread_count);
        if let Some(at) = participant.last_read_at {
            last_read.insert(participant.user_id.clone(), from_millis(at));
        }
        ids.push(participant.user_id);
    }

    Ok(Conversation {
        id: model.id,
        kind,
        participants: ids,
        participant_details,
        last_message,
        unread_counts,
        last_read,
        created_at: from_millis(model.created_at),
        updated_at: from_millis(model.updated_at),
    })
}
