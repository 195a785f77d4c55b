//! Message store - sending and reading the messages of a conversation

use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::changes::{listen, ChangeEvent, Subscription};
use crate::clock::from_millis;
use crate::context::ChatContext;
use crate::conversation_store::{load_participants, missing_or_foreign};
use crate::entities::{conversation_participants, conversations, messages};
use crate::error::{ChatError, Result};
use crate::identity::require_id;
use crate::media_store::sanitize_file_name;
use crate::models::{Message, MessageDraft, MessageKind};

/// Message store
#[derive(Clone)]
pub struct MessageStore {
    ctx: Arc<ChatContext>,
}

impl MessageStore {
    pub fn new(ctx: Arc<ChatContext>) -> Self {
        Self { ctx }
    }

    /// Send a message to a conversation.
    ///
    /// Returns `Ok(None)` without touching storage when the draft carries no
    /// text, no image and no typed metadata. Otherwise the image (if any) is
    /// uploaded first, then the message insert, the conversation preview and
    /// the unread counters of the other participants are committed together.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        draft: MessageDraft,
    ) -> Result<Option<Message>> {
        if draft.is_empty() {
            debug!("Ignoring empty message for '{}'", conversation_id);
            return Ok(None);
        }
        require_id(conversation_id, "conversation id")?;
        require_id(sender_id, "sender id")?;

        let participants = load_participants(self.ctx.db(), conversation_id).await?;
        ensure_member(self.ctx.db(), conversation_id, sender_id, &participants).await?;

        let mut kind = MessageKind::Text;
        let mut media_url = None;
        if let Some(image) = &draft.image {
            let object_path = format!(
                "chats/{}/{}_{}",
                conversation_id,
                self.ctx.now_millis(),
                sanitize_file_name(&image.file_name)
            );
            let url = self
                .ctx
                .media()
                .upload(&object_path, image.bytes.clone(), &image.content_type)
                .await?;
            media_url = Some(url);
            kind = MessageKind::Image;
        }
        if let Some(requested) = draft.metadata_kind() {
            kind = MessageKind::parse(requested);
        }

        let metadata = draft.metadata.unwrap_or_default();
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text: draft.text.unwrap_or_default(),
            kind,
            media_url,
            metadata,
            created_at: self.ctx.clock().now(),
            read_by: vec![sender_id.to_string()],
        };
        let created_at = message.created_at.timestamp_millis();

        let row = messages::ActiveModel {
            id: Set(message.id.clone()),
            conversation_id: Set(message.conversation_id.clone()),
            sender_id: Set(message.sender_id.clone()),
            text: Set(message.text.clone()),
            kind: Set(message.kind.as_str().to_string()),
            media_url: Set(message.media_url.clone()),
            metadata_json: Set(if message.metadata.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&message.metadata)?)
            }),
            read_by_json: Set(serde_json::to_string(&message.read_by)?),
            created_at: Set(created_at),
        };

        let txn = self.ctx.db().begin().await?;
        // Membership may have changed while the image was uploading
        let participants = load_participants(&txn, conversation_id).await?;
        ensure_member(&txn, conversation_id, sender_id, &participants).await?;

        messages::Entity::insert(row)
            .exec_without_returning(&txn)
            .await?;
        conversations::Entity::update_many()
            .col_expr(
                conversations::Column::LastMessageText,
                Expr::value(message.preview_text()),
            )
            .col_expr(
                conversations::Column::LastMessageSenderId,
                Expr::value(message.sender_id.clone()),
            )
            .col_expr(conversations::Column::LastMessageAt, Expr::value(created_at))
            .col_expr(conversations::Column::LastMessageRead, Expr::value(false))
            .col_expr(conversations::Column::UpdatedAt, Expr::value(created_at))
            .filter(conversations::Column::Id.eq(conversation_id))
            .exec(&txn)
            .await?;
        conversation_participants::Entity::update_many()
            .col_expr(
                conversation_participants::Column::UnreadCount,
                Expr::col(conversation_participants::Column::UnreadCount).add(1),
            )
            .filter(conversation_participants::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participants::Column::UserId.ne(sender_id))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(
            "{} sent {} message {} to '{}'",
            sender_id, message.kind, message.id, conversation_id
        );
        let changes = self.ctx.changes();
        changes.publish(ChangeEvent::Message {
            conversation_id: conversation_id.to_string(),
            message_id: message.id.clone(),
        });
        changes.publish(ChangeEvent::Conversation {
            conversation_id: conversation_id.to_string(),
            participants: participants.into_iter().map(|p| p.user_id).collect(),
        });

        Ok(Some(message))
    }

    /// The most recent messages of a conversation, oldest first
    pub async fn recent_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        require_id(conversation_id, "conversation id")?;
        fetch_recent(
            self.ctx.db(),
            conversation_id,
            self.ctx.config().message_history_limit,
        )
        .await
    }

    /// Deliver the recent history now and again after every new message
    pub async fn listen_to_messages<F>(&self, conversation_id: &str, callback: F) -> Result<Subscription>
    where
        F: FnMut(Vec<Message>) + Send + 'static,
    {
        let conversation_id = require_id(conversation_id, "conversation id")?.to_string();
        let receiver = self.ctx.changes().subscribe();

        let watched = conversation_id.clone();
        let ctx = self.ctx.clone();
        listen(
            format!("messages:{}", conversation_id),
            receiver,
            move |event| {
                matches!(event, ChangeEvent::Message { conversation_id, .. } if *conversation_id == watched)
            },
            move || {
                let ctx = ctx.clone();
                let conversation_id = conversation_id.clone();
                async move {
                    let limit = ctx.config().message_history_limit;
                    fetch_recent(ctx.db(), &conversation_id, limit).await
                }
            },
            callback,
        )
        .await
    }
}

async fn ensure_member<C: ConnectionTrait>(
    db: &C,
    conversation_id: &str,
    sender_id: &str,
    participants: &[conversation_participants::Model],
) -> Result<()> {
    if participants.is_empty() {
        return Err(missing_or_foreign(db, conversation_id, sender_id).await?);
    }
    if !participants.iter().any(|p| p.user_id == sender_id) {
        return Err(ChatError::NotParticipant {
            conversation_id: conversation_id.to_string(),
            user_id: sender_id.to_string(),
        });
    }
    Ok(())
}

async fn fetch_recent<C: ConnectionTrait>(
    db: &C,
    conversation_id: &str,
    limit: u64,
) -> Result<Vec<Message>> {
    let mut rows = messages::Entity::find()
        .filter(messages::Column::ConversationId.eq(conversation_id))
        .order_by_desc(messages::Column::CreatedAt)
        .order_by_desc(messages::Column::Id)
        .limit(limit)
        .all(db)
        .await?;
    rows.reverse();
    rows.into_iter().map(to_message).collect()
}

fn to_message(model: messages::Model) -> Result<Message> {
    let metadata = match model.metadata_json.as_deref() {
        Some(json) => serde_json::from_str::<Map<String, Value>>(json)?,
        None => Map::new(),
    };
    Ok(Message {
        read_by: serde_json::from_str(&model.read_by_json)?,
        kind: MessageKind::parse(&model.kind),
        created_at: from_millis(model.created_at),
        id: model.id,
        conversation_id: model.conversation_id,
        sender_id: model.sender_id,
        text: model.text,
        media_url: model.media_url,
        metadata,
    })
}
