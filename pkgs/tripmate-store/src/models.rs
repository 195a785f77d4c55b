//! Data model shared by the conversation and message stores

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Placeholder shown as the conversation preview for an image without caption
pub const IMAGE_PREVIEW_TEXT: &str = "[圖片]";

/// Conversation type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(ConversationKind::Direct),
            _ => None,
        }
    }
}

/// Profile snapshot of a participant, as shown in conversation lists
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDetails {
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

/// The user a conversation is opened with
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetUser {
    pub uid: String,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl TargetUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    pub(crate) fn details(&self) -> ParticipantDetails {
        ParticipantDetails {
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
        }
    }
}

/// Denormalized preview of the latest message of a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// Direct conversation between two users
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub participants: Vec<String>,
    pub participant_details: BTreeMap<String, ParticipantDetails>,
    pub last_message: Option<LastMessage>,
    pub unread_counts: BTreeMap<String, i64>,
    pub last_read: BTreeMap<String, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The participant that is not `user_id`
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.as_str() != user_id)
            .map(String::as_str)
    }

    pub fn unread_for(&self, user_id: &str) -> i64 {
        self.unread_counts.get(user_id).copied().unwrap_or(0)
    }
}

/// Message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    /// Metadata-driven types such as `location`
    Custom(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Custom(kind) => kind,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            other => MessageKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(MessageKind::parse(&value))
    }
}

/// Stored chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub read_by: Vec<String>,
}

impl Message {
    /// Text used for the conversation preview
    pub fn preview_text(&self) -> String {
        if !self.text.trim().is_empty() {
            return self.text.clone();
        }
        match &self.kind {
            MessageKind::Image => IMAGE_PREVIEW_TEXT.to_string(),
            MessageKind::Text | MessageKind::Custom(_) => String::new(),
        }
    }
}

/// Binary image attached to an outgoing message
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl ImageAttachment {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        let content_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string();
        Self {
            file_name,
            content_type,
            bytes: bytes.into(),
        }
    }

    /// Read an image from disk, guessing its MIME type from the extension
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image")
            .to_string();
        Ok(Self::new(file_name, data))
    }
}

/// Outgoing message before it is written to the store
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub text: Option<String>,
    pub image: Option<ImageAttachment>,
    pub metadata: Option<Map<String, Value>>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn image(image: ImageAttachment) -> Self {
        Self {
            image: Some(image),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Type requested through metadata, e.g. `{"type": "location"}`
    pub fn metadata_kind(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("type"))
            .and_then(Value::as_str)
            .filter(|kind| !kind.is_empty())
    }

    /// A draft with no text, no image and no typed payload writes nothing
    pub fn is_empty(&self) -> bool {
        let has_text = self
            .text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        !has_text && self.image.is_none() && self.metadata_kind().is_none()
    }
}
