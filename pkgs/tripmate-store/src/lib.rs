//! TripMate Store - persistent direct messaging for travel companions
//!
//! This crate provides SQLite-based storage for one-to-one conversations using
//! Sea-ORM, with live subscriptions, image attachments and a cached
//! exchange-rate table for trip budgeting.
//!
//! # Architecture
//!
//! - **ChatContext**: database connection, media store, clock and change feed
//!   shared by every store. [`Backend`] opens it lazily on first use.
//! - **ConversationStore**: get-or-create by participant pair, inbox listing,
//!   unread reset, live inbox subscriptions
//! - **MessageStore**: transactional send (message + conversation preview +
//!   unread counters), bounded history, live history subscriptions
//! - **MediaStore**: blob upload returning a download URL
//! - **ExchangeRateService**: live/cached/built-in rate tables and conversion
//!
//! # Database Schema
//!
//! - `conversations`: participant profile snapshot, last-message preview
//! - `conversation_participants`: membership, unread counter, read marker
//! - `messages`: message content, type, media URL, metadata
//! - `exchange_rates`: cached rate table per base currency
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use tripmate_store::{Backend, MessageDraft, StoreConfig, TargetUser};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Backend::new(StoreConfig {
//!     db_path: "tripmate.db".into(),
//!     ..Default::default()
//! });
//!
//! let conversations = backend.conversations().await?;
//! let bob = TargetUser::new("u2").with_display_name("Bob");
//! let conversation_id = conversations.get_or_create_conversation("u1", &bob).await?;
//!
//! let messages = backend.messages().await?;
//! messages
//!     .send_message(&conversation_id, "u1", MessageDraft::text("See you at the station"))
//!     .await?;
//!
//! let _inbox = conversations
//!     .listen_to_conversations("u2", |list| println!("{} conversations", list.len()))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod changes;
pub mod clock;
pub mod context;
pub mod conversation_store;
pub mod entities;
pub mod error;
pub mod exchange_rates;
pub mod identity;
pub mod media_store;
pub mod message_store;
pub mod migration;
pub mod models;

pub use changes::{ChangeEvent, ChangeFeed, Subscription};
pub use clock::{Clock, ServerClock};
pub use context::{Backend, ChatContext};
pub use conversation_store::ConversationStore;
pub use error::{ChatError, Result};
pub use exchange_rates::{
    fallback_rates, ExchangeRateService, HttpRateSource, RateOrigin, RateSource, RateTable,
    BASE_CURRENCY,
};
pub use identity::{derive_conversation_id, CONVERSATION_ID_SEPARATOR};
pub use media_store::{LocalMediaStore, MediaStore};
pub use message_store::MessageStore;
pub use models::{
    Conversation, ConversationKind, ImageAttachment, LastMessage, Message, MessageDraft,
    MessageKind, ParticipantDetails, TargetUser, IMAGE_PREVIEW_TEXT,
};

use serde::{Deserialize, Serialize};

/// Configuration for the store layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,

    /// Directory uploaded media is written to
    pub media_root: std::path::PathBuf,

    /// Public base URL for uploaded media; `file://` URLs when unset
    pub media_base_url: Option<String>,

    /// Number of most recent messages returned by history reads (default: 100)
    pub message_history_limit: u64,

    /// Buffered change events per listener before it must resync (default: 256)
    pub change_feed_capacity: usize,

    /// Rate endpoint, `{base}` is replaced by the base currency. Offline when unset.
    pub exchange_rate_endpoint: Option<String>,

    /// Age in seconds after which cached rates are refreshed (default: 12h)
    pub exchange_rate_ttl_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("tripmate.db"),
            media_root: std::path::PathBuf::from("tripmate-media"),
            media_base_url: None,
            message_history_limit: 100,
            change_feed_capacity: 256,
            exchange_rate_endpoint: Some("https://open.er-api.com/v6/latest/{base}".to_string()),
            exchange_rate_ttl_seconds: 12 * 3600,
        }
    }
}
