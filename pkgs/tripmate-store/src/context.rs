//! Shared store context and the lazily initialised backend handle

use std::sync::Arc;

use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tokio::sync::OnceCell;
use tracing::info;

use crate::changes::ChangeFeed;
use crate::clock::{Clock, ServerClock};
use crate::conversation_store::ConversationStore;
use crate::error::{ChatError, Result};
use crate::exchange_rates::{ExchangeRateService, HttpRateSource};
use crate::media_store::{LocalMediaStore, MediaStore};
use crate::message_store::MessageStore;
use crate::StoreConfig;

/// Everything the stores share: database, media storage, clock and change feed
pub struct ChatContext {
    db: DatabaseConnection,
    media: Arc<dyn MediaStore>,
    clock: Arc<dyn Clock>,
    changes: ChangeFeed,
    config: StoreConfig,
}

impl ChatContext {
    /// Connect to the database, run migrations and prepare the media root
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let db_path_str = config
            .db_path
            .to_str()
            .ok_or_else(|| ChatError::invalid("database path is not valid UTF-8"))?
            .replace('\\', "/");
        let db_url = format!("sqlite:{}?mode=rwc", db_path_str);

        let db = Database::connect(db_url.as_str()).await?;
        crate::migration::Migrator::up(&db, None).await?;

        tokio::fs::create_dir_all(&config.media_root).await?;
        let mut media = LocalMediaStore::new(config.media_root.clone());
        if let Some(base_url) = &config.media_base_url {
            media = media.with_public_base_url(base_url.clone());
        }

        info!(
            "Chat context initialized at {} (media: {})",
            config.db_path.display(),
            config.media_root.display()
        );

        Ok(Self::from_parts(
            db,
            Arc::new(media),
            Arc::new(ServerClock::new()),
            config,
        ))
    }

    /// Assemble a context from already constructed parts. Migrations are not run.
    pub fn from_parts(
        db: DatabaseConnection,
        media: Arc<dyn MediaStore>,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
    ) -> Self {
        let changes = ChangeFeed::new(config.change_feed_capacity);
        Self {
            db,
            media,
            clock,
            changes,
            config,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn media(&self) -> &Arc<dyn MediaStore> {
        &self.media
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }
}

/// Handle that opens the [`ChatContext`] on first use and shares it afterwards
pub struct Backend {
    config: StoreConfig,
    context: OnceCell<Arc<ChatContext>>,
}

impl Backend {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            context: OnceCell::new(),
        }
    }

    /// Wrap an already opened context
    pub fn with_context(context: Arc<ChatContext>) -> Self {
        Self {
            config: context.config().clone(),
            context: OnceCell::new_with(Some(context)),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context.initialized()
    }

    /// The shared context; opened exactly once even under concurrent first use
    pub async fn context(&self) -> Result<Arc<ChatContext>> {
        let context = self
            .context
            .get_or_try_init(|| async {
                ChatContext::open(self.config.clone()).await.map(Arc::new)
            })
            .await?;
        Ok(context.clone())
    }

    pub async fn conversations(&self) -> Result<ConversationStore> {
        Ok(ConversationStore::new(self.context().await?))
    }

    pub async fn messages(&self) -> Result<MessageStore> {
        Ok(MessageStore::new(self.context().await?))
    }

    /// Exchange-rate service; without a configured endpoint it never goes online
    pub async fn exchange_rates(&self) -> Result<ExchangeRateService> {
        let context = self.context().await?;
        let service = match &context.config().exchange_rate_endpoint {
            Some(endpoint) => ExchangeRateService::new(
                context.clone(),
                Arc::new(HttpRateSource::new(endpoint.clone())?),
            ),
            None => ExchangeRateService::offline(context.clone()),
        };
        Ok(service)
    }
}
