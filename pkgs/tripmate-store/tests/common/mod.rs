// Copyright 2025 TripMate Team.
//
// Shared fixtures for the store integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tripmate_store::{
    ChatContext, ChatError, LocalMediaStore, MediaStore, ServerClock, StoreConfig,
};

pub fn test_config(dir: &Path) -> StoreConfig {
    StoreConfig {
        db_path: dir.join("tripmate.db"),
        media_root: dir.join("media"),
        exchange_rate_endpoint: None,
        ..Default::default()
    }
}

pub async fn create_test_db(path: &Path) -> sea_orm::DatabaseConnection {
    let db = sea_orm::Database::connect(&format!(
        "sqlite:{}?mode=rwc",
        path.to_str().unwrap().replace("\\", "/")
    ))
    .await
    .expect("Failed to connect to database");

    <tripmate_store::migration::Migrator as tripmate_store::migration::MigratorTrait>::up(
        &db, None,
    )
    .await
    .expect("Failed to run migrations");

    db
}

/// Context over a fresh database in `dir`
pub async fn open_context(dir: &Path) -> Arc<ChatContext> {
    Arc::new(
        ChatContext::open(test_config(dir))
            .await
            .expect("Failed to open chat context"),
    )
}

/// Context whose media uploads go through `media`
pub async fn context_with_media(dir: &Path, media: Arc<dyn MediaStore>) -> Arc<ChatContext> {
    let config = test_config(dir);
    let db = create_test_db(&config.db_path).await;
    Arc::new(ChatContext::from_parts(
        db,
        media,
        Arc::new(ServerClock::new()),
        config,
    ))
}

pub fn local_media(dir: &Path) -> Arc<dyn MediaStore> {
    Arc::new(LocalMediaStore::new(dir.join("media")))
}

/// Media store that rejects every upload
pub struct FailingMediaStore;

#[async_trait]
impl MediaStore for FailingMediaStore {
    async fn upload(&self, object_path: &str, _data: Bytes, _content_type: &str) -> tripmate_store::Result<String> {
        Err(ChatError::Media(format!("upload of {} refused", object_path)))
    }
}

/// Wait for the next callback delivery
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for subscription update")
        .expect("Subscription channel closed")
}

/// Assert that nothing is delivered for a short while
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(value)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected subscription update: {:?}", value);
    }
}
