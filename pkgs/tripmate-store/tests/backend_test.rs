// Copyright 2025 TripMate Team.
//
// Tests for the lazily initialised Backend handle

mod common;

use std::sync::Arc;

use tripmate_store::{Backend, MessageDraft, RateOrigin, TargetUser};

#[tokio::test]
async fn test_context_opens_lazily_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::test_config(dir.path());
    let db_path = config.db_path.clone();
    let backend = Arc::new(Backend::new(config));

    assert!(!backend.is_initialized());
    assert!(!db_path.exists());

    let (a, b) = tokio::join!(backend.context(), backend.context());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert!(backend.is_initialized());
    assert!(db_path.exists());

    let c = backend.context().await.unwrap();
    assert!(Arc::ptr_eq(&a, &c));
}

#[tokio::test]
async fn test_stores_share_one_context() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Backend::new(common::test_config(dir.path()));

    let conversations = backend.conversations().await.unwrap();
    let messages = backend.messages().await.unwrap();

    let id = conversations
        .get_or_create_conversation("u1", &TargetUser::new("u2"))
        .await
        .unwrap();
    messages
        .send_message(&id, "u2", MessageDraft::text("hello"))
        .await
        .unwrap();

    let inbox = conversations.list_conversations("u1").await.unwrap();
    assert_eq!(inbox[0].last_message.as_ref().unwrap().text, "hello");
    assert_eq!(inbox[0].unread_for("u1"), 1);

    // No endpoint configured, so rates come from the built-in table
    let rates = backend.exchange_rates().await.unwrap();
    assert_eq!(rates.rates("TWD").await.unwrap().origin, RateOrigin::Fallback);
}

#[tokio::test]
async fn test_backend_reports_open_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(dir.path());
    // Media root under a regular file cannot be created
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    config.media_root = blocker.join("media");

    let backend = Backend::new(config);
    assert!(backend.conversations().await.is_err());
    assert!(!backend.is_initialized());
}
