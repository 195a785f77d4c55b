// Copyright 2025 TripMate Team.
//
// Tests for MessageStore

mod common;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tripmate_store::{
    ChatError, ConversationStore, ImageAttachment, MessageDraft, MessageKind, MessageStore,
    TargetUser, IMAGE_PREVIEW_TEXT,
};

async fn setup(dir: &std::path::Path) -> (ConversationStore, MessageStore, String) {
    let ctx = common::open_context(dir).await;
    let conversations = ConversationStore::new(ctx.clone());
    let messages = MessageStore::new(ctx);
    let id = conversations
        .get_or_create_conversation("u1", &TargetUser::new("u2").with_display_name("Bob"))
        .await
        .expect("Failed to create conversation");
    (conversations, messages, id)
}

#[tokio::test]
async fn test_send_text_message() {
    let dir = tempfile::tempdir().unwrap();
    let (conversations, messages, id) = setup(dir.path()).await;

    let sent = messages
        .send_message(&id, "u1", MessageDraft::text("hi"))
        .await
        .expect("Failed to send message")
        .expect("Message was not written");
    assert_eq!(sent.kind, MessageKind::Text);
    assert_eq!(sent.text, "hi");
    assert_eq!(sent.sender_id, "u1");
    assert_eq!(sent.read_by, vec!["u1"]);
    assert!(sent.media_url.is_none());

    let history = messages.recent_messages(&id).await.unwrap();
    assert_eq!(history, vec![sent.clone()]);

    let conversation = conversations.get_conversation(&id).await.unwrap().unwrap();
    let preview = conversation.last_message.clone().expect("Missing preview");
    assert_eq!(preview.text, "hi");
    assert_eq!(preview.sender_id, "u1");
    assert!(!preview.read);
    assert_eq!(preview.timestamp, sent.created_at);
    assert_eq!(conversation.updated_at, sent.created_at);
    assert_eq!(conversation.unread_for("u2"), 1);
    assert_eq!(conversation.unread_for("u1"), 0);
}

#[tokio::test]
async fn test_send_image_message() {
    let dir = tempfile::tempdir().unwrap();
    let (conversations, messages, id) = setup(dir.path()).await;

    let image = ImageAttachment::new("sunset.png", vec![0x89u8, b'P', b'N', b'G']);
    let sent = messages
        .send_message(&id, "u1", MessageDraft::image(image))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent.kind, MessageKind::Image);
    assert_eq!(sent.text, "");

    let url = sent.media_url.clone().expect("Missing media URL");
    assert!(url.starts_with("file://"));
    assert!(url.contains("chats/u1_u2/"));
    assert!(url.ends_with("_sunset.png"));

    let uploaded: Vec<_> = std::fs::read_dir(dir.path().join("media/chats/u1_u2"))
        .unwrap()
        .collect();
    assert_eq!(uploaded.len(), 1);

    let conversation = conversations.get_conversation(&id).await.unwrap().unwrap();
    assert_eq!(
        conversation.last_message.as_ref().unwrap().text,
        IMAGE_PREVIEW_TEXT
    );

    let document = serde_json::to_value(&sent).unwrap();
    assert_eq!(document["type"], json!("image"));
    assert_eq!(document["mediaUrl"], json!(url));
}

#[tokio::test]
async fn test_image_caption_is_used_as_preview() {
    let dir = tempfile::tempdir().unwrap();
    let (conversations, messages, id) = setup(dir.path()).await;

    let draft = MessageDraft::text("Look at this view")
        .with_image(ImageAttachment::new("view.jpg", vec![1u8, 2, 3]));
    let sent = messages.send_message(&id, "u2", draft).await.unwrap().unwrap();
    assert_eq!(sent.kind, MessageKind::Image);
    assert_eq!(sent.text, "Look at this view");

    let conversation = conversations.get_conversation(&id).await.unwrap().unwrap();
    assert_eq!(
        conversation.last_message.as_ref().unwrap().text,
        "Look at this view"
    );
    assert_eq!(conversation.unread_for("u1"), 1);
}

#[tokio::test]
async fn test_empty_message_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let (conversations, messages, id) = setup(dir.path()).await;
    let before = conversations.get_conversation(&id).await.unwrap().unwrap();

    for draft in [
        MessageDraft::default(),
        MessageDraft::text(""),
        MessageDraft::text("   "),
    ] {
        let result = messages.send_message(&id, "u1", draft).await.unwrap();
        assert!(result.is_none());
    }

    // The guard runs before any lookup
    let result = messages
        .send_message("no_such", "u1", MessageDraft::text(""))
        .await
        .unwrap();
    assert!(result.is_none());

    assert!(messages.recent_messages(&id).await.unwrap().is_empty());
    let after = conversations.get_conversation(&id).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_metadata_type_overrides_kind() {
    let dir = tempfile::tempdir().unwrap();
    let (conversations, messages, id) = setup(dir.path()).await;

    let metadata = json!({"type": "location", "lat": 25.0478, "lng": 121.5170})
        .as_object()
        .cloned()
        .unwrap();
    let sent = messages
        .send_message(&id, "u1", MessageDraft::default().with_metadata(metadata.clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent.kind, MessageKind::Custom("location".into()));
    assert_eq!(sent.metadata, metadata);

    let stored = messages.recent_messages(&id).await.unwrap();
    assert_eq!(stored[0].metadata["lat"], json!(25.0478));
    assert_eq!(stored[0].kind, MessageKind::Custom("location".into()));

    let conversation = conversations.get_conversation(&id).await.unwrap().unwrap();
    let preview = conversation.last_message.as_ref().expect("Missing preview");
    assert_eq!(preview.text, "");
    assert_eq!(preview.sender_id, "u1");
}

#[tokio::test]
async fn test_history_is_bounded_and_ascending() {
    let dir = tempfile::tempdir().unwrap();
    let (_, messages, id) = setup(dir.path()).await;

    for i in 0..105 {
        let sender = if i % 2 == 0 { "u1" } else { "u2" };
        messages
            .send_message(&id, sender, MessageDraft::text(format!("m{}", i)))
            .await
            .unwrap();
    }

    let history = messages.recent_messages(&id).await.unwrap();
    assert_eq!(history.len(), 100);
    assert_eq!(history.first().unwrap().text, "m5");
    assert_eq!(history.last().unwrap().text, "m104");
    assert!(history
        .windows(2)
        .all(|pair| pair[0].created_at < pair[1].created_at));
}

#[tokio::test]
async fn test_sender_must_belong_to_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let (conversations, messages, id) = setup(dir.path()).await;

    let result = messages
        .send_message(&id, "u3", MessageDraft::text("let me in"))
        .await;
    assert!(matches!(result, Err(ChatError::NotParticipant { .. })));

    let result = messages
        .send_message("u1_u9", "u1", MessageDraft::text("hello?"))
        .await;
    assert!(matches!(result, Err(ChatError::ConversationNotFound(_))));

    assert!(messages.recent_messages(&id).await.unwrap().is_empty());
    let conversation = conversations.get_conversation(&id).await.unwrap().unwrap();
    assert!(conversation.last_message.is_none());
    assert_eq!(conversation.unread_for("u2"), 0);
}

#[tokio::test]
async fn test_failed_upload_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = common::context_with_media(dir.path(), Arc::new(common::FailingMediaStore)).await;
    let conversations = ConversationStore::new(ctx.clone());
    let messages = MessageStore::new(ctx);
    let id = conversations
        .get_or_create_conversation("u1", &TargetUser::new("u2"))
        .await
        .unwrap();

    let draft = MessageDraft::text("caption").with_image(ImageAttachment::new("a.png", vec![0u8]));
    let result = messages.send_message(&id, "u1", draft).await;
    assert!(matches!(result, Err(ChatError::Media(_))));

    assert!(messages.recent_messages(&id).await.unwrap().is_empty());
    let conversation = conversations.get_conversation(&id).await.unwrap().unwrap();
    assert!(conversation.last_message.is_none());
    assert_eq!(conversation.unread_for("u2"), 0);
}

#[tokio::test]
async fn test_injected_media_store_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = common::context_with_media(dir.path(), common::local_media(dir.path())).await;
    let conversations = ConversationStore::new(ctx.clone());
    let messages = MessageStore::new(ctx);
    let id = conversations
        .get_or_create_conversation("u2", &TargetUser::new("u1"))
        .await
        .unwrap();

    let sent = messages
        .send_message(&id, "u2", MessageDraft::image(ImageAttachment::new("../x.png", vec![7u8])))
        .await
        .unwrap()
        .unwrap();
    let url = sent.media_url.unwrap();
    assert!(url.ends_with("_x.png"));
    assert!(!url.contains(".."));
}

#[tokio::test]
async fn test_listen_to_messages() {
    let dir = tempfile::tempdir().unwrap();
    let (conversations, messages, id) = setup(dir.path()).await;

    let other = conversations
        .get_or_create_conversation("u1", &TargetUser::new("u3"))
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = messages
        .listen_to_messages(&id, move |history| {
            let _ = tx.send(history);
        })
        .await
        .expect("Failed to subscribe");
    assert!(common::next(&mut rx).await.is_empty());

    messages
        .send_message(&id, "u1", MessageDraft::text("first"))
        .await
        .unwrap();
    let history = common::next(&mut rx).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "first");

    messages
        .send_message(&other, "u1", MessageDraft::text("elsewhere"))
        .await
        .unwrap();
    common::assert_quiet(&mut rx).await;

    messages
        .send_message(&id, "u2", MessageDraft::text("second"))
        .await
        .unwrap();
    let history = common::next(&mut rx).await;
    let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);

    drop(subscription);
    messages
        .send_message(&id, "u1", MessageDraft::text("third"))
        .await
        .unwrap();
    common::assert_quiet(&mut rx).await;
}
