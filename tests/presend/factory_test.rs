//! Tests for the provisional message factory: context validation, draft
//! construction, upload wiring, and wire payload flattening.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use chat_delivery::bus::{EventKind, LifecycleEvent};
use chat_delivery::error::ChatError;
use chat_delivery::presend::{FactoryProps, PresendEventsManager, PresendMessageFactory};
use chat_delivery::types::{
    ContentType, FileMeta, FilePayload, FileUploadResult, ImagePayload, MergedSendOptions,
    SendOptions, UploadResult,
};

fn make_factory(manager: &Arc<PresendEventsManager>) -> PresendMessageFactory {
    PresendMessageFactory::new(
        FactoryProps {
            bot_id: Some("bot-1".to_owned()),
            conversation_id: "conv-1".to_owned(),
            sender_id: Some("user-1".to_owned()),
            bot_version: None,
            draft_mode: Some(false),
        },
        Arc::clone(manager),
    )
    .expect("factory construction")
}

/// Wait for the next upload status change, with a deadline so a broken
/// emission fails the test instead of hanging it.
async fn next_upload_event(manager: &Arc<PresendEventsManager>) -> chat_delivery::types::Message {
    let (tx, mut rx) = mpsc::channel(1);
    let sub = manager.on(EventKind::FileUploadStatusChange, move |event| {
        if let LifecycleEvent::FileUploadStatusChange(message) = event {
            let _ = tx.try_send(message.clone());
        }
    });
    let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("upload event within deadline")
        .expect("event payload");
    manager.off(sub);
    message
}

#[test]
fn missing_conversation_id_is_rejected() {
    let manager = Arc::new(PresendEventsManager::new());
    let result = PresendMessageFactory::new(
        FactoryProps::default(),
        Arc::clone(&manager),
    );
    assert!(matches!(result, Err(ChatError::MissingConversationId)));
}

#[tokio::test]
async fn text_message_gets_fresh_id_and_is_stashed() {
    let manager = Arc::new(PresendEventsManager::new());
    let factory = make_factory(&manager);

    let first = factory.create_text_message("hello", vec![]);
    let second = factory.create_text_message("world", vec![]);

    assert_eq!(first.content_type, ContentType::Text);
    assert_eq!(first.content, "hello");
    assert_eq!(first.conversation_id, "conv-1");
    assert!(!first.local_message_id().is_empty());
    assert_ne!(first.local_message_id(), second.local_message_id());
    assert!(manager
        .get_stashed_local_message(first.local_message_id())
        .is_some());
}

#[tokio::test]
async fn image_upload_success_patches_content_and_emits() {
    let manager = Arc::new(PresendEventsManager::new());
    let factory = make_factory(&manager);
    let (tx, rx) = oneshot::channel();

    let file = FileMeta {
        name: "photo.png".to_owned(),
        size: 2048,
        preview_url: "blob:local-preview".to_owned(),
    };
    let draft = factory.create_image_message(&file, rx, vec![]);
    assert_eq!(draft.content_type, ContentType::Image);
    assert!(draft.content.contains("blob:local-preview"));
    assert!(draft.file_upload_result.is_none());

    tx.send(Ok(UploadResult {
        uri: "asset-key".to_owned(),
        url: "https://cdn.example/photo.png".to_owned(),
        width: 640,
        height: 480,
    }))
    .expect("uploader send");

    let updated = next_upload_event(&manager).await;
    assert_eq!(updated.local_message_id(), draft.local_message_id());
    assert_eq!(updated.file_upload_result, Some(FileUploadResult::Success));

    let payload: ImagePayload = serde_json::from_str(&updated.content).expect("image content");
    let image = payload.image_list.first().expect("one image");
    assert_eq!(image.key, "asset-key");
    assert_eq!(image.image_ori.url, "https://cdn.example/photo.png");
    assert_eq!(image.image_ori.width, 640);

    // The stash reflects the patched draft.
    let stashed = manager
        .get_stashed_local_message(draft.local_message_id())
        .expect("stashed message");
    assert_eq!(stashed.file_upload_result, Some(FileUploadResult::Success));
}

#[tokio::test]
async fn image_upload_error_stamps_failure() {
    let manager = Arc::new(PresendEventsManager::new());
    let factory = make_factory(&manager);
    let (tx, rx) = oneshot::channel();

    let file = FileMeta {
        name: "photo.png".to_owned(),
        size: 2048,
        preview_url: "blob:local-preview".to_owned(),
    };
    factory.create_image_message(&file, rx, vec![]);
    tx.send(Err("quota exceeded".to_owned()))
        .expect("uploader send");

    let updated = next_upload_event(&manager).await;
    assert_eq!(updated.file_upload_result, Some(FileUploadResult::Failure));
}

#[tokio::test]
async fn dropped_uploader_counts_as_failure() {
    let manager = Arc::new(PresendEventsManager::new());
    let factory = make_factory(&manager);
    let (tx, rx) = oneshot::channel::<Result<UploadResult, String>>();

    let file = FileMeta {
        name: "notes.txt".to_owned(),
        size: 16,
        preview_url: String::new(),
    };
    factory
        .create_file_message(&file, rx, vec![])
        .expect("file draft");
    drop(tx);

    let updated = next_upload_event(&manager).await;
    assert_eq!(updated.file_upload_result, Some(FileUploadResult::Failure));
}

#[tokio::test]
async fn file_upload_success_fills_key_and_url() {
    let manager = Arc::new(PresendEventsManager::new());
    let factory = make_factory(&manager);
    let (tx, rx) = oneshot::channel();

    let file = FileMeta {
        name: "report.pdf".to_owned(),
        size: 4096,
        preview_url: String::new(),
    };
    let draft = factory
        .create_file_message(&file, rx, vec![])
        .expect("file draft");
    assert_eq!(draft.content_type, ContentType::File);

    tx.send(Ok(UploadResult {
        uri: "file-key".to_owned(),
        url: "https://cdn.example/report.pdf".to_owned(),
        ..UploadResult::default()
    }))
    .expect("uploader send");

    let updated = next_upload_event(&manager).await;
    let payload: FilePayload = serde_json::from_str(&updated.content).expect("file content");
    let item = payload.file_list.first().expect("one file");
    assert_eq!(item.file_key, "file-key");
    assert_eq!(item.file_url, "https://cdn.example/report.pdf");
    assert_eq!(item.file_name, "report.pdf");
    assert_eq!(item.file_type, "pdf");
}

#[tokio::test]
async fn unsupported_file_type_is_rejected() {
    let manager = Arc::new(PresendEventsManager::new());
    let factory = make_factory(&manager);
    let (_tx, rx) = oneshot::channel();

    let file = FileMeta {
        name: "weird.xyz".to_owned(),
        size: 1,
        preview_url: String::new(),
    };
    let result = factory.create_file_message(&file, rx, vec![]);
    assert!(matches!(
        result,
        Err(ChatError::UnsupportedFileType { name }) if name == "weird.xyz"
    ));
    assert_eq!(manager.stashed_count(), 0);
}

#[tokio::test]
async fn wire_payload_flattens_draft_and_options() {
    let manager = Arc::new(PresendEventsManager::new());
    let factory = make_factory(&manager);

    let mut message = factory.create_text_message("hello", vec!["user-2".to_owned()]);
    message.message_id = "server-7".to_owned();

    let options = SendOptions {
        chat_history: Some(vec![serde_json::json!({"role": "user", "content": "hi"})]),
        is_regen_message: true,
        ..SendOptions::default()
    };
    let payload = factory.send_message_structure(&message, &options.merge_defaults());

    assert_eq!(payload.conversation_id, "conv-1");
    assert_eq!(payload.local_message_id, message.local_message_id());
    assert_eq!(payload.query, "hello");
    assert!(payload.stream);
    assert_eq!(payload.regen_message_id.as_deref(), Some("server-7"));
    assert_eq!(payload.chat_history.len(), 1);
    assert_eq!(payload.mention_list, vec!["user-2".to_owned()]);
}

#[tokio::test]
async fn wire_payload_omits_empty_optionals() {
    let manager = Arc::new(PresendEventsManager::new());
    let factory = PresendMessageFactory::new(
        FactoryProps {
            conversation_id: "conv-1".to_owned(),
            ..FactoryProps::default()
        },
        Arc::clone(&manager),
    )
    .expect("factory construction");

    let message = factory.create_text_message("hello", vec![]);
    let payload = factory.send_message_structure(&message, &MergedSendOptions::default());

    let json = serde_json::to_value(&payload).expect("payload serializes");
    let object = json.as_object().expect("payload object");
    assert!(!object.contains_key("bot_id"));
    assert!(!object.contains_key("bot_version"));
    assert!(!object.contains_key("regen_message_id"));
    assert!(!object.contains_key("chat_history"));
    assert!(!object.contains_key("mention_list"));
}
