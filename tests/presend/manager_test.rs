//! Tests for the pre-send events manager: snapshot freshness, status
//! stamping, and removal semantics.

use std::sync::{Arc, Mutex};

use chat_delivery::bus::{EventKind, LifecycleEvent};
use chat_delivery::error::SendFailure;
use chat_delivery::presend::PresendEventsManager;
use chat_delivery::types::{FileUploadResult, Message, MessageStatus};

fn draft(local_message_id: &str) -> Message {
    let mut message = Message::default();
    message.extra_info.local_message_id = local_message_id.to_owned();
    message
}

#[test]
fn add_then_read_round_trips() {
    let manager = PresendEventsManager::new();
    manager.add(draft("123"));

    let stashed = manager
        .get_stashed_local_message("123")
        .expect("stashed message");
    assert_eq!(stashed.local_message_id(), "123");
    assert_eq!(manager.stashed_count(), 1);
    assert!(manager.get_stashed_local_message("999").is_none());
}

#[test]
fn emit_updates_snapshot_before_returning() {
    let manager = PresendEventsManager::new();
    manager.add(draft("123"));

    let mut updated = draft("123");
    updated.content = "patched".to_owned();
    updated.file_upload_result = Some(FileUploadResult::Success);

    // No listener registered: the snapshot must still reflect the event.
    manager.emit(LifecycleEvent::FileUploadStatusChange(updated));

    let stashed = manager
        .get_stashed_local_message("123")
        .expect("stashed message");
    assert_eq!(stashed.content, "patched");
    assert_eq!(stashed.file_upload_result, Some(FileUploadResult::Success));
}

#[test]
fn snapshot_is_fresh_inside_listener() {
    let manager = Arc::new(PresendEventsManager::new());
    manager.add(draft("123"));

    let observed = Arc::new(Mutex::new(None));
    let inner_manager = Arc::clone(&manager);
    let inner_observed = Arc::clone(&observed);
    manager.on(EventKind::FileUploadStatusChange, move |_| {
        let stashed = inner_manager.get_stashed_local_message("123");
        if let Ok(mut slot) = inner_observed.lock() {
            *slot = stashed.and_then(|m| m.file_upload_result);
        }
    });

    let mut updated = draft("123");
    updated.file_upload_result = Some(FileUploadResult::Failure);
    manager.emit(LifecycleEvent::FileUploadStatusChange(updated));

    assert_eq!(
        *observed.lock().expect("observed lock"),
        Some(FileUploadResult::Failure)
    );
}

#[test]
fn terminal_events_stamp_status() {
    let manager = PresendEventsManager::new();
    manager.add(draft("a"));
    manager.add(draft("b"));
    manager.add(draft("c"));

    manager.emit(LifecycleEvent::MessageSendSuccess(draft("a")));
    manager.emit(LifecycleEvent::MessageSendFail(SendFailure::for_message(
        "send failed",
        "b",
    )));
    manager.emit(LifecycleEvent::MessageSendTimeout(
        SendFailure::for_message("message send timed out", "c"),
    ));

    let status = |id: &str| {
        manager
            .get_stashed_local_message(id)
            .map(|m| m.status)
            .expect("stashed message")
    };
    assert_eq!(status("a"), MessageStatus::SendSuccess);
    assert_eq!(status("b"), MessageStatus::SendFail);
    assert_eq!(status("c"), MessageStatus::SendTimeout);
}

#[test]
fn uncorrelated_failure_leaves_stash_untouched() {
    let manager = PresendEventsManager::new();
    manager.add(draft("123"));

    manager.emit(LifecycleEvent::MessageSendFail(SendFailure {
        message: "connection dropped".to_owned(),
        ext: chat_delivery::error::ErrorExt::default(),
    }));

    let stashed = manager
        .get_stashed_local_message("123")
        .expect("stashed message");
    assert_eq!(stashed.status, MessageStatus::Available);
}

#[test]
fn remove_consumes_the_snapshot() {
    let manager = PresendEventsManager::new();
    manager.add(draft("123"));

    let removed = manager.remove_local_message("123");
    assert!(removed.is_some());
    assert_eq!(manager.stashed_count(), 0);
    assert!(manager.remove_local_message("123").is_none());
}

#[test]
fn subscriptions_route_through_manager() {
    let manager = PresendEventsManager::new();
    let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let seen = Arc::clone(&count);
    let sub = manager.on(EventKind::MessageSendSuccess, move |_| {
        seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    assert_eq!(manager.listener_count(EventKind::MessageSendSuccess), 1);

    manager.emit(LifecycleEvent::MessageSendSuccess(draft("123")));
    manager.off(sub);
    manager.emit(LifecycleEvent::MessageSendSuccess(draft("123")));

    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(manager.listener_count(EventKind::MessageSendSuccess), 0);
}
