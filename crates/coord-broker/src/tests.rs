//! End-to-end scenarios against [`coord_core::kv::MemoryStore`]
//! (SPEC_FULL.md §8 "Testable properties"). No test in this module talks
//! to a real Redis instance.

use std::sync::Arc;
use std::time::Duration;

use coord_core::kv::MemoryStore;
use coord_core::types::{MessageQuery, MessageType, BROADCAST_TARGET};
use coord_core::Config;

use crate::BrokerClient;

fn client(identity: &str) -> BrokerClient {
    BrokerClient::new(Arc::new(MemoryStore::default()), Config::default(), identity)
}

fn shared(store: Arc<MemoryStore>, identity: &str) -> BrokerClient {
    BrokerClient::new(store, Config::default(), identity)
}

#[tokio::test]
async fn publish_then_query_round_trips() {
    let store = Arc::new(MemoryStore::default());
    let backend = shared(store.clone(), "backend");

    let published = backend
        .publish(
            MessageType::ReadyForReview,
            "subject",
            "description",
            "backend",
            "frontend",
            true,
        )
        .await
        .unwrap();

    let fetched = backend.get(&published.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, published.id);
    assert_eq!(fetched.payload.subject, "subject");
    assert!(!fetched.acknowledged);

    let results = backend
        .query(&MessageQuery {
            to_instance: Some("frontend".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, published.id);
}

#[tokio::test]
async fn acknowledge_is_idempotent() {
    let store = Arc::new(MemoryStore::default());
    let backend = shared(store.clone(), "backend");
    let msg = backend
        .publish(MessageType::General, "s", "d", "backend", "frontend", true)
        .await
        .unwrap();

    let first = backend.acknowledge(&msg.id, "frontend", Some("looks good")).await.unwrap();
    let second = backend.acknowledge(&msg.id, "frontend", None).await.unwrap();
    assert!(first);
    assert!(second);

    let fetched = backend.get(&msg.id).await.unwrap().unwrap();
    assert!(fetched.acknowledged);
    assert_eq!(fetched.ack_by.as_deref(), Some("frontend"));

    let pending = backend
        .query(&MessageQuery {
            pending_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(pending.iter().all(|m| m.id != msg.id));
}

#[tokio::test]
async fn acknowledge_unknown_id_returns_false() {
    let backend = client("backend");
    assert!(!backend.acknowledge("msg-00000000", "frontend", None).await.unwrap());
}

#[tokio::test]
async fn publish_rejects_sender_identity_mismatch() {
    let backend = client("backend");
    let result = backend
        .publish(MessageType::General, "s", "d", "someone-else", "frontend", false)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn presence_is_stale_at_exactly_the_threshold() {
    let store = Arc::new(MemoryStore::default());
    let backend = shared(store.clone(), "backend");
    backend.register("backend", Some("session-1")).await.unwrap();

    // A zero-duration staleness window means "stale the instant it's read".
    let presence = backend.get_presence(Duration::from_secs(0)).await.unwrap();
    let record = presence.get("backend").unwrap();
    assert!(record.stale, "boundary staleness must count as stale, not live");
    assert!(!record.active);
}

#[tokio::test]
async fn heartbeat_keeps_presence_active_within_window() {
    let store = Arc::new(MemoryStore::default());
    let backend = shared(store.clone(), "backend");
    backend.register("backend", None).await.unwrap();
    backend.heartbeat("backend").await.unwrap();

    let presence = backend.get_presence(Duration::from_secs(300)).await.unwrap();
    let record = presence.get("backend").unwrap();
    assert!(!record.stale);
    assert!(record.active);
}

#[tokio::test]
async fn unregister_removes_instance_from_active_broadcast_targets() {
    let store = Arc::new(MemoryStore::default());
    let backend = shared(store.clone(), "backend");
    let frontend = shared(store.clone(), "frontend");
    backend.register("backend", None).await.unwrap();
    frontend.register("frontend", None).await.unwrap();
    frontend.unregister("frontend").await.unwrap();

    let msg = backend
        .publish(MessageType::General, "s", "d", "backend", BROADCAST_TARGET, false)
        .await
        .unwrap();

    let backend_inbox = backend
        .query(&MessageQuery {
            to_instance: Some("backend".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let frontend_inbox = backend
        .query(&MessageQuery {
            to_instance: Some("frontend".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(backend_inbox.iter().any(|m| m.id == msg.id));
    assert!(frontend_inbox.iter().all(|m| m.id != msg.id));
}

#[tokio::test]
async fn offline_notifications_are_queued_and_popped_in_order() {
    let store = Arc::new(MemoryStore::default());
    let backend = shared(store.clone(), "backend");

    backend
        .publish(MessageType::General, "first", "d", "backend", "frontend", false)
        .await
        .unwrap();
    backend
        .publish(MessageType::General, "second", "d", "backend", "frontend", false)
        .await
        .unwrap();

    let events = backend.pop_notifications("frontend", 10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].message_id, events[0].message_id);
    assert_eq!(events[0].event, "message_published");

    let drained = backend.pop_notifications("frontend", 10).await.unwrap();
    assert!(drained.is_empty());
}

#[tokio::test]
async fn stats_reflects_published_and_pending_messages() {
    let store = Arc::new(MemoryStore::default());
    let backend = shared(store.clone(), "backend");
    backend.register("backend", None).await.unwrap();
    backend
        .publish(MessageType::Heartbeat, "s", "d", "backend", "frontend", false)
        .await
        .unwrap();
    backend
        .publish(MessageType::BlockingIssue, "s", "d", "backend", "frontend", true)
        .await
        .unwrap();

    let stats = backend.stats().await.unwrap();
    assert_eq!(stats.total_messages, 2);
    assert_eq!(stats.pending_messages, 1);
    assert_eq!(stats.messages_by_type.get("HEARTBEAT"), Some(&1));
    assert_eq!(stats.messages_by_type.get("BLOCKING_ISSUE"), Some(&1));
}

#[tokio::test]
async fn pending_only_excludes_messages_that_never_required_ack() {
    let store = Arc::new(MemoryStore::default());
    let backend = shared(store.clone(), "backend");
    let no_ack = backend
        .publish(MessageType::General, "s", "d", "backend", "frontend", false)
        .await
        .unwrap();
    let needs_ack = backend
        .publish(MessageType::General, "s", "d", "backend", "frontend", true)
        .await
        .unwrap();

    let pending = backend
        .query(&MessageQuery {
            to_instance: Some("frontend".to_string()),
            pending_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(pending.iter().all(|m| m.id != no_ack.id), "requires_ack=false must never appear as pending");
    assert!(pending.iter().any(|m| m.id == needs_ack.id));
}

#[tokio::test]
async fn query_filters_by_sender_and_type() {
    let store = Arc::new(MemoryStore::default());
    let backend = shared(store.clone(), "backend");
    let reviewer = shared(store.clone(), "reviewer");
    backend
        .publish(MessageType::ReadyForReview, "s", "d", "backend", "reviewer", false)
        .await
        .unwrap();
    reviewer
        .publish(MessageType::ReviewComplete, "s", "d", "reviewer", "backend", false)
        .await
        .unwrap();

    let from_backend = backend
        .query(&MessageQuery {
            from_instance: Some("backend".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(from_backend.len(), 1);
    assert_eq!(from_backend[0].msg_type, MessageType::ReadyForReview);

    let review_complete = backend
        .query(&MessageQuery {
            msg_type: Some(MessageType::ReviewComplete),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(review_complete.len(), 1);
    assert_eq!(review_complete[0].from_instance, "reviewer");
}
