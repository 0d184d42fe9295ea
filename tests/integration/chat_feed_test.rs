//! Integration tests for the chat feed.

use std::sync::Arc;

use fitsync::chat::{ChatEvent, ChatFeedStore, ChatPhase};
use fitsync::gateway::memory::GatewayOp;
use fitsync::gateway::{Collection, Gateway, InMemoryGateway, RowId};
use fitsync::StoreError;
use serde_json::json;

use crate::support::{next_event, seed_message, settings};

fn chat_store() -> (Arc<InMemoryGateway>, ChatFeedStore<InMemoryGateway>) {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = ChatFeedStore::new(Arc::clone(&gateway), &settings());
    (gateway, store)
}

fn ids(store: &ChatFeedStore<InMemoryGateway>) -> Vec<i64> {
    store.messages().iter().map(|m| m.id).collect()
}

#[tokio::test]
async fn test_page_then_live_append_order() {
    let (gateway, store) = chat_store();
    seed_message(&gateway, "ana", "first");
    seed_message(&gateway, "ben", "second");

    store.fetch_messages().await.unwrap();
    assert_eq!(ids(&store), vec![1, 2]);
    assert_eq!(store.phase(), ChatPhase::LivePending);

    let mut events = store.events();
    store.subscribe_to_messages().await.unwrap();
    gateway
        .push_insert(
            Collection::Messages,
            json!({"user_id": "id-cy", "username": "cy", "message": "third"}),
        )
        .unwrap();

    match next_event(&mut events).await {
        ChatEvent::Appended(message) => assert_eq!(message.message, "third"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(ids(&store), vec![1, 2, 3]);
    assert_eq!(store.phase(), ChatPhase::Live);
}

#[tokio::test]
async fn test_fetch_keeps_most_recent_page_ascending() {
    let (gateway, store) = chat_store();
    for i in 0..105 {
        seed_message(&gateway, "ana", &format!("message {}", i));
    }

    let page = store.fetch_messages().await.unwrap();

    assert_eq!(page.len(), 100);
    assert_eq!(page.first().map(|m| m.id), Some(6));
    assert_eq!(page.last().map(|m| m.id), Some(105));
    assert!(page.windows(2).all(|pair| pair[0].created_at < pair[1].created_at));
}

#[tokio::test]
async fn test_fetch_replaces_cache() {
    let (gateway, store) = chat_store();
    seed_message(&gateway, "ana", "one");
    store.fetch_messages().await.unwrap();
    assert_eq!(ids(&store), vec![1]);

    gateway
        .delete(Collection::Messages, &RowId::from(1))
        .await
        .unwrap();
    seed_message(&gateway, "ben", "two");
    seed_message(&gateway, "cy", "three");
    let page = store.fetch_messages().await.unwrap();

    assert_eq!(ids(&store), vec![2, 3]);
    assert_eq!(store.messages(), page);
}

#[tokio::test]
async fn test_live_inserts_only_extend_the_feed() {
    let (gateway, store) = chat_store();
    seed_message(&gateway, "ana", "first");
    seed_message(&gateway, "ben", "second");
    let prefix = store.fetch_messages().await.unwrap();

    let mut events = store.events();
    store.subscribe_to_messages().await.unwrap();
    let pushed = 12;
    for i in 0..pushed {
        gateway
            .push_insert(
                Collection::Messages,
                json!({"user_id": "id-cy", "username": "cy", "message": format!("live {}", i)}),
            )
            .unwrap();
    }
    for _ in 0..pushed {
        match next_event(&mut events).await {
            ChatEvent::Appended(_) => {}
            other => panic!("unexpected event {:?}", other),
        }
    }

    let after = store.messages();
    assert_eq!(after.len(), prefix.len() + pushed);
    assert_eq!(after[..prefix.len()], prefix[..]);
    let live: Vec<&str> = after[prefix.len()..]
        .iter()
        .map(|m| m.message.as_str())
        .collect();
    assert_eq!(live.first(), Some(&"live 0"));
    assert_eq!(live.last(), Some(&"live 11"));
}

#[tokio::test]
async fn test_send_does_not_append_locally() {
    let (gateway, store) = chat_store();
    store.fetch_messages().await.unwrap();

    store.send_message("id-ana", "ana", "hello").await.unwrap();

    assert!(store.messages().is_empty());
    let rows = gateway.rows(Collection::Messages);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["username"], "ana");
}

#[tokio::test]
async fn test_sent_message_arrives_through_subscription() {
    let (_gateway, store) = chat_store();
    let mut events = store.events();
    store.subscribe_to_messages().await.unwrap();

    store.send_message("id-ana", "ana", "  on my way  ").await.unwrap();

    match next_event(&mut events).await {
        ChatEvent::Appended(message) => assert_eq!(message.message, "on my way"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(store.messages().len(), 1);
}

#[tokio::test]
async fn test_rejected_send() {
    let (gateway, store) = chat_store();
    gateway.fail_next(GatewayOp::Insert);

    let result = store.send_message("id-ana", "ana", "hello").await;

    assert!(matches!(result, Err(StoreError::Send(_))));
    assert!(store.messages().is_empty());
    assert!(store.error().is_some());
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let (gateway, store) = chat_store();
    store.subscribe_to_messages().await.unwrap();
    assert_eq!(gateway.subscriber_count(Collection::Messages), 1);

    store.unsubscribe_from_messages().await;
    let after_first = (store.phase(), store.is_subscribed(), store.messages());
    store.unsubscribe_from_messages().await;

    assert_eq!((store.phase(), store.is_subscribed(), store.messages()), after_first);
    assert_eq!(gateway.subscriber_count(Collection::Messages), 0);

    gateway
        .push_insert(
            Collection::Messages,
            json!({"user_id": "id-ben", "username": "ben", "message": "late"}),
        )
        .unwrap();
    tokio::task::yield_now().await;
    assert!(store.messages().is_empty());
}

#[tokio::test]
async fn test_resubscribe_replaces_subscription() {
    let (gateway, store) = chat_store();
    store.subscribe_to_messages().await.unwrap();
    store.subscribe_to_messages().await.unwrap();

    assert_eq!(gateway.subscriber_count(Collection::Messages), 1);

    let mut events = store.events();
    gateway
        .push_insert(
            Collection::Messages,
            json!({"user_id": "id-ana", "username": "ana", "message": "once"}),
        )
        .unwrap();
    next_event(&mut events).await;
    assert_eq!(store.messages().len(), 1);
}

#[tokio::test]
async fn test_subscription_loss_is_recorded() {
    let (gateway, store) = chat_store();
    let mut events = store.events();
    store.subscribe_to_messages().await.unwrap();

    gateway.disconnect_subscribers(Collection::Messages);

    match next_event(&mut events).await {
        ChatEvent::SubscriptionLost(reason) => assert!(reason.contains("connection lost")),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(store.phase(), ChatPhase::Unsubscribed);
    assert!(!store.is_subscribed());
    assert!(store.error().unwrap().starts_with("Subscription failed"));

    // Not retried; an explicit subscribe starts over.
    store.subscribe_to_messages().await.unwrap();
    assert_eq!(store.phase(), ChatPhase::Live);
    assert!(store.error().is_none());
}

#[tokio::test]
async fn test_drop_releases_subscription() {
    let (gateway, store) = chat_store();
    store.subscribe_to_messages().await.unwrap();
    assert_eq!(gateway.subscriber_count(Collection::Messages), 1);

    drop(store);
    for _ in 0..10 {
        if gateway.subscriber_count(Collection::Messages) == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(gateway.subscriber_count(Collection::Messages), 0);
}
