//! Global chat feed.
//!
//! The cache is the most recent page of messages in ascending order followed
//! by rows appended from one live insert subscription. Sending never touches
//! the cache; a sent message shows up when the subscription delivers it.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::types::{ChatEvent, ChatMessage, ChatPhase, NewChatMessage};
use crate::error::StoreError;
use crate::gateway::{
    decode_row, decode_rows, with_timeout, Collection, Gateway, GatewayError, InsertFeed, Query,
};
use crate::loading::{LoadingCounter, LoadingGuard};
use crate::storage::config::SyncSettings;

/// Capacity of the observer channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct ChatState {
    messages: Vec<ChatMessage>,
    phase: ChatPhase,
    error: Option<String>,
    /// Generation of the subscription currently allowed to append
    active: Option<u64>,
    next_generation: u64,
}

/// State shared with the delivery task.
struct ChatShared {
    state: RwLock<ChatState>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ChatShared {
    fn append(&self, generation: u64, message: ChatMessage) {
        {
            let mut state = self.state.write();
            if state.active != Some(generation) {
                return;
            }
            if state.messages.iter().any(|m| m.id == message.id) {
                tracing::debug!("Skipping duplicate chat message {}", message.id);
                return;
            }
            state.messages.push(message.clone());
        }
        let _ = self.event_tx.send(ChatEvent::Appended(message));
    }

    fn lose(&self, generation: u64, err: StoreError) {
        {
            let mut state = self.state.write();
            if state.active != Some(generation) {
                return;
            }
            state.active = None;
            state.phase = ChatPhase::Unsubscribed;
            state.error = Some(err.to_string());
        }
        tracing::warn!("Chat subscription lost: {}", err);
        let _ = self.event_tx.send(ChatEvent::SubscriptionLost(err.to_string()));
    }
}

/// Chat cache with one live subscription.
pub struct ChatFeedStore<G: Gateway> {
    gateway: Arc<G>,
    shared: Arc<ChatShared>,
    task: Mutex<Option<JoinHandle<()>>>,
    loading: LoadingCounter,
    timeout: Duration,
    page_size: usize,
}

impl<G: Gateway> ChatFeedStore<G> {
    pub fn new(gateway: Arc<G>, settings: &SyncSettings) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            gateway,
            shared: Arc::new(ChatShared {
                state: RwLock::new(ChatState::default()),
                event_tx,
            }),
            task: Mutex::new(None),
            loading: LoadingCounter::new(),
            timeout: settings.request_timeout(),
            page_size: settings.chat_page_size.max(1),
        }
    }

    /// Replace the cache with the most recent page, oldest first.
    pub async fn fetch_messages(&self) -> Result<Vec<ChatMessage>, StoreError> {
        let _loading = self.begin_call();
        let previous = {
            let mut state = self.shared.state.write();
            std::mem::replace(&mut state.phase, ChatPhase::Fetching)
        };

        let query = Query::new(Collection::Messages)
            .order_by("created_at", false)
            .limit(self.page_size);
        let page = match with_timeout(self.timeout, self.gateway.query(&query)).await {
            Ok(rows) => decode_rows::<ChatMessage>(rows).map_err(StoreError::decode),
            Err(e) => Err(StoreError::query(e)),
        };

        let mut state = self.shared.state.write();
        match page {
            Ok(mut messages) => {
                messages.reverse();
                state.messages = messages.clone();
                state.phase = if state.active.is_some() {
                    ChatPhase::Live
                } else {
                    ChatPhase::LivePending
                };
                tracing::info!("Fetched {} chat messages", messages.len());
                Ok(messages)
            }
            Err(err) => {
                // A subscription opened meanwhile keeps the feed live.
                state.phase = if state.active.is_some() {
                    ChatPhase::Live
                } else {
                    previous
                };
                state.error = Some(err.to_string());
                tracing::warn!("{}", err);
                Err(err)
            }
        }
    }

    /// Open the live insert subscription, replacing any existing one.
    pub async fn subscribe_to_messages(&self) -> Result<(), StoreError> {
        self.release_subscription().await;
        let _loading = self.begin_call();

        let subscribe = self.gateway.subscribe_insert(Collection::Messages);
        let feed = match with_timeout(self.timeout, subscribe).await {
            Ok(feed) => feed,
            Err(e) => {
                let err = StoreError::subscription(e);
                let mut state = self.shared.state.write();
                state.phase = ChatPhase::Unsubscribed;
                state.error = Some(err.to_string());
                tracing::warn!("{}", err);
                return Err(err);
            }
        };

        let generation = {
            let mut state = self.shared.state.write();
            state.next_generation += 1;
            let generation = state.next_generation;
            state.active = Some(generation);
            state.phase = ChatPhase::Live;
            generation
        };

        let handle = tokio::spawn(deliver(Arc::clone(&self.shared), feed, generation));
        if let Some(stale) = self.task.lock().replace(handle) {
            stale.abort();
        }

        tracing::info!("Subscribed to chat inserts");
        Ok(())
    }

    /// Release the live subscription. Calling it again has no effect.
    pub async fn unsubscribe_from_messages(&self) {
        if self.release_subscription().await {
            self.shared.state.write().phase = ChatPhase::Unsubscribed;
            tracing::info!("Unsubscribed from chat inserts");
        }
    }

    /// Post a message. The cache is only updated by the live subscription.
    pub async fn send_message(
        &self,
        user_id: &str,
        username: &str,
        body: &str,
    ) -> Result<(), StoreError> {
        let _loading = self.begin_call();

        let draft = NewChatMessage::new(user_id, username, body)
            .ok_or_else(|| self.fail(StoreError::Send("message is empty".to_string())))?;

        let row = serde_json::to_value(&draft)
            .map_err(|e| self.fail(StoreError::send(GatewayError::from(e))))?;
        with_timeout(self.timeout, self.gateway.insert(Collection::Messages, row))
            .await
            .map_err(|e| self.fail(StoreError::send(e)))?;

        tracing::debug!("Sent chat message as {}", username);
        Ok(())
    }

    /// Cached messages, oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.state.read().messages.clone()
    }

    pub fn phase(&self) -> ChatPhase {
        self.shared.state.read().phase
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.state.read().active.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    /// Last error, cleared when the next remote call starts.
    pub fn error(&self) -> Option<String> {
        self.shared.state.read().error.clone()
    }

    /// Subscribe to appended messages and subscription loss.
    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.shared.event_tx.subscribe()
    }

    fn begin_call(&self) -> LoadingGuard {
        self.shared.state.write().error = None;
        self.loading.begin()
    }

    fn fail(&self, err: StoreError) -> StoreError {
        tracing::warn!("{}", err);
        self.shared.state.write().error = Some(err.to_string());
        err
    }

    /// Stop the delivery task and wait until its feed is dropped.
    async fn release_subscription(&self) -> bool {
        let handle = self.task.lock().take();
        let was_active = self.shared.state.write().active.take().is_some();

        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        was_active
    }
}

impl<G: Gateway> Drop for ChatFeedStore<G> {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

async fn deliver(shared: Arc<ChatShared>, mut feed: InsertFeed, generation: u64) {
    while let Some(item) = feed.next().await {
        match item {
            Ok(row) => match decode_row::<ChatMessage>(row) {
                Ok(message) => shared.append(generation, message),
                Err(e) => tracing::warn!("Dropping unreadable chat row: {}", e),
            },
            Err(e) => {
                feed.close();
                shared.lose(generation, StoreError::subscription(e));
                return;
            }
        }
    }
    shared.lose(
        generation,
        StoreError::Subscription("insert feed ended".to_string()),
    );
}
