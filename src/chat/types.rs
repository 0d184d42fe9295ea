//! Chat message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in the global chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned id, increasing with insertion order
    pub id: i64,
    /// Sender (auth user id)
    pub user_id: String,
    /// Sender's display name at send time
    pub username: String,
    /// Message body
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Row sent when posting a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewChatMessage {
    pub user_id: String,
    pub username: String,
    pub message: String,
}

impl NewChatMessage {
    /// Build a message with a trimmed body. `None` if nothing is left to send.
    pub fn new(user_id: &str, username: &str, body: &str) -> Option<Self> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return None;
        }

        Some(Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            message: trimmed.to_string(),
        })
    }
}

/// Lifecycle of the chat feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatPhase {
    /// Nothing loaded yet
    #[default]
    Idle,
    /// Initial page in flight
    Fetching,
    /// Page loaded, no live subscription yet
    LivePending,
    /// Live inserts are being appended
    Live,
    /// Subscription released or lost
    Unsubscribed,
}

/// Notifications for chat observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A live message was appended to the cache.
    Appended(ChatMessage),
    /// The live subscription failed and was dropped.
    SubscriptionLost(String),
}
