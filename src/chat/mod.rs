//! Global chat: initial page plus live inserts.

pub mod store;
pub mod types;

pub use store::ChatFeedStore;
pub use types::{ChatEvent, ChatMessage, ChatPhase, NewChatMessage};
