//! Conversation memory
//!
//! Bounded per-conversation history shared by the bot and the HTTP API

pub mod store;

pub use store::{HistoryStore, InMemoryHistoryStore};
