//! Conversation history storage
//!
//! Keeps a short rolling window of turns per conversation key. Nothing here
//! survives a process restart.

use crate::models::Turn;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for conversation history storage
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Stored turns for `key`, or an empty list when the key is unknown
    async fn get(&self, key: &str) -> Vec<Turn>;

    /// Append `new_turns` and keep only the last `window` turns
    async fn append_and_trim(&self, key: &str, new_turns: Vec<Turn>, window: usize);

    /// Clear the history for `key`. Returns whether the key was known.
    async fn reset(&self, key: &str) -> bool;

    /// Number of conversation keys currently held
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// In-memory history store
///
/// Each call is atomic. A read, model call, append sequence spanning two calls
/// is not serialized per key, so overlapping requests for the same key both
/// build on the snapshot they read.
pub struct InMemoryHistoryStore {
    histories: Arc<RwLock<HashMap<String, Vec<Turn>>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            histories: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn get(&self, key: &str) -> Vec<Turn> {
        let histories = self.histories.read().await;
        histories.get(key).cloned().unwrap_or_default()
    }

    async fn append_and_trim(&self, key: &str, new_turns: Vec<Turn>, window: usize) {
        let mut histories = self.histories.write().await;
        let history = histories.entry(key.to_string()).or_default();

        history.extend(new_turns);

        // Oldest turns go first
        let excess = history.len().saturating_sub(window);
        if excess > 0 {
            history.drain(..excess);
        }
    }

    async fn reset(&self, key: &str) -> bool {
        let mut histories = self.histories.write().await;
        match histories.get_mut(key) {
            Some(history) => {
                history.clear();
                true
            }
            None => false,
        }
    }

    async fn len(&self) -> usize {
        self.histories.read().await.len()
    }
}
