use crate::db::Database;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Watermarks recorded after the last successful incremental sync of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncState {
    pub book_id: String,
    /// Epoch millis.
    pub last_sync_time: i64,
    pub highlights_synckey: String,
    pub thoughts_synckey: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StateResult<T> = Result<T, StateStoreError>;

/// Per-book watermark persistence.
///
/// `save` replaces any existing record for the book as a whole.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn load(&self, book_id: &str) -> StateResult<Option<SyncState>>;

    async fn save(&self, state: &SyncState) -> StateResult<()>;
}

#[async_trait]
impl SyncStateStore for Database {
    async fn load(&self, book_id: &str) -> StateResult<Option<SyncState>> {
        Ok(self.get_sync_state(book_id).await?)
    }

    async fn save(&self, state: &SyncState) -> StateResult<()> {
        Ok(self.update_sync_state(state).await?)
    }
}

/// Keeps state for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemorySyncStateStore {
    states: Mutex<HashMap<String, SyncState>>,
}

impl MemorySyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.lock().await.is_empty()
    }
}

#[async_trait]
impl SyncStateStore for MemorySyncStateStore {
    async fn load(&self, book_id: &str) -> StateResult<Option<SyncState>> {
        Ok(self.states.lock().await.get(book_id).cloned())
    }

    async fn save(&self, state: &SyncState) -> StateResult<()> {
        self.states
            .lock()
            .await
            .insert(state.book_id.clone(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_overwrites() {
        let store = MemorySyncStateStore::new();
        let first = SyncState {
            book_id: "b".into(),
            last_sync_time: 1,
            highlights_synckey: "h1".into(),
            thoughts_synckey: "t1".into(),
        };
        let second = SyncState {
            book_id: "b".into(),
            last_sync_time: 2,
            highlights_synckey: "h2".into(),
            thoughts_synckey: String::new(),
        };

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        assert_eq!(store.load("b").await.unwrap(), Some(second));
        assert_eq!(store.len().await, 1);
        assert_eq!(store.load("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn database_is_a_store() {
        let db = Database::in_memory().await.unwrap();
        let store: &dyn SyncStateStore = &db;
        let state = SyncState {
            book_id: "x".into(),
            last_sync_time: 7,
            highlights_synckey: "h".into(),
            thoughts_synckey: "t".into(),
        };

        store.save(&state).await.unwrap();
        assert_eq!(store.load("x").await.unwrap(), Some(state));
    }
}
