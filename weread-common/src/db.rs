use crate::state::SyncState;
use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

/// Local SQLite database holding the per-book sync watermarks.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url {}", database_url))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Self::migrate(pool).await
    }

    /// A private in-memory database. Limited to a single connection, since every
    /// new connection to `:memory:` would see an empty database.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { pool })
    }

    pub async fn update_sync_state(&self, state: &SyncState) -> anyhow::Result<()> {
        debug!("Writing sync state for book {}", state.book_id);

        // every column is overwritten, a stale synckey must never survive
        sqlx::query(
            r#"
            INSERT INTO sync_state (book_id, last_sync_time, highlights_synckey, thoughts_synckey)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(book_id) DO UPDATE SET
                last_sync_time = excluded.last_sync_time,
                highlights_synckey = excluded.highlights_synckey,
                thoughts_synckey = excluded.thoughts_synckey
            "#,
        )
        .bind(&state.book_id)
        .bind(state.last_sync_time)
        .bind(&state.highlights_synckey)
        .bind(&state.thoughts_synckey)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_sync_state(&self, book_id: &str) -> anyhow::Result<Option<SyncState>> {
        let state = sqlx::query_as::<_, SyncState>(
            r#"
            SELECT book_id, last_sync_time, highlights_synckey, thoughts_synckey
            FROM sync_state
            WHERE book_id = ?
            "#,
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    #[cfg(test)]
    async fn count_sync_states(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_state")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(book_id: &str, time: i64, highlights: &str, thoughts: &str) -> SyncState {
        SyncState {
            book_id: book_id.to_string(),
            last_sync_time: time,
            highlights_synckey: highlights.to_string(),
            thoughts_synckey: thoughts.to_string(),
        }
    }

    #[tokio::test]
    async fn save_then_load() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(db.get_sync_state("1").await.unwrap(), None);

        let saved = state("1", 1000, "h1", "t1");
        db.update_sync_state(&saved).await.unwrap();

        assert_eq!(db.get_sync_state("1").await.unwrap(), Some(saved));
        assert_eq!(db.get_sync_state("2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_replaces_whole_record() {
        let db = Database::in_memory().await.unwrap();
        db.update_sync_state(&state("1", 1000, "h1", "t1"))
            .await
            .unwrap();
        db.update_sync_state(&state("1", 2000, "h2", ""))
            .await
            .unwrap();

        let loaded = db.get_sync_state("1").await.unwrap().unwrap();
        assert_eq!(loaded, state("1", 2000, "h2", ""));
        assert_eq!(db.count_sync_states().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("sync.db").display());

        let db = Database::new(&url).await.unwrap();
        db.update_sync_state(&state("42", 5, "a", "b")).await.unwrap();
        db.close().await;

        let reopened = Database::new(&url).await.unwrap();
        assert_eq!(
            reopened.get_sync_state("42").await.unwrap(),
            Some(state("42", 5, "a", "b"))
        );
    }
}
