//! SQLite-backed checkpoint store.
//!
//! Snapshots are stored as one JSON blob per session; the upsert gives the
//! per-key write ordering the contract requires.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::{Checkpoint, CheckpointStore};

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (creating if needed) the database at `url`, e.g.
    /// `sqlite://sessions.db`.
    pub async fn connect(url: &str) -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(EngineError::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY,
                snapshot   TEXT NOT NULL,
                saved_at   TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        info!(url, "checkpoint store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, session_id: Uuid, snapshot: &Checkpoint) -> EngineResult<()> {
        let blob = serde_json::to_string(snapshot)?;
        sqlx::query(
            "INSERT INTO checkpoints (session_id, snapshot, saved_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET
                snapshot = excluded.snapshot,
                saved_at = excluded.saved_at",
        )
        .bind(session_id.to_string())
        .bind(blob)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> EngineResult<Option<Checkpoint>> {
        let row = sqlx::query("SELECT snapshot FROM checkpoints WHERE session_id = ?1")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let blob: String = row.get("snapshot");
                let snapshot: Checkpoint = serde_json::from_str(&blob).map_err(|e| {
                    EngineError::Checkpoint(format!("corrupt snapshot for {session_id}: {e}"))
                })?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::session::SessionState;

    async fn store() -> SqliteCheckpointStore {
        SqliteCheckpointStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = store().await;
        let mut state = SessionState::new("200㎡住宅设计");
        state.requirements_confirmed = true;
        let id = state.session_id;

        store.save(id, &Checkpoint::running(state)).await.unwrap();
        let loaded = store.load(id).await.unwrap().unwrap();
        assert!(loaded.state.requirements_confirmed);
        assert_eq!(loaded.state.user_input, "200㎡住宅设计");
    }

    #[tokio::test]
    async fn test_upsert_replaces_previous_snapshot() {
        let store = store().await;
        let state = SessionState::new("brief");
        let id = state.session_id;

        store.save(id, &Checkpoint::running(state.clone())).await.unwrap();
        let mut newer = state;
        newer.review_round = 2;
        store.save(id, &Checkpoint::running(newer)).await.unwrap();

        assert_eq!(store.load(id).await.unwrap().unwrap().state.review_round, 2);
    }

    #[tokio::test]
    async fn test_unknown_session_is_none() {
        let store = store().await;
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }
}
