//! Durable conversation checkpoints keyed by thread identifier.
//!
//! The agent controller is stateless across invocations; all continuity
//! lives here. State is saved after every loop transition, so re-supplying
//! a thread id resumes exactly where the prior invocation left off.

use anyhow::{Context, Result};
use dashmap::DashMap;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::agent::state::ConversationState;

pub struct CheckpointStore {
    pool: SqlitePool,
    /// Per-thread guards enforcing at-most-one-writer-per-thread.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CheckpointStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            locks: DashMap::new(),
        })
    }

    /// The mutation guard for one thread. Held by the controller for the
    /// duration of a single invocation.
    pub fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        let row = sqlx::query("SELECT state FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("state");
                let state = serde_json::from_str(&raw)
                    .context("Failed to deserialize checkpointed conversation state")?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    pub async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<()> {
        let raw = serde_json::to_string(state)
            .context("Failed to serialize conversation state")?;

        sqlx::query(
            "INSERT INTO checkpoints (thread_id, state, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(thread_id) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at",
        )
        .bind(thread_id)
        .bind(raw)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Discard a thread's state. An in-flight loop that started before the
    /// delete still writes under its captured thread id; the caller starts a
    /// fresh id to leave the old one behind.
    pub async fn delete(&self, thread_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        self.locks.remove(thread_id);
        Ok(())
    }
}
