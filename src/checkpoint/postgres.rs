//! Postgres checkpoint store
//!
//! Each session holds one pooled connection for the lifetime of a run.
//! State is stored as JSONB, one row per (key, step). A step is written
//! once; a second writer for the same step gets a checkpoint error.

use super::{Checkpoint, CheckpointSession, CheckpointStore};
use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS agent_checkpoints (
                      thread_key TEXT NOT NULL,
                      step BIGINT NOT NULL,
                      state JSONB NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      PRIMARY KEY (thread_key, step)
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AgentError::Database(format!("Failed to initialize checkpoint schema: {}", e))
            })?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn connect(&self) -> Result<Box<dyn CheckpointSession>> {
        self.ensure_schema().await?;

        let conn = self.pool.acquire().await.map_err(|e| {
            AgentError::Checkpoint(format!("Failed to acquire checkpoint connection: {}", e))
        })?;

        Ok(Box::new(PgCheckpointSession { conn }))
    }
}

struct PgCheckpointSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl CheckpointSession for PgCheckpointSession {
    async fn load_latest(&mut self, key: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT state FROM agent_checkpoints WHERE thread_key = $1 ORDER BY step DESC LIMIT 1",
        )
        .bind(key)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| AgentError::Checkpoint(format!("Failed to load checkpoint for {}: {}", key, e)))?;

        match row {
            Some(row) => {
                let Json(checkpoint): Json<Checkpoint> = row.try_get("state")?;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    async fn append(&mut self, key: &str, checkpoint: &Checkpoint) -> Result<()> {
        debug!(key, step = checkpoint.step, messages = checkpoint.messages.len(), "Writing checkpoint");

        let result = sqlx::query(
            "INSERT INTO agent_checkpoints (thread_key, step, state, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (thread_key, step) DO NOTHING",
        )
        .bind(key)
        .bind(checkpoint.step as i64)
        .bind(Json(checkpoint))
        .bind(checkpoint.created_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| AgentError::Checkpoint(format!("Failed to write checkpoint for {}: {}", key, e)))?;

        ensure_inserted(result.rows_affected(), key, checkpoint.step)
    }
}

/// A step that already exists was written by a concurrent run on the same thread.
fn ensure_inserted(rows_affected: u64, key: &str, step: u64) -> Result<()> {
    if rows_affected == 0 {
        return Err(AgentError::Checkpoint(format!(
            "Step {} for {} was already written by another run",
            step, key
        )));
    }
    Ok(())
}
