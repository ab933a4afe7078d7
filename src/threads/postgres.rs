//! Postgres-backed thread store
//!
//! The schema is created on first use. A partial unique index keeps at most
//! one active thread per account even across service instances.

use super::ThreadStore;
use crate::error::AgentError;
use crate::models::ConversationThread;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;

const THREAD_COLUMNS: &str = "id, account_id, title, last_activity, is_active, created_at, updated_at";

#[derive(Clone)]
pub struct PgThreadStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgThreadStore {
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
                    CREATE TABLE IF NOT EXISTS conversation_threads (
                      id BIGSERIAL PRIMARY KEY,
                      account_id BIGINT NOT NULL,
                      title TEXT NOT NULL,
                      last_activity TIMESTAMPTZ NOT NULL,
                      is_active BOOLEAN NOT NULL DEFAULT TRUE,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE UNIQUE INDEX IF NOT EXISTS ux_conversation_threads_one_active
                    ON conversation_threads (account_id) WHERE is_active;
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_conversation_threads_account_activity
                    ON conversation_threads (account_id, last_activity DESC);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AgentError::Database(format!("Failed to initialize thread schema: {}", e))
            })?;

        Ok(())
    }
}

fn thread_from_row(row: &PgRow) -> Result<ConversationThread> {
    Ok(ConversationThread {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        title: row.try_get("title")?,
        last_activity: row.try_get("last_activity")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn db_error(action: &str) -> impl FnOnce(sqlx::Error) -> AgentError + '_ {
    move |e| AgentError::Database(format!("Failed to {}: {}", action, e))
}

#[async_trait]
impl ThreadStore for PgThreadStore {
    async fn find(&self, thread_id: i64, account_id: i64) -> Result<Option<ConversationThread>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM conversation_threads WHERE id = $1 AND account_id = $2",
            THREAD_COLUMNS
        ))
        .bind(thread_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load thread"))?;

        row.as_ref().map(thread_from_row).transpose()
    }

    async fn latest_active(&self, account_id: i64) -> Result<Option<ConversationThread>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM conversation_threads \
             WHERE account_id = $1 AND is_active \
             ORDER BY last_activity DESC, id DESC LIMIT 1",
            THREAD_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load active thread"))?;

        row.as_ref().map(thread_from_row).transpose()
    }

    async fn create(&self, account_id: i64, title: &str, now: DateTime<Utc>) -> Result<ConversationThread> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        sqlx::query(
            "UPDATE conversation_threads SET is_active = FALSE, updated_at = $2 \
             WHERE account_id = $1 AND is_active",
        )
        .bind(account_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error("deactivate previous threads"))?;

        let row = sqlx::query(&format!(
            "INSERT INTO conversation_threads \
             (account_id, title, last_activity, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, TRUE, $3, $3) RETURNING {}",
            THREAD_COLUMNS
        ))
        .bind(account_id)
        .bind(title)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("create thread"))?;

        tx.commit().await.map_err(db_error("commit thread"))?;

        thread_from_row(&row)
    }

    async fn touch(&self, thread_id: i64, now: DateTime<Utc>) -> Result<ConversationThread> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "UPDATE conversation_threads SET last_activity = $2, updated_at = $2 \
             WHERE id = $1 RETURNING {}",
            THREAD_COLUMNS
        ))
        .bind(thread_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("update thread activity"))?;

        match row {
            Some(row) => thread_from_row(&row),
            None => Err(AgentError::ThreadResolution(format!(
                "Thread {} not found",
                thread_id
            ))),
        }
    }

    async fn deactivate(&self, thread_id: i64, now: DateTime<Utc>) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            "UPDATE conversation_threads SET is_active = FALSE, updated_at = $2 WHERE id = $1",
        )
        .bind(thread_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("deactivate thread"))?;

        Ok(())
    }

    async fn list_active(&self, account_id: i64, limit: usize) -> Result<Vec<ConversationThread>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM conversation_threads \
             WHERE account_id = $1 AND is_active \
             ORDER BY last_activity DESC LIMIT $2",
            THREAD_COLUMNS
        ))
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list active threads"))?;

        rows.iter().map(thread_from_row).collect()
    }
}
