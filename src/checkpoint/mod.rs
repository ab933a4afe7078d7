//! Checkpoint persistence for run state
//!
//! The store is an opaque keyed log of message lists. A run opens one
//! session, reads the latest checkpoint for its key and appends a new one
//! after every completed step. Sessions are released when dropped.

use crate::models::Message;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryCheckpointStore;
pub use postgres::PgCheckpointStore;

/// Storage key for one account's thread.
pub fn checkpoint_key(account_id: i64, thread_id: i64) -> String {
    format!("account_{}_thread_{}", account_id, thread_id)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Strictly increasing per key
    pub step: u64,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(step: u64, messages: Vec<Message>) -> Self {
        Self {
            step,
            messages,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Open a session scoped to one run.
    async fn connect(&self) -> Result<Box<dyn CheckpointSession>>;
}

#[async_trait]
pub trait CheckpointSession: Send {
    async fn load_latest(&mut self, key: &str) -> Result<Option<Checkpoint>>;
    async fn append(&mut self, key: &str, checkpoint: &Checkpoint) -> Result<()>;
}
