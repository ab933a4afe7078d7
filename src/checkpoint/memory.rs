//! In-memory checkpoint store

use super::{Checkpoint, CheckpointSession, CheckpointStore};
use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

type Log = Arc<RwLock<HashMap<String, Vec<Checkpoint>>>>;

/// Keeps every checkpoint per key and counts open sessions.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    log: Log,
    open_sessions: Arc<AtomicUsize>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// All checkpoints written for `key`, oldest first.
    pub async fn history(&self, key: &str) -> Vec<Checkpoint> {
        self.log.read().await.get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn connect(&self) -> Result<Box<dyn CheckpointSession>> {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            log: self.log.clone(),
            open_sessions: self.open_sessions.clone(),
        }))
    }
}

struct InMemorySession {
    log: Log,
    open_sessions: Arc<AtomicUsize>,
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointSession for InMemorySession {
    async fn load_latest(&mut self, key: &str) -> Result<Option<Checkpoint>> {
        let log = self.log.read().await;
        Ok(log.get(key).and_then(|entries| entries.last().cloned()))
    }

    async fn append(&mut self, key: &str, checkpoint: &Checkpoint) -> Result<()> {
        let mut log = self.log.write().await;
        let entries = log.entry(key.to_string()).or_default();

        if let Some(last) = entries.last() {
            if checkpoint.step <= last.step {
                return Err(AgentError::Checkpoint(format!(
                    "Step {} for {} is not after {}",
                    checkpoint.step, key, last.step
                )));
            }
        }

        entries.push(checkpoint.clone());
        Ok(())
    }
}
