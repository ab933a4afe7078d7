//! In-memory thread store for development

use super::ThreadStore;
use crate::error::AgentError;
use crate::models::ConversationThread;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Threads {
    next_id: i64,
    by_id: BTreeMap<i64, ConversationThread>,
}

#[derive(Clone, Default)]
pub struct InMemoryThreadStore {
    inner: Arc<RwLock<Threads>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn find(&self, thread_id: i64, account_id: i64) -> Result<Option<ConversationThread>> {
        let threads = self.inner.read().await;
        Ok(threads
            .by_id
            .get(&thread_id)
            .filter(|t| t.account_id == account_id)
            .cloned())
    }

    async fn latest_active(&self, account_id: i64) -> Result<Option<ConversationThread>> {
        let threads = self.inner.read().await;
        Ok(threads
            .by_id
            .values()
            .filter(|t| t.account_id == account_id && t.is_active)
            .max_by_key(|t| (t.last_activity, t.id))
            .cloned())
    }

    async fn create(&self, account_id: i64, title: &str, now: DateTime<Utc>) -> Result<ConversationThread> {
        let mut threads = self.inner.write().await;

        for thread in threads.by_id.values_mut() {
            if thread.account_id == account_id && thread.is_active {
                thread.is_active = false;
                thread.updated_at = now;
            }
        }

        threads.next_id += 1;
        let thread = ConversationThread {
            id: threads.next_id,
            account_id,
            title: title.to_string(),
            last_activity: now,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        threads.by_id.insert(thread.id, thread.clone());
        Ok(thread)
    }

    async fn touch(&self, thread_id: i64, now: DateTime<Utc>) -> Result<ConversationThread> {
        let mut threads = self.inner.write().await;
        let thread = threads
            .by_id
            .get_mut(&thread_id)
            .ok_or_else(|| AgentError::ThreadResolution(format!("Thread {} not found", thread_id)))?;
        thread.last_activity = now;
        thread.updated_at = now;
        Ok(thread.clone())
    }

    async fn deactivate(&self, thread_id: i64, now: DateTime<Utc>) -> Result<()> {
        let mut threads = self.inner.write().await;
        if let Some(thread) = threads.by_id.get_mut(&thread_id) {
            thread.is_active = false;
            thread.updated_at = now;
        }
        Ok(())
    }

    async fn list_active(&self, account_id: i64, limit: usize) -> Result<Vec<ConversationThread>> {
        let threads = self.inner.read().await;
        let mut active: Vec<ConversationThread> = threads
            .by_id
            .values()
            .filter(|t| t.account_id == account_id && t.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        active.truncate(limit);
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_deactivates_previous() {
        let store = InMemoryThreadStore::new();
        let now = Utc::now();
        let first = store.create(1, "a", now).await.unwrap();
        let second = store.create(1, "b", now).await.unwrap();

        assert!(!store.find(first.id, 1).await.unwrap().unwrap().is_active);
        assert_eq!(store.latest_active(1).await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_touch_missing_thread_fails() {
        let store = InMemoryThreadStore::new();
        let result = store.touch(1, Utc::now()).await;
        assert!(matches!(result, Err(AgentError::ThreadResolution(_))));
    }
}
