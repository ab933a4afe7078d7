//! Conversation thread lifecycle
//!
//! A thread scopes multi-turn memory for one account. Resolution reuses the
//! account's active thread until it has been idle for longer than the
//! inactivity window, then starts a fresh one.

use crate::models::ConversationThread;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryThreadStore;
pub use postgres::PgThreadStore;

pub const DEFAULT_ACTIVE_THREAD_LIMIT: usize = 20;

/// Durable storage for conversation threads
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Lookup scoped to the owning account.
    async fn find(&self, thread_id: i64, account_id: i64) -> Result<Option<ConversationThread>>;

    /// The active thread with the most recent activity.
    async fn latest_active(&self, account_id: i64) -> Result<Option<ConversationThread>>;

    /// Create an active thread, deactivating any other active thread of the account.
    async fn create(&self, account_id: i64, title: &str, now: DateTime<Utc>) -> Result<ConversationThread>;

    /// Bump `last_activity` and `updated_at`.
    async fn touch(&self, thread_id: i64, now: DateTime<Utc>) -> Result<ConversationThread>;

    async fn deactivate(&self, thread_id: i64, now: DateTime<Utc>) -> Result<()>;

    /// Active threads, most recent activity first.
    async fn list_active(&self, account_id: i64, limit: usize) -> Result<Vec<ConversationThread>>;
}

pub fn thread_title(now: DateTime<Utc>) -> String {
    format!("Conversation {}", now.format("%Y-%m-%d %H:%M"))
}

/// Resolves and manages threads on top of a `ThreadStore`.
pub struct ThreadManager {
    store: Arc<dyn ThreadStore>,
    inactivity: Duration,
    account_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ThreadManager {
    pub fn new(store: Arc<dyn ThreadStore>, inactivity_minutes: i64) -> Self {
        Self {
            store,
            inactivity: Duration::minutes(inactivity_minutes),
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn inactivity(&self) -> Duration {
        self.inactivity
    }

    async fn account_lock(&self, account_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().await;
        locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the account's lock entry once no other resolution holds or waits on it.
    async fn release_account_lock(&self, account_id: i64, lock: Arc<Mutex<()>>) {
        let mut locks = self.account_locks.lock().await;
        // one reference in the map, one in `lock`; released under the map lock
        let last = Arc::strong_count(&lock) == 2;
        drop(lock);
        if last {
            locks.remove(&account_id);
        }
    }

    #[cfg(test)]
    pub(crate) async fn tracked_accounts(&self) -> usize {
        self.account_locks.lock().await.len()
    }

    pub async fn resolve(&self, account_id: i64, thread_id: Option<i64>) -> Result<ConversationThread> {
        self.resolve_at(account_id, thread_id, Utc::now()).await
    }

    /// Resolve the thread a query belongs to, as of `now`.
    ///
    /// Serialized per account so concurrent first queries share one thread.
    pub async fn resolve_at(
        &self,
        account_id: i64,
        thread_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<ConversationThread> {
        let lock = self.account_lock(account_id).await;
        let guard = lock.lock().await;
        let result = self.resolve_locked(account_id, thread_id, now).await;
        drop(guard);
        self.release_account_lock(account_id, lock).await;
        result
    }

    async fn resolve_locked(
        &self,
        account_id: i64,
        thread_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<ConversationThread> {
        if let Some(requested) = thread_id {
            match self.store.find(requested, account_id).await? {
                Some(thread) if thread.is_active => {
                    info!(account_id, thread_id = thread.id, "Continuing requested thread");
                    return self.store.touch(thread.id, now).await;
                }
                Some(_) => {
                    warn!(account_id, thread_id = requested, "Requested thread is closed");
                }
                None => {
                    warn!(account_id, thread_id = requested, "Requested thread not found for account");
                }
            }
        }

        if let Some(thread) = self.store.latest_active(account_id).await? {
            if thread.idle_for(now) > self.inactivity {
                info!(
                    account_id,
                    thread_id = thread.id,
                    idle_minutes = thread.idle_for(now).num_minutes(),
                    "Thread inactive, starting a new one"
                );
                self.store.deactivate(thread.id, now).await?;
            } else {
                return self.store.touch(thread.id, now).await;
            }
        }

        let thread = self.store.create(account_id, &thread_title(now), now).await?;
        info!(account_id, thread_id = thread.id, "Created conversation thread");
        Ok(thread)
    }

    pub async fn list_active(&self, account_id: i64, limit: usize) -> Result<Vec<ConversationThread>> {
        self.store.list_active(account_id, limit).await
    }

    /// Deactivate a thread the account owns. Returns false when it is not found.
    pub async fn close(&self, thread_id: i64, account_id: i64) -> Result<bool> {
        let lock = self.account_lock(account_id).await;
        let guard = lock.lock().await;
        let result = self.close_locked(thread_id, account_id).await;
        drop(guard);
        self.release_account_lock(account_id, lock).await;
        result
    }

    async fn close_locked(&self, thread_id: i64, account_id: i64) -> Result<bool> {
        match self.store.find(thread_id, account_id).await? {
            Some(thread) => {
                if thread.is_active {
                    self.store.deactivate(thread.id, Utc::now()).await?;
                }
                info!(account_id, thread_id, "Closed conversation thread");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
