use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Key not found in database [{key}]")]
    NotFound { key: String },
    #[error("Conversation expired")]
    Expired { key: String },
    #[error("state store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Expired { .. })
    }
}

/// Expiring key/value persistence for flow state, keyed by encoded flow id.
///
/// `get` must report an entry past its expiry as [`StoreError::Expired`] and
/// should evict it.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Value, StoreError>;

    async fn set(
        &self,
        key: &str,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
}

/// Expiry an `end_flow` tombstone is written with.
pub fn tombstone_expiry() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// An entry is still readable at the exact instant of its expiry.
pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|expires_at| now > expires_at)
}

#[derive(Clone, Debug, PartialEq)]
struct StoredEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStateStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every entry past its expiry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        purge_expired_entries(&mut entries, Utc::now())
    }
}

fn purge_expired_entries(entries: &mut HashMap<String, StoredEntry>, now: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !is_expired(entry.expires_at, now));
    before - entries.len()
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(key).cloned()
        };
        let Some(entry) = entry else {
            return Err(StoreError::NotFound { key: key.to_owned() });
        };

        if is_expired(entry.expires_at, Utc::now()) {
            let mut entries = self.entries.write().await;
            // A concurrent `set` may have replaced the expired entry meanwhile.
            if entries.get(key).is_some_and(|current| is_expired(current.expires_at, Utc::now())) {
                entries.remove(key);
            }
            return Err(StoreError::Expired { key: key.to_owned() });
        }

        Ok(entry.value)
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        // Writes sweep expired entries so ended or abandoned instances do not
        // accumulate. The entry written here survives until the next write.
        let mut entries = self.entries.write().await;
        purge_expired_entries(&mut entries, Utc::now());
        entries.insert(key.to_owned(), StoredEntry { value, expires_at });
        Ok(())
    }
}
