use async_trait::async_trait;
use quiz_core::model::{PersistedSession, SubjectId, UserProfile, UserStats};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::keys::{PROFILE_KEY, STATS_KEY, progress_key};
use crate::mapping;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("stored value under {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Durable string key space, the equivalent of browser local storage.
///
/// Every call is a full round trip; there is no transaction spanning a read
/// and the following write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`. Missing keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Read/write contract for the aggregate stats record.
#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// Read the full record, repaired to the current schema.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached.
    async fn read_stats(&self) -> Result<UserStats, StorageError>;

    /// Replace the full record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be encoded or stored.
    async fn write_stats(&self, stats: &UserStats) -> Result<(), StorageError>;
}

/// One saved practice session per subject.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Whether anything is stored for `subject`, parseable or not.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached.
    async fn has_progress(&self, subject: &SubjectId) -> Result<bool, StorageError>;

    /// Load the snapshot for `subject`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupt` if the stored blob does not parse; the
    /// blob is left in place.
    async fn load_progress(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<PersistedSession>, StorageError>;

    /// Overwrite the snapshot for its subject.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be encoded or stored.
    async fn save_progress(&self, snapshot: &PersistedSession) -> Result<(), StorageError>;

    /// Drop the snapshot for `subject`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached.
    async fn clear_progress(&self, subject: &SubjectId) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// The locally signed-in learner, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupt` if the stored profile does not parse.
    async fn current_user(&self) -> Result<Option<UserProfile>, StorageError>;
}

/// Simple in-memory key space for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of keys currently stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.len())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(key);
        Ok(())
    }
}

/// Typed repositories layered over any `KeyValueStore`.
#[derive(Clone)]
pub struct KvRepository {
    store: Arc<dyn KeyValueStore>,
}

impl KvRepository {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatsRepository for KvRepository {
    async fn read_stats(&self) -> Result<UserStats, StorageError> {
        let raw = self.store.get(STATS_KEY).await?;
        Ok(mapping::decode_stats(raw.as_deref()))
    }

    async fn write_stats(&self, stats: &UserStats) -> Result<(), StorageError> {
        let encoded = mapping::encode(stats)?;
        self.store.set(STATS_KEY, &encoded).await
    }
}

#[async_trait]
impl ProgressRepository for KvRepository {
    async fn has_progress(&self, subject: &SubjectId) -> Result<bool, StorageError> {
        Ok(self.store.get(&progress_key(subject)).await?.is_some())
    }

    async fn load_progress(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<PersistedSession>, StorageError> {
        let key = progress_key(subject);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        mapping::decode_session(&key, &raw).map(Some)
    }

    async fn save_progress(&self, snapshot: &PersistedSession) -> Result<(), StorageError> {
        let encoded = mapping::encode(snapshot)?;
        self.store
            .set(&progress_key(&snapshot.subject), &encoded)
            .await
    }

    async fn clear_progress(&self, subject: &SubjectId) -> Result<(), StorageError> {
        self.store.remove(&progress_key(subject)).await
    }
}

#[async_trait]
impl ProfileRepository for KvRepository {
    async fn current_user(&self) -> Result<Option<UserProfile>, StorageError> {
        let Some(raw) = self.store.get(PROFILE_KEY).await? else {
            return Ok(None);
        };
        mapping::decode_profile(PROFILE_KEY, &raw).map(Some)
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub kv: Arc<dyn KeyValueStore>,
    pub stats: Arc<dyn StatsRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub profile: Arc<dyn ProfileRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryStore::new()))
    }

    #[must_use]
    pub fn from_store(kv: Arc<dyn KeyValueStore>) -> Self {
        let repo = KvRepository::new(Arc::clone(&kv));
        let stats: Arc<dyn StatsRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let profile: Arc<dyn ProfileRepository> = Arc::new(repo);
        Self {
            kv,
            stats,
            progress,
            profile,
        }
    }
}
