use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{Announcement, AttemptId};
use exam_core::SessionSnapshot;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// The stored bytes exist but could not be decoded.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StorageError::Serialization(_))
    }
}

pub(crate) fn encode_snapshot(snapshot: &SessionSnapshot) -> Result<String, StorageError> {
    serde_json::to_string(snapshot).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn decode_snapshot(raw: &str) -> Result<SessionSnapshot, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Durable key-value store for in-progress attempts, keyed by attempt id.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Fetch the saved snapshot for an attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` when a payload exists but cannot
    /// be decoded, or other storage errors.
    async fn load_snapshot(&self, attempt: &AttemptId)
    -> Result<Option<SessionSnapshot>, StorageError>;

    /// Insert or replace the snapshot for `snapshot.attempt_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be stored.
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError>;

    /// Drop the snapshot after a confirmed submission. Missing keys are fine.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn remove_snapshot(&self, attempt: &AttemptId) -> Result<(), StorageError>;

    /// Move an unreadable payload out of the live slot so a fresh attempt can
    /// be saved without destroying it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn quarantine_snapshot(&self, attempt: &AttemptId) -> Result<(), StorageError>;
}

/// Server-pushed announcements received during sync.
#[async_trait]
pub trait AnnouncementRepository: Send + Sync {
    /// Replace the stored announcements for an attempt with `announcements`.
    /// An empty slice clears them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if they cannot be stored.
    async fn replace_announcements(
        &self,
        attempt: &AttemptId,
        announcements: &[Announcement],
    ) -> Result<(), StorageError>;

    /// All announcements for an attempt, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_announcements(&self, attempt: &AttemptId)
    -> Result<Vec<Announcement>, StorageError>;
}

/// A payload that failed to decode, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedSnapshot {
    pub attempt_id: AttemptId,
    pub payload: String,
    pub quarantined_at: DateTime<Utc>,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    snapshots: Arc<Mutex<HashMap<AttemptId, String>>>,
    quarantined: Arc<Mutex<Vec<QuarantinedSnapshot>>>,
    announcements: Arc<Mutex<HashMap<AttemptId, Vec<Announcement>>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw payload as-is, bypassing encoding.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn insert_raw_snapshot(
        &self,
        attempt: &AttemptId,
        raw: impl Into<String>,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(attempt.clone(), raw.into());
        Ok(())
    }

    /// Snapshots moved aside by `quarantine_snapshot`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn quarantined(&self) -> Result<Vec<QuarantinedSnapshot>, StorageError> {
        let guard = self
            .quarantined
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryRepository {
    async fn load_snapshot(
        &self,
        attempt: &AttemptId,
    ) -> Result<Option<SessionSnapshot>, StorageError> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.get(attempt).map(|raw| decode_snapshot(raw)).transpose()
    }

    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let raw = encode_snapshot(snapshot)?;
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(snapshot.attempt_id.clone(), raw);
        Ok(())
    }

    async fn remove_snapshot(&self, attempt: &AttemptId) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(attempt);
        Ok(())
    }

    async fn quarantine_snapshot(&self, attempt: &AttemptId) -> Result<(), StorageError> {
        let payload = {
            let mut guard = self
                .snapshots
                .lock()
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            guard.remove(attempt)
        };
        let Some(payload) = payload else {
            return Ok(());
        };
        let mut guard = self
            .quarantined
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.push(QuarantinedSnapshot {
            attempt_id: attempt.clone(),
            payload,
            quarantined_at: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl AnnouncementRepository for InMemoryRepository {
    async fn replace_announcements(
        &self,
        attempt: &AttemptId,
        announcements: &[Announcement],
    ) -> Result<(), StorageError> {
        let mut guard = self
            .announcements
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if announcements.is_empty() {
            guard.remove(attempt);
        } else {
            guard.insert(attempt.clone(), announcements.to_vec());
        }
        Ok(())
    }

    async fn list_announcements(
        &self,
        attempt: &AttemptId,
    ) -> Result<Vec<Announcement>, StorageError> {
        let guard = self
            .announcements
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(attempt).cloned().unwrap_or_default())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub announcements: Arc<dyn AnnouncementRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let snapshots: Arc<dyn SnapshotRepository> = Arc::new(repo.clone());
        let announcements: Arc<dyn AnnouncementRepository> = Arc::new(repo);
        Self {
            snapshots,
            announcements,
        }
    }
}
