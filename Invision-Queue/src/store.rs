//! Storage ports the queue depends on.
//!
//! [`SqliteStore`](crate::db::SqliteStore) implements both; tests and other
//! deployments can plug in their own.

use async_trait::async_trait;

use crate::error::QueueError;
use crate::settings::{DefaultSettings, SettingsScope};
use crate::types::GenerationRecord;

/// Records of past generations, keyed by `(message_id, sort_order)`.
#[async_trait]
pub trait GenerationRecordStore: Send + Sync {
    /// Store a new record and return it with its id and timestamp filled in.
    async fn create(&self, record: GenerationRecord) -> Result<GenerationRecord, QueueError>;

    /// Fails with [`QueueError::NotFound`] when no record matches.
    async fn get_by_message_and_sort(
        &self,
        message_id: &str,
        sort_order: u32,
    ) -> Result<GenerationRecord, QueueError>;
}

/// Per-scope default settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` when nothing was ever persisted for `scope`.
    async fn get(&self, scope: &SettingsScope) -> Result<Option<DefaultSettings>, QueueError>;

    async fn upsert(
        &self,
        scope: &SettingsScope,
        settings: &DefaultSettings,
    ) -> Result<DefaultSettings, QueueError>;
}
