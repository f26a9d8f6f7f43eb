use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::QueueError;
use crate::store::SettingsStore;

/// Images produced per Generate, split across `batch_count` rounds of `batch_size`.
pub const BATCH_TOTAL: u32 = 4;

/// `(batch_count, batch_size)` pairs whose product is [`BATCH_TOTAL`].
const BATCH_LOOKUP: [(u32, u32); 3] = [(1, 4), (2, 2), (4, 1)];

/// `(width, height)` pairs the backend is configured for.
pub const SUPPORTED_SIZES: [(u32, u32); 2] = [(512, 512), (768, 768)];

/// Which settings blob to read or write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingsScope {
    /// The bot-wide defaults.
    Global,
    /// Defaults chosen by one guild member.
    Member(String),
}

impl SettingsScope {
    /// Stable key used as the storage primary key.
    pub fn key(&self) -> String {
        match self {
            SettingsScope::Global => "global".to_string(),
            SettingsScope::Member(id) => format!("member:{}", id),
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        if key == "global" {
            return Some(SettingsScope::Global);
        }
        key.strip_prefix("member:")
            .filter(|id| !id.is_empty())
            .map(|id| SettingsScope::Member(id.to_string()))
    }
}

/// Generation defaults for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultSettings {
    pub width: u32,
    pub height: u32,
    pub batch_count: u32,
    pub batch_size: u32,
    pub updated_at: Option<String>,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self::baseline()
    }
}

impl DefaultSettings {
    /// Settings used the first time a scope is read: 512x512, one round of four.
    pub fn baseline() -> Self {
        Self {
            width: 512,
            height: 512,
            batch_count: 1,
            batch_size: 4,
            updated_at: None,
        }
    }

    /// Compare the generation-relevant fields, ignoring timestamps.
    pub fn same_values(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.batch_count == other.batch_count
            && self.batch_size == other.batch_size
    }
}

pub fn is_supported_size(width: u32, height: u32) -> bool {
    SUPPORTED_SIZES.contains(&(width, height))
}

/// Batch size that pairs with `batch_count` (1→4, 2→2, 4→1).
pub fn batch_size_for_count(batch_count: u32) -> Option<u32> {
    BATCH_LOOKUP
        .iter()
        .find(|(count, _)| *count == batch_count)
        .map(|(_, size)| *size)
}

/// Batch count that pairs with `batch_size` (1→4, 2→2, 4→1).
pub fn batch_count_for_size(batch_size: u32) -> Option<u32> {
    BATCH_LOOKUP
        .iter()
        .find(|(_, size)| *size == batch_size)
        .map(|(count, _)| *count)
}

pub fn validate_dimensions(width: u32, height: u32) -> Result<(), QueueError> {
    if is_supported_size(width, height) {
        Ok(())
    } else {
        Err(QueueError::Validation(format!(
            "unsupported size {}x{}",
            width, height
        )))
    }
}

pub fn validate_batch(batch_count: u32, batch_size: u32) -> Result<(), QueueError> {
    if batch_count.checked_mul(batch_size) == Some(BATCH_TOTAL) {
        Ok(())
    } else {
        Err(QueueError::Validation(format!(
            "batch count {} x batch size {} must equal {}",
            batch_count, batch_size, BATCH_TOTAL
        )))
    }
}

/// Settings operations on top of a [`SettingsStore`].
///
/// Holds no settings state of its own: every operation fetches, mutates and
/// persists. Mutations are serialized so concurrent updates can't lose a write.
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
    write_lock: Mutex<()>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Settings in effect for `scope`.
    ///
    /// The global scope is initialized to [`DefaultSettings::baseline`] and
    /// persisted on first access. A member without persisted settings gets
    /// the global ones.
    pub async fn load(&self, scope: &SettingsScope) -> Result<DefaultSettings, QueueError> {
        if let Some(settings) = self.store.get(scope).await? {
            return Ok(settings);
        }
        if *scope != SettingsScope::Global {
            if let Some(global) = self.store.get(&SettingsScope::Global).await? {
                return Ok(global);
            }
        }

        let _guard = self.write_lock.lock().await;
        // Another caller may have initialized it while we waited.
        if let Some(global) = self.store.get(&SettingsScope::Global).await? {
            return Ok(global);
        }
        let stored = self
            .store
            .upsert(&SettingsScope::Global, &DefaultSettings::baseline())
            .await?;
        tracing::info!("Initialized default settings to baseline");
        Ok(stored)
    }

    /// Settings for a Generate requested by `member_id`.
    pub async fn effective(&self, member_id: Option<&str>) -> Result<DefaultSettings, QueueError> {
        match member_id {
            Some(id) => self.load(&SettingsScope::Member(id.to_string())).await,
            None => self.load(&SettingsScope::Global).await,
        }
    }

    pub async fn update_dimensions(
        &self,
        scope: &SettingsScope,
        width: u32,
        height: u32,
    ) -> Result<DefaultSettings, QueueError> {
        validate_dimensions(width, height)?;
        self.mutate(scope, |settings| {
            settings.width = width;
            settings.height = height;
        })
        .await
    }

    pub async fn update_batch(
        &self,
        scope: &SettingsScope,
        batch_count: u32,
        batch_size: u32,
    ) -> Result<DefaultSettings, QueueError> {
        validate_batch(batch_count, batch_size)?;
        self.mutate(scope, |settings| {
            settings.batch_count = batch_count;
            settings.batch_size = batch_size;
        })
        .await
    }

    async fn mutate(
        &self,
        scope: &SettingsScope,
        apply: impl FnOnce(&mut DefaultSettings),
    ) -> Result<DefaultSettings, QueueError> {
        let mut current = self.load(scope).await?;
        let _guard = self.write_lock.lock().await;
        if let Some(latest) = self.store.get(scope).await? {
            current = latest;
        }
        apply(&mut current);
        let stored = self.store.upsert(scope, &current).await?;
        tracing::info!(
            scope = %scope.key(),
            width = stored.width,
            height = stored.height,
            batch_count = stored.batch_count,
            batch_size = stored.batch_size,
            "Updated default settings"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;

    #[test]
    fn test_baseline() {
        let settings = DefaultSettings::baseline();
        assert_eq!((settings.width, settings.height), (512, 512));
        assert_eq!(settings.batch_count * settings.batch_size, BATCH_TOTAL);
    }

    #[test]
    fn test_batch_lookup_is_symmetric() {
        for count in [1, 2, 4] {
            let size = batch_size_for_count(count).unwrap();
            assert_eq!(count * size, BATCH_TOTAL);
            assert_eq!(batch_count_for_size(size), Some(count));
        }
        assert_eq!(batch_size_for_count(3), None);
        assert_eq!(batch_count_for_size(0), None);
    }

    #[test]
    fn test_validate_batch() {
        assert!(validate_batch(1, 4).is_ok());
        assert!(validate_batch(2, 2).is_ok());
        assert!(validate_batch(4, 1).is_ok());
        assert!(matches!(validate_batch(2, 4), Err(QueueError::Validation(_))));
        assert!(matches!(validate_batch(0, 4), Err(QueueError::Validation(_))));
        assert!(validate_batch(u32::MAX, 2).is_err());
    }

    #[test]
    fn test_validate_dimensions() {
        assert!(validate_dimensions(512, 512).is_ok());
        assert!(validate_dimensions(768, 768).is_ok());
        assert!(validate_dimensions(512, 768).is_err());
        assert!(validate_dimensions(999, 999).is_err());
    }

    #[test]
    fn test_scope_keys() {
        assert_eq!(SettingsScope::Global.key(), "global");
        let member = SettingsScope::Member("1234".into());
        assert_eq!(member.key(), "member:1234");
        assert_eq!(SettingsScope::from_key("member:1234"), Some(member));
        assert_eq!(SettingsScope::from_key("global"), Some(SettingsScope::Global));
        assert_eq!(SettingsScope::from_key("member:"), None);
        assert_eq!(SettingsScope::from_key("guild"), None);
    }

    fn service() -> SettingsService {
        SettingsService::new(Arc::new(SqliteStore::open(None).unwrap()))
    }

    #[tokio::test]
    async fn test_load_initializes_global_once() {
        let service = service();
        let first = service.load(&SettingsScope::Global).await.unwrap();
        let second = service.load(&SettingsScope::Global).await.unwrap();
        assert!(first.same_values(&DefaultSettings::baseline()));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_member_falls_back_to_global() {
        let service = service();
        service
            .update_dimensions(&SettingsScope::Global, 768, 768)
            .await
            .unwrap();

        let member = service.effective(Some("42")).await.unwrap();
        assert_eq!((member.width, member.height), (768, 768));
    }

    #[tokio::test]
    async fn test_member_update_starts_from_global() {
        let service = service();
        service
            .update_dimensions(&SettingsScope::Global, 768, 768)
            .await
            .unwrap();

        let member = SettingsScope::Member("42".into());
        let updated = service.update_batch(&member, 4, 1).await.unwrap();
        assert_eq!((updated.width, updated.batch_count, updated.batch_size), (768, 4, 1));

        let global = service.load(&SettingsScope::Global).await.unwrap();
        assert_eq!((global.batch_count, global.batch_size), (1, 4));
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_settings_unchanged() {
        let service = service();
        let before = service.load(&SettingsScope::Global).await.unwrap();

        let err = service
            .update_batch(&SettingsScope::Global, 2, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));

        let after = service.load(&SettingsScope::Global).await.unwrap();
        assert_eq!(before, after);
    }
}
