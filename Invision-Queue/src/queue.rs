use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::{
    config::QueueConfig,
    db::SqliteStore,
    error::QueueError,
    events::InteractionSink,
    executor::QueueExecutor,
    settings::{DefaultSettings, SettingsScope, SettingsService},
    store::{GenerationRecordStore, SettingsStore},
    types::{GenerationRecord, ItemKind, QueueItem},
    ImageBackend,
};

/// An accepted item waiting for (or undergoing) dispatch.
#[derive(Debug, Clone)]
pub(crate) struct QueuedInvision {
    pub job_id: String,
    pub item: QueueItem,
    /// Record a follow-up targets, resolved at enqueue time.
    pub source: Option<GenerationRecord>,
    /// 1-based position reported to the caller.
    pub position: usize,
    pub enqueued_at: String,
}

/// The FIFO work list shared by enqueuers and the dispatch loop.
#[derive(Default)]
pub(crate) struct WorkList {
    items: Mutex<VecDeque<QueuedInvision>>,
    notify: Notify,
}

impl WorkList {
    /// Lock the list. A poisoned lock is logged and recovered; push and pop
    /// leave the deque consistent even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedInvision>> {
        self.items.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Work list lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Append to the tail and return the 1-based position among undispatched items.
    pub fn push(&self, mut job: QueuedInvision) -> usize {
        let position = {
            let mut items = self.lock();
            let position = items.len() + 1;
            job.position = position;
            items.push_back(job);
            position
        };
        self.notify.notify_one();
        position
    }

    pub fn pop(&self) -> Option<QueuedInvision> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Wait until something is pushed, or `timeout` passes.
    pub async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

/// The invision queue: public API for the chat front-end.
///
/// Enqueue with [`add_invision()`](Self::add_invision), then call
/// [`spawn()`](Self::spawn) once to start the dispatch loop that drains the
/// work list in order, one backend call at a time.
///
/// # Example
///
/// ```ignore
/// let queue = InvisionQueue::with_sqlite(QueueConfig::from_env()?, Arc::new(backend))?;
/// queue.spawn(Arc::new(my_discord_sink))?;
///
/// let item = QueueItem::generate("a cat", InteractionRef::new(interaction_id))
///     .with_sampler(Sampler::DpmPp2M);
/// let position = queue.add_invision(item).await?;
/// ```
pub struct InvisionQueue {
    config: QueueConfig,
    work: Arc<WorkList>,
    records: Arc<dyn GenerationRecordStore>,
    settings: Arc<SettingsService>,
    executor: Arc<QueueExecutor>,
    running: AtomicBool,
}

impl InvisionQueue {
    /// Create a queue over the given backend and stores.
    pub fn new(
        config: QueueConfig,
        backend: Arc<dyn ImageBackend>,
        records: Arc<dyn GenerationRecordStore>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let work = Arc::new(WorkList::default());
        let settings = Arc::new(SettingsService::new(settings));
        let executor = Arc::new(QueueExecutor::new(
            config.clone(),
            Arc::clone(&work),
            backend,
            Arc::clone(&records),
            Arc::clone(&settings),
        ));

        Self {
            config,
            work,
            records,
            settings,
            executor,
            running: AtomicBool::new(false),
        }
    }

    /// Create a queue whose records and settings live in the SQLite database
    /// named by `config.db_path` (in memory when unset).
    pub fn with_sqlite(
        config: QueueConfig,
        backend: Arc<dyn ImageBackend>,
    ) -> Result<Self, QueueError> {
        let store = Arc::new(SqliteStore::open(config.db_path.as_deref())?);
        Ok(Self::new(config, backend, store.clone(), store))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validate and enqueue an item. Returns its 1-based position in line.
    ///
    /// Never waits for the backend. Follow-ups (reroll, upscale, variation)
    /// are resolved against the stored generation of the message whose
    /// control was clicked; a missing record fails with
    /// [`QueueError::NotFound`] and nothing is enqueued.
    pub async fn add_invision(&self, item: QueueItem) -> Result<usize, QueueError> {
        let source = self.resolve_source(&item).await?;

        let job = QueuedInvision {
            job_id: uuid::Uuid::new_v4().to_string(),
            item,
            source,
            position: 0,
            enqueued_at: chrono::Utc::now().to_rfc3339(),
        };
        let job_id = job.job_id.clone();
        let kind = job.item.kind;

        let position = self.work.push(job);
        tracing::info!(job_id = %job_id, kind = kind.as_str(), position, "Invision queued");
        Ok(position)
    }

    async fn resolve_source(&self, item: &QueueItem) -> Result<Option<GenerationRecord>, QueueError> {
        match item.kind {
            ItemKind::Generate => {
                if item.prompt.trim().is_empty() {
                    return Err(QueueError::Validation("prompt is required".into()));
                }
                Ok(None)
            }
            ItemKind::Reroll | ItemKind::Upscale | ItemKind::Variation => {
                let message_id = item.interaction.source_message_id().ok_or_else(|| {
                    QueueError::Validation(format!(
                        "{} needs the message hosting the clicked control",
                        item.kind.as_str()
                    ))
                })?;

                let record = self
                    .records
                    .get_by_message_and_sort(message_id, item.source_index)
                    .await
                    .inspect_err(|e| {
                        if e.is_not_found() {
                            tracing::debug!(
                                message_id,
                                sort_order = item.source_index,
                                "Follow-up target not found"
                            );
                        }
                    })?;
                Ok(Some(record))
            }
        }
    }

    /// Number of items not yet picked up by the dispatch loop.
    pub fn pending(&self) -> usize {
        self.work.len()
    }

    /// Spawn the dispatch loop on the current tokio runtime.
    ///
    /// `sink` receives started/progress/completed/failed updates for every
    /// dispatched item. Only one loop may run per queue; a second call fails
    /// with [`QueueError::AlreadyRunning`].
    pub fn spawn(&self, sink: Arc<dyn InteractionSink>) -> Result<JoinHandle<()>, QueueError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyRunning);
        }
        Ok(Arc::clone(&self.executor).spawn(sink))
    }

    /// Bot-wide default settings, initialized to the baseline on first use.
    pub async fn get_bot_default_settings(&self) -> Result<DefaultSettings, QueueError> {
        self.settings.load(&SettingsScope::Global).await
    }

    /// Change the bot-wide default dimensions. Only supported sizes are accepted.
    pub async fn update_default_dimensions(
        &self,
        width: u32,
        height: u32,
    ) -> Result<DefaultSettings, QueueError> {
        self.update_dimensions_for(&SettingsScope::Global, width, height)
            .await
    }

    /// Change the bot-wide batch shape. `batch_count * batch_size` must be 4.
    pub async fn update_default_batch(
        &self,
        batch_count: u32,
        batch_size: u32,
    ) -> Result<DefaultSettings, QueueError> {
        self.update_batch_for(&SettingsScope::Global, batch_count, batch_size)
            .await
    }

    pub async fn settings_for(&self, scope: &SettingsScope) -> Result<DefaultSettings, QueueError> {
        self.settings.load(scope).await
    }

    pub async fn update_dimensions_for(
        &self,
        scope: &SettingsScope,
        width: u32,
        height: u32,
    ) -> Result<DefaultSettings, QueueError> {
        self.settings.update_dimensions(scope, width, height).await
    }

    pub async fn update_batch_for(
        &self,
        scope: &SettingsScope,
        batch_count: u32,
        batch_size: u32,
    ) -> Result<DefaultSettings, QueueError> {
        self.settings
            .update_batch(scope, batch_count, batch_size)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InteractionRef;

    fn job(prompt: &str) -> QueuedInvision {
        QueuedInvision {
            job_id: prompt.to_string(),
            item: QueueItem::generate(prompt, InteractionRef::new(prompt)),
            source: None,
            position: 0,
            enqueued_at: String::new(),
        }
    }

    #[test]
    fn test_work_list_positions_and_order() {
        let work = WorkList::default();
        assert_eq!(work.push(job("a")), 1);
        assert_eq!(work.push(job("b")), 2);
        assert_eq!(work.len(), 2);

        let first = work.pop().unwrap();
        assert_eq!(first.job_id, "a");
        assert_eq!(first.position, 1);

        // Positions count only undispatched items.
        assert_eq!(work.push(job("c")), 2);
        assert_eq!(work.pop().unwrap().job_id, "b");
        assert_eq!(work.pop().unwrap().job_id, "c");
        assert!(work.pop().is_none());
    }

    #[test]
    fn test_work_list_survives_poisoned_lock() {
        let work = Arc::new(WorkList::default());
        work.push(job("queued"));

        let poisoner = Arc::clone(&work);
        let result = std::thread::spawn(move || {
            let _guard = poisoner.items.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(result.is_err());
        assert!(work.items.is_poisoned());

        assert_eq!(work.len(), 1);
        assert_eq!(work.push(job("next")), 2);
        assert_eq!(work.pop().unwrap().job_id, "queued");
        assert_eq!(work.pop().unwrap().job_id, "next");
    }

    #[tokio::test]
    async fn test_wait_wakes_on_push() {
        let work = Arc::new(WorkList::default());
        let waiter = {
            let work = Arc::clone(&work);
            tokio::spawn(async move {
                let start = std::time::Instant::now();
                work.wait(Duration::from_secs(10)).await;
                start.elapsed()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        work.push(job("a"));

        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(5));
    }
}
