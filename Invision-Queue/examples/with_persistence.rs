use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use invision_queue::*;

struct OfflineBackend;

#[async_trait]
impl ImageBackend for OfflineBackend {
    async fn generate(&self, _params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        Err(BackendError::Transport("no backend configured".into()))
    }

    async fn upscale(&self, _params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        Err(BackendError::Transport("no backend configured".into()))
    }

    async fn variation(&self, _params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        Err(BackendError::Transport("no backend configured".into()))
    }
}

#[tokio::main]
async fn main() -> Result<(), QueueError> {
    tracing_subscriber::fmt::init();

    let config = QueueConfig::builder()
        .with_db_path(PathBuf::from("invision.db"))
        .build();
    let queue = InvisionQueue::with_sqlite(config.clone(), Arc::new(OfflineBackend))?;

    let settings = queue.get_bot_default_settings().await?;
    println!(
        "Current defaults: {}x{}, {} x {}",
        settings.width, settings.height, settings.batch_count, settings.batch_size
    );

    queue.update_default_dimensions(768, 768).await?;
    queue.update_default_batch(2, 2).await?;

    if let Err(e) = queue.update_default_dimensions(999, 999).await {
        println!("Rejected: {}", e);
    }

    let member = SettingsScope::Member("1234".into());
    let mine = queue.update_batch_for(&member, 4, 1).await?;
    println!("Member 1234 now gets {}x{} in {} rounds", mine.width, mine.height, mine.batch_count);

    // Stored records outlive the process; old ones can be pruned.
    let store = SqliteStore::open(config.db_path.as_deref())?;
    let pruned = store.prune_older_than(30)?;
    println!("Pruned {} old generation records", pruned);

    Ok(())
}
