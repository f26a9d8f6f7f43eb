//! Run the invision queue against a live web UI with a console front-end.
//!
//! ```sh
//! SD_API_HOST=http://127.0.0.1:7860 cargo run --example queue_bot
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use invision_queue::*;
use sdwebui_rs::{SdBackend, SdClient};

struct ConsoleSink;

#[async_trait]
impl InteractionSink for ConsoleSink {
    async fn on_progress(
        &self,
        interaction: &InteractionRef,
        event: &JobProgressEvent,
    ) -> Result<(), QueueError> {
        println!(
            "[{}] step {}/{} ({:.0}%)",
            interaction.token(),
            event.current_step,
            event.total_steps,
            event.progress * 100.0
        );
        Ok(())
    }

    async fn on_completed(
        &self,
        interaction: &InteractionRef,
        event: &JobCompletedEvent,
    ) -> Result<DeliveryReceipt, QueueError> {
        println!("[{}] {}", interaction.token(), event.content);
        for (index, png) in event.images.iter().enumerate() {
            let path = format!("{}_{}.png", event.job_id, index);
            std::fs::write(&path, png).map_err(|e| QueueError::Delivery(e.to_string()))?;
        }
        Ok(DeliveryReceipt {
            message_id: event.job_id.clone(),
        })
    }

    async fn on_failed(
        &self,
        interaction: &InteractionRef,
        event: &JobFailedEvent,
    ) -> Result<(), QueueError> {
        println!("[{}] {} ({})", interaction.token(), event.message, event.error);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("invision_queue=info,sdwebui_rs=info"))
        .init();

    let host = std::env::var("SD_API_HOST").unwrap_or_else(|_| "http://127.0.0.1:7860".into());
    let backend = SdBackend::new(SdClient::new(host))
        .with_steps(25)
        .with_upscale(2.0, "R-ESRGAN 4x+", 0.4);

    let config = QueueConfig::from_env()?;
    let queue = InvisionQueue::with_sqlite(config, Arc::new(backend))?;
    queue.spawn(Arc::new(ConsoleSink))?;

    let item = QueueItem::generate("a lighthouse at dusk, oil painting", InteractionRef::new("cmd"))
        .with_sampler(Sampler::DpmPp2MKarras);
    let position = queue.add_invision(item).await?;
    println!("Queued at #{}", position);

    tokio::time::sleep(Duration::from_secs(120)).await;
    Ok(())
}
