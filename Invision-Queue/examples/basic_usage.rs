use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use invision_queue::*;

/// Pretends to be a GPU: waits a bit and returns blank "images".
struct FakeBackend;

#[async_trait]
impl ImageBackend for FakeBackend {
    async fn generate(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let count = params.expected_images();
        Ok(GenerationOutput {
            images: vec![Vec::new(); count],
            params: EffectiveParams {
                seeds: vec![if params.seed == -1 { 4242 } else { params.seed }],
                width: params.width,
                height: params.height,
                ..Default::default()
            },
        })
    }

    async fn upscale(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        self.generate(params).await
    }

    async fn variation(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        self.generate(params).await
    }
}

/// Prints what a chat front-end would post.
struct ConsoleSink;

#[async_trait]
impl InteractionSink for ConsoleSink {
    async fn on_completed(
        &self,
        interaction: &InteractionRef,
        event: &JobCompletedEvent,
    ) -> Result<DeliveryReceipt, QueueError> {
        println!("[{}] {}", interaction.token(), event.content);
        let buttons: Vec<String> = event.controls.iter().map(|c| c.custom_id()).collect();
        println!("  seeds: {:?}", event.seeds);
        println!("  controls: {}", buttons.join(", "));
        Ok(DeliveryReceipt {
            message_id: format!("message-{}", interaction.token()),
        })
    }

    async fn on_failed(
        &self,
        interaction: &InteractionRef,
        event: &JobFailedEvent,
    ) -> Result<(), QueueError> {
        println!("[{}] {}", interaction.token(), event.message);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), QueueError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("invision_queue=debug"))
        .init();

    let config = QueueConfig::default();
    let default_sampler = config.default_sampler;
    let queue = InvisionQueue::with_sqlite(config, Arc::new(FakeBackend))?;
    queue.spawn(Arc::new(ConsoleSink))?;

    let prompts = ["a cat in a spacesuit", "a lighthouse at dusk"];
    for (n, prompt) in prompts.iter().enumerate() {
        let item = QueueItem::generate(*prompt, InteractionRef::new(format!("cmd{}", n)))
            .with_member("1234");
        let position = queue.add_invision(item.clone()).await?;
        println!("{}", render::acknowledgement(&item, position, default_sampler));
    }

    // Someone clicks "upscale 2" under the first grid.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let click = InvisionControl::parse("invision_upscale_2")
        .ok_or_else(|| QueueError::Other("bad control".into()))?;
    let item = click.into_item(InteractionRef::from_message("click", "message-cmd0"));
    match queue.add_invision(item.clone()).await {
        Ok(position) => println!("{}", render::acknowledgement(&item, position, default_sampler)),
        Err(e) => println!("{}", render::rejection(&e)),
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}
