#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use invision_queue::*;
use tokio::sync::mpsc;

/// One call the dispatch loop made on the backend.
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub method: &'static str,
    pub params: GenerationParams,
}

/// Backend that sleeps for `delay` and hands out consecutive seeds.
///
/// Variations behave like the web UI: every image keeps the source seed and
/// only the subseed differs.
pub struct MockBackend {
    delay: Duration,
    fail_prompts: Vec<String>,
    reported_size: Option<(u32, u32)>,
    next_seed: AtomicI64,
    next_subseed: AtomicI64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(10))
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            fail_prompts: Vec::new(),
            reported_size: None,
            next_seed: AtomicI64::new(1000),
            next_subseed: AtomicI64::new(9000),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail every call whose prompt equals `prompt`.
    pub fn failing_on(mut self, prompt: &str) -> Self {
        self.fail_prompts.push(prompt.to_string());
        self
    }

    /// Report this size back instead of the requested one.
    pub fn reporting_size(mut self, width: u32, height: u32) -> Self {
        self.reported_size = Some((width, height));
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn run(
        &self,
        method: &'static str,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, BackendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(BackendCall {
            method,
            params: params.clone(),
        });

        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_prompts.contains(&params.prompt) {
            return Err(BackendError::Refused {
                status: 500,
                body: "CUDA out of memory".into(),
            });
        }

        let count = params.expected_images();
        let base = if params.seed == -1 {
            self.next_seed.fetch_add(count as i64, Ordering::SeqCst)
        } else {
            params.seed
        };
        let (seeds, subseeds, subseed_strength) = if method == "variation" {
            let sub = self.next_subseed.fetch_add(count as i64, Ordering::SeqCst);
            (
                vec![base; count],
                (0..count as i64).map(|i| sub + i).collect(),
                0.2,
            )
        } else if let Some(sub) = params.subseed {
            (
                (0..count as i64).map(|i| base + i).collect(),
                (0..count as i64).map(|i| sub + i).collect(),
                params.subseed_strength,
            )
        } else {
            ((0..count as i64).map(|i| base + i).collect(), Vec::new(), 0.0)
        };
        let (width, height) = self.reported_size.unwrap_or((params.width, params.height));

        Ok(GenerationOutput {
            images: (0..count).map(|i| vec![0x89, b'P', b'N', b'G', i as u8]).collect(),
            params: EffectiveParams {
                seeds,
                subseeds,
                subseed_strength,
                width,
                height,
            },
        })
    }
}

#[async_trait]
impl ImageBackend for MockBackend {
    async fn generate(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        self.run("generate", params).await
    }

    async fn upscale(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        self.run("upscale", params).await
    }

    async fn variation(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        self.run("variation", params).await
    }

    async fn progress(&self) -> Result<Option<BackendProgress>, BackendError> {
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            return Ok(None);
        }
        Ok(Some(BackendProgress {
            current_step: 10,
            total_steps: 20,
            progress: 0.5,
            eta_seconds: Some(1.0),
        }))
    }
}

#[derive(Debug)]
pub enum SinkEvent {
    Started(JobStartedEvent),
    Progress(JobProgressEvent),
    Completed {
        token: String,
        message_id: String,
        event: JobCompletedEvent,
    },
    Failed {
        token: String,
        event: JobFailedEvent,
    },
    /// `on_completed` was called but refused to deliver.
    Undelivered { token: String },
}

/// Sink that forwards everything to a channel and numbers posted messages `msg-1`, `msg-2`, ...
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
    posted: AtomicUsize,
    refuse_delivery: AtomicBool,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            tx,
            posted: AtomicUsize::new(0),
            refuse_delivery: AtomicBool::new(false),
        });
        (sink, rx)
    }

    pub fn refuse_delivery(&self) {
        self.refuse_delivery.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl InteractionSink for ChannelSink {
    async fn on_started(
        &self,
        _interaction: &InteractionRef,
        event: &JobStartedEvent,
    ) -> Result<(), QueueError> {
        let _ = self.tx.send(SinkEvent::Started(event.clone()));
        Ok(())
    }

    async fn on_progress(
        &self,
        _interaction: &InteractionRef,
        event: &JobProgressEvent,
    ) -> Result<(), QueueError> {
        let _ = self.tx.send(SinkEvent::Progress(event.clone()));
        Ok(())
    }

    async fn on_completed(
        &self,
        interaction: &InteractionRef,
        event: &JobCompletedEvent,
    ) -> Result<DeliveryReceipt, QueueError> {
        if self.refuse_delivery.load(Ordering::SeqCst) {
            let _ = self.tx.send(SinkEvent::Undelivered {
                token: interaction.token().to_string(),
            });
            return Err(QueueError::Delivery("interaction expired".into()));
        }

        let message_id = format!("msg-{}", self.posted.fetch_add(1, Ordering::SeqCst) + 1);
        let _ = self.tx.send(SinkEvent::Completed {
            token: interaction.token().to_string(),
            message_id: message_id.clone(),
            event: event.clone(),
        });
        Ok(DeliveryReceipt { message_id })
    }

    async fn on_failed(
        &self,
        interaction: &InteractionRef,
        event: &JobFailedEvent,
    ) -> Result<(), QueueError> {
        let _ = self.tx.send(SinkEvent::Failed {
            token: interaction.token().to_string(),
            event: event.clone(),
        });
        Ok(())
    }
}

/// Wait for the next completed, failed or undelivered event, skipping started/progress.
pub async fn next_terminal(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> SinkEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for the dispatch loop")
            .expect("sink channel closed");
        match event {
            SinkEvent::Started(_) | SinkEvent::Progress(_) => continue,
            terminal => return terminal,
        }
    }
}

/// Wait for the next completion and return `(token, message_id, event)`.
pub async fn next_completed(
    rx: &mut mpsc::UnboundedReceiver<SinkEvent>,
) -> (String, String, JobCompletedEvent) {
    match next_terminal(rx).await {
        SinkEvent::Completed {
            token,
            message_id,
            event,
        } => (token, message_id, event),
        other => panic!("expected a completion, got {:?}", other),
    }
}

/// Config with a short poll interval and no progress polling.
pub fn test_config() -> QueueConfig {
    QueueConfig::builder()
        .with_poll_interval(Duration::from_millis(20))
        .with_progress_interval(None)
        .build()
}

/// Queue over an in-memory store, returning the store for inspection.
pub fn in_memory_queue(
    config: QueueConfig,
    backend: Arc<MockBackend>,
) -> (InvisionQueue, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open(None).unwrap());
    let queue = InvisionQueue::new(config, backend, store.clone(), store.clone());
    (queue, store)
}

pub fn record(message_id: &str, sort_order: u32, seed: i64) -> GenerationRecord {
    GenerationRecord {
        id: None,
        message_id: message_id.to_string(),
        sort_order,
        member_id: None,
        prompt: "a cat".into(),
        negative_prompt: String::new(),
        sampler: Sampler::DpmPp2M,
        use_hires_fix: false,
        seed,
        subseed: None,
        subseed_strength: 0.0,
        width: 512,
        height: 512,
        created_at: None,
    }
}

/// Record store whose writes always fail; lookups never find anything.
pub struct FailingRecordStore;

#[async_trait]
impl GenerationRecordStore for FailingRecordStore {
    async fn create(&self, _record: GenerationRecord) -> Result<GenerationRecord, QueueError> {
        Err(QueueError::Persistence("disk I/O error".into()))
    }

    async fn get_by_message_and_sort(
        &self,
        message_id: &str,
        sort_order: u32,
    ) -> Result<GenerationRecord, QueueError> {
        Err(QueueError::NotFound(format!(
            "image #{} of message {}",
            sort_order, message_id
        )))
    }
}
