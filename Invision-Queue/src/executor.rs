use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{
    config::QueueConfig,
    error::{BackendError, QueueError},
    events::*,
    queue::{QueuedInvision, WorkList},
    render,
    settings::SettingsService,
    store::GenerationRecordStore,
    types::{
        EffectiveParams, GenerationOutput, GenerationParams, GenerationRecord, InvisionControl,
        ItemKind,
    },
    ImageBackend,
};

/// The dispatch loop.
///
/// Pops items off the work list in FIFO order and runs each one to
/// completion or failure before touching the next, so at most one backend
/// generation is ever in flight.
pub struct QueueExecutor {
    config: QueueConfig,
    work: Arc<WorkList>,
    backend: Arc<dyn ImageBackend>,
    records: Arc<dyn GenerationRecordStore>,
    settings: Arc<SettingsService>,
}

impl QueueExecutor {
    pub(crate) fn new(
        config: QueueConfig,
        work: Arc<WorkList>,
        backend: Arc<dyn ImageBackend>,
        records: Arc<dyn GenerationRecordStore>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            config,
            work,
            backend,
            records,
            settings,
        }
    }

    /// Spawn the executor loop as a background tokio task.
    pub(crate) fn spawn(self: Arc<Self>, sink: Arc<dyn InteractionSink>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop(sink.as_ref()).await;
        })
    }

    async fn run_loop(&self, sink: &dyn InteractionSink) {
        tracing::info!("Invision dispatch loop started");

        loop {
            let job = match self.work.pop() {
                Some(job) => job,
                None => {
                    self.work.wait(self.config.poll_interval).await;
                    continue;
                }
            };

            self.dispatch(job, sink).await;

            if !self.config.cooldown.is_zero() {
                tokio::time::sleep(self.config.cooldown).await;
            }
        }
    }

    /// Run one item and report exactly one terminal outcome to the sink.
    async fn dispatch(&self, job: QueuedInvision, sink: &dyn InteractionSink) {
        let interaction = &job.item.interaction;
        let kind = job.item.kind;
        tracing::info!(
            job_id = %job.job_id,
            kind = kind.as_str(),
            position = job.position,
            enqueued_at = %job.enqueued_at,
            "Dispatching invision"
        );

        let started = JobStartedEvent {
            job_id: job.job_id.clone(),
            kind,
            position: job.position,
        };
        if let Err(e) = sink.on_started(interaction, &started).await {
            tracing::warn!(job_id = %job.job_id, "Failed to report start: {}", e);
        }

        let (mut params, output) = match self.process(&job, sink).await {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(job_id = %job.job_id, kind = kind.as_str(), "Invision failed: {}", e);
                let failed = JobFailedEvent {
                    job_id: job.job_id.clone(),
                    kind,
                    error: e.to_string(),
                    message: render::failure(&e),
                };
                if let Err(e) = sink.on_failed(interaction, &failed).await {
                    tracing::error!(job_id = %job.job_id, "Failed to deliver failure: {}", e);
                }
                return;
            }
        };

        let GenerationOutput {
            images,
            params: effective,
        } = output;
        // Record the size the backend actually rendered at.
        if effective.width > 0 && effective.height > 0 {
            params.width = effective.width;
            params.height = effective.height;
        }

        let image_count = images.len();
        let seeds: Vec<i64> = (0..image_count)
            .filter_map(|index| effective.seed_for(index))
            .collect();
        let completed = JobCompletedEvent {
            job_id: job.job_id.clone(),
            kind,
            position: job.position,
            images,
            content: render::completion(kind, job.item.member_id.as_deref(), &params),
            controls: InvisionControl::for_grid(kind, image_count),
            params,
            seeds,
        };

        // The image reaches the user even if bookkeeping fails below.
        match sink.on_completed(interaction, &completed).await {
            Ok(receipt) => {
                tracing::info!(
                    job_id = %job.job_id,
                    message_id = %receipt.message_id,
                    images = image_count,
                    "Invision delivered"
                );
                self.record_grid(&job, &completed, &effective, &receipt.message_id)
                    .await;
            }
            Err(e) => {
                tracing::error!(job_id = %job.job_id, "Failed to deliver result: {}", e);
            }
        }
    }

    async fn process(
        &self,
        job: &QueuedInvision,
        sink: &dyn InteractionSink,
    ) -> Result<(GenerationParams, GenerationOutput), QueueError> {
        let params = self.resolve_params(job).await?;
        tracing::debug!(job_id = %job.job_id, ?params, "Resolved generation parameters");

        let output = self.call_backend(job, &params, sink).await?;
        check_output(&params, &output)?;
        Ok((params, output))
    }

    /// Work out the exact parameters for the backend call.
    async fn resolve_params(&self, job: &QueuedInvision) -> Result<GenerationParams, QueueError> {
        let item = &job.item;
        let source = || {
            job.source.as_ref().ok_or_else(|| {
                QueueError::NotFound(format!(
                    "image #{} for {} {}",
                    item.source_index,
                    item.kind.as_str(),
                    job.job_id
                ))
            })
        };

        match item.kind {
            ItemKind::Generate => {
                let defaults = self.settings.effective(item.member_id.as_deref()).await?;
                Ok(GenerationParams {
                    prompt: item.prompt.clone(),
                    negative_prompt: item.negative_prompt.clone(),
                    sampler: item.sampler.unwrap_or(self.config.default_sampler),
                    use_hires_fix: item.use_hires_fix,
                    seed: -1,
                    subseed: None,
                    subseed_strength: 0.0,
                    width: defaults.width,
                    height: defaults.height,
                    batch_count: defaults.batch_count,
                    batch_size: defaults.batch_size,
                })
            }
            ItemKind::Reroll => {
                let defaults = self.settings.effective(item.member_id.as_deref()).await?;
                Ok(GenerationParams::from_record(source()?)
                    .with_random_seed()
                    .with_batch(defaults.batch_count, defaults.batch_size))
            }
            ItemKind::Upscale => Ok(GenerationParams::from_record(source()?)),
            ItemKind::Variation => {
                let defaults = self.settings.effective(item.member_id.as_deref()).await?;
                Ok(GenerationParams::from_record(source()?)
                    .with_batch(defaults.batch_count, defaults.batch_size))
            }
        }
    }

    /// Make the single backend call for this item, forwarding progress while it runs.
    async fn call_backend(
        &self,
        job: &QueuedInvision,
        params: &GenerationParams,
        sink: &dyn InteractionSink,
    ) -> Result<GenerationOutput, QueueError> {
        let mut call = match job.item.kind {
            ItemKind::Generate | ItemKind::Reroll => self.backend.generate(params),
            ItemKind::Upscale => self.backend.upscale(params),
            ItemKind::Variation => self.backend.variation(params),
        };

        let Some(interval) = self.config.progress_interval else {
            return call.await.map_err(QueueError::from);
        };

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing has progressed yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut call => return result.map_err(QueueError::from),
                _ = ticker.tick() => self.forward_progress(job, sink).await,
            }
        }
    }

    async fn forward_progress(&self, job: &QueuedInvision, sink: &dyn InteractionSink) {
        let progress = match self.backend.progress().await {
            Ok(Some(p)) => p,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(job_id = %job.job_id, "Progress query failed: {}", e);
                return;
            }
        };

        let event = JobProgressEvent {
            job_id: job.job_id.clone(),
            current_step: progress.current_step,
            total_steps: progress.total_steps,
            progress: progress.progress,
            eta_seconds: progress.eta_seconds,
        };
        if let Err(e) = sink.on_progress(&job.item.interaction, &event).await {
            tracing::debug!(job_id = %job.job_id, "Failed to report progress: {}", e);
        }
    }

    /// Store one record per delivered image. Failures are logged, not surfaced.
    async fn record_grid(
        &self,
        job: &QueuedInvision,
        completed: &JobCompletedEvent,
        effective: &EffectiveParams,
        message_id: &str,
    ) {
        let params = &completed.params;
        for (sort_order, seed) in completed.seeds.iter().enumerate() {
            let subseed = effective.subseed_for(sort_order);
            let record = GenerationRecord {
                id: None,
                message_id: message_id.to_string(),
                sort_order: sort_order as u32,
                member_id: job.item.member_id.clone(),
                prompt: params.prompt.clone(),
                negative_prompt: params.negative_prompt.clone(),
                sampler: params.sampler,
                use_hires_fix: params.use_hires_fix,
                seed: *seed,
                subseed,
                subseed_strength: if subseed.is_some() {
                    effective.subseed_strength
                } else {
                    0.0
                },
                width: params.width,
                height: params.height,
                created_at: None,
            };
            if let Err(e) = self.records.create(record).await {
                tracing::warn!(
                    job_id = %job.job_id,
                    message_id,
                    sort_order,
                    "Failed to store generation record: {}",
                    e
                );
            }
        }
    }
}

/// Reject output the queue can't deliver or record.
fn check_output(params: &GenerationParams, output: &GenerationOutput) -> Result<(), BackendError> {
    if output.images.is_empty() {
        return Err(BackendError::Malformed("backend returned no images".into()));
    }
    if let Some(index) = (0..output.images.len()).find(|i| output.params.seed_for(*i).is_none()) {
        return Err(BackendError::Malformed(format!(
            "backend reported no seed for image {}",
            index
        )));
    }
    if output.images.len() != params.expected_images() {
        tracing::warn!(
            expected = params.expected_images(),
            returned = output.images.len(),
            "Backend returned an unexpected number of images"
        );
    }
    Ok(())
}
