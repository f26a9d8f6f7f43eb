//! # Invision Queue
//!
//! Single-flight image generation queue for chat bots.
//!
//! ## Features
//!
//! - FIFO work list with enqueue-time position snapshots
//! - Exactly one dispatch loop, so at most one backend generation is in flight
//! - Reroll / upscale / variation requests correlated with stored generations
//! - Per-scope default settings (dimensions, batch shape) with lazy initialization
//! - SQLite persistence for generation records and settings
//! - Progress, result and failure delivery through an [`InteractionSink`]
//!
//! ## Quick Start
//!
//! 1. Implement [`ImageBackend`] (or use the `sdwebui-rs` adapter)
//! 2. Implement [`InteractionSink`] in your chat front-end
//! 3. Create an [`InvisionQueue`] with a [`QueueConfig`]
//! 4. Start the dispatch loop with [`InvisionQueue::spawn()`]
//! 5. Feed it with [`InvisionQueue::add_invision()`]
//!
//! See the `examples/` directory for complete usage examples.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod executor;
pub mod queue;
pub mod render;
pub mod settings;
pub mod store;
pub mod types;

pub use config::{QueueConfig, QueueConfigBuilder};
pub use db::SqliteStore;
pub use error::{BackendError, QueueError};
pub use events::{
    DeliveryReceipt, InteractionSink, JobCompletedEvent, JobFailedEvent, JobProgressEvent,
    JobStartedEvent,
};
pub use queue::InvisionQueue;
pub use settings::{DefaultSettings, SettingsScope, SettingsService};
pub use store::{GenerationRecordStore, SettingsStore};
pub use types::{
    EffectiveParams, GenerationOutput, GenerationParams, GenerationRecord, InteractionRef,
    InvisionControl, ItemKind, QueueItem, Sampler,
};

use async_trait::async_trait;

/// Progress of the generation currently running on the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendProgress {
    pub current_step: u32,
    pub total_steps: u32,
    /// Fraction done, 0.0 to 1.0.
    pub progress: f64,
    pub eta_seconds: Option<f64>,
}

/// The image generation service the dispatch loop drives.
///
/// Only the dispatch loop calls `generate`, `upscale` and `variation`, one at
/// a time. Implementations must not retry internally; a failure is reported
/// to the user as-is.
///
/// # Example
///
/// ```ignore
/// use invision_queue::*;
///
/// struct MyBackend;
///
/// #[async_trait::async_trait]
/// impl ImageBackend for MyBackend {
///     async fn generate(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
///         // Call the GPU service...
///         todo!()
///     }
///     // upscale, variation...
/// }
/// ```
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Generate `batch_count * batch_size` images. A seed of -1 means random.
    async fn generate(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError>;

    /// Regenerate the single image `params` describes with a higher-resolution pass.
    async fn upscale(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError>;

    /// Generate a grid of images close to the one `params` describes, by
    /// perturbing its seed.
    async fn variation(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError>;

    /// Report progress of the running generation, if the backend can.
    async fn progress(&self) -> Result<Option<BackendProgress>, BackendError> {
        Ok(None)
    }
}
