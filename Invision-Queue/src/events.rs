use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::types::{GenerationParams, InteractionRef, InvisionControl, ItemKind};

/// Emitted when the dispatch loop picks an item up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStartedEvent {
    pub job_id: String,
    pub kind: ItemKind,
    /// Position reported at enqueue time.
    pub position: usize,
}

/// Emitted while the backend call is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub current_step: u32,
    pub total_steps: u32,
    pub progress: f64,
    pub eta_seconds: Option<f64>,
}

/// Emitted when an item fails. `message` is safe to show to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailedEvent {
    pub job_id: String,
    pub kind: ItemKind,
    pub error: String,
    pub message: String,
}

/// A finished invision, ready to be rendered.
#[derive(Debug, Clone)]
pub struct JobCompletedEvent {
    pub job_id: String,
    pub kind: ItemKind,
    pub position: usize,
    /// PNG bytes in grid order; index is the image's `sort_order`.
    pub images: Vec<Vec<u8>>,
    /// Parameters the images were generated with.
    pub params: GenerationParams,
    pub seeds: Vec<i64>,
    pub controls: Vec<InvisionControl>,
    /// Caption for the result message.
    pub content: String,
}

/// Returned by the front-end once a result grid is posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    /// Chat message now hosting the grid and its controls.
    pub message_id: String,
}

/// Where the dispatch loop sends updates for an interaction.
///
/// Exactly one of [`on_completed`](Self::on_completed) or
/// [`on_failed`](Self::on_failed) is called per dispatched item.
#[async_trait]
pub trait InteractionSink: Send + Sync {
    async fn on_started(
        &self,
        _interaction: &InteractionRef,
        _event: &JobStartedEvent,
    ) -> Result<(), QueueError> {
        Ok(())
    }

    async fn on_progress(
        &self,
        _interaction: &InteractionRef,
        _event: &JobProgressEvent,
    ) -> Result<(), QueueError> {
        Ok(())
    }

    /// Post the images and controls. The receipt names the hosting message,
    /// which becomes the key of the stored generation records.
    async fn on_completed(
        &self,
        interaction: &InteractionRef,
        event: &JobCompletedEvent,
    ) -> Result<DeliveryReceipt, QueueError>;

    async fn on_failed(
        &self,
        interaction: &InteractionRef,
        event: &JobFailedEvent,
    ) -> Result<(), QueueError>;
}
