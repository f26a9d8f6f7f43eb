//! User-facing message texts.
//!
//! Kept here so every front-end words queue positions, results and failures
//! the same way.

use crate::error::QueueError;
use crate::types::{GenerationParams, ItemKind, QueueItem, Sampler};

pub const NOT_AVAILABLE: &str = "This generation is no longer available.";

/// Reply sent right after a successful enqueue.
pub fn acknowledgement(item: &QueueItem, position: usize, default_sampler: Sampler) -> String {
    match item.kind {
        ItemKind::Generate => {
            let sampler = item.sampler.unwrap_or(default_sampler);
            let mut text = format!(
                "I'm dreaming something up for you. You are currently #{} in line.",
                position
            );
            text.push('\n');
            text.push_str(&request_line(item.member_id.as_deref(), &item.prompt, sampler));
            text
        }
        ItemKind::Reroll => format!(
            "I'm reimagining that for you... You are currently #{} in line.",
            position
        ),
        ItemKind::Upscale => format!(
            "I'm upscaling that for you... You are currently #{} in line.",
            position
        ),
        ItemKind::Variation => format!(
            "I'm imagining more variations for you... You are currently #{} in line.",
            position
        ),
    }
}

/// Reply sent when an enqueue is rejected.
pub fn rejection(err: &QueueError) -> String {
    match err {
        QueueError::NotFound(_) => NOT_AVAILABLE.to_string(),
        QueueError::Validation(reason) => format!("I can't invision that: {}.", reason),
        _ => "Something went wrong while queueing that, please try again later.".to_string(),
    }
}

/// Caption for a delivered result grid.
pub fn completion(kind: ItemKind, member_id: Option<&str>, params: &GenerationParams) -> String {
    let request = request_line(member_id, &params.prompt, params.sampler);
    let mut text = match kind {
        ItemKind::Generate => format!("{}\n", request),
        ItemKind::Reroll => format!("Reimagined: {}\n", request),
        ItemKind::Upscale => format!("Upscaled: {}\n", request),
        ItemKind::Variation => format!("Variations of: {}\n", request),
    };
    if !params.negative_prompt.is_empty() {
        text.push_str(&format!("Negative prompt: \"{}\"\n", params.negative_prompt));
    }
    text.push_str(&format!(
        "{}x{}{}",
        params.width,
        params.height,
        if params.use_hires_fix { ", hires.fix" } else { "" }
    ));
    text
}

/// Text shown when a dispatched item fails.
pub fn failure(err: &QueueError) -> String {
    match err {
        QueueError::NotFound(_) => NOT_AVAILABLE.to_string(),
        QueueError::Backend(_) => {
            "The image generator couldn't finish that one. Please try again.".to_string()
        }
        _ => "Something went wrong while invisioning that.".to_string(),
    }
}

fn request_line(member_id: Option<&str>, prompt: &str, sampler: Sampler) -> String {
    match member_id {
        Some(id) => format!(
            "<@{}> asked me to invision \"{}\", with sampler: {}",
            id, prompt, sampler
        ),
        None => format!("Invisioning \"{}\", with sampler: {}", prompt, sampler),
    }
}
