//! # sdwebui-rs
//!
//! Async Rust client for the
//! [Stable Diffusion web UI](https://github.com/AUTOMATIC1111/stable-diffusion-webui)
//! API, plus an [`SdBackend`] adapter that plugs it into `invision-queue`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sdwebui_rs::{SdClient, Txt2ImgPayload};
//!
//! # async fn example() -> sdwebui_rs::Result<()> {
//! let client = SdClient::new("http://127.0.0.1:7860");
//!
//! let payload = Txt2ImgPayload::new("a sunset over mountains")
//!     .negative("lowres, blurry")
//!     .batch(1, 4)
//!     .steps(25);
//!
//! let result = client.txt2img(&payload).await?;
//! for (png, seed) in result.images.iter().zip(&result.info.all_seeds) {
//!     println!("seed {}: {} bytes", seed, png.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Driving the queue
//!
//! ```no_run
//! use std::sync::Arc;
//! use invision_queue::{InvisionQueue, QueueConfig};
//! use sdwebui_rs::{SdBackend, SdClient};
//!
//! # fn example() -> Result<(), invision_queue::QueueError> {
//! let backend = SdBackend::new(SdClient::new("http://127.0.0.1:7860")).with_steps(30);
//! let queue = InvisionQueue::with_sqlite(QueueConfig::from_env()?, Arc::new(backend))?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod client;
mod error;
mod payload;
mod types;

pub use backend::SdBackend;
pub use client::{parse_txt2img, SdClient};
pub use error::{Result, SdError};
pub use payload::Txt2ImgPayload;
pub use types::*;
