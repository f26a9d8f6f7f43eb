use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw body of `POST /sdapi/v1/txt2img`.
#[derive(Debug, Clone, Deserialize)]
pub struct Txt2ImgResponse {
    /// Base64-encoded PNGs. May include the grid image first.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub parameters: Value,
    /// JSON document, serialized as a string.
    #[serde(default)]
    pub info: String,
}

/// The parts of the `info` document the queue needs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerationInfo {
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub all_seeds: Vec<i64>,
    #[serde(default)]
    pub subseed: Option<i64>,
    #[serde(default)]
    pub all_subseeds: Vec<i64>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub sampler_name: Option<String>,
}

/// Decoded images and the seeds that produced them.
#[derive(Debug, Clone)]
pub struct Txt2ImgResult {
    /// PNG bytes, one per seed, grid image removed.
    pub images: Vec<Vec<u8>>,
    pub info: GenerationInfo,
}

/// Snapshot from `GET /sdapi/v1/progress`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub eta_relative: f64,
    #[serde(default)]
    pub state: ProgressState,
}

impl Progress {
    /// Whether a job is running right now.
    pub fn is_active(&self) -> bool {
        self.state.job_count > 0 && self.state.sampling_steps > 0
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressState {
    #[serde(default)]
    pub job_count: i64,
    #[serde(default)]
    pub sampling_step: u32,
    #[serde(default)]
    pub sampling_steps: u32,
    #[serde(default)]
    pub interrupted: bool,
}

/// Sampler entry from `GET /sdapi/v1/samplers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerInfo {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Models accepted by `POST /sdapi/v1/interrogate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterrogateModel {
    Clip,
    DeepDanbooru,
}
