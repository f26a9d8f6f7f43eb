use base64::Engine;
use reqwest::{Client, Response};
use std::time::Duration;

use crate::error::{Result, SdError};
use crate::payload::Txt2ImgPayload;
use crate::types::*;

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// Async client for a Stable Diffusion web UI instance started with `--api`.
///
/// # Example
/// ```no_run
/// use sdwebui_rs::SdClient;
///
/// # async fn example() -> sdwebui_rs::Result<()> {
/// let client = SdClient::new("http://127.0.0.1:7860");
/// let healthy = client.health().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SdClient {
    http: Client,
    endpoint: String,
    generation_timeout: Duration,
}

impl SdClient {
    /// Create a new client pointing at the given web UI endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            generation_timeout: Duration::from_secs(600),
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, TLS, proxies).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// How long a single txt2img call may take before it is abandoned.
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Returns the configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn unreachable(&self, source: reqwest::Error) -> SdError {
        SdError::Network {
            context: format!(
                "Cannot connect to Stable Diffusion web UI at {}. Is it running with --api?",
                self.endpoint
            ),
            source,
        }
    }

    async fn check(resp: Response) -> Result<Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(SdError::Http { status, body })
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Check whether the API is reachable via `/sdapi/v1/samplers`.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/sdapi/v1/samplers", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        Ok(resp.status().is_success())
    }

    /// Samplers the web UI has installed.
    pub async fn samplers(&self) -> Result<Vec<SamplerInfo>> {
        let url = format!("{}/sdapi/v1/samplers", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| SdError::Network {
                context: "Failed to parse samplers response".into(),
                source: e,
            })
    }

    // ── Generation ──────────────────────────────────────────────────

    /// Run txt2img and wait for the images.
    pub async fn txt2img(&self, payload: &Txt2ImgPayload) -> Result<Txt2ImgResult> {
        let url = format!("{}/sdapi/v1/txt2img", self.endpoint);
        tracing::debug!(
            seed = payload.seed,
            n_iter = payload.n_iter,
            batch_size = payload.batch_size,
            enable_hr = payload.enable_hr,
            "Posting txt2img"
        );

        let resp = self
            .http
            .post(&url)
            .timeout(self.generation_timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        let body: Txt2ImgResponse =
            Self::check(resp)
                .await?
                .json()
                .await
                .map_err(|e| SdError::Network {
                    context: "Failed to parse txt2img response".into(),
                    source: e,
                })?;

        parse_txt2img(body)
    }

    /// Progress of the running job. `skip_current_image` keeps the response small.
    pub async fn progress(&self) -> Result<Progress> {
        let url = format!(
            "{}/sdapi/v1/progress?skip_current_image=true",
            self.endpoint
        );
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| SdError::Network {
                context: "Failed to parse progress response".into(),
                source: e,
            })
    }

    // ── Interrogate ─────────────────────────────────────────────────

    /// Describe an image as a prompt using CLIP or DeepDanbooru.
    pub async fn interrogate(&self, image: &[u8], model: InterrogateModel) -> Result<String> {
        let url = format!("{}/sdapi/v1/interrogate", self.endpoint);
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = serde_json::json!({
            "image": format!("data:image/png;base64,{}", encoded),
            "model": model,
        });

        let resp = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(120))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        let json: serde_json::Value =
            Self::check(resp)
                .await?
                .json()
                .await
                .map_err(|e| SdError::Network {
                    context: "Failed to parse interrogate response".into(),
                    source: e,
                })?;

        json.get("caption")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| SdError::InvalidResponse("Response missing caption".into()))
    }
}

/// Decode a txt2img response into image bytes plus the seeds that made them.
///
/// With more than one image the web UI prepends a grid of the whole batch;
/// it is dropped so every remaining image lines up with `all_seeds`.
pub fn parse_txt2img(body: Txt2ImgResponse) -> Result<Txt2ImgResult> {
    let mut info: GenerationInfo = if body.info.trim().is_empty() {
        GenerationInfo::default()
    } else {
        serde_json::from_str(&body.info)?
    };
    if info.all_seeds.is_empty() {
        info.all_seeds.extend(info.seed);
    }
    if info.all_subseeds.is_empty() {
        info.all_subseeds.extend(info.subseed);
    }

    let mut encoded = body.images;
    if encoded.is_empty() {
        return Err(SdError::InvalidResponse("Response missing images".into()));
    }
    if encoded.len() == info.all_seeds.len() + 1 {
        encoded.remove(0);
    }

    let images = encoded
        .iter()
        .map(|data| decode_image(data))
        .collect::<Result<Vec<_>>>()?;
    Ok(Txt2ImgResult { images, info })
}

fn decode_image(data: &str) -> Result<Vec<u8>> {
    let raw = match data.split_once("base64,") {
        Some((_, rest)) => rest,
        None => data,
    };
    Ok(base64::engine::general_purpose::STANDARD.decode(raw.trim())?)
}
