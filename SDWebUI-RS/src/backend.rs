use async_trait::async_trait;
use invision_queue::{
    BackendError, BackendProgress, EffectiveParams, GenerationOutput, GenerationParams,
    ImageBackend,
};

use crate::client::SdClient;
use crate::payload::Txt2ImgPayload;
use crate::types::Txt2ImgResult;

/// [`ImageBackend`] on top of the web UI's txt2img endpoint.
///
/// Upscale reruns the recorded seed as a single image with a hires pass;
/// variation reruns it with a random subseed.
#[derive(Debug, Clone)]
pub struct SdBackend {
    client: SdClient,
    steps: u32,
    cfg_scale: f64,
    hires_scale: f64,
    upscale_scale: f64,
    upscaler: String,
    upscale_denoise: f64,
    variation_strength: f64,
}

impl SdBackend {
    pub fn new(client: SdClient) -> Self {
        Self {
            client,
            steps: 20,
            cfg_scale: 7.0,
            hires_scale: 1.5,
            upscale_scale: 2.0,
            upscaler: "Latent".to_string(),
            upscale_denoise: 0.5,
            variation_strength: 0.15,
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_cfg_scale(mut self, cfg: f64) -> Self {
        self.cfg_scale = cfg;
        self
    }

    /// Scale of the hires pass when a request asks for hires fix.
    pub fn with_hires_scale(mut self, scale: f64) -> Self {
        self.hires_scale = scale;
        self
    }

    pub fn with_upscale(mut self, scale: f64, upscaler: impl Into<String>, denoise: f64) -> Self {
        self.upscale_scale = scale;
        self.upscaler = upscaler.into();
        self.upscale_denoise = denoise;
        self
    }

    pub fn with_variation_strength(mut self, strength: f64) -> Self {
        self.variation_strength = strength;
        self
    }

    pub fn client(&self) -> &SdClient {
        &self.client
    }

    fn payload(&self, params: &GenerationParams) -> Txt2ImgPayload {
        let payload = Txt2ImgPayload::from_params(params)
            .steps(self.steps)
            .cfg_scale(self.cfg_scale);
        if params.use_hires_fix {
            let upscaler = payload.hr_upscaler.clone();
            let denoise = payload.denoising_strength;
            payload.hires(self.hires_scale, upscaler, denoise)
        } else {
            payload
        }
    }

    async fn run(&self, payload: Txt2ImgPayload) -> Result<GenerationOutput, BackendError> {
        let result = self.client.txt2img(&payload).await?;
        Ok(into_output(result, &payload))
    }
}

fn into_output(result: Txt2ImgResult, payload: &Txt2ImgPayload) -> GenerationOutput {
    let info = result.info;
    let seeds = if info.all_seeds.is_empty() && payload.seed != -1 {
        vec![payload.seed]
    } else {
        info.all_seeds
    };
    // Without subseed strength the web UI still reports random subseeds; they mean nothing.
    let subseeds = if payload.subseed_strength <= 0.0 {
        Vec::new()
    } else if info.all_subseeds.is_empty() && payload.subseed != -1 {
        vec![payload.subseed]
    } else {
        info.all_subseeds
    };
    GenerationOutput {
        images: result.images,
        params: EffectiveParams {
            seeds,
            subseeds,
            subseed_strength: payload.subseed_strength,
            width: if info.width > 0 { info.width } else { payload.width },
            height: if info.height > 0 { info.height } else { payload.height },
        },
    }
}

#[async_trait]
impl ImageBackend for SdBackend {
    async fn generate(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        self.run(self.payload(params)).await
    }

    async fn upscale(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        let payload = self.payload(params).batch(1, 1).hires(
            self.upscale_scale,
            self.upscaler.clone(),
            self.upscale_denoise,
        );
        tracing::info!(seed = payload.seed, scale = self.upscale_scale, "Upscaling image");
        self.run(payload).await
    }

    async fn variation(&self, params: &GenerationParams) -> Result<GenerationOutput, BackendError> {
        let payload = self.payload(params).variation(self.variation_strength);
        tracing::info!(
            seed = payload.seed,
            subseed = payload.subseed,
            strength = payload.subseed_strength,
            "Generating variations"
        );
        self.run(payload).await
    }

    async fn progress(&self) -> Result<Option<BackendProgress>, BackendError> {
        let progress = self.client.progress().await?;
        if !progress.is_active() {
            return Ok(None);
        }
        Ok(Some(BackendProgress {
            current_step: progress.state.sampling_step,
            total_steps: progress.state.sampling_steps,
            progress: progress.progress,
            eta_seconds: (progress.eta_relative > 0.0).then_some(progress.eta_relative),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationInfo;
    use invision_queue::Sampler;

    fn params(use_hires_fix: bool) -> GenerationParams {
        GenerationParams {
            prompt: "a cat".into(),
            negative_prompt: String::new(),
            sampler: Sampler::DpmPp2M,
            use_hires_fix,
            seed: 4321,
            subseed: None,
            subseed_strength: 0.0,
            width: 512,
            height: 512,
            batch_count: 1,
            batch_size: 4,
        }
    }

    #[test]
    fn test_payload_applies_backend_options() {
        let backend = SdBackend::new(SdClient::new("http://localhost:7860"))
            .with_steps(30)
            .with_hires_scale(1.25);
        let payload = backend.payload(&params(true));
        assert_eq!(payload.steps, 30);
        assert!(payload.enable_hr);
        assert_eq!(payload.hr_scale, 1.25);

        assert!(!backend.payload(&params(false)).enable_hr);
    }

    #[test]
    fn test_output_falls_back_to_requested_seed() {
        let payload = Txt2ImgPayload::from_params(&params(false));
        let result = Txt2ImgResult {
            images: vec![vec![1]],
            info: GenerationInfo::default(),
        };
        let output = into_output(result, &payload);
        assert_eq!(output.params.seeds, vec![4321]);
        assert_eq!((output.params.width, output.params.height), (512, 512));
    }

    #[test]
    fn test_output_uses_reported_seeds() {
        let payload = Txt2ImgPayload::from_params(&params(false)).seed(-1);
        let result = Txt2ImgResult {
            images: vec![vec![1], vec![2]],
            info: GenerationInfo {
                all_seeds: vec![5, 6],
                width: 768,
                height: 768,
                ..Default::default()
            },
        };
        let output = into_output(result, &payload);
        assert_eq!(output.params.seed_for(1), Some(6));
        assert_eq!(output.params.width, 768);
    }

    #[test]
    fn test_variation_output_keeps_subseed_per_image() {
        let backend = SdBackend::new(SdClient::new("http://localhost:7860"));
        let payload = backend
            .payload(&GenerationParams {
                seed: 501,
                ..params(false)
            })
            .variation(0.15);
        // The web UI repeats the seed for every variation; only the subseeds differ.
        let result = Txt2ImgResult {
            images: vec![vec![1], vec![2], vec![3], vec![4]],
            info: GenerationInfo {
                all_seeds: vec![501; 4],
                all_subseeds: vec![11, 12, 13, 14],
                ..Default::default()
            },
        };
        let output = into_output(result, &payload);
        assert_eq!(output.params.seed_for(2), Some(501));
        assert_eq!(output.params.subseed_for(0), Some(11));
        assert_eq!(output.params.subseed_for(2), Some(13));
        assert_eq!(output.params.subseed_strength, 0.15);

        // Upscaling variation #2 asks for exactly that variation again.
        let recorded = GenerationParams {
            seed: 501,
            subseed: output.params.subseed_for(2),
            subseed_strength: output.params.subseed_strength,
            batch_count: 1,
            batch_size: 1,
            ..params(false)
        };
        let upscale = backend.payload(&recorded).batch(1, 1);
        assert_eq!((upscale.seed, upscale.subseed), (501, 13));
        assert_eq!(upscale.subseed_strength, 0.15);
    }

    #[test]
    fn test_plain_output_ignores_reported_subseeds() {
        let payload = Txt2ImgPayload::from_params(&params(false));
        let result = Txt2ImgResult {
            images: vec![vec![1]],
            info: GenerationInfo {
                all_seeds: vec![4321],
                all_subseeds: vec![99],
                ..Default::default()
            },
        };
        let output = into_output(result, &payload);
        assert!(output.params.subseeds.is_empty());
        assert_eq!(output.params.subseed_for(0), None);
    }
}
