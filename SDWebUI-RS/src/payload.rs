use rand::Rng;
use serde::Serialize;

use invision_queue::{GenerationParams, Sampler};

/// Request body for `POST /sdapi/v1/txt2img`.
///
/// Defaults: 20 steps, CFG 7, random seed, one 512x512 image, no hires pass.
///
/// # Example
/// ```
/// use sdwebui_rs::Txt2ImgPayload;
///
/// let payload = Txt2ImgPayload::new("a sunset over mountains")
///     .negative("lowres, blurry")
///     .size(768, 768)
///     .batch(2, 2)
///     .steps(25);
/// assert_eq!(payload.expected_images(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Txt2ImgPayload {
    pub prompt: String,
    pub negative_prompt: String,
    pub sampler_name: String,
    pub seed: i64,
    pub subseed: i64,
    pub subseed_strength: f64,
    pub width: u32,
    pub height: u32,
    /// Batch count: sequential rounds.
    pub n_iter: u32,
    /// Images generated in parallel per round.
    pub batch_size: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    pub enable_hr: bool,
    pub hr_scale: f64,
    pub hr_upscaler: String,
    pub denoising_strength: f64,
    pub send_images: bool,
    pub save_images: bool,
}

impl Txt2ImgPayload {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            sampler_name: Sampler::default().as_str().to_string(),
            seed: -1,
            subseed: -1,
            subseed_strength: 0.0,
            width: 512,
            height: 512,
            n_iter: 1,
            batch_size: 1,
            steps: 20,
            cfg_scale: 7.0,
            enable_hr: false,
            hr_scale: 2.0,
            hr_upscaler: "Latent".to_string(),
            denoising_strength: 0.7,
            send_images: true,
            save_images: false,
        }
    }

    /// Start from resolved queue parameters: prompt, sampler, seed, size and batch shape.
    /// A recorded subseed is replayed so the same variation comes back.
    pub fn from_params(params: &GenerationParams) -> Self {
        let payload = Self::new(params.prompt.clone())
            .negative(params.negative_prompt.clone())
            .sampler(params.sampler)
            .seed(params.seed)
            .size(params.width, params.height)
            .batch(params.batch_count, params.batch_size)
            .hires_fix(params.use_hires_fix);
        match params.subseed {
            Some(subseed) => payload.subseed(subseed, params.subseed_strength),
            None => payload,
        }
    }

    pub fn negative(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = prompt.into();
        self
    }

    pub fn sampler(mut self, sampler: Sampler) -> Self {
        self.sampler_name = sampler.as_str().to_string();
        self
    }

    /// Set a specific seed. Use -1 (the default) for random.
    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn batch(mut self, count: u32, size: u32) -> Self {
        self.n_iter = count;
        self.batch_size = size;
        self
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn cfg_scale(mut self, cfg: f64) -> Self {
        self.cfg_scale = cfg;
        self
    }

    pub fn hires_fix(mut self, enabled: bool) -> Self {
        self.enable_hr = enabled;
        self
    }

    /// Enable the hires pass with the given scale, upscaler and denoise.
    pub fn hires(mut self, scale: f64, upscaler: impl Into<String>, denoise: f64) -> Self {
        self.enable_hr = true;
        self.hr_scale = scale;
        self.hr_upscaler = upscaler.into();
        self.denoising_strength = denoise;
        self
    }

    /// Mix a fixed subseed into the seed at `strength` (0.0 to 1.0).
    pub fn subseed(mut self, subseed: i64, strength: f64) -> Self {
        self.subseed = subseed;
        self.subseed_strength = strength.clamp(0.0, 1.0);
        self
    }

    /// Perturb the seed with a random subseed at `strength` (0.0 to 1.0).
    pub fn variation(mut self, strength: f64) -> Self {
        self.subseed = rand::rng().random_range(0..i64::from(u32::MAX));
        self.subseed_strength = strength.clamp(0.0, 1.0);
        self
    }

    pub fn expected_images(&self) -> usize {
        (self.n_iter * self.batch_size) as usize
    }
}
