use serde::{Deserialize, Serialize};

/// The four kinds of invision a user can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Generate,
    Reroll,
    Upscale,
    Variation,
}

impl ItemKind {
    pub fn as_str(&self) -> &str {
        match self {
            ItemKind::Generate => "generate",
            ItemKind::Reroll => "reroll",
            ItemKind::Upscale => "upscale",
            ItemKind::Variation => "variation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generate" => Some(ItemKind::Generate),
            "reroll" => Some(ItemKind::Reroll),
            "upscale" => Some(ItemKind::Upscale),
            "variation" => Some(ItemKind::Variation),
            _ => None,
        }
    }

    /// Reroll, Upscale and Variation all target an image of an earlier grid.
    pub fn is_follow_up(&self) -> bool {
        !matches!(self, ItemKind::Generate)
    }
}

/// Sampling algorithms the backend accepts. Serialized as the backend's display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Sampler {
    #[serde(rename = "Euler a")]
    EulerA,
    #[serde(rename = "DDIM")]
    Ddim,
    #[serde(rename = "PLMS")]
    Plms,
    #[serde(rename = "UniPC")]
    UniPc,
    #[serde(rename = "Heun")]
    Heun,
    #[serde(rename = "Euler")]
    Euler,
    #[serde(rename = "LMS")]
    Lms,
    #[serde(rename = "LMS Karras")]
    LmsKarras,
    #[serde(rename = "DPM2 a")]
    Dpm2A,
    #[serde(rename = "DPM2 a Karras")]
    Dpm2AKarras,
    #[serde(rename = "DPM2")]
    Dpm2,
    #[serde(rename = "DPM2 Karras")]
    Dpm2Karras,
    #[serde(rename = "DPM fast")]
    DpmFast,
    #[serde(rename = "DPM adaptive")]
    DpmAdaptive,
    #[serde(rename = "DPM++ 2S a")]
    DpmPp2SA,
    #[default]
    #[serde(rename = "DPM++ 2M")]
    DpmPp2M,
    #[serde(rename = "DPM++ SDE")]
    DpmPpSde,
    #[serde(rename = "DPM++ 2S a Karras")]
    DpmPp2SAKarras,
    #[serde(rename = "DPM++ 2M Karras")]
    DpmPp2MKarras,
    #[serde(rename = "DPM++ SDE Karras")]
    DpmPpSdeKarras,
}

impl Sampler {
    /// Every sampler, in the order the command offers them.
    pub const ALL: [Sampler; 20] = [
        Sampler::EulerA,
        Sampler::Ddim,
        Sampler::Plms,
        Sampler::UniPc,
        Sampler::Heun,
        Sampler::Euler,
        Sampler::Lms,
        Sampler::LmsKarras,
        Sampler::Dpm2A,
        Sampler::Dpm2AKarras,
        Sampler::Dpm2,
        Sampler::Dpm2Karras,
        Sampler::DpmFast,
        Sampler::DpmAdaptive,
        Sampler::DpmPp2SA,
        Sampler::DpmPp2M,
        Sampler::DpmPpSde,
        Sampler::DpmPp2SAKarras,
        Sampler::DpmPp2MKarras,
        Sampler::DpmPpSdeKarras,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sampler::EulerA => "Euler a",
            Sampler::Ddim => "DDIM",
            Sampler::Plms => "PLMS",
            Sampler::UniPc => "UniPC",
            Sampler::Heun => "Heun",
            Sampler::Euler => "Euler",
            Sampler::Lms => "LMS",
            Sampler::LmsKarras => "LMS Karras",
            Sampler::Dpm2A => "DPM2 a",
            Sampler::Dpm2AKarras => "DPM2 a Karras",
            Sampler::Dpm2 => "DPM2",
            Sampler::Dpm2Karras => "DPM2 Karras",
            Sampler::DpmFast => "DPM fast",
            Sampler::DpmAdaptive => "DPM adaptive",
            Sampler::DpmPp2SA => "DPM++ 2S a",
            Sampler::DpmPp2M => "DPM++ 2M",
            Sampler::DpmPpSde => "DPM++ SDE",
            Sampler::DpmPp2SAKarras => "DPM++ 2S a Karras",
            Sampler::DpmPp2MKarras => "DPM++ 2M Karras",
            Sampler::DpmPpSdeKarras => "DPM++ SDE Karras",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|sampler| sampler.as_str() == s)
    }
}

impl std::fmt::Display for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle back to the chat interaction that asked for an invision.
///
/// The front-end picks `token` and keeps its own mapping from token to
/// platform interaction. The queue never looks inside it; it only hands the
/// handle back through the [`InteractionSink`](crate::InteractionSink).
/// `source_message_id` is the message whose control was clicked, and is the
/// only part the queue reads (to resolve follow-ups).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRef {
    token: String,
    source_message_id: Option<String>,
}

impl InteractionRef {
    /// Handle for a fresh command invocation.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            source_message_id: None,
        }
    }

    /// Handle for a click on a control hosted by `message_id`.
    pub fn from_message(token: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            source_message_id: Some(message_id.into()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn source_message_id(&self) -> Option<&str> {
        self.source_message_id.as_deref()
    }
}

/// A unit of work submitted by the front-end.
///
/// Build one with [`QueueItem::generate`] or one of the follow-up
/// constructors, then hand it to [`InvisionQueue::add_invision`](crate::InvisionQueue::add_invision).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub kind: ItemKind,
    pub prompt: String,
    pub negative_prompt: String,
    /// `None` means the queue's configured default sampler.
    pub sampler: Option<Sampler>,
    pub use_hires_fix: bool,
    /// Image within the source grid a follow-up targets. Ignored for Generate.
    pub source_index: u32,
    pub member_id: Option<String>,
    pub interaction: InteractionRef,
}

impl QueueItem {
    pub fn generate(prompt: impl Into<String>, interaction: InteractionRef) -> Self {
        Self {
            kind: ItemKind::Generate,
            prompt: prompt.into(),
            negative_prompt: String::new(),
            sampler: None,
            use_hires_fix: false,
            source_index: 0,
            member_id: None,
            interaction,
        }
    }

    pub fn reroll(interaction: InteractionRef, source_index: u32) -> Self {
        Self::follow_up(ItemKind::Reroll, interaction, source_index)
    }

    pub fn upscale(interaction: InteractionRef, source_index: u32) -> Self {
        Self::follow_up(ItemKind::Upscale, interaction, source_index)
    }

    pub fn variation(interaction: InteractionRef, source_index: u32) -> Self {
        Self::follow_up(ItemKind::Variation, interaction, source_index)
    }

    fn follow_up(kind: ItemKind, interaction: InteractionRef, source_index: u32) -> Self {
        Self {
            kind,
            prompt: String::new(),
            negative_prompt: String::new(),
            sampler: None,
            use_hires_fix: false,
            source_index,
            member_id: None,
            interaction,
        }
    }

    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = negative.into();
        self
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn with_hires_fix(mut self, enabled: bool) -> Self {
        self.use_hires_fix = enabled;
        self
    }

    pub fn with_member(mut self, member_id: impl Into<String>) -> Self {
        self.member_id = Some(member_id.into());
        self
    }
}

/// Durable evidence of one generated image, keyed by `(message_id, sort_order)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Row id, `None` until stored.
    pub id: Option<i64>,
    pub message_id: String,
    pub sort_order: u32,
    pub member_id: Option<String>,
    pub prompt: String,
    pub negative_prompt: String,
    pub sampler: Sampler,
    pub use_hires_fix: bool,
    pub seed: i64,
    /// Variation seed mixed into `seed`, when the image came from a variation run.
    pub subseed: Option<i64>,
    pub subseed_strength: f64,
    pub width: u32,
    pub height: u32,
    pub created_at: Option<String>,
}

/// Fully resolved parameters for one backend call.
///
/// A `seed` of -1 asks the backend for a random seed. `subseed` replays a
/// variation at `subseed_strength`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub sampler: Sampler,
    pub use_hires_fix: bool,
    pub seed: i64,
    #[serde(default)]
    pub subseed: Option<i64>,
    #[serde(default)]
    pub subseed_strength: f64,
    pub width: u32,
    pub height: u32,
    pub batch_count: u32,
    pub batch_size: u32,
}

impl GenerationParams {
    /// Parameters that regenerate the image a record describes, as a single image.
    pub fn from_record(record: &GenerationRecord) -> Self {
        Self {
            prompt: record.prompt.clone(),
            negative_prompt: record.negative_prompt.clone(),
            sampler: record.sampler,
            use_hires_fix: record.use_hires_fix,
            seed: record.seed,
            subseed: record.subseed,
            subseed_strength: record.subseed_strength,
            width: record.width,
            height: record.height,
            batch_count: 1,
            batch_size: 1,
        }
    }

    pub fn with_batch(mut self, batch_count: u32, batch_size: u32) -> Self {
        self.batch_count = batch_count;
        self.batch_size = batch_size;
        self
    }

    /// Fresh random seed, dropping any variation subseed.
    pub fn with_random_seed(mut self) -> Self {
        self.seed = -1;
        self.subseed = None;
        self.subseed_strength = 0.0;
        self
    }

    /// How many images the backend should return.
    pub fn expected_images(&self) -> usize {
        (self.batch_count * self.batch_size) as usize
    }
}

/// What the backend reports it actually used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectiveParams {
    /// One seed per returned image, in image order.
    pub seeds: Vec<i64>,
    /// Per-image variation subseeds. Only meaningful when `subseed_strength > 0`.
    #[serde(default)]
    pub subseeds: Vec<i64>,
    #[serde(default)]
    pub subseed_strength: f64,
    pub width: u32,
    pub height: u32,
}

impl EffectiveParams {
    /// Seed that reproduces image `index`. Backends that only report a base
    /// seed number their images consecutively from it.
    pub fn seed_for(&self, index: usize) -> Option<i64> {
        match self.seeds.get(index) {
            Some(seed) => Some(*seed),
            None if self.seeds.len() == 1 => Some(self.seeds[0] + index as i64),
            None => None,
        }
    }

    /// Variation subseed of image `index`, numbered like [`seed_for`](Self::seed_for).
    pub fn subseed_for(&self, index: usize) -> Option<i64> {
        if self.subseed_strength <= 0.0 {
            return None;
        }
        match self.subseeds.get(index) {
            Some(subseed) => Some(*subseed),
            None if self.subseeds.len() == 1 => Some(self.subseeds[0] + index as i64),
            None => None,
        }
    }
}

/// Images returned by one backend call.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    /// Encoded image bytes (PNG), in batch order.
    pub images: Vec<Vec<u8>>,
    pub params: EffectiveParams,
}

/// A follow-up control presented under a result grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvisionControl {
    Reroll,
    Upscale(u32),
    Variation(u32),
}

impl InvisionControl {
    pub fn custom_id(&self) -> String {
        match self {
            InvisionControl::Reroll => "invision_reroll".to_string(),
            InvisionControl::Upscale(index) => format!("invision_upscale_{}", index),
            InvisionControl::Variation(index) => format!("invision_variation_{}", index),
        }
    }

    pub fn parse(custom_id: &str) -> Option<Self> {
        if custom_id == "invision_reroll" {
            return Some(InvisionControl::Reroll);
        }
        if let Some(index) = custom_id.strip_prefix("invision_upscale_") {
            return index.parse().ok().map(InvisionControl::Upscale);
        }
        if let Some(index) = custom_id.strip_prefix("invision_variation_") {
            return index.parse().ok().map(InvisionControl::Variation);
        }
        None
    }

    /// The item kind a click on this control enqueues.
    pub fn kind(&self) -> ItemKind {
        match self {
            InvisionControl::Reroll => ItemKind::Reroll,
            InvisionControl::Upscale(_) => ItemKind::Upscale,
            InvisionControl::Variation(_) => ItemKind::Variation,
        }
    }

    /// Image index the control targets. Reroll targets the first image of the grid.
    pub fn source_index(&self) -> u32 {
        match self {
            InvisionControl::Reroll => 0,
            InvisionControl::Upscale(index) | InvisionControl::Variation(index) => *index,
        }
    }

    /// Controls shown under a grid of `image_count` images produced by `kind`.
    pub fn for_grid(kind: ItemKind, image_count: usize) -> Vec<Self> {
        if kind == ItemKind::Upscale {
            return Vec::new();
        }
        let mut controls = Vec::with_capacity(image_count * 2 + 1);
        controls.push(InvisionControl::Reroll);
        controls.extend((0..image_count as u32).map(InvisionControl::Upscale));
        controls.extend((0..image_count as u32).map(InvisionControl::Variation));
        controls
    }

    /// Turn a click on this control into a queue item.
    pub fn into_item(self, interaction: InteractionRef) -> QueueItem {
        match self {
            InvisionControl::Reroll => QueueItem::reroll(interaction, 0),
            InvisionControl::Upscale(index) => QueueItem::upscale(interaction, index),
            InvisionControl::Variation(index) => QueueItem::variation(interaction, index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_names_parse_back() {
        for sampler in Sampler::ALL {
            assert_eq!(Sampler::parse(sampler.as_str()), Some(sampler));
        }
        assert_eq!(Sampler::parse("dpmpp_2m"), None);
        assert_eq!(Sampler::default(), Sampler::DpmPp2M);
    }

    #[test]
    fn test_sampler_serializes_as_display_name() {
        let json = serde_json::to_string(&Sampler::DpmPp2MKarras).unwrap();
        assert_eq!(json, "\"DPM++ 2M Karras\"");
        let parsed: Sampler = serde_json::from_str("\"Euler a\"").unwrap();
        assert_eq!(parsed, Sampler::EulerA);
    }

    #[test]
    fn test_item_kind_parse() {
        assert_eq!(ItemKind::parse("upscale"), Some(ItemKind::Upscale));
        assert_eq!(ItemKind::parse("unknown"), None);
        assert!(!ItemKind::Generate.is_follow_up());
        assert!(ItemKind::Reroll.is_follow_up());
    }

    #[test]
    fn test_control_custom_ids() {
        assert_eq!(InvisionControl::Reroll.custom_id(), "invision_reroll");
        assert_eq!(InvisionControl::Upscale(3).custom_id(), "invision_upscale_3");
        assert_eq!(
            InvisionControl::parse("invision_variation_2"),
            Some(InvisionControl::Variation(2))
        );
        assert_eq!(InvisionControl::parse("invision_upscale_x"), None);
        assert_eq!(InvisionControl::parse("invision_dimension_setting_menu"), None);
    }

    #[test]
    fn test_controls_for_grid() {
        let controls = InvisionControl::for_grid(ItemKind::Generate, 4);
        assert_eq!(controls.len(), 9);
        assert_eq!(controls[0], InvisionControl::Reroll);
        assert!(controls.contains(&InvisionControl::Upscale(3)));
        assert!(controls.contains(&InvisionControl::Variation(0)));

        assert!(InvisionControl::for_grid(ItemKind::Upscale, 1).is_empty());
    }

    #[test]
    fn test_control_into_item() {
        let interaction = InteractionRef::from_message("tok", "m1");
        let item = InvisionControl::Upscale(2).into_item(interaction.clone());
        assert_eq!(item.kind, ItemKind::Upscale);
        assert_eq!(item.source_index, 2);
        assert_eq!(item.interaction.source_message_id(), Some("m1"));

        let reroll = InvisionControl::Reroll.into_item(interaction);
        assert_eq!(reroll.kind, ItemKind::Reroll);
        assert_eq!(reroll.source_index, 0);
    }

    #[test]
    fn test_seed_for_falls_back_to_consecutive() {
        let explicit = EffectiveParams {
            seeds: vec![10, 42, 7],
            width: 512,
            height: 512,
            ..Default::default()
        };
        assert_eq!(explicit.seed_for(1), Some(42));
        assert_eq!(explicit.seed_for(3), None);

        let base_only = EffectiveParams {
            seeds: vec![100],
            width: 512,
            height: 512,
            ..Default::default()
        };
        assert_eq!(base_only.seed_for(0), Some(100));
        assert_eq!(base_only.seed_for(3), Some(103));

        assert_eq!(EffectiveParams::default().seed_for(0), None);
    }

    #[test]
    fn test_subseed_for_variation_grid() {
        let variation = EffectiveParams {
            seeds: vec![501; 4],
            subseeds: vec![11, 22, 33, 44],
            subseed_strength: 0.15,
            width: 512,
            height: 512,
        };
        assert_eq!(variation.seed_for(2), Some(501));
        assert_eq!(variation.subseed_for(2), Some(33));
        assert_eq!(variation.subseed_for(4), None);

        let plain = EffectiveParams {
            subseed_strength: 0.0,
            ..variation
        };
        assert_eq!(plain.subseed_for(2), None);
    }

    #[test]
    fn test_params_from_record() {
        let record = GenerationRecord {
            id: Some(1),
            message_id: "m1".into(),
            sort_order: 2,
            member_id: None,
            prompt: "a cat".into(),
            negative_prompt: "blurry".into(),
            sampler: Sampler::DpmPp2M,
            use_hires_fix: true,
            seed: 1234,
            subseed: Some(77),
            subseed_strength: 0.15,
            width: 768,
            height: 768,
            created_at: None,
        };
        let params = GenerationParams::from_record(&record);
        assert_eq!(params.seed, 1234);
        assert_eq!(params.subseed, Some(77));
        assert_eq!(params.subseed_strength, 0.15);
        assert_eq!(params.expected_images(), 1);

        let rerolled = params.clone().with_random_seed();
        assert_eq!(rerolled.seed, -1);
        assert_eq!(rerolled.subseed, None);
        assert_eq!(rerolled.subseed_strength, 0.0);
        assert_eq!(params.with_batch(2, 2).expected_images(), 4);
    }
}
