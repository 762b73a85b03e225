use serde_json::{Map, Value, json};

use crate::provider::Model;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FluxKontextTier {
    Pro,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VeoTier {
    Quality,
    Fast,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KlingTier {
    Standard,
    Pro,
}

/// One generation request, exactly one variant per provider model.
/// Each variant carries that model's parameter shape and nothing else;
/// the wire transformation below is the only place the shapes flatten.
#[derive(Clone, Debug)]
pub enum GenerationRequest {
    /// Text-to-image with optional reference images.
    Gpt4oImage {
        prompt: String,
        size: Option<String>,
        files_url: Vec<String>,
        n: Option<u32>,
    },
    /// Image generation/editing.
    FluxKontext {
        prompt: String,
        tier: FluxKontextTier,
        aspect_ratio: Option<String>,
        input_image: Option<String>,
        seed: Option<u64>,
    },
    /// Text/image-to-video. `image_urls` empty means text-only.
    Veo {
        prompt: String,
        tier: VeoTier,
        image_urls: Vec<String>,
        aspect_ratio: Option<String>,
        seed: Option<u64>,
    },
    /// Text/image-to-video.
    Runway {
        prompt: String,
        duration: Option<u32>,
        quality: Option<String>,
        aspect_ratio: Option<String>,
        image_url: Option<String>,
    },
    /// Frame-pair video: a required start frame, optional end frame.
    Kling {
        prompt: String,
        tier: KlingTier,
        start_frame: String,
        end_frame: Option<String>,
        duration: Option<u32>,
    },
}

impl GenerationRequest {
    pub fn model(&self) -> Model {
        match self {
            Self::Gpt4oImage { .. } => Model::Gpt4oImage,
            Self::FluxKontext { tier, .. } => match tier {
                FluxKontextTier::Pro => Model::FluxKontextPro,
                FluxKontextTier::Max => Model::FluxKontextMax,
            },
            Self::Veo { tier, .. } => match tier {
                VeoTier::Quality => Model::Veo,
                VeoTier::Fast => Model::VeoFast,
            },
            Self::Runway { .. } => Model::Runway,
            Self::Kling { tier, .. } => match tier {
                KlingTier::Standard => Model::KlingStandard,
                KlingTier::Pro => Model::KlingPro,
            },
        }
    }

    /// Produce the creation endpoint and wire body for this request.
    ///
    /// Total over the closed variant set. Flattening rules are per model:
    /// most flatten parameters at the request root; the Kling family goes
    /// through the unified jobs endpoint and nests parameters under
    /// `input`. Optional fields absent from the value are absent from the
    /// body; no nulls on the wire.
    pub fn to_wire(&self) -> (&'static str, Value) {
        let path = self.model().create_endpoint();

        let body = match self {
            Self::Gpt4oImage {
                prompt,
                size,
                files_url,
                n,
            } => {
                let mut body = Map::new();
                body.insert("prompt".into(), json!(prompt));
                if let Some(size) = size {
                    body.insert("size".into(), json!(size));
                }
                if !files_url.is_empty() {
                    body.insert("filesUrl".into(), json!(files_url));
                }
                if let Some(n) = n {
                    body.insert("nVariants".into(), json!(n));
                }
                Value::Object(body)
            }

            Self::FluxKontext {
                prompt,
                tier,
                aspect_ratio,
                input_image,
                seed,
            } => {
                let model = match tier {
                    FluxKontextTier::Pro => "flux-kontext-pro",
                    FluxKontextTier::Max => "flux-kontext-max",
                };
                let mut body = Map::new();
                body.insert("prompt".into(), json!(prompt));
                body.insert("model".into(), json!(model));
                if let Some(aspect_ratio) = aspect_ratio {
                    body.insert("aspectRatio".into(), json!(aspect_ratio));
                }
                if let Some(input_image) = input_image {
                    body.insert("inputImage".into(), json!(input_image));
                }
                if let Some(seed) = seed {
                    body.insert("seed".into(), json!(seed));
                }
                Value::Object(body)
            }

            Self::Veo {
                prompt,
                tier,
                image_urls,
                aspect_ratio,
                seed,
            } => {
                let model = match tier {
                    VeoTier::Quality => "veo3",
                    VeoTier::Fast => "veo3_fast",
                };
                let mut body = Map::new();
                body.insert("prompt".into(), json!(prompt));
                body.insert("model".into(), json!(model));
                if !image_urls.is_empty() {
                    body.insert("imageUrls".into(), json!(image_urls));
                }
                if let Some(aspect_ratio) = aspect_ratio {
                    body.insert("aspectRatio".into(), json!(aspect_ratio));
                }
                if let Some(seed) = seed {
                    body.insert("seeds".into(), json!(seed));
                }
                Value::Object(body)
            }

            Self::Runway {
                prompt,
                duration,
                quality,
                aspect_ratio,
                image_url,
            } => {
                let mut body = Map::new();
                body.insert("prompt".into(), json!(prompt));
                if let Some(duration) = duration {
                    body.insert("duration".into(), json!(duration));
                }
                if let Some(quality) = quality {
                    body.insert("quality".into(), json!(quality));
                }
                if let Some(aspect_ratio) = aspect_ratio {
                    body.insert("aspectRatio".into(), json!(aspect_ratio));
                }
                if let Some(image_url) = image_url {
                    body.insert("imageUrl".into(), json!(image_url));
                }
                Value::Object(body)
            }

            Self::Kling {
                prompt,
                tier,
                start_frame,
                end_frame,
                duration,
            } => {
                let model = match tier {
                    KlingTier::Standard => "kling/v2-1-standard",
                    KlingTier::Pro => "kling/v2-1-pro",
                };
                let mut input = Map::new();
                input.insert("prompt".into(), json!(prompt));
                input.insert("image_url".into(), json!(start_frame));
                if let Some(end_frame) = end_frame {
                    input.insert("tail_image_url".into(), json!(end_frame));
                }
                if let Some(duration) = duration {
                    input.insert("duration".into(), json!(duration));
                }
                json!({ "model": model, "input": input })
            }
        };

        (path, body)
    }
}
