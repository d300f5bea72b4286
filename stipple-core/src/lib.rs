pub mod config;
pub mod device_map;
pub mod encode;
mod error;
pub mod generation;
pub mod lifecycle;
pub mod loader;
mod loader_factory;
pub mod lora;
mod util;

mod sdxl;

pub use config::*;
pub use device_map::*;
pub use encode::*;
pub use error::AdapterError;
pub use generation::generate_images;
use image::DynamicImage;
pub use lifecycle::{ModelProvider, SharedModel};
pub use loader::*;
pub use loader_factory::*;
pub use sdxl::{SdxlLoader, SdxlModel, DEFAULT_GUIDANCE_SCALE};
use serde::{Deserialize, Serialize};
pub(crate) use util::*;

pub const DEFAULT_STEPS: usize = 20;
pub const DEFAULT_BATCH_SIZE: usize = 1;
pub const DEFAULT_SIZE: usize = 512;

fn default_steps() -> usize {
    DEFAULT_STEPS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_size() -> usize {
    DEFAULT_SIZE
}

/// Body of a text-to-image request.
///
/// Only type coercion is applied here; zero steps or sizes are passed through
/// to the model, which decides whether it can honour them.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, PartialOrd)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default = "default_steps")]
    pub num_inference_steps: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_size")]
    pub width: usize,
    #[serde(default = "default_size")]
    pub height: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            num_inference_steps: DEFAULT_STEPS,
            batch_size: DEFAULT_BATCH_SIZE,
            width: DEFAULT_SIZE,
            height: DEFAULT_SIZE,
            guidance_scale: None,
            seed: None,
        }
    }
}

/// A loaded text-to-image pipeline. One call produces one image.
pub trait ModelLike: Send + Sync {
    fn run(&self, request: &GenerationRequest) -> anyhow::Result<DynamicImage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_fill_missing_fields() {
        let request: GenerationRequest =
            serde_json::from_str(r#"{"prompt": "a cat sitting on a mat"}"#).unwrap();
        assert_eq!(request, GenerationRequest::new("a cat sitting on a mat"));
        assert_eq!(request.num_inference_steps, 20);
        assert_eq!(request.batch_size, 1);
        assert_eq!((request.width, request.height), (512, 512));
    }

    #[test]
    fn request_zero_values_are_not_rejected() {
        let request: GenerationRequest = serde_json::from_str(
            r#"{"prompt": "x", "num_inference_steps": 0, "batch_size": 0, "width": 0}"#,
        )
        .unwrap();
        assert_eq!(request.num_inference_steps, 0);
        assert_eq!(request.batch_size, 0);
        assert_eq!(request.width, 0);
    }

    #[test]
    fn request_requires_prompt() {
        let err = serde_json::from_str::<GenerationRequest>(r#"{"batch_size": 2}"#).unwrap_err();
        assert!(err.to_string().contains("prompt"));
    }
}
