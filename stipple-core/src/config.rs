use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One LoRA adapter to fetch and attach at startup.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    /// Hugging Face repository id, or a local directory.
    pub source: String,
    pub weights_file: String,
    pub name: String,
    pub blend_weight: f32,
}

impl AdapterConfig {
    pub fn new(source: &str, weights_file: &str, name: &str, blend_weight: f32) -> Self {
        Self {
            source: source.to_string(),
            weights_file: weights_file.to_string(),
            name: name.to_string(),
            blend_weight,
        }
    }
}

/// Everything needed to build the pipeline once at startup.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub base_model: String,
    pub vae: String,
    pub use_f16: bool,
    pub sliced_attention_size: Option<usize>,
    pub adapters: Vec<AdapterConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_model: "stabilityai/stable-diffusion-xl-base-1.0".to_string(),
            vae: "madebyollin/sdxl-vae-fp16-fix".to_string(),
            use_f16: true,
            sliced_attention_size: None,
            adapters: vec![
                AdapterConfig::new(
                    "artificialguybr/LogoRedmond-LogoLoraForSDXL-V2",
                    "LogoRedmondV2-Logo-LogoRedmAF.safetensors",
                    "LogoRedmondV2",
                    0.7,
                ),
                AdapterConfig::new(
                    "artificialguybr/StickersRedmond",
                    "StickersRedmond.safetensors",
                    "StickersRedmond",
                    0.5,
                ),
                AdapterConfig::new(
                    "artificialguybr/ColoringBookRedmond",
                    "ColoringBookRedmond-ColoringBookAF.safetensors",
                    "ColoringBookRedmond",
                    0.5,
                ),
            ],
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse pipeline config {}", path.display()))
    }

    /// Names of the configured adapters, in activation order.
    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name.clone()).collect()
    }

    /// Blend weights parallel to [`Self::adapter_names`].
    pub fn blend_weights(&self) -> Vec<f32> {
        self.adapters.iter().map(|a| a.blend_weight).collect()
    }
}
