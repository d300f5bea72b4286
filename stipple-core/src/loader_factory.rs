use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Result};
use hf_hub::api::tokio::Api;
use tracing::info;

use crate::{DeviceMap, Loader, ModelLike, PipelineConfig, SdxlLoader};

/// Model families recognized from the base model name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelType {
    StableDiffusionXl,
}

impl ModelType {
    /// Detect model type from model name.
    ///
    /// Hub repos are matched on an "XL" anywhere in the id. A local directory
    /// carries no naming convention and is loaded as SDXL.
    pub fn from_name(model_name: &str) -> Option<Self> {
        if Path::new(model_name).is_dir() || model_name.to_uppercase().contains("XL") {
            Some(ModelType::StableDiffusionXl)
        } else {
            None
        }
    }
}

/// Load the pipeline named by `config.base_model`, detecting the loader.
pub async fn load_model(
    config: &PipelineConfig,
    api: Api,
    device_map: DeviceMap,
) -> Result<Arc<dyn ModelLike>> {
    let model_type = ModelType::from_name(&config.base_model)
        .ok_or_else(|| anyhow!("Unsupported model type: {}", config.base_model))?;

    info!(
        model = %config.base_model,
        detected = ?model_type,
        adapters = config.adapters.len(),
        "loading model"
    );

    match model_type {
        ModelType::StableDiffusionXl => {
            let model = SdxlLoader::load(config, api, device_map).await?;
            Ok(Arc::new(model))
        }
    }
}
