use std::future::Future;

use anyhow::Result;
use hf_hub::api::tokio::Api;

use crate::{DeviceMap, ModelLike, PipelineConfig};

pub trait Loader {
    type Model: ModelLike;

    /// Fetches weights, attaches the configured adapters and builds the model.
    fn load(
        config: &PipelineConfig,
        api: Api,
        device_map: DeviceMap,
    ) -> impl Future<Output = Result<Self::Model>> + Send
    where
        Self: Sized;
}
