//! LoRA adapters: loading, named registration and fusion into base weights.

mod fuse;
mod keys;
mod registry;

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Shape, Tensor};
use tracing::{debug, info, warn};

pub use fuse::{fuse_adapters, FuseReport};
pub use keys::{
    flatten_weight_name, parse_key, sgm_to_diffusers, Component, LoraPart, LoraTarget,
    SDXL_LAYERS_PER_BLOCK,
};
pub use registry::{ActiveAdapter, AdapterRegistry};

use crate::AdapterError;

/// One low-rank pair: `delta = (alpha / rank) * up · down`.
#[derive(Debug, Clone)]
pub struct LoraLayer {
    /// `[rank, in]` or `[rank, in, kh, kw]`
    pub down: Tensor,
    /// `[out, rank]` or `[out, rank, 1, 1]`
    pub up: Tensor,
    /// Defaults to the rank when the file carries none.
    pub alpha: Option<f32>,
}

impl LoraLayer {
    pub fn rank(&self) -> Result<usize> {
        Ok(self.down.dim(0)?)
    }

    pub fn scale(&self) -> Result<f64> {
        let rank = self.rank()? as f32;
        Ok((self.alpha.unwrap_or(rank) / rank) as f64)
    }

    /// Weight delta scaled by `blend`, shaped like the base weight and in f32.
    pub fn delta(&self, blend: f32, shape: &Shape) -> Result<Tensor> {
        let up = self.up.to_dtype(DType::F32)?.flatten_from(1)?;
        let down = self.down.to_dtype(DType::F32)?.flatten_from(1)?;
        let delta = (up.matmul(&down)? * (self.scale()? * blend as f64))?;
        delta
            .reshape(shape.clone())
            .with_context(|| format!("lora delta {:?} does not fit weight {:?}", delta.dims(), shape))
    }
}

#[derive(Default)]
struct PartialLayer {
    down: Option<Tensor>,
    up: Option<Tensor>,
    alpha: Option<f32>,
}

/// A named set of LoRA layers read from one weights file.
#[derive(Debug)]
pub struct LoraAdapter {
    name: String,
    layers: HashMap<LoraTarget, LoraLayer>,
}

impl LoraAdapter {
    /// Reads a safetensors LoRA file onto `device`.
    pub fn load(path: impl AsRef<Path>, name: &str, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        info!(adapter = name, path = %path.display(), "loading lora adapter");
        let tensors = candle_core::safetensors::load(path, device)
            .with_context(|| format!("failed to read lora weights {}", path.display()))?;
        Self::from_tensors(name, tensors)
    }

    pub fn from_tensors(name: &str, tensors: HashMap<String, Tensor>) -> Result<Self> {
        let mut partial: HashMap<LoraTarget, PartialLayer> = HashMap::new();
        let mut skipped = 0usize;

        for (key, tensor) in tensors {
            let Some((target, part)) = parse_key(&key) else {
                skipped += 1;
                debug!(adapter = name, key = %key, "skipping tensor");
                continue;
            };
            let entry = partial.entry(target).or_default();
            match part {
                LoraPart::Down => entry.down = Some(tensor),
                LoraPart::Up => entry.up = Some(tensor),
                LoraPart::Alpha => {
                    let alpha = tensor
                        .to_dtype(DType::F32)?
                        .to_device(&Device::Cpu)?
                        .flatten_all()?
                        .to_vec1::<f32>()?;
                    entry.alpha = alpha.first().copied();
                }
            }
        }

        let mut layers = HashMap::with_capacity(partial.len());
        for (target, layer) in partial {
            match (layer.down, layer.up) {
                (Some(down), Some(up)) => {
                    layers.insert(target, LoraLayer { down, up, alpha: layer.alpha });
                }
                _ => warn!(
                    adapter = name,
                    component = %target.component,
                    module = %target.module,
                    "lora layer is missing its down or up half"
                ),
            }
        }

        if layers.is_empty() {
            return Err(AdapterError::Empty(name.to_string()).into());
        }
        info!(adapter = name, layers = layers.len(), skipped, "lora adapter loaded");

        Ok(Self { name: name.to_string(), layers })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers(&self) -> impl Iterator<Item = (&LoraTarget, &LoraLayer)> {
        self.layers.iter()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn touches(&self, component: Component) -> bool {
        self.layers.keys().any(|t| t.component == component)
    }
}
