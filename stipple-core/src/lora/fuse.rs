use std::collections::HashMap;

use anyhow::{Context, Result};
use candle_core::{DType, Tensor};
use tracing::{info, warn};

use super::{flatten_weight_name, ActiveAdapter, Component};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FuseReport {
    /// Base weights that received at least one delta.
    pub fused: usize,
    /// Adapter layers with no matching base weight.
    pub unmatched: usize,
}

/// Adds `blend * scale * up · down` of every active adapter layer that
/// targets `component` onto the matching weight in `weights`. Deltas of
/// several adapters on one weight are summed before the add.
pub fn fuse_adapters(
    weights: &mut HashMap<String, Tensor>,
    component: Component,
    active: &[ActiveAdapter],
) -> Result<FuseReport> {
    let index: HashMap<String, String> = weights
        .keys()
        .filter_map(|name| flatten_weight_name(name).map(|flat| (flat, name.clone())))
        .collect();

    let mut deltas: HashMap<&str, Tensor> = HashMap::new();
    let mut report = FuseReport::default();

    for ActiveAdapter { adapter, blend_weight } in active {
        for (target, layer) in adapter.layers() {
            if target.component != component {
                continue;
            }
            let Some(name) = index.get(&target.module) else {
                report.unmatched += 1;
                continue;
            };
            let base = &weights[name];
            let delta = layer.delta(*blend_weight, base.shape()).with_context(|| {
                format!("adapter `{}` does not fit {component} weight {name}", adapter.name())
            })?;
            let delta = match deltas.remove(name.as_str()) {
                Some(sum) => (sum + delta)?,
                None => delta,
            };
            deltas.insert(name.as_str(), delta);
        }
    }

    for (name, delta) in deltas {
        let base = &weights[name];
        let fused = (base.to_dtype(DType::F32)? + delta.to_device(base.device())?)?
            .to_dtype(base.dtype())?;
        weights.insert(name.to_string(), fused);
        report.fused += 1;
    }

    if report.unmatched > 0 {
        warn!(%component, unmatched = report.unmatched, "lora layers without a base weight");
    }
    info!(%component, fused = report.fused, "fused lora adapters");
    Ok(report)
}
