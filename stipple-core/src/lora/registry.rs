use std::sync::Arc;

use tracing::info;

use super::{Component, LoraAdapter};
use crate::AdapterError;

/// An adapter selected for fusion together with its blend weight.
#[derive(Debug, Clone)]
pub struct ActiveAdapter {
    pub adapter: Arc<LoraAdapter>,
    pub blend_weight: f32,
}

/// Adapters loaded under a name, and the subset currently activated.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    loaded: Vec<Arc<LoraAdapter>>,
    active: Vec<ActiveAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: LoraAdapter) -> Result<(), AdapterError> {
        if self.get(adapter.name()).is_some() {
            return Err(AdapterError::DuplicateAdapter(adapter.name().to_string()));
        }
        self.loaded.push(Arc::new(adapter));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<LoraAdapter>> {
        self.loaded.iter().find(|a| a.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.loaded.iter().map(|a| a.name().to_string()).collect()
    }

    /// Replaces the active list. Every name must match a registered adapter
    /// exactly, and `blend_weights` must be parallel to `names`. On error the
    /// previous active list is kept.
    pub fn set_adapters<S: AsRef<str>>(
        &mut self,
        names: &[S],
        blend_weights: &[f32],
    ) -> Result<(), AdapterError> {
        if names.len() != blend_weights.len() {
            return Err(AdapterError::WeightCountMismatch {
                names: names.len(),
                weights: blend_weights.len(),
            });
        }

        let active = names
            .iter()
            .zip(blend_weights)
            .map(|(name, &blend_weight)| {
                let name = name.as_ref();
                let adapter = self.get(name).ok_or_else(|| AdapterError::UnknownAdapter {
                    name: name.to_string(),
                    loaded: self.names(),
                })?;
                Ok(ActiveAdapter { adapter: adapter.clone(), blend_weight })
            })
            .collect::<Result<Vec<_>, AdapterError>>()?;

        for a in &active {
            info!(adapter = a.adapter.name(), blend_weight = a.blend_weight, "adapter activated");
        }
        self.active = active;
        Ok(())
    }

    pub fn active(&self) -> &[ActiveAdapter] {
        &self.active
    }

    /// Whether any active adapter patches `component`.
    pub fn active_touches(&self, component: Component) -> bool {
        self.active.iter().any(|a| a.adapter.touches(component))
    }
}
