//! Single-construction access to the loaded pipeline.
//!
//! A [`ModelProvider`] is built once at process start and shared by handle
//! with every request handler. The model behind it is constructed at most
//! once: either up front ([`ModelProvider::ready`]) or by the first caller of
//! [`ModelProvider::get`] ([`ModelProvider::lazy`]).

use std::{future::Future, pin::Pin, sync::Arc};

use anyhow::Result;
use tokio::sync::OnceCell;
use tracing::info;

use crate::ModelLike;

pub type SharedModel = Arc<dyn ModelLike>;

type InitFuture = Pin<Box<dyn Future<Output = Result<SharedModel>> + Send>>;
type Init = Box<dyn Fn() -> InitFuture + Send + Sync>;

pub struct ModelProvider {
    cell: OnceCell<SharedModel>,
    init: Option<Init>,
}

impl ModelProvider {
    /// Wraps a model that has already been constructed.
    pub fn ready(model: SharedModel) -> Self {
        Self {
            cell: OnceCell::new_with(Some(model)),
            init: None,
        }
    }

    /// Defers construction to the first [`get`](Self::get).
    ///
    /// A failed construction is not cached; the next caller retries.
    pub fn lazy<F, Fut>(init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SharedModel>> + Send + 'static,
    {
        Self {
            cell: OnceCell::new(),
            init: Some(Box::new(move || -> InitFuture { Box::pin(init()) })),
        }
    }

    pub async fn get(&self) -> Result<SharedModel> {
        let model = self
            .cell
            .get_or_try_init(|| async {
                let init = self
                    .init
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("model provider has no initializer"))?;
                info!("constructing model on first use");
                init().await
            })
            .await?;
        Ok(model.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}
