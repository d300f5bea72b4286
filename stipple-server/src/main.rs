use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use hf_hub::api::tokio::ApiBuilder;
use stipple_core::{load_model, DeviceMap, ModelProvider, PipelineConfig};
use stipple_server::{router, AppState};
use tokio::{self, net::TcpListener};
use tracing::info;
use tracing_subscriber::EnvFilter;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Stipple text-to-image server")]
struct Args {
    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Pipeline config (JSON); defaults to SDXL base with the Redmond adapters
    #[arg(long)]
    config: Option<PathBuf>,

    /// Load the model on the first request instead of at startup
    #[arg(long)]
    lazy: bool,

    /// Hugging Face token for gated weights
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,

    /// Host address to bind the server to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    let mut builder = ApiBuilder::from_env();
    if let Some(token) = args.hf_token.clone() {
        builder = builder.with_token(Some(token));
    }
    let api = builder.build()?;
    let device_map = DeviceMap::from_cpu_flag(args.cpu);

    let provider = if args.lazy {
        ModelProvider::lazy(move || {
            let (config, api) = (config.clone(), api.clone());
            async move { load_model(&config, api, device_map).await }
        })
    } else {
        ModelProvider::ready(load_model(&config, api, device_map).await?)
    };

    let app = router(AppState(Arc::new(provider)));

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    info!(address = %listener.local_addr()?, lazy = args.lazy, "started server");
    axum::serve(listener, app).await?;

    Ok(())
}
