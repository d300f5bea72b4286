use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::stable_diffusion::{
    clip, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL, StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

mod config;
mod text;

pub use config::DEFAULT_GUIDANCE_SCALE;
use config::*;
use text::TextEncoder;

use crate::{
    lora::{fuse_adapters, AdapterRegistry, Component, LoraAdapter},
    resolve_file, select_best_device, tensor_to_image, DeviceMap, GenerationRequest, Loader,
    ModelLike, PipelineConfig,
};

pub struct SdxlModel {
    device: Device,
    dtype: DType,
    sliced_attention_size: Option<usize>,
    text_encoders: [TextEncoder; 2],
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

/// Checks the request against what the SDXL pipeline can run.
fn check_request(request: &GenerationRequest) -> Result<()> {
    anyhow::ensure!(
        request.num_inference_steps > 0,
        "num_inference_steps must be at least 1"
    );
    for (axis, size) in [("width", request.width), ("height", request.height)] {
        anyhow::ensure!(
            size > 0 && size % 8 == 0,
            "{axis} must be a positive multiple of 8, got {size}"
        );
    }
    Ok(())
}

impl SdxlModel {
    /// Unconditional then conditional embeddings of both encoders,
    /// concatenated on the feature axis: `(2, 77, 2048)`.
    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let mut per_encoder = Vec::with_capacity(self.text_encoders.len());
        for encoder in &self.text_encoders {
            let cond = encoder.encode(prompt, &self.device)?;
            let uncond = encoder.encode("", &self.device)?;
            per_encoder.push(Tensor::cat(&[uncond, cond], 0)?);
        }
        Ok(Tensor::cat(&per_encoder, D::Minus1)?.to_dtype(self.dtype)?)
    }
}

impl ModelLike for SdxlModel {
    fn run(&self, request: &GenerationRequest) -> Result<DynamicImage> {
        check_request(request)?;
        let (width, height) = (request.width, request.height);
        let guidance = request.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE);
        let use_guidance = guidance > 1.0;

        if let Some(seed) = request.seed {
            if let Err(e) = self.device.set_seed(seed) {
                warn!(error = %e, "could not seed device");
            }
        }

        let sd_config =
            StableDiffusionConfig::sdxl(self.sliced_attention_size, Some(height), Some(width));
        let mut scheduler = sd_config.build_scheduler(request.num_inference_steps)?;

        let text_embeddings = self.encode_prompt(&request.prompt)?;
        let text_embeddings = if use_guidance {
            text_embeddings
        } else {
            text_embeddings.i(1..2)?
        };

        let latents = (Tensor::randn(0f32, 1f32, (1, 4, height / 8, width / 8), &self.device)?
            * scheduler.init_noise_sigma())?;
        let mut latents = latents.to_dtype(self.dtype)?;

        let timesteps = scheduler.timesteps().to_vec();
        for (step, &timestep) in timesteps.iter().enumerate() {
            let input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let input = scheduler.scale_model_input(input, timestep)?;
            let noise_pred = self.unet.forward(&input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, cond) = (&chunks[0], &chunks[1]);
                (uncond + ((cond - uncond)? * guidance)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            debug!(step = step + 1, of = timesteps.len(), "denoising");
        }

        let image = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        let image = ((image.to_dtype(DType::F32)? / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let image = (image.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?.i(0)?;
        tensor_to_image(&image)
    }
}

/// Local paths of every file the pipeline reads.
struct SdxlFiles {
    clip_tokenizer: PathBuf,
    clip2_tokenizer: PathBuf,
    text_encoder: PathBuf,
    text_encoder_2: PathBuf,
    unet: PathBuf,
    vae: PathBuf,
    adapters: Vec<(String, PathBuf)>,
}

impl SdxlFiles {
    async fn fetch(api: &Api, config: &PipelineConfig, use_f16: bool) -> Result<Self> {
        let base = config.base_model.as_str();
        let mut adapters = Vec::with_capacity(config.adapters.len());
        for adapter in &config.adapters {
            let path = resolve_file(api, &adapter.source, &adapter.weights_file)
                .await
                .with_context(|| format!("failed to get weights of adapter {}", adapter.name))?;
            adapters.push((adapter.name.clone(), path));
        }
        Ok(Self {
            clip_tokenizer: resolve_file(api, CLIP_TOKENIZER_REPO, TOKENIZER_FILE).await?,
            clip2_tokenizer: resolve_file(api, CLIP2_TOKENIZER_REPO, TOKENIZER_FILE).await?,
            text_encoder: resolve_file(api, base, TEXT_ENCODER_FILE).await?,
            text_encoder_2: resolve_file(api, base, TEXT_ENCODER_2_FILE).await?,
            unet: resolve_file(api, base, unet_file(use_f16)).await?,
            vae: resolve_file(api, &config.vae, VAE_FILE).await?,
            adapters,
        })
    }
}

/// Weights for one component, with the active adapters fused in when any of
/// them targets it.
fn component_weights(
    path: &Path,
    component: Component,
    registry: &AdapterRegistry,
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    if !registry.active_touches(component) {
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], dtype, device)? };
        return Ok(vb);
    }
    let mut weights = candle_core::safetensors::load(path, device)
        .with_context(|| format!("failed to read {component} weights"))?;
    fuse_adapters(&mut weights, component, registry.active())?;
    Ok(VarBuilder::from_tensors(weights, dtype, device))
}

fn load_text_encoder(
    tokenizer: &Path,
    weights: &Path,
    config: clip::Config,
    component: Component,
    registry: &AdapterRegistry,
    device: &Device,
) -> Result<TextEncoder> {
    let tokenizer = Tokenizer::from_file(tokenizer)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("failed to load {component} tokenizer"))?;
    // Text encoders run in f32; their outputs are cast to the model dtype.
    let vb = component_weights(weights, component, registry, DType::F32, device)?;
    let model = clip::ClipTextTransformer::new(vb, &config)
        .with_context(|| format!("failed to load {component}"))?;
    TextEncoder::new(tokenizer, model, &config)
}

fn build(files: SdxlFiles, config: PipelineConfig, device_map: DeviceMap) -> Result<SdxlModel> {
    let device = select_best_device(device_map).context("failed to set up device")?;
    let dtype = if config.use_f16 && !device.is_cpu() {
        DType::F16
    } else {
        DType::F32
    };

    // --- Adapters ---
    let mut registry = AdapterRegistry::new();
    for (name, path) in &files.adapters {
        registry.register(LoraAdapter::load(path, name, &device)?)?;
    }
    registry.set_adapters(&config.adapter_names(), &config.blend_weights())?;
    info!(adapters = ?registry.names(), "adapters set");

    // --- Text encoders ---
    let text_encoders = [
        load_text_encoder(
            &files.clip_tokenizer,
            &files.text_encoder,
            clip::Config::sdxl(),
            Component::TextEncoder,
            &registry,
            &device,
        )?,
        load_text_encoder(
            &files.clip2_tokenizer,
            &files.text_encoder_2,
            clip::Config::sdxl2(),
            Component::TextEncoder2,
            &registry,
            &device,
        )?,
    ];

    // --- UNet ---
    let vb = component_weights(&files.unet, Component::Unet, &registry, dtype, &device)?;
    let unet = UNet2DConditionModel::new(
        vb,
        4,
        4,
        cfg!(feature = "flash-attn"),
        unet_config(config.sliced_attention_size),
    )
    .context("failed to load unet")?;

    // --- VAE ---
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&files.vae], dtype, &device)? };
    let vae = AutoEncoderKL::new(vb, 3, 3, vae_config()).context("failed to load vae")?;

    info!(?dtype, device = ?device, "sdxl pipeline ready");
    Ok(SdxlModel {
        device,
        dtype,
        sliced_attention_size: config.sliced_attention_size,
        text_encoders,
        unet,
        vae,
    })
}

pub struct SdxlLoader;

impl Loader for SdxlLoader {
    type Model = SdxlModel;

    async fn load(config: &PipelineConfig, api: Api, device_map: DeviceMap) -> Result<Self::Model> {
        // CPU runs in f32, so only fetch the fp16 unet when a GPU may be used.
        let use_f16 = config.use_f16 && device_map != DeviceMap::ForceCpu;
        let files = SdxlFiles::fetch(&api, config, use_f16).await?;
        let config = config.clone();
        tokio::task::spawn_blocking(move || build(files, config, device_map))
            .await
            .context("model construction panicked")?
    }
}
