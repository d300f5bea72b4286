use candle_transformers::models::stable_diffusion::{unet_2d, vae};

pub const VAE_SCALE: f64 = 0.13025;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 5.0;

pub const CLIP_TOKENIZER_REPO: &str = "openai/clip-vit-large-patch14";
pub const CLIP2_TOKENIZER_REPO: &str = "laion/CLIP-ViT-bigG-14-laion2B-39B-b160k";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub const TEXT_ENCODER_FILE: &str = "text_encoder/model.safetensors";
pub const TEXT_ENCODER_2_FILE: &str = "text_encoder_2/model.safetensors";
pub const VAE_FILE: &str = "diffusion_pytorch_model.safetensors";

pub fn unet_file(use_f16: bool) -> &'static str {
    if use_f16 {
        "unet/diffusion_pytorch_model.fp16.safetensors"
    } else {
        "unet/diffusion_pytorch_model.safetensors"
    }
}

// https://huggingface.co/stabilityai/stable-diffusion-xl-base-1.0/blob/main/unet/config.json
pub fn unet_config(sliced_attention_size: Option<usize>) -> unet_2d::UNet2DConditionModelConfig {
    let bc = |out_channels, use_cross_attn, attention_head_dim| unet_2d::BlockConfig {
        out_channels,
        use_cross_attn,
        attention_head_dim,
    };
    unet_2d::UNet2DConditionModelConfig {
        blocks: vec![bc(320, None, 5), bc(640, Some(2), 10), bc(1280, Some(10), 20)],
        center_input_sample: false,
        cross_attention_dim: 2048,
        downsample_padding: 1,
        flip_sin_to_cos: true,
        freq_shift: 0.,
        layers_per_block: crate::lora::SDXL_LAYERS_PER_BLOCK,
        mid_block_scale_factor: 1.,
        norm_eps: 1e-5,
        norm_num_groups: 32,
        sliced_attention_size,
        use_linear_projection: true,
    }
}

// https://huggingface.co/madebyollin/sdxl-vae-fp16-fix/blob/main/config.json
pub fn vae_config() -> vae::AutoEncoderKLConfig {
    vae::AutoEncoderKLConfig {
        block_out_channels: vec![128, 256, 512, 512],
        layers_per_block: 2,
        latent_channels: 4,
        norm_num_groups: 32,
        use_quant_conv: true,
        use_post_quant_conv: true,
    }
}
