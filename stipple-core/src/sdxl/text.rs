use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::clip;
use tokenizers::Tokenizer;
use tracing::warn;

/// A CLIP text encoder with its tokenizer and padding rules.
pub struct TextEncoder {
    tokenizer: Tokenizer,
    model: clip::ClipTextTransformer,
    pad_id: u32,
    max_len: usize,
}

impl TextEncoder {
    pub fn new(
        tokenizer: Tokenizer,
        model: clip::ClipTextTransformer,
        config: &clip::Config,
    ) -> Result<Self> {
        let pad = config.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = tokenizer
            .token_to_id(pad)
            .with_context(|| format!("tokenizer has no padding token {pad}"))?;
        Ok(Self {
            tokenizer,
            model,
            pad_id,
            max_len: config.max_position_embeddings,
        })
    }

    /// Hidden states for `prompt`, shape `(1, max_len, hidden)`.
    pub fn encode(&self, prompt: &str, device: &Device) -> Result<Tensor> {
        let mut tokens = token_ids(&self.tokenizer, prompt)?;
        if tokens.len() > self.max_len {
            warn!(tokens = tokens.len(), max = self.max_len, "prompt truncated");
        }
        pad_tokens(&mut tokens, self.max_len, self.pad_id);
        let input_ids = Tensor::new(tokens.as_slice(), device)?.unsqueeze(0)?;
        Ok(self.model.forward(&input_ids)?)
    }
}

fn token_ids(tokenizer: &Tokenizer, prompt: &str) -> Result<Vec<u32>> {
    Ok(tokenizer
        .encode(prompt, true)
        .map_err(anyhow::Error::msg)?
        .get_ids()
        .to_vec())
}

/// Truncates or pads `tokens` to exactly `len`.
pub fn pad_tokens(tokens: &mut Vec<u32>, len: usize, pad_id: u32) {
    tokens.truncate(len);
    tokens.resize(len, pad_id);
}
