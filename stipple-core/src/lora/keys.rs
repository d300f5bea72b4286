//! LoRA tensor names and where they land in the base model.
//!
//! Adapters ship in two layouts. Kohya files flatten module paths with
//! underscores (`lora_unet_..._to_q.lora_down.weight`) and, for SDXL, name
//! U-Net blocks the SGM way (`input_blocks_4_1`). Diffusers/peft files keep
//! dotted diffusers paths (`unet.down_blocks.1.attentions.0...lora_A.weight`).
//! Both are reduced to a [`LoraTarget`]: the model component plus the
//! underscore-flattened diffusers module path, which is also how base weight
//! names are indexed before fusing.

use std::fmt;

/// Sub-model a LoRA layer patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    Unet,
    TextEncoder,
    TextEncoder2,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Unet => "unet",
            Component::TextEncoder => "text_encoder",
            Component::TextEncoder2 => "text_encoder_2",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoraTarget {
    pub component: Component,
    /// Diffusers module path with `.` replaced by `_`, without `.weight`.
    pub module: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoraPart {
    Down,
    Up,
    Alpha,
}

/// SDXL U-Net resnet layers per down/up block.
pub const SDXL_LAYERS_PER_BLOCK: usize = 2;

const DOWN_SUFFIXES: [&str; 3] = [".lora_down.weight", ".lora_A.weight", ".lora.down.weight"];
const UP_SUFFIXES: [&str; 3] = [".lora_up.weight", ".lora_B.weight", ".lora.up.weight"];

/// Splits a LoRA tensor name into its target module and which part of the
/// low-rank pair it holds. Returns `None` for names this crate does not use.
pub fn parse_key(key: &str) -> Option<(LoraTarget, LoraPart)> {
    let (stem, part) = split_part(key)?;
    let (component, module) = split_component(stem)?;
    let module = match component {
        Component::Unet => sgm_to_diffusers(&module, SDXL_LAYERS_PER_BLOCK),
        _ => module,
    };
    Some((LoraTarget { component, module }, part))
}

/// Index key for a base weight tensor name, or `None` for non-weight tensors.
pub fn flatten_weight_name(name: &str) -> Option<String> {
    name.strip_suffix(".weight").map(|stem| stem.replace('.', "_"))
}

fn split_part(key: &str) -> Option<(&str, LoraPart)> {
    if let Some(stem) = key.strip_suffix(".alpha") {
        return Some((stem, LoraPart::Alpha));
    }
    for suffix in DOWN_SUFFIXES {
        if let Some(stem) = key.strip_suffix(suffix) {
            return Some((stem, LoraPart::Down));
        }
    }
    for suffix in UP_SUFFIXES {
        if let Some(stem) = key.strip_suffix(suffix) {
            return Some((stem, LoraPart::Up));
        }
    }
    None
}

fn split_component(stem: &str) -> Option<(Component, String)> {
    const KOHYA: [(&str, Component); 4] = [
        ("lora_unet_", Component::Unet),
        ("lora_te1_", Component::TextEncoder),
        ("lora_te2_", Component::TextEncoder2),
        ("lora_te_", Component::TextEncoder),
    ];
    const DIFFUSERS: [(&str, Component); 3] = [
        ("unet.", Component::Unet),
        ("text_encoder_2.", Component::TextEncoder2),
        ("text_encoder.", Component::TextEncoder),
    ];

    for (prefix, component) in KOHYA {
        if let Some(rest) = stem.strip_prefix(prefix) {
            return Some((component, rest.to_string()));
        }
    }
    for (prefix, component) in DIFFUSERS {
        if let Some(rest) = stem.strip_prefix(prefix) {
            return Some((component, rest.replace('.', "_")));
        }
    }
    None
}

/// Parses a leading `N_` (or a trailing `N`) off `s`.
fn take_index(s: &str) -> Option<(usize, &str)> {
    let (head, rest) = s.split_once('_').unwrap_or((s, ""));
    Some((head.parse().ok()?, rest))
}

fn join(prefix: String, rest: &str) -> String {
    if rest.is_empty() {
        prefix
    } else {
        format!("{prefix}_{rest}")
    }
}

fn resnet_layer(rest: &str) -> String {
    const RENAMES: [(&str, &str); 6] = [
        ("in_layers_0", "norm1"),
        ("in_layers_2", "conv1"),
        ("out_layers_0", "norm2"),
        ("out_layers_3", "conv2"),
        ("emb_layers_1", "time_emb_proj"),
        ("skip_connection", "conv_shortcut"),
    ];
    for (from, to) in RENAMES {
        if let Some(tail) = rest.strip_prefix(from) {
            return format!("{to}{tail}");
        }
    }
    rest.to_string()
}

/// Renames an underscore-flattened SGM U-Net path to the diffusers layout.
/// Paths already in diffusers form come back unchanged.
pub fn sgm_to_diffusers(module: &str, layers_per_block: usize) -> String {
    let slots = layers_per_block + 1;

    if let Some(rest) = module.strip_prefix("input_blocks_") {
        let Some((i, rest)) = take_index(rest) else {
            return module.to_string();
        };
        let Some((j, rest)) = take_index(rest) else {
            return module.to_string();
        };
        if i == 0 {
            return join("conv_in".to_string(), rest);
        }
        let (block, layer) = ((i - 1) / slots, (i - 1) % slots);
        return match j {
            0 if rest.starts_with("op") => join(
                format!("down_blocks_{block}_downsamplers_0_conv"),
                rest.trim_start_matches("op").trim_start_matches('_'),
            ),
            0 => join(format!("down_blocks_{block}_resnets_{layer}"), &resnet_layer(rest)),
            _ => join(format!("down_blocks_{block}_attentions_{layer}"), rest),
        };
    }

    if let Some(rest) = module.strip_prefix("middle_block_") {
        let Some((j, rest)) = take_index(rest) else {
            return module.to_string();
        };
        return match j {
            1 => join("mid_block_attentions_0".to_string(), rest),
            _ => join(format!("mid_block_resnets_{}", j / 2), &resnet_layer(rest)),
        };
    }

    if let Some(rest) = module.strip_prefix("output_blocks_") {
        let Some((i, rest)) = take_index(rest) else {
            return module.to_string();
        };
        let Some((j, rest)) = take_index(rest) else {
            return module.to_string();
        };
        let (block, layer) = (i / slots, i % slots);
        return match j {
            0 => join(format!("up_blocks_{block}_resnets_{layer}"), &resnet_layer(rest)),
            1 if !rest.starts_with("conv") => {
                join(format!("up_blocks_{block}_attentions_{layer}"), rest)
            }
            _ => join(format!("up_blocks_{block}_upsamplers_0"), rest),
        };
    }

    module.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unet(module: &str) -> LoraTarget {
        LoraTarget { component: Component::Unet, module: module.to_string() }
    }

    #[test]
    fn parses_kohya_sdxl_keys() {
        assert_eq!(
            parse_key("lora_unet_input_blocks_4_1_transformer_blocks_0_attn1_to_q.lora_down.weight"),
            Some((unet("down_blocks_1_attentions_0_transformer_blocks_0_attn1_to_q"), LoraPart::Down))
        );
        assert_eq!(
            parse_key("lora_unet_output_blocks_0_1_proj_in.alpha"),
            Some((unet("up_blocks_0_attentions_0_proj_in"), LoraPart::Alpha))
        );
        assert_eq!(
            parse_key("lora_te2_text_model_encoder_layers_3_mlp_fc1.lora_up.weight"),
            Some((
                LoraTarget {
                    component: Component::TextEncoder2,
                    module: "text_model_encoder_layers_3_mlp_fc1".to_string(),
                },
                LoraPart::Up
            ))
        );
    }

    #[test]
    fn parses_diffusers_keys() {
        assert_eq!(
            parse_key("unet.down_blocks.1.attentions.0.transformer_blocks.0.attn2.to_out.0.lora_B.weight"),
            Some((
                unet("down_blocks_1_attentions_0_transformer_blocks_0_attn2_to_out_0"),
                LoraPart::Up
            ))
        );
        let (target, part) =
            parse_key("text_encoder.text_model.encoder.layers.0.self_attn.q_proj.lora_A.weight").unwrap();
        assert_eq!(target.component, Component::TextEncoder);
        assert_eq!(target.module, "text_model_encoder_layers_0_self_attn_q_proj");
        assert_eq!(part, LoraPart::Down);
    }

    #[test]
    fn ignores_unknown_keys() {
        assert_eq!(parse_key("lora_unet_foo.dora_scale"), None);
        assert_eq!(parse_key("vae.decoder.conv_in.lora_A.weight"), None);
    }

    #[test]
    fn sgm_input_blocks() {
        assert_eq!(
            sgm_to_diffusers("input_blocks_7_1_proj_out", 2),
            "down_blocks_2_attentions_0_proj_out"
        );
        assert_eq!(
            sgm_to_diffusers("input_blocks_2_0_in_layers_2", 2),
            "down_blocks_0_resnets_1_conv1"
        );
        assert_eq!(sgm_to_diffusers("input_blocks_3_0_op", 2), "down_blocks_0_downsamplers_0_conv");
        assert_eq!(sgm_to_diffusers("input_blocks_0_0", 2), "conv_in");
    }

    #[test]
    fn sgm_middle_block() {
        assert_eq!(
            sgm_to_diffusers("middle_block_1_transformer_blocks_9_ff_net_2", 2),
            "mid_block_attentions_0_transformer_blocks_9_ff_net_2"
        );
        assert_eq!(sgm_to_diffusers("middle_block_0_emb_layers_1", 2), "mid_block_resnets_0_time_emb_proj");
        assert_eq!(sgm_to_diffusers("middle_block_2_out_layers_3", 2), "mid_block_resnets_1_conv2");
    }

    #[test]
    fn sgm_output_blocks() {
        assert_eq!(
            sgm_to_diffusers("output_blocks_4_1_transformer_blocks_1_attn1_to_k", 2),
            "up_blocks_1_attentions_1_transformer_blocks_1_attn1_to_k"
        );
        assert_eq!(
            sgm_to_diffusers("output_blocks_8_0_skip_connection", 2),
            "up_blocks_2_resnets_2_conv_shortcut"
        );
        assert_eq!(sgm_to_diffusers("output_blocks_2_2_conv", 2), "up_blocks_0_upsamplers_0_conv");
    }

    #[test]
    fn diffusers_paths_pass_through() {
        let path = "down_blocks_1_attentions_0_transformer_blocks_0_attn1_to_q";
        assert_eq!(sgm_to_diffusers(path, 2), path);
    }

    #[test]
    fn flattens_base_weight_names() {
        assert_eq!(
            flatten_weight_name("down_blocks.1.attentions.0.proj_in.weight").as_deref(),
            Some("down_blocks_1_attentions_0_proj_in")
        );
        assert_eq!(flatten_weight_name("down_blocks.1.attentions.0.proj_in.bias"), None);
    }
}
