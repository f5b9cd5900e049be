//! Configuration of the hybrid attention/Mamba language model.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// File name of the serialized model config.
pub const CONFIG_FILE: &str = "config.json";

pub const MODEL_TYPE: &str = "granitemoehybrid";

/// Sequence-mixing block used by one decoder layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Mamba,
    Attention,
}

/// Rotary embedding scaling parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RopeScaling {
    #[serde(alias = "type")]
    pub rope_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Mamba head dimension as written in `config.json`: a size or `"auto"`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum HeadDim {
    Size(usize),
    Name(String),
}

/// Hyperparameters of the hybrid MoE model.
///
/// `mamba_d_head` is stored resolved and `num_key_value_heads` is filled in
/// from `num_attention_heads` when absent. Keys this type does not know are
/// kept in `extra` and written back on save.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHybridConfig")]
pub struct HybridConfig {
    pub model_type: String,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    pub hidden_act: String,
    pub max_position_embeddings: usize,
    pub initializer_range: f64,
    pub rms_norm_eps: f64,
    pub use_cache: bool,
    pub pad_token_id: Option<u32>,
    pub bos_token_id: Option<u32>,
    pub eos_token_id: Option<u32>,
    pub tie_word_embeddings: bool,
    pub rope_theta: f64,
    pub rope_scaling: Option<RopeScaling>,
    pub attention_bias: bool,
    pub attention_dropout: f64,
    pub embedding_multiplier: f64,
    pub logits_scaling: f64,
    pub residual_multiplier: f64,
    pub attention_multiplier: f64,
    pub num_local_experts: usize,
    pub num_experts_per_tok: usize,
    pub output_router_logits: bool,
    pub router_aux_loss_coef: f64,
    pub shared_intermediate_size: usize,
    pub position_embedding_type: String,
    pub layer_types: Option<Vec<LayerType>>,
    pub mamba_n_heads: usize,
    pub mamba_n_groups: usize,
    pub mamba_d_state: usize,
    pub mamba_d_head: usize,
    pub mamba_d_conv: usize,
    pub mamba_expand: usize,
    pub mamba_chunk_size: usize,
    pub mamba_conv_bias: bool,
    pub mamba_proj_bias: bool,
    pub logits_to_keep: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        let hidden_size = 4096;
        let mamba_expand = 2;
        let mamba_n_heads = 128;

        Self {
            model_type: MODEL_TYPE.to_string(),
            vocab_size: 32000,
            hidden_size,
            intermediate_size: 11008,
            num_hidden_layers: 32,
            num_attention_heads: 32,
            num_key_value_heads: 32,
            hidden_act: "silu".to_string(),
            max_position_embeddings: 2048,
            initializer_range: 0.02,
            rms_norm_eps: 1e-6,
            use_cache: false,
            pad_token_id: None,
            bos_token_id: Some(1),
            eos_token_id: Some(2),
            tie_word_embeddings: false,
            rope_theta: 10000.0,
            rope_scaling: None,
            attention_bias: false,
            attention_dropout: 0.0,
            embedding_multiplier: 1.0,
            logits_scaling: 1.0,
            residual_multiplier: 1.0,
            attention_multiplier: 1.0,
            num_local_experts: 8,
            num_experts_per_tok: 2,
            output_router_logits: false,
            router_aux_loss_coef: 0.001,
            shared_intermediate_size: 0,
            position_embedding_type: "nope".to_string(),
            layer_types: None,
            mamba_n_heads,
            mamba_n_groups: 1,
            mamba_d_state: 256,
            mamba_d_head: mamba_expand * hidden_size / mamba_n_heads,
            mamba_d_conv: 4,
            mamba_expand,
            mamba_chunk_size: 256,
            mamba_conv_bias: true,
            mamba_proj_bias: false,
            logits_to_keep: 1,
            extra: Map::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawHybridConfig {
    model_type: String,
    vocab_size: usize,
    hidden_size: usize,
    intermediate_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    num_key_value_heads: Option<usize>,
    hidden_act: String,
    max_position_embeddings: usize,
    initializer_range: f64,
    rms_norm_eps: f64,
    use_cache: bool,
    pad_token_id: Option<u32>,
    bos_token_id: Option<u32>,
    eos_token_id: Option<u32>,
    tie_word_embeddings: bool,
    rope_theta: f64,
    rope_scaling: Option<RopeScaling>,
    attention_bias: bool,
    attention_dropout: f64,
    embedding_multiplier: f64,
    logits_scaling: f64,
    residual_multiplier: f64,
    attention_multiplier: f64,
    num_local_experts: usize,
    num_experts_per_tok: usize,
    output_router_logits: bool,
    router_aux_loss_coef: f64,
    shared_intermediate_size: usize,
    position_embedding_type: String,
    layer_types: Option<Vec<LayerType>>,
    mamba_n_heads: usize,
    mamba_n_groups: usize,
    mamba_d_state: usize,
    mamba_d_head: HeadDim,
    mamba_d_conv: usize,
    mamba_expand: usize,
    mamba_chunk_size: usize,
    mamba_conv_bias: bool,
    mamba_proj_bias: bool,
    logits_to_keep: usize,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Default for RawHybridConfig {
    fn default() -> Self {
        let d = HybridConfig::default();
        Self {
            model_type: d.model_type,
            vocab_size: d.vocab_size,
            hidden_size: d.hidden_size,
            intermediate_size: d.intermediate_size,
            num_hidden_layers: d.num_hidden_layers,
            num_attention_heads: d.num_attention_heads,
            num_key_value_heads: None,
            hidden_act: d.hidden_act,
            max_position_embeddings: d.max_position_embeddings,
            initializer_range: d.initializer_range,
            rms_norm_eps: d.rms_norm_eps,
            use_cache: d.use_cache,
            pad_token_id: d.pad_token_id,
            bos_token_id: d.bos_token_id,
            eos_token_id: d.eos_token_id,
            tie_word_embeddings: d.tie_word_embeddings,
            rope_theta: d.rope_theta,
            rope_scaling: d.rope_scaling,
            attention_bias: d.attention_bias,
            attention_dropout: d.attention_dropout,
            embedding_multiplier: d.embedding_multiplier,
            logits_scaling: d.logits_scaling,
            residual_multiplier: d.residual_multiplier,
            attention_multiplier: d.attention_multiplier,
            num_local_experts: d.num_local_experts,
            num_experts_per_tok: d.num_experts_per_tok,
            output_router_logits: d.output_router_logits,
            router_aux_loss_coef: d.router_aux_loss_coef,
            shared_intermediate_size: d.shared_intermediate_size,
            position_embedding_type: d.position_embedding_type,
            layer_types: d.layer_types,
            mamba_n_heads: d.mamba_n_heads,
            mamba_n_groups: d.mamba_n_groups,
            mamba_d_state: d.mamba_d_state,
            mamba_d_head: HeadDim::Name("auto".to_string()),
            mamba_d_conv: d.mamba_d_conv,
            mamba_expand: d.mamba_expand,
            mamba_chunk_size: d.mamba_chunk_size,
            mamba_conv_bias: d.mamba_conv_bias,
            mamba_proj_bias: d.mamba_proj_bias,
            logits_to_keep: d.logits_to_keep,
            extra: d.extra,
        }
    }
}

impl TryFrom<RawHybridConfig> for HybridConfig {
    type Error = ConfigError;

    fn try_from(raw: RawHybridConfig) -> std::result::Result<Self, ConfigError> {
        if raw.mamba_n_heads == 0 {
            return Err(ConfigError::ZeroParameter {
                name: "mamba_n_heads",
            });
        }

        let intermediate = raw.mamba_expand * raw.hidden_size;
        if intermediate % raw.mamba_n_heads != 0 {
            return Err(ConfigError::MambaHeads {
                n_heads: raw.mamba_n_heads,
                intermediate,
            });
        }

        let mamba_d_head = match raw.mamba_d_head {
            HeadDim::Size(size) => size,
            HeadDim::Name(name) if name == "auto" => intermediate / raw.mamba_n_heads,
            HeadDim::Name(name) => return Err(ConfigError::InvalidHeadDim(name)),
        };

        let config = Self {
            model_type: raw.model_type,
            vocab_size: raw.vocab_size,
            hidden_size: raw.hidden_size,
            intermediate_size: raw.intermediate_size,
            num_hidden_layers: raw.num_hidden_layers,
            num_attention_heads: raw.num_attention_heads,
            num_key_value_heads: raw.num_key_value_heads.unwrap_or(raw.num_attention_heads),
            hidden_act: raw.hidden_act,
            max_position_embeddings: raw.max_position_embeddings,
            initializer_range: raw.initializer_range,
            rms_norm_eps: raw.rms_norm_eps,
            use_cache: raw.use_cache,
            pad_token_id: raw.pad_token_id,
            bos_token_id: raw.bos_token_id,
            eos_token_id: raw.eos_token_id,
            tie_word_embeddings: raw.tie_word_embeddings,
            rope_theta: raw.rope_theta,
            rope_scaling: raw.rope_scaling,
            attention_bias: raw.attention_bias,
            attention_dropout: raw.attention_dropout,
            embedding_multiplier: raw.embedding_multiplier,
            logits_scaling: raw.logits_scaling,
            residual_multiplier: raw.residual_multiplier,
            attention_multiplier: raw.attention_multiplier,
            num_local_experts: raw.num_local_experts,
            num_experts_per_tok: raw.num_experts_per_tok,
            output_router_logits: raw.output_router_logits,
            router_aux_loss_coef: raw.router_aux_loss_coef,
            shared_intermediate_size: raw.shared_intermediate_size,
            position_embedding_type: raw.position_embedding_type,
            // an empty list means unset
            layer_types: raw.layer_types.filter(|types| !types.is_empty()),
            mamba_n_heads: raw.mamba_n_heads,
            mamba_n_groups: raw.mamba_n_groups,
            mamba_d_state: raw.mamba_d_state,
            mamba_d_head,
            mamba_d_conv: raw.mamba_d_conv,
            mamba_expand: raw.mamba_expand,
            mamba_chunk_size: raw.mamba_chunk_size,
            mamba_conv_bias: raw.mamba_conv_bias,
            mamba_proj_bias: raw.mamba_proj_bias,
            logits_to_keep: raw.logits_to_keep,
            extra: raw.extra,
        };

        config.validate()?;
        Ok(config)
    }
}

impl HybridConfig {
    /// Check Mamba head geometry, layer types and rope scaling.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.mamba_n_heads == 0 {
            return Err(ConfigError::ZeroParameter {
                name: "mamba_n_heads",
            });
        }

        let intermediate = self.mamba_intermediate_size();
        if intermediate % self.mamba_n_heads != 0 {
            return Err(ConfigError::MambaHeads {
                n_heads: self.mamba_n_heads,
                intermediate,
            });
        }

        if self.mamba_d_head * self.mamba_n_heads != intermediate {
            return Err(ConfigError::MambaHeadDim {
                d_head: self.mamba_d_head,
                n_heads: self.mamba_n_heads,
                intermediate,
            });
        }

        if let Some(layer_types) = &self.layer_types
            && !layer_types.is_empty()
            && layer_types.len() != self.num_hidden_layers
        {
            return Err(ConfigError::LayerTypesLength {
                expected: self.num_hidden_layers,
                got: layer_types.len(),
            });
        }

        if self.position_embedding_type == "rope" {
            self.check_rope_scaling();
        }

        Ok(())
    }

    fn check_rope_scaling(&self) {
        let Some(scaling) = &self.rope_scaling else {
            return;
        };

        match (scaling.rope_type.as_str(), scaling.factor) {
            ("linear" | "dynamic", Some(factor)) if factor < 1.0 => {
                tracing::warn!(
                    rope_type = %scaling.rope_type,
                    factor,
                    "rope scaling factor should be at least 1.0"
                );
            }
            ("linear" | "dynamic", None) => {
                tracing::warn!(rope_type = %scaling.rope_type, "rope scaling is missing a factor");
            }
            _ => {}
        }
    }

    /// Block type of every decoder layer; all Mamba when unspecified.
    pub fn layers_block_type(&self) -> Vec<LayerType> {
        match &self.layer_types {
            Some(layer_types) if !layer_types.is_empty() => layer_types.clone(),
            _ => vec![LayerType::Mamba; self.num_hidden_layers],
        }
    }

    pub fn mamba_intermediate_size(&self) -> usize {
        self.mamba_expand * self.hidden_size
    }

    /// Load a config from a `config.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
