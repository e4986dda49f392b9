//! BERT encoder implementation.
//!
//! Classic post-norm bidirectional encoder with:
//! - Learned absolute position and token type embeddings
//! - Optional tanh pooler over the `[CLS]` token
//! - A masked language modeling head tied to the word embeddings
//!
//! Weight names follow the Hugging Face checkpoints, with or without the
//! `bert.` prefix and with either `weight`/`bias` or legacy `gamma`/`beta`
//! LayerNorm names.
//!
//! # Quick Start
//! ```rust,no_run
//! // let checkpoint = BertCheckpoint::load(&source, Device::Cpu)?;
//! // let encoder = checkpoint.encoder()?;
//! // let (hidden, pooled) = encoder.forward(&input_ids, &attention_mask)?;
//! ```

use candle_core::{DType, Device, IndexOp, Result, Tensor, D};
use candle_nn::{
    embedding, linear, ops::softmax, Embedding, Init, LayerNorm, Linear, Module, VarBuilder,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HiddenAct {
    #[default]
    Gelu,
    #[serde(alias = "gelu_new", alias = "gelu_pytorch_tanh")]
    GeluApproximate,
    Relu,
}

impl HiddenAct {
    fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            HiddenAct::Gelu => xs.gelu_erf(),
            HiddenAct::GeluApproximate => xs.gelu(),
            HiddenAct::Relu => xs.relu(),
        }
    }
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_type_vocab_size() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default)]
    pub hidden_act: HiddenAct,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub pad_token_id: u32,
    #[serde(default)]
    pub model_type: Option<String>,
}

/// LayerNorm that also accepts the `gamma`/`beta` names of older checkpoints.
fn layer_norm(size: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    let (weight, bias) = if vb.contains_tensor("gamma") && !vb.contains_tensor("weight") {
        (vb.get(size, "gamma")?, vb.get(size, "beta")?)
    } else {
        (
            vb.get_with_hints(size, "weight", Init::Const(1.))?,
            vb.get_with_hints(size, "bias", Init::Const(0.))?,
        )
    };
    Ok(LayerNorm::new(weight, bias, eps))
}

/// Word, position and token type embeddings followed by LayerNorm.
#[derive(Debug, Clone)]
struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    norm: LayerNorm,
}

impl Embeddings {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let word_embeddings = embedding(
            config.vocab_size,
            config.hidden_size,
            vb.pp("word_embeddings"),
        )?;
        let position_embeddings = embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings = embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
        )?;
        let norm = layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            norm,
        })
    }

    fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len) = input_ids.dims2()?;
        let position_ids = Tensor::arange(0u32, seq_len as u32, input_ids.device())?.unsqueeze(0)?;
        // Single-segment inputs only, so every token type is 0.
        let token_type_ids = input_ids.zeros_like()?;

        let embeddings = input_ids
            .apply(&self.word_embeddings)?
            .broadcast_add(&position_ids.apply(&self.position_embeddings)?)?
            .add(&token_type_ids.apply(&self.token_type_embeddings)?)?;

        embeddings.apply(&self.norm)
    }
}

/// Multi-head self attention with its output projection and residual norm.
#[derive(Debug, Clone)]
struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    norm: LayerNorm,
    num_attention_heads: usize,
    attention_head_size: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let num_attention_heads = config.num_attention_heads;
        let attention_head_size = config.hidden_size / config.num_attention_heads;

        let query = linear(config.hidden_size, config.hidden_size, vb.pp("self.query"))?;
        let key = linear(config.hidden_size, config.hidden_size, vb.pp("self.key"))?;
        let value = linear(config.hidden_size, config.hidden_size, vb.pp("self.value"))?;
        let output = linear(config.hidden_size, config.hidden_size, vb.pp("output.dense"))?;
        let norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("output.LayerNorm"),
        )?;

        Ok(Self {
            query,
            key,
            value,
            output,
            norm,
            num_attention_heads,
            attention_head_size,
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        xs.reshape((batch, seq_len, self.num_attention_heads, self.attention_head_size))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, hidden_size) = hidden_states.dims3()?;

        let q = self.split_heads(&hidden_states.apply(&self.query)?)?;
        let k = self.split_heads(&hidden_states.apply(&self.key)?)?;
        let v = self.split_heads(&hidden_states.apply(&self.value)?)?;

        let scale = (self.attention_head_size as f64).powf(-0.5);
        let q = (q * scale)?;

        let attention_scores = q.matmul(&k.t()?)?;
        let attention_scores = attention_scores.broadcast_add(attention_mask)?;
        let attention_probs = softmax(&attention_scores, D::Minus1)?;

        let context = attention_probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, hidden_size))?;

        let projected = context.apply(&self.output)?;
        (projected + hidden_states)?.apply(&self.norm)
    }
}

/// Position-wise feed-forward block with residual norm.
#[derive(Debug, Clone)]
struct FeedForward {
    intermediate: Linear,
    output: Linear,
    norm: LayerNorm,
    act: HiddenAct,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let intermediate = linear(
            config.hidden_size,
            config.intermediate_size,
            vb.pp("intermediate.dense"),
        )?;
        let output = linear(
            config.intermediate_size,
            config.hidden_size,
            vb.pp("output.dense"),
        )?;
        let norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("output.LayerNorm"),
        )?;
        Ok(Self {
            intermediate,
            output,
            norm,
            act: config.hidden_act,
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let hidden = self.act.apply(&xs.apply(&self.intermediate)?)?;
        (hidden.apply(&self.output)? + xs)?.apply(&self.norm)
    }
}

#[derive(Debug, Clone)]
struct TransformerLayer {
    attention: Attention,
    feed_forward: FeedForward,
}

impl TransformerLayer {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let attention = Attention::load(vb.pp("attention"), config)?;
        let feed_forward = FeedForward::load(vb, config)?;
        Ok(Self {
            attention,
            feed_forward,
        })
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        self.attention
            .forward(hidden_states, attention_mask)?
            .apply(&self.feed_forward)
    }
}

/// Dense + tanh over the first (`[CLS]`) token.
#[derive(Debug, Clone)]
struct Pooler {
    dense: Linear,
}

impl Pooler {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let dense = linear(config.hidden_size, config.hidden_size, vb.pp("dense"))?;
        Ok(Self { dense })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        hidden_states.i((.., 0, ..))?.apply(&self.dense)?.tanh()
    }
}

/// Task-specific head for masked language modeling.
#[derive(Debug, Clone)]
struct MaskedLMHead {
    dense: Linear,
    norm: LayerNorm,
    decoder: Linear,
    act: HiddenAct,
}

impl MaskedLMHead {
    /// `vb` points at the `cls` prefix. `word_embeddings` is used as the
    /// decoder matrix unless the checkpoint stores an untied one.
    fn load(vb: VarBuilder, config: &Config, word_embeddings: &Tensor) -> Result<Self> {
        let dense = linear(
            config.hidden_size,
            config.hidden_size,
            vb.pp("predictions.transform.dense"),
        )?;
        let norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("predictions.transform.LayerNorm"),
        )?;

        let decoder_weights = if vb.contains_tensor("predictions.decoder.weight") {
            vb.get(
                (config.vocab_size, config.hidden_size),
                "predictions.decoder.weight",
            )?
        } else {
            word_embeddings.clone()
        };
        let bias_name = if vb.contains_tensor("predictions.decoder.bias") {
            "predictions.decoder.bias"
        } else {
            "predictions.bias"
        };
        let decoder_bias = vb.get_with_hints(config.vocab_size, bias_name, Init::Const(0.))?;
        let decoder = Linear::new(decoder_weights, Some(decoder_bias));

        Ok(Self {
            dense,
            norm,
            decoder,
            act: config.hidden_act,
        })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let transformed = self.act.apply(&hidden_states.apply(&self.dense)?)?;
        transformed.apply(&self.norm)?.apply(&self.decoder)
    }
}

/// Shared encoder weights used by both the embedding and masked-LM models.
#[derive(Debug, Clone)]
pub struct ModelWeights {
    embeddings: Embeddings,
    layers: Vec<TransformerLayer>,
    pooler: Option<Pooler>,
    device: Device,
    dtype: DType,
}

impl ModelWeights {
    /// Load encoder weights. `vb` must point at the encoder root (the level
    /// holding `embeddings` and `encoder`).
    pub fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let embeddings = Embeddings::load(vb.pp("embeddings"), config)?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for layer_idx in 0..config.num_hidden_layers {
            layers.push(TransformerLayer::load(
                vb.pp(format!("encoder.layer.{layer_idx}")),
                config,
            )?);
        }

        let pooler = match Pooler::load(vb.pp("pooler"), config) {
            Ok(pooler) => Some(pooler),
            Err(e) => {
                tracing::debug!("checkpoint has no pooler: {e}");
                None
            }
        };

        Ok(Self {
            embeddings,
            layers,
            pooler,
            device: vb.device().clone(),
            dtype: vb.dtype(),
        })
    }

    /// Turn a `(batch, seq_len)` 0/1 padding mask into an additive
    /// `(batch, 1, 1, seq_len)` mask.
    fn create_attention_mask(&self, mask: &Tensor) -> Result<Tensor> {
        let mask = mask.unsqueeze(1)?.unsqueeze(2)?.to_dtype(self.dtype)?;
        let inverted_mask = (1.0 - mask)?;
        (inverted_mask * f32::MIN as f64)?.to_dtype(self.dtype)
    }

    fn forward_base(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let attention_mask = self.create_attention_mask(attention_mask)?;

        let mut hidden_states = self.embeddings.forward(input_ids)?;
        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, &attention_mask)?;
        }
        Ok(hidden_states)
    }
}

/// Pick the sub-builder holding the encoder: checkpoints saved from task
/// models nest it under `bert.` (or `<model_type>.`).
fn encoder_root<'a>(vb: &VarBuilder<'a>, config: &Config) -> VarBuilder<'a> {
    if vb.contains_tensor("embeddings.word_embeddings.weight") {
        return vb.clone();
    }
    let prefix = config.model_type.as_deref().unwrap_or("bert");
    if vb.contains_tensor(&format!("{prefix}.embeddings.word_embeddings.weight")) {
        return vb.pp(prefix);
    }
    vb.clone()
}

/// BERT base model returning the last hidden state and pooled output.
#[derive(Debug, Clone)]
pub struct BertModel {
    weights: Arc<ModelWeights>,
}

impl BertModel {
    /// Load a BERT encoder from a checkpoint root.
    pub fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let weights = Arc::new(ModelWeights::load(encoder_root(&vb, config), config)?);
        Ok(Self { weights })
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `input_ids` - Token IDs with shape `(batch_size, sequence_length)`
    /// * `attention_mask` - Attention mask with shape `(batch_size, sequence_length)`
    ///   (1 for tokens, 0 for padding)
    ///
    /// # Returns
    /// Hidden states `(batch_size, sequence_length, hidden_size)` and, when the
    /// checkpoint has a pooler, pooled output `(batch_size, hidden_size)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let hidden_states = self.weights.forward_base(input_ids, attention_mask)?;
        let pooled = match &self.weights.pooler {
            Some(pooler) => Some(pooler.forward(&hidden_states)?),
            None => None,
        };
        Ok((hidden_states, pooled))
    }

    pub fn has_pooler(&self) -> bool {
        self.weights.pooler.is_some()
    }

    pub fn device(&self) -> &Device {
        &self.weights.device
    }

    fn word_embeddings(&self) -> &Tensor {
        self.weights.embeddings.word_embeddings.embeddings()
    }
}

/// BERT model for masked language modeling.
#[derive(Debug, Clone)]
pub struct BertForMaskedLM {
    base: BertModel,
    head: MaskedLMHead,
}

impl BertForMaskedLM {
    /// Load the encoder and the masked-LM head from a checkpoint root.
    pub fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let base = BertModel::load(vb.clone(), config)?;
        Self::with_base(base, vb, config)
    }

    /// Attach the masked-LM head to already loaded encoder weights.
    pub fn with_base(base: BertModel, vb: VarBuilder, config: &Config) -> Result<Self> {
        let head = MaskedLMHead::load(vb.pp("cls"), config, base.word_embeddings())?;
        Ok(Self { base, head })
    }

    /// Forward pass for masked language modeling.
    ///
    /// # Returns
    /// Logits over vocabulary with shape `(batch_size, sequence_length, vocab_size)`
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let hidden_states = self.base.weights.forward_base(input_ids, attention_mask)?;
        self.head.forward(&hidden_states)
    }

    pub fn device(&self) -> &Device {
        self.base.device()
    }
}

/*
Pipeline Implementations
*/

use crate::loaders::{ModelSource, TokenizerLoader, WeightsLoader};
use crate::pipelines::embedding::{EmbeddingModel, EncoderTensors};
use crate::pipelines::fill_mask::FillMaskModel;
use anyhow::Result as AnyhowResult;
use tokenizers::Tokenizer;

/// Everything read from a checkpoint directory or Hub repo: config,
/// tokenizer and an open weight file.
pub struct BertCheckpoint {
    pub config: Config,
    pub tokenizer: Tokenizer,
    pub mask_token: String,
    vb: VarBuilder<'static>,
}

impl BertCheckpoint {
    pub fn load(source: &ModelSource, device: &Device) -> AnyhowResult<Self> {
        let config: Config = source.get_json("config.json")?;
        tracing::info!(
            layers = config.num_hidden_layers,
            hidden = config.hidden_size,
            vocab = config.vocab_size,
            "loaded config from {source}"
        );

        let (tokenizer, mask_token) = TokenizerLoader::new(source.clone())
            .max_length(config.max_position_embeddings)
            .load()?;

        let vb = WeightsLoader::new(source.clone()).load(DType::F32, device)?;

        Ok(Self {
            config,
            tokenizer,
            mask_token,
            vb,
        })
    }

    pub fn encoder(&self) -> AnyhowResult<BertModel> {
        Ok(BertModel::load(self.vb.clone(), &self.config)?)
    }

    /// Masked-LM model sharing `base`'s weights. Fails when the checkpoint
    /// carries no `cls.predictions` head.
    pub fn masked_lm(&self, base: &BertModel) -> AnyhowResult<BertForMaskedLM> {
        Ok(BertForMaskedLM::with_base(base.clone(), self.vb.clone(), &self.config)?)
    }
}

impl EmbeddingModel for BertModel {
    fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<EncoderTensors> {
        let (last_hidden_state, pooler_output) = self.forward(input_ids, attention_mask)?;
        Ok(EncoderTensors {
            last_hidden_state,
            pooler_output,
        })
    }

    fn device(&self) -> &Device {
        BertModel::device(self)
    }
}

impl FillMaskModel for BertForMaskedLM {
    fn logits(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        self.forward(input_ids, attention_mask)
    }

    fn device(&self) -> &Device {
        BertForMaskedLM::device(self)
    }
}
