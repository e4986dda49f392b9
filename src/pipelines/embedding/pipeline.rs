use super::model::EmbeddingModel;
use crate::core::{PipelineError, Result};
use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

/// Encoder outputs converted to plain nested arrays, one field per tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderOutput {
    pub last_hidden_state: Vec<Vec<Vec<f32>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pooler_output: Option<Vec<Vec<f32>>>,
}

pub struct EmbeddingPipeline<M: EmbeddingModel> {
    pub(crate) model: M,
    pub(crate) tokenizer: Tokenizer,
}

impl<M: EmbeddingModel> EmbeddingPipeline<M> {
    pub fn new(model: M, tokenizer: Tokenizer) -> Self {
        Self { model, tokenizer }
    }

    /// Tokenize `text` and return every encoder output for it.
    pub fn embed(&self, text: &str) -> Result<EncoderOutput> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(PipelineError::tokenization)?;

        let device = self.model.device();
        let input_ids = Tensor::new(encoding.get_ids(), device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), device)?.unsqueeze(0)?;

        let output = self.model.encode(&input_ids, &attention_mask)?;

        let last_hidden_state = output
            .last_hidden_state
            .to_dtype(DType::F32)?
            .to_vec3::<f32>()?;
        let pooler_output = match output.pooler_output {
            Some(pooled) => Some(pooled.to_dtype(DType::F32)?.to_vec2::<f32>()?),
            None => None,
        };

        Ok(EncoderOutput {
            last_hidden_state,
            pooler_output,
        })
    }
}
