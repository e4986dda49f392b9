use super::model::FillMaskModel;
use crate::core::{PipelineError, Result};
use candle_core::{DType, IndexOp, Tensor, D};
use candle_nn::ops::softmax;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

pub const DEFAULT_TOP_K: usize = 5;

/// One candidate fill for the masked position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillMaskPrediction {
    /// Softmax probability of `token` at the mask position.
    pub score: f32,
    pub token: u32,
    pub token_str: String,
    /// The input with the mask replaced by `token`, special tokens removed.
    pub sequence: String,
}

pub struct FillMaskPipeline<M: FillMaskModel> {
    pub(crate) model: M,
    pub(crate) tokenizer: Tokenizer,
    mask_token: String,
    mask_token_id: u32,
    top_k: usize,
}

impl<M: FillMaskModel> FillMaskPipeline<M> {
    /// Fails if `mask_token` is not in the tokenizer's vocabulary.
    pub fn new(
        model: M,
        tokenizer: Tokenizer,
        mask_token: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let mask_token = mask_token.into();
        let mask_token_id = tokenizer
            .token_to_id(&mask_token)
            .ok_or_else(|| anyhow::anyhow!("Tokenizer does not contain a '{mask_token}' token."))?;

        Ok(Self {
            model,
            tokenizer,
            mask_token,
            mask_token_id,
            top_k: DEFAULT_TOP_K,
        })
    }

    /// Number of candidates returned by [`FillMaskPipeline::fill_mask`].
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Return the configured number of predictions for the single mask in `text`.
    pub fn fill_mask(&self, text: &str) -> Result<Vec<FillMaskPrediction>> {
        self.predict_top_k(text, self.top_k)
    }

    /// Return the top prediction for the masked token.
    pub fn predict(&self, text: &str) -> Result<FillMaskPrediction> {
        self.predict_top_k(text, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Other(anyhow::anyhow!("No predictions returned")))
    }

    /// Return up to `k` predictions sorted by descending score.
    ///
    /// `text` must contain exactly one mask token, otherwise
    /// [`PipelineError::InvalidInput`] is returned.
    pub fn predict_top_k(&self, text: &str, k: usize) -> Result<Vec<FillMaskPrediction>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(PipelineError::tokenization)?;
        let token_ids = encoding.get_ids();
        let mask_index = locate_mask(token_ids, self.mask_token_id, &self.mask_token)?;

        let device = self.model.device();
        let input_ids = Tensor::new(token_ids, device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), device)?.unsqueeze(0)?;

        let logits = self
            .model
            .logits(&input_ids, &attention_mask)?
            .squeeze(0)?
            .i(mask_index)?
            .to_dtype(DType::F32)?;
        let probs = softmax(&logits, D::Minus1)?.to_vec1::<f32>()?;

        let mut filled = token_ids.to_vec();
        top_k_tokens(&probs, k)
            .into_iter()
            .map(|(token, score)| {
                filled[mask_index] = token;
                let token_str = self
                    .tokenizer
                    .decode(&[token], false)
                    .map_err(PipelineError::tokenization)?;
                let sequence = self
                    .tokenizer
                    .decode(&filled, true)
                    .map_err(PipelineError::tokenization)?;
                Ok(FillMaskPrediction {
                    score,
                    token,
                    token_str,
                    sequence,
                })
            })
            .collect()
    }
}

/// Position of the only mask token in `ids`.
pub(crate) fn locate_mask(ids: &[u32], mask_token_id: u32, mask_token: &str) -> Result<usize> {
    let mut positions = ids
        .iter()
        .enumerate()
        .filter(|&(_, &id)| id == mask_token_id)
        .map(|(index, _)| index);

    match (positions.next(), positions.next()) {
        (Some(index), None) => Ok(index),
        (None, _) => Err(PipelineError::InvalidInput(format!(
            "No mask_token ({mask_token}) found on the input"
        ))),
        (Some(_), Some(_)) => Err(PipelineError::InvalidInput(format!(
            "More than one mask_token ({mask_token}) is not supported"
        ))),
    }
}

/// The `k` highest probabilities as `(token_id, probability)`, best first.
/// Ties keep the lower token id first.
pub(crate) fn top_k_tokens(probs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut ranked: Vec<(u32, f32)> = probs
        .iter()
        .enumerate()
        .map(|(id, &p)| (id as u32, p))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
}
