//! Builder that loads a BERT checkpoint once and produces both pipelines.

use super::embedding::EmbeddingPipeline;
use super::fill_mask::{FillMaskPipeline, DEFAULT_TOP_K};
use super::utils::{DeviceRequest, DeviceSelectable};
use crate::loaders::ModelSource;
use crate::models::{BertCheckpoint, BertForMaskedLM, BertModel};
use anyhow::Result;

/// Builder for the embedding and fill-mask pipelines of one checkpoint.
///
/// Start with `new(model_dir)`, where `model_dir` is a local checkpoint
/// directory or a Hugging Face Hub model id, then chain optional settings:
/// - `.revision(String)`: Hub git revision (branch, tag, commit hash).
/// - `.top_k(usize)`: Number of fill-mask candidates.
/// - `.cpu()` / `.cuda_device(i)`: Device selection.
///
/// Finally, call `.build()` to obtain [`BertPipelines`].
#[derive(Debug, Clone)]
pub struct BertPipelinesBuilder {
    model_dir: String,
    revision: String,
    top_k: usize,
    device_request: DeviceRequest,
}

/// Pipelines sharing one set of encoder weights.
pub struct BertPipelines {
    pub embeddings: EmbeddingPipeline<BertModel>,
    /// `None` when the checkpoint has no masked-LM head.
    pub fill_mask: Option<FillMaskPipeline<BertForMaskedLM>>,
}

impl BertPipelinesBuilder {
    pub fn new(model_dir: impl Into<String>) -> Self {
        Self {
            model_dir: model_dir.into(),
            revision: "main".to_string(),
            top_k: DEFAULT_TOP_K,
            device_request: DeviceRequest::Default,
        }
    }

    pub fn revision(mut self, rev: impl Into<String>) -> Self {
        self.revision = rev.into();
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Load config, tokenizer and weights, then assemble the pipelines.
    ///
    /// A checkpoint without a masked-LM head still builds; only
    /// `fill_mask` is left empty.
    pub fn build(self) -> Result<BertPipelines> {
        let device = self.device_request.resolve()?;
        let source = ModelSource::resolve(&self.model_dir, &self.revision);
        tracing::info!(device = ?device.location(), "loading model from {source}");

        let checkpoint = BertCheckpoint::load(&source, &device)?;
        let encoder = checkpoint.encoder()?;
        if !encoder.has_pooler() {
            tracing::warn!("checkpoint has no pooler, responses will omit pooler_output");
        }

        let fill_mask = match checkpoint.masked_lm(&encoder) {
            Ok(model) => match FillMaskPipeline::new(
                model,
                checkpoint.tokenizer.clone(),
                checkpoint.mask_token.clone(),
            ) {
                Ok(pipeline) => Some(pipeline.with_top_k(self.top_k)),
                Err(e) => {
                    tracing::warn!("fill-mask disabled: {e}");
                    None
                }
            },
            Err(e) => {
                tracing::warn!("fill-mask disabled, no masked-LM head in checkpoint: {e}");
                None
            }
        };

        let embeddings = EmbeddingPipeline::new(encoder, checkpoint.tokenizer);

        Ok(BertPipelines {
            embeddings,
            fill_mask,
        })
    }
}

impl DeviceSelectable for BertPipelinesBuilder {
    fn device_request_mut(&mut self) -> &mut DeviceRequest {
        &mut self.device_request
    }
}
