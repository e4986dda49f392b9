// Pipeline modules organized by functionality
pub mod builder;
pub mod embedding;
pub mod fill_mask;
pub mod utils;

use crate::core::Result;

pub use builder::{BertPipelines, BertPipelinesBuilder};
pub use embedding::{EmbeddingModel, EmbeddingPipeline, EncoderOutput};
pub use fill_mask::{FillMaskModel, FillMaskPipeline, FillMaskPrediction};

/// Anything that can turn a sentence into encoder outputs.
///
/// This is the seam the HTTP service depends on, so handlers can be tested
/// without model weights.
pub trait SentenceEncoder: Send + Sync {
    fn encode(&self, sentence: &str) -> Result<EncoderOutput>;
}

/// Anything that can rank fills for the single mask in a sentence.
pub trait MaskFiller: Send + Sync {
    fn fill_mask(&self, sentence: &str) -> Result<Vec<FillMaskPrediction>>;
}

impl<M: EmbeddingModel> SentenceEncoder for EmbeddingPipeline<M> {
    fn encode(&self, sentence: &str) -> Result<EncoderOutput> {
        self.embed(sentence)
    }
}

impl<M: FillMaskModel> MaskFiller for FillMaskPipeline<M> {
    fn fill_mask(&self, sentence: &str) -> Result<Vec<FillMaskPrediction>> {
        FillMaskPipeline::fill_mask(self, sentence)
    }
}
