use candle_core::{Device, Tensor};

/// Trait for masked language models used in the fill-mask pipeline.
pub trait FillMaskModel: Send + Sync {
    /// Vocabulary logits with shape `(batch, seq_len, vocab_size)`.
    fn logits(&self, input_ids: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor>;

    fn device(&self) -> &Device;
}
