use candle_core::{Device, Tensor};

/// Raw encoder outputs for one batch.
#[derive(Debug, Clone)]
pub struct EncoderTensors {
    /// `(batch, seq_len, hidden)`
    pub last_hidden_state: Tensor,
    /// `(batch, hidden)`, absent when the checkpoint has no pooler.
    pub pooler_output: Option<Tensor>,
}

/// Trait for encoder models used in the embedding pipeline.
pub trait EmbeddingModel: Send + Sync {
    fn encode(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> candle_core::Result<EncoderTensors>;

    fn device(&self) -> &Device;
}
