use thiserror::Error;

/// Error type returned by the embedding and fill-mask pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The model rejected the input, e.g. a fill-mask sentence without
    /// exactly one mask token. The message is meant for the caller.
    #[error("{0}")]
    InvalidInput(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    // Pass-through from dependencies
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn tokenization(err: impl std::fmt::Display) -> Self {
        PipelineError::Tokenization(err.to_string())
    }
}
