pub mod core;
pub mod loaders;
pub mod models;
pub mod pipelines;
pub mod server;

// Re-export core types
pub use crate::core::{PipelineError, ResultCache, ServerConfig};

// Re-export model types for easier access
pub use models::{BertCheckpoint, BertForMaskedLM, BertModel};

pub use pipelines::{
    BertPipelines, BertPipelinesBuilder, EncoderOutput, FillMaskPrediction, MaskFiller,
    SentenceEncoder,
};
pub use server::ServiceContext;
