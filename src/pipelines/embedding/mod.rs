//! Sentence embedding pipeline.
//!
//! Runs a sentence through an encoder and returns all of its output tensors
//! (last hidden state and pooled output) as nested `f32` arrays.
//!
//! ## Main Types
//!
//! - [`EmbeddingPipeline`] - Tokenize, encode, convert
//! - [`EmbeddingModel`] - Trait for encoder implementations
//! - [`EncoderOutput`] - Serializable pipeline result
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use transformers_serve::pipelines::builder::BertPipelinesBuilder;
//! use transformers_serve::pipelines::utils::DeviceSelectable;
//!
//! # fn run() -> anyhow::Result<()> {
//! let pipelines = BertPipelinesBuilder::new("nlpaueb/legal-bert-base-uncased")
//!     .cpu()
//!     .build()?;
//!
//! let output = pipelines.embeddings.embed("hello")?;
//! println!("{} tokens", output.last_hidden_state[0].len());
//! # Ok(())
//! # }
//! ```

pub mod model;
pub mod pipeline;

pub use model::{EmbeddingModel, EncoderTensors};
pub use pipeline::{EmbeddingPipeline, EncoderOutput};
