//! Fill-mask pipeline for predicting masked tokens in text.
//!
//! Given a sentence with exactly one mask token (typically `[MASK]`), the
//! pipeline returns the highest scoring replacements with their softmax
//! probability, token id, decoded token and completed sentence.
//!
//! ## Main Types
//!
//! - [`FillMaskPipeline`] - High-level interface for mask filling
//! - [`FillMaskModel`] - Trait for masked language model implementations
//! - [`FillMaskPrediction`] - One ranked candidate
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use transformers_serve::pipelines::builder::BertPipelinesBuilder;
//!
//! # fn run() -> anyhow::Result<()> {
//! let pipelines = BertPipelinesBuilder::new("bert-base-uncased").build()?;
//! let fill_mask = pipelines.fill_mask.expect("checkpoint has a masked-LM head");
//!
//! for candidate in fill_mask.fill_mask("The capital of France is [MASK].")? {
//!     println!("{} ({:.3})", candidate.token_str, candidate.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod model;
pub mod pipeline;

pub use model::FillMaskModel;
pub use pipeline::{FillMaskPipeline, FillMaskPrediction, DEFAULT_TOP_K};
