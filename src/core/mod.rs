pub mod cache;
pub mod config;
pub mod error;

pub use cache::ResultCache;
pub use config::{CacheSizes, ServerConfig};
pub use error::{PipelineError, Result};
