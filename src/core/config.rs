use clap::Parser;

/// Command line configuration for the inference server.
#[derive(Debug, Clone, Parser)]
#[command(name = "transformers-serve", version, about)]
pub struct ServerConfig {
    /// Local checkpoint directory or Hugging Face Hub model id.
    pub model_dir: String,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Hub revision (branch, tag or commit). Ignored for local directories.
    #[arg(long, default_value = "main")]
    pub revision: String,

    /// Maximum number of cached `/api/embeddings` results.
    #[arg(long, default_value_t = 1024)]
    pub embeddings_cache_size: u64,

    /// Maximum number of cached `/api/mask` results.
    #[arg(long, default_value_t = 1024)]
    pub mask_cache_size: u64,

    /// Number of candidates returned by `/api/mask`.
    #[arg(long, default_value_t = 5)]
    pub top_k: usize,

    /// Force CPU even if CUDA is available.
    #[arg(long, conflicts_with = "cuda_device")]
    pub cpu: bool,

    #[arg(long)]
    pub cuda_device: Option<usize>,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_sizes(&self) -> CacheSizes {
        CacheSizes {
            embeddings: self.embeddings_cache_size,
            mask: self.mask_cache_size,
        }
    }
}

/// Capacities of the two result caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizes {
    pub embeddings: u64,
    pub mask: u64,
}

impl Default for CacheSizes {
    fn default() -> Self {
        Self {
            embeddings: 1024,
            mask: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_port_8000() {
        let config =
            ServerConfig::parse_from(["transformers-serve", "nlpaueb/legal-bert-base-uncased"]);
        assert_eq!(config.model_dir, "nlpaueb/legal-bert-base-uncased");
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.top_k, 5);
        assert_eq!(config.cache_sizes(), CacheSizes::default());
        assert!(!config.cpu);
    }

    #[test]
    fn cache_sizes_are_configurable() {
        let config = ServerConfig::parse_from([
            "transformers-serve",
            "./model",
            "--embeddings-cache-size",
            "8",
            "--mask-cache-size",
            "0",
            "--cpu",
        ]);
        assert_eq!(config.cache_sizes(), CacheSizes { embeddings: 8, mask: 0 });
        assert!(config.cpu);
    }

    #[test]
    fn model_dir_is_required() {
        assert!(ServerConfig::try_parse_from(["transformers-serve"]).is_err());
    }
}
