use super::error::ApiError;
use crate::core::{CacheSizes, ResultCache};
use crate::pipelines::{MaskFiller, SentenceEncoder};
use std::sync::Arc;

/// Everything a request handler needs: the loaded pipelines and the two
/// result caches. Built once at startup and shared through axum state.
#[derive(Clone)]
pub struct ServiceContext {
    encoder: Arc<dyn SentenceEncoder>,
    mask_filler: Option<Arc<dyn MaskFiller>>,
    embeddings_cache: ResultCache,
    mask_cache: ResultCache,
}

impl ServiceContext {
    pub fn new(
        encoder: Arc<dyn SentenceEncoder>,
        mask_filler: Option<Arc<dyn MaskFiller>>,
        cache_sizes: CacheSizes,
    ) -> Self {
        Self {
            encoder,
            mask_filler,
            embeddings_cache: ResultCache::new("embeddings", cache_sizes.embeddings),
            mask_cache: ResultCache::new("mask", cache_sizes.mask),
        }
    }

    /// JSON encoder output for `sentence`, served from cache when possible.
    /// Blocks for the duration of the forward pass on a miss.
    pub fn get_embeddings(&self, sentence: &str) -> Result<String, ApiError> {
        self.embeddings_cache.get_or_try_insert(sentence, || {
            let output = self.encoder.encode(sentence)?;
            Ok(serde_json::to_string(&output)?)
        })
    }

    /// JSON array of ranked fills for the mask in `sentence`.
    pub fn get_mask(&self, sentence: &str) -> Result<String, ApiError> {
        let mask_filler = self.mask_filler.as_ref().ok_or_else(|| {
            ApiError::Unavailable("The loaded model has no masked language modeling head".into())
        })?;

        self.mask_cache.get_or_try_insert(sentence, || {
            let predictions = mask_filler.fill_mask(sentence)?;
            Ok(serde_json::to_string(&predictions)?)
        })
    }

    pub fn fill_mask_enabled(&self) -> bool {
        self.mask_filler.is_some()
    }

    pub fn embeddings_cache(&self) -> &ResultCache {
        &self.embeddings_cache
    }

    pub fn mask_cache(&self) -> &ResultCache {
        &self.mask_cache
    }
}
