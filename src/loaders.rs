//! Checkpoint file loading from a local directory or the Hugging Face Hub.
//!
//! A model is named by a single string: if it points at an existing
//! directory the files are read from disk, otherwise it is treated as a Hub
//! repository id and the files are downloaded (and cached) with `hf-hub`.
//!
//! ## Main Types
//!
//! - [`ModelSource`] - Where checkpoint files come from
//! - [`TokenizerLoader`] - Loads `tokenizer.json`, or builds a WordPiece
//!   tokenizer from `vocab.txt` for older BERT checkpoints
//! - [`WeightsLoader`] - Opens safetensors or PyTorch weights as a `VarBuilder`
//!
//! Hub downloads include retry logic for lock acquisition failures caused by
//! concurrent downloads into the same cache.

use anyhow::{Context, Error as E};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use tokenizers::decoders::wordpiece::WordPiece as WordPieceDecoder;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{AddedToken, Tokenizer, TruncationParams};

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Local(PathBuf),
    Hub { repo: String, revision: String },
}

impl ModelSource {
    /// Resolve a `model_dir` argument. Existing directories win over Hub ids.
    pub fn resolve(model_dir: &str, revision: &str) -> Self {
        let path = Path::new(model_dir);
        if path.is_dir() {
            ModelSource::Local(path.to_path_buf())
        } else {
            ModelSource::Hub {
                repo: model_dir.to_string(),
                revision: revision.to_string(),
            }
        }
    }

    /// Fetch a single file, returning its local path.
    pub fn get(&self, filename: &str) -> anyhow::Result<PathBuf> {
        match self {
            ModelSource::Local(dir) => {
                let path = dir.join(filename);
                if path.is_file() {
                    Ok(path)
                } else {
                    anyhow::bail!("{filename} not found in {}", dir.display())
                }
            }
            ModelSource::Hub { repo, revision } => hub_get(repo, revision, filename),
        }
    }

    /// Read and parse a JSON file such as `config.json`.
    pub fn get_json<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.get(filename)?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| E::msg(format!("Failed to read {path:?}: {e}")))?;
        serde_json::from_str(&content).map_err(|e| E::msg(format!("Failed to parse {path:?}: {e}")))
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::Local(dir) => write!(f, "{}", dir.display()),
            ModelSource::Hub { repo, revision } => write!(f, "{repo}@{revision}"),
        }
    }
}

fn hub_get(repo: &str, revision: &str, filename: &str) -> anyhow::Result<PathBuf> {
    let api = Api::new()?;
    let repo = api.repo(Repo::with_revision(
        repo.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    let mut attempt = 0;
    loop {
        match repo.get(filename) {
            Ok(path) => return Ok(path),
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("Lock acquisition failed") && attempt < MAX_RETRIES - 1 {
                    // Wait before retrying, with exponential backoff
                    let wait_time = std::time::Duration::from_millis(100 * (1 << attempt));
                    tracing::debug!(filename, attempt, "hub lock busy, retrying");
                    std::thread::sleep(wait_time);
                    attempt += 1;
                    continue;
                }
                return Err(e.into());
            }
        }
    }
}

/// The subset of `tokenizer_config.json` used when building a tokenizer
/// from `vocab.txt`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub do_lower_case: bool,
    pub strip_accents: Option<bool>,
    pub tokenize_chinese_chars: bool,
    #[serde(deserialize_with = "special_token")]
    pub unk_token: String,
    #[serde(deserialize_with = "special_token")]
    pub sep_token: String,
    #[serde(deserialize_with = "special_token")]
    pub pad_token: String,
    #[serde(deserialize_with = "special_token")]
    pub cls_token: String,
    #[serde(deserialize_with = "special_token")]
    pub mask_token: String,
}

/// Special tokens are written either as a plain string or as a serialized
/// `AddedToken` object.
#[derive(Deserialize)]
#[serde(untagged)]
enum SpecialToken {
    Plain(String),
    Added { content: String },
}

fn special_token<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match SpecialToken::deserialize(deserializer)? {
        SpecialToken::Plain(token) => token,
        SpecialToken::Added { content } => content,
    })
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            do_lower_case: true,
            strip_accents: None,
            tokenize_chinese_chars: true,
            unk_token: "[UNK]".to_string(),
            sep_token: "[SEP]".to_string(),
            pad_token: "[PAD]".to_string(),
            cls_token: "[CLS]".to_string(),
            mask_token: "[MASK]".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenizerLoader {
    source: ModelSource,
    max_length: Option<usize>,
}

impl TokenizerLoader {
    pub fn new(source: ModelSource) -> Self {
        Self {
            source,
            max_length: None,
        }
    }

    /// Truncate encodings to at most `max_length` tokens.
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Load the tokenizer together with the mask token it expects.
    pub fn load(&self) -> anyhow::Result<(Tokenizer, String)> {
        let config: TokenizerConfig = match self.source.get_json("tokenizer_config.json") {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("no usable tokenizer_config.json ({e}), using BERT defaults");
                TokenizerConfig::default()
            }
        };

        let mut tokenizer = match self.source.get("tokenizer.json") {
            Ok(path) => Tokenizer::from_file(&path).map_err(|e| {
                E::msg(format!("Failed to load tokenizer from {path:?}: {e}"))
            })?,
            Err(_) => {
                let vocab = self
                    .source
                    .get("vocab.txt")
                    .with_context(|| {
                        format!("{} has neither tokenizer.json nor vocab.txt", self.source)
                    })?;
                tracing::info!("building WordPiece tokenizer from {}", vocab.display());
                wordpiece_from_vocab(&vocab, &config)?
            }
        };

        if let Some(max_length) = self.max_length {
            tokenizer
                .with_truncation(Some(TruncationParams {
                    max_length,
                    ..Default::default()
                }))
                .map_err(E::msg)?;
        }

        Ok((tokenizer, config.mask_token))
    }
}

/// Assemble the classic BERT tokenizer: BERT normalizer and pre-tokenizer,
/// WordPiece model, `[CLS] ... [SEP]` post-processing.
pub fn wordpiece_from_vocab(vocab: &Path, config: &TokenizerConfig) -> anyhow::Result<Tokenizer> {
    let vocab = vocab.to_string_lossy();
    let model = WordPiece::from_file(&vocab)
        .unk_token(config.unk_token.clone())
        .build()
        .map_err(|e| E::msg(format!("Failed to read WordPiece vocabulary {vocab}: {e}")))?;

    let mut tokenizer = Tokenizer::new(model);

    let special_id = |token: &str| {
        tokenizer
            .token_to_id(token)
            .ok_or_else(|| E::msg(format!("Vocabulary does not contain {token}")))
    };
    let cls_id = special_id(&config.cls_token)?;
    let sep_id = special_id(&config.sep_token)?;

    tokenizer.with_normalizer(Some(BertNormalizer::new(
        true,
        config.tokenize_chinese_chars,
        config.strip_accents,
        config.do_lower_case,
    )));
    tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));
    tokenizer.with_post_processor(Some(BertProcessing::new(
        (config.sep_token.clone(), sep_id),
        (config.cls_token.clone(), cls_id),
    )));
    tokenizer.with_decoder(Some(WordPieceDecoder::default()));

    let specials: Vec<AddedToken> = [
        &config.pad_token,
        &config.unk_token,
        &config.cls_token,
        &config.sep_token,
        &config.mask_token,
    ]
    .into_iter()
    .filter(|token| tokenizer.token_to_id(token).is_some())
    .map(|token| AddedToken::from(token.clone(), true))
    .collect();
    tokenizer.add_special_tokens(&specials);

    Ok(tokenizer)
}

#[derive(Debug, Clone)]
pub struct WeightsLoader {
    source: ModelSource,
}

impl WeightsLoader {
    pub fn new(source: ModelSource) -> Self {
        Self { source }
    }

    /// Open the checkpoint weights, preferring `model.safetensors` over
    /// `pytorch_model.bin`.
    pub fn load(&self, dtype: DType, device: &Device) -> anyhow::Result<VarBuilder<'static>> {
        let weights_filename = match self.source.get("model.safetensors") {
            Ok(sf) => sf,
            Err(_) => match self.source.get("pytorch_model.bin") {
                Ok(pb) => pb,
                Err(e) => {
                    anyhow::bail!(
                        "Model weights not found in {}. Expected `model.safetensors` \
                         or `pytorch_model.bin`. Error: {e}",
                        self.source
                    )
                }
            },
        };

        tracing::info!("loading weights from {}", weights_filename.display());

        let vb = if weights_filename
            .extension()
            .is_some_and(|ext| ext == "safetensors")
        {
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], dtype, device)? }
        } else if weights_filename
            .extension()
            .is_some_and(|ext| ext == "bin")
        {
            VarBuilder::from_pth(&weights_filename, dtype, device)?
        } else {
            anyhow::bail!("Unsupported weight file format: {:?}", weights_filename);
        };

        Ok(vb)
    }
}
