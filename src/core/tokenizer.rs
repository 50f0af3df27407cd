//! Model → BPE encoding lookup and token counting.
//!
//! The mapping table is plain data owned by [`TokenizerRegistry`]; the
//! default carries the well-known OpenAI model families, with Claude models
//! approximated by `cl100k_base`. Unknown models fail with
//! [`AppError::UnsupportedModel`] unless a fallback encoding is configured.

use crate::domain::model::TokenCount;
use crate::utils::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tiktoken_rs::CoreBPE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "cl100k_base")]
    Cl100kBase,
    #[serde(rename = "o200k_base")]
    O200kBase,
    #[serde(rename = "p50k_base")]
    P50kBase,
    #[serde(rename = "r50k_base")]
    R50kBase,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Self::Cl100kBase => "cl100k_base",
            Self::O200kBase => "o200k_base",
            Self::P50kBase => "p50k_base",
            Self::R50kBase => "r50k_base",
        }
    }

    fn load(self) -> Result<CoreBPE> {
        let bpe = match self {
            Self::Cl100kBase => tiktoken_rs::cl100k_base(),
            Self::O200kBase => tiktoken_rs::o200k_base(),
            Self::P50kBase => tiktoken_rs::p50k_base(),
            Self::R50kBase => tiktoken_rs::r50k_base(),
        };
        bpe.map_err(|e| AppError::TokenizerError {
            message: format!("failed to load {}: {}", self.name(), e),
        })
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "cl100k_base" => Ok(Self::Cl100kBase),
            "o200k_base" => Ok(Self::O200kBase),
            "p50k_base" => Ok(Self::P50kBase),
            "r50k_base" => Ok(Self::R50kBase),
            other => Err(AppError::InvalidConfigValueError {
                field: "encoding".to_string(),
                value: other.to_string(),
                reason: "expected one of cl100k_base, o200k_base, p50k_base, r50k_base"
                    .to_string(),
            }),
        }
    }
}

const DEFAULT_MODELS: &[(&str, Encoding)] = &[
    ("gpt-4o", Encoding::O200kBase),
    ("gpt-4", Encoding::Cl100kBase),
    ("gpt-3.5-turbo", Encoding::Cl100kBase),
    ("gpt-35-turbo", Encoding::Cl100kBase),
    ("text-embedding-ada-002", Encoding::Cl100kBase),
    ("text-embedding-3-small", Encoding::Cl100kBase),
    ("text-embedding-3-large", Encoding::Cl100kBase),
    ("text-davinci-003", Encoding::P50kBase),
    ("text-davinci-002", Encoding::P50kBase),
    ("code-davinci-002", Encoding::P50kBase),
    ("davinci", Encoding::R50kBase),
    ("gpt2", Encoding::R50kBase),
];

const DEFAULT_PREFIXES: &[(&str, Encoding)] = &[
    ("o1", Encoding::O200kBase),
    ("o3", Encoding::O200kBase),
    ("gpt-4.1", Encoding::O200kBase),
    ("gpt-4o-", Encoding::O200kBase),
    ("gpt-4-", Encoding::Cl100kBase),
    ("gpt-3.5-turbo-", Encoding::Cl100kBase),
    ("gpt-35-turbo-", Encoding::Cl100kBase),
    ("claude-", Encoding::Cl100kBase),
];

const DEFAULT_CONTEXT_LIMITS: &[(&str, usize)] = &[
    ("gpt-3.5-turbo", 4096),
    ("gpt-4", 8192),
    ("gpt-4-turbo", 128_000),
    ("gpt-4o", 128_000),
    ("claude-3-sonnet", 200_000),
    ("claude-3-opus", 200_000),
];

/// Injectable model → encoding table plus per-model context windows.
#[derive(Debug, Clone)]
pub struct TokenizerRegistry {
    models: HashMap<String, Encoding>,
    prefixes: Vec<(String, Encoding)>,
    context_limits: HashMap<String, usize>,
    fallback: Option<Encoding>,
}

impl Default for TokenizerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (model, encoding) in DEFAULT_MODELS {
            registry.insert_model(*model, *encoding);
        }
        for (prefix, encoding) in DEFAULT_PREFIXES {
            registry.insert_prefix(*prefix, *encoding);
        }
        for (model, limit) in DEFAULT_CONTEXT_LIMITS {
            registry.insert_context_limit(*model, *limit);
        }
        registry
    }
}

impl TokenizerRegistry {
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
            prefixes: Vec::new(),
            context_limits: HashMap::new(),
            fallback: None,
        }
    }

    pub fn insert_model(&mut self, model: impl Into<String>, encoding: Encoding) {
        self.models.insert(model.into(), encoding);
    }

    pub fn insert_prefix(&mut self, prefix: impl Into<String>, encoding: Encoding) {
        let prefix = prefix.into();
        self.prefixes.retain(|(p, _)| *p != prefix);
        self.prefixes.push((prefix, encoding));
    }

    pub fn insert_context_limit(&mut self, model: impl Into<String>, limit: usize) {
        self.context_limits.insert(model.into(), limit);
    }

    pub fn with_fallback(mut self, fallback: Option<Encoding>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback(&self) -> Option<Encoding> {
        self.fallback
    }

    /// Exact name first, then the longest matching prefix, then the fallback.
    pub fn resolve(&self, model: &str) -> Result<Encoding> {
        if let Some(encoding) = self.models.get(model) {
            return Ok(*encoding);
        }

        let by_prefix = self
            .prefixes
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, encoding)| *encoding);

        by_prefix
            .or(self.fallback)
            .ok_or_else(|| AppError::UnsupportedModel {
                model: model.to_string(),
            })
    }

    pub fn context_limit(&self, model: &str) -> Option<usize> {
        if let Some(limit) = self.context_limits.get(model) {
            return Some(*limit);
        }
        self.context_limits
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, limit)| *limit)
    }
}

/// Counts tokens through the registry, building each BPE at most once.
pub struct Tokenizer {
    registry: TokenizerRegistry,
    cache: Mutex<HashMap<Encoding, Arc<CoreBPE>>>,
}

impl Tokenizer {
    pub fn new(registry: TokenizerRegistry) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &TokenizerRegistry {
        &self.registry
    }

    pub fn bpe(&self, encoding: Encoding) -> Result<Arc<CoreBPE>> {
        let mut cache = self.cache.lock().map_err(|_| AppError::TokenizerError {
            message: "tokenizer cache poisoned".to_string(),
        })?;

        if let Some(bpe) = cache.get(&encoding) {
            return Ok(Arc::clone(bpe));
        }

        tracing::debug!("Loading {} vocabulary", encoding);
        let bpe = Arc::new(encoding.load()?);
        cache.insert(encoding, Arc::clone(&bpe));
        Ok(bpe)
    }

    pub fn bpe_for_model(&self, model: &str) -> Result<Arc<CoreBPE>> {
        let encoding = self.registry.resolve(model)?;
        self.bpe(encoding)
    }

    /// Token count of `text` under `model`'s encoding.
    ///
    /// Special-token markers such as `<|endoftext|>` are counted as ordinary
    /// text, so arbitrary document content never changes meaning.
    pub fn estimate(&self, text: &str, model: &str) -> Result<TokenCount> {
        let encoding = self.registry.resolve(model)?;
        let bpe = self.bpe(encoding)?;
        Ok(TokenCount {
            model: model.to_string(),
            encoding: encoding.name().to_string(),
            tokens: count_with(&bpe, text),
        })
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(TokenizerRegistry::default())
    }
}

pub fn count_with(bpe: &CoreBPE, text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    bpe.encode_ordinary(text).len()
}
