//! Token estimation used by the reduce stage to respect the context budget.
//!
//! Known `tiktoken` encodings and model names resolve to a BPE counter; the name `whitespace`
//! selects a dependency-free counter that is handy for offline tests.

use std::fmt;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

use super::types::TokenizerError;

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Name of the encoding that counts whitespace-separated words.
pub const WHITESPACE_ENCODING: &str = "whitespace";

/// Cheap, cloneable token counter.
#[derive(Clone)]
pub struct TokenEstimator {
    name: String,
    counter: TokenCounter,
}

impl fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("name", &self.name)
            .finish()
    }
}

impl TokenEstimator {
    /// Resolve an estimator for an encoding name (`cl100k_base`), a model name (`gpt-4o`), or
    /// `whitespace`.
    pub fn for_encoding(name: &str) -> Result<Self, TokenizerError> {
        let normalized = name.trim();
        if normalized.eq_ignore_ascii_case(WHITESPACE_ENCODING) {
            return Ok(Self::whitespace());
        }
        let target = if normalized.is_empty() {
            "cl100k_base"
        } else {
            normalized
        };
        let encoding = resolve_encoding(target).map_err(|source| TokenizerError {
            encoding: target.to_string(),
            source,
        })?;
        let encoding = Arc::new(encoding);

        Ok(Self {
            name: target.to_string(),
            counter: Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len()),
        })
    }

    /// Whitespace word counter; never fails and needs no tokenizer data.
    pub fn whitespace() -> Self {
        Self {
            name: WHITESPACE_ENCODING.to_string(),
            counter: default_token_counter(),
        }
    }

    /// Estimated token count of `text`.
    pub fn estimate(&self, text: &str) -> usize {
        (self.counter)(text)
    }

    /// Encoding this estimator was built for.
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, anyhow::Error> {
    if let Some(candidate) = encoding_from_name(model) {
        return candidate;
    }
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::warn!(
                model,
                error = %model_err,
                "Unknown tokenizer; falling back to 'cl100k_base' for token estimation"
            );
            cl100k_base()
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, anyhow::Error>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

fn default_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}
