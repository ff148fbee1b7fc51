//! Approximate token counting for context-window budgeting.
//!
//! `TokenCounter` estimates how many tokens a piece of text costs. It uses
//! the `cl100k_base` BPE table when that loads, and otherwise falls back to
//! one unit per Unicode scalar value. Counting never fails.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Which estimate a [`TokenCounter`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// `cl100k_base` BPE, falling back to characters if the table fails to load.
    Cl100kBase,
    /// One token per Unicode scalar value.
    Characters,
}

/// Thread-safe, side-effect-free token estimator.
///
/// The BPE table is loaded lazily, at most once per counter. Share a single
/// instance as `Arc<TokenCounter>`.
pub struct TokenCounter {
    encoding: Encoding,
    bpe: OnceLock<Option<CoreBPE>>,
}

impl TokenCounter {
    /// A counter backed by the `cl100k_base` encoding.
    pub fn cl100k() -> Self {
        Self {
            encoding: Encoding::Cl100kBase,
            bpe: OnceLock::new(),
        }
    }

    /// A counter that charges one token per character.
    pub fn characters() -> Self {
        Self {
            encoding: Encoding::Characters,
            bpe: OnceLock::new(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Estimated token cost of `text`.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self.bpe() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.chars().count(),
        }
    }

    /// Estimated cost of `text` as a `u32`, saturating.
    pub fn count_u32(&self, text: &str) -> u32 {
        u32::try_from(self.count(text)).unwrap_or(u32::MAX)
    }

    fn bpe(&self) -> Option<&CoreBPE> {
        if self.encoding == Encoding::Characters {
            return None;
        }
        self.bpe
            .get_or_init(|| match tiktoken_rs::cl100k_base() {
                Ok(bpe) => Some(bpe),
                Err(e) => {
                    warn!(error = %e, "Failed to load cl100k_base, falling back to character counts");
                    None
                }
            })
            .as_ref()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::cl100k()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding", &self.encoding)
            .field("loaded", &self.bpe.get().is_some())
            .finish()
    }
}
