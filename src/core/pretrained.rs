//! Bundled cl100k_base vocabulary (GPT-4, GPT-3.5-turbo).
//!
//! The vocabulary file is embedded at compile time and parsed once, on first
//! use, into a process-wide [`Tokenizer`]. Its line order defines rank and
//! rank defines merge priority, so the file must stay byte-identical to the
//! published `cl100k_base.tiktoken`; any edit silently breaks agreement with
//! the remote model's token accounting.
//!
//! # Example
//!
//! ```rust
//! let n = tallytok::count_tokens("Hello, world!").unwrap();
//! assert_eq!(n, 4);
//! ```

use log::debug;
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;

use super::pretokenize::CL100K_BASE_PATTERN;
use super::tokenizer::{Tokenizer, TokenizerError};
use super::vocab::Rank;

/// Embedded `cl100k_base.tiktoken` (100,256 ranks).
pub const CL100K_BASE_VOCAB: &[u8] = include_bytes!("../../vocabs/cl100k_base.tiktoken");

/// Number of ordinary ranks in cl100k_base.
pub const CL100K_BASE_RANKS: usize = 100_256;

pub const ENDOFTEXT: &str = "<|endoftext|>";
pub const FIM_PREFIX: &str = "<|fim_prefix|>";
pub const FIM_MIDDLE: &str = "<|fim_middle|>";
pub const FIM_SUFFIX: &str = "<|fim_suffix|>";
pub const ENDOFPROMPT: &str = "<|endofprompt|>";

/// Special tokens of cl100k_base. Ids sit above the ordinary rank range.
pub fn cl100k_base_special_tokens() -> FxHashMap<String, Rank> {
    let mut special = FxHashMap::default();
    special.insert(ENDOFTEXT.to_string(), 100257);
    special.insert(FIM_PREFIX.to_string(), 100258);
    special.insert(FIM_MIDDLE.to_string(), 100259);
    special.insert(FIM_SUFFIX.to_string(), 100260);
    special.insert(ENDOFPROMPT.to_string(), 100276);
    special
}

/// Build a fresh cl100k_base tokenizer from the embedded vocabulary.
///
/// Most callers want [`shared`] instead, which builds it once per process.
pub fn cl100k_base() -> Result<Tokenizer, TokenizerError> {
    Tokenizer::from_bytes(
        CL100K_BASE_VOCAB,
        CL100K_BASE_PATTERN,
        cl100k_base_special_tokens(),
    )
}

static SHARED: OnceCell<Tokenizer> = OnceCell::new();

/// Process-wide cl100k_base tokenizer, built on first call.
///
/// A failed build is not cached; the next call retries and reports the same
/// error.
pub fn shared() -> Result<&'static Tokenizer, TokenizerError> {
    SHARED.get_or_try_init(|| {
        let tokenizer = cl100k_base()?;
        debug!(
            "initialized shared cl100k_base tokenizer ({} ids)",
            tokenizer.vocab_size()
        );
        Ok(tokenizer)
    })
}

/// Count cl100k_base tokens in `text`, ignoring special tokens.
///
/// This is the count used for context budgeting and per-message accounting;
/// it equals the length of [`Tokenizer::encode_ordinary`].
pub fn count_tokens(text: &str) -> Result<usize, TokenizerError> {
    shared()?.count_tokens(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_tokens_above_ordinary_ranks() {
        for (literal, &id) in &cl100k_base_special_tokens() {
            assert!(id as usize >= CL100K_BASE_RANKS, "{} has id {}", literal, id);
        }
    }

    #[test]
    fn test_shared_is_built_once() {
        let a = shared().unwrap();
        let b = shared().unwrap();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.encoder().len(), CL100K_BASE_RANKS);
    }
}
