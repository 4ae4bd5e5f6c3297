//! tallytok - cl100k_base BPE tokenizer for token accounting.
//!
//! Encodes text exactly as the cl100k_base vocabulary does (GPT-4,
//! GPT-3.5-turbo), so token counts computed here agree with what the remote
//! model charges. The main entry points are:
//!
//! - [`count_tokens`] and [`shared`]: the process-wide cl100k_base tokenizer
//! - [`Tokenizer`]: encoding, special tokens and decoding over any tiktoken vocabulary
//! - [`history`]: picking the conversation history that fits a [`BudgetConfig`]
//!
//! ```rust
//! let tokenizer = tallytok::shared().unwrap();
//! let tokens = tokenizer.encode_ordinary("Hello, world!").unwrap();
//! assert_eq!(tokens, vec![9906, 11, 1917, 0]);
//! assert_eq!(tokenizer.decode(&tokens).unwrap(), "Hello, world!");
//! ```

pub mod config;
pub mod core;
pub mod history;
#[cfg(feature = "python")]
mod python;

pub use config::{BudgetBuilder, BudgetConfig, ConfigError};
pub use core::{
    cl100k_base, count_tokens, shared, Rank, RankMap, Tokenizer, TokenizerError, VocabError,
    CL100K_BASE_PATTERN,
};
pub use history::{build_messages, select_history, Exchange, Message, Role};
