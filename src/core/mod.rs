//! Core tokenization engine for tallytok.
//!
//! # Architecture
//!
//! - [`vocab`]: the [`RankMap`] vocabulary table and the tiktoken file loader
//! - [`bpe`]: byte-pair merging of a single piece (linked-list merge)
//! - [`pretokenize`]: splitting text into pieces with a per-call scan cursor
//! - [`Tokenizer`]: encoding, special tokens and decoding over one vocabulary
//! - [`pretrained`]: the bundled cl100k_base vocabulary and shared tokenizer
//!
//! Data flows text → pieces → ranks per piece → concatenated token stream.
//! Decoding maps each id back to its bytes independently of pieces.

pub mod bpe;
pub mod pretokenize;
pub mod pretrained;
mod tokenizer;
pub mod vocab;

pub use bpe::{byte_pair_encode, byte_pair_merge, byte_pair_split};
pub use pretokenize::{next_piece, Pieces, CL100K_BASE_PATTERN};
pub use pretrained::{cl100k_base, cl100k_base_special_tokens, count_tokens, shared};
pub use tokenizer::{Tokenizer, TokenizerError};
pub use vocab::{load_tiktoken_bpe, load_tiktoken_bpe_file, Rank, RankMap, VocabError};
