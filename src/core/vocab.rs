//! Vocabulary table and loading utilities for the tiktoken BPE format.
//!
//! A [`RankMap`] is the bijection between byte sequences and ranks that drives
//! both encoding and decoding. Rank doubles as merge priority: lower ranks are
//! merged first during byte-pair encoding, so the order of the source list is
//! load-bearing.
//!
//! # Tiktoken Format
//!
//! Each line of a `.tiktoken` file holds a base64-encoded token and its rank,
//! separated by a single space:
//!
//! ```text
//! SGVsbG8= 0
//! V29ybGQ= 1
//! IQ== 2
//! ```
//!
//! Where `SGVsbG8=` decodes to `Hello` (rank 0), `V29ybGQ=` to `World` (rank 1)
//! and `IQ==` to `!` (rank 2).

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Integer id assigned to a byte sequence (or special token).
pub type Rank = u32;

/// Errors that can occur when loading vocabulary files.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Invalid base64 encoding: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Invalid line format: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Byte-sequence to rank table.
///
/// Lookups compare byte content, never identity: the key is an owned
/// `Vec<u8>` and queries borrow it as `&[u8]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankMap {
    ranks: FxHashMap<Vec<u8>, Rank>,
}

impl RankMap {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table where each sequence's rank is its position in the list.
    ///
    /// The list must be in the canonical order of the target vocabulary;
    /// reordering it changes merge priority and therefore tokenization.
    pub fn from_list<I, B>(sequences: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        let ranks = sequences
            .into_iter()
            .enumerate()
            .map(|(i, bytes)| (bytes.into(), i as Rank))
            .collect();
        Self { ranks }
    }

    /// Look up the rank of an exact byte sequence.
    #[inline]
    pub fn get(&self, bytes: &[u8]) -> Option<Rank> {
        self.ranks.get(bytes).copied()
    }

    /// Insert or overwrite a single entry.
    pub fn set(&mut self, bytes: &[u8], rank: Rank) {
        self.ranks.insert(bytes.to_vec(), rank);
    }

    /// All byte sequences in the table, in no particular order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.ranks.keys().cloned().collect()
    }

    /// Iterate over `(bytes, rank)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Rank)> {
        self.ranks.iter().map(|(k, &v)| (k.as_slice(), v))
    }

    /// Build the rank to bytes mapping used for decoding.
    pub fn inverted(&self) -> FxHashMap<Rank, Vec<u8>> {
        self.ranks.iter().map(|(k, v)| (*v, k.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Single byte values that have no rank.
    ///
    /// Must be empty for any vocabulary used to encode arbitrary text: a piece
    /// containing an unranked byte cannot be resolved to token ids.
    pub fn missing_bytes(&self) -> Vec<u8> {
        (0..=u8::MAX).filter(|b| self.get(&[*b]).is_none()).collect()
    }
}

impl FromIterator<(Vec<u8>, Rank)> for RankMap {
    fn from_iter<T: IntoIterator<Item = (Vec<u8>, Rank)>>(iter: T) -> Self {
        Self {
            ranks: iter.into_iter().collect(),
        }
    }
}

/// Parse a single `base64 rank` line.
fn parse_line(line: &[u8]) -> Result<(Vec<u8>, Rank), VocabError> {
    let space_pos = line
        .iter()
        .rposition(|&b| b == b' ')
        .ok_or_else(|| VocabError::ParseError("Missing space separator".to_string()))?;

    let token = STANDARD.decode(&line[..space_pos])?;

    let rank_str = std::str::from_utf8(&line[space_pos + 1..])
        .map_err(|_| VocabError::ParseError("Invalid UTF-8 in rank".to_string()))?;
    let rank: Rank = rank_str
        .trim()
        .parse()
        .map_err(|_| VocabError::ParseError(format!("Invalid rank: {}", rank_str)))?;

    Ok((token, rank))
}

/// Load a tiktoken BPE vocabulary from raw bytes.
///
/// Duplicate byte sequences or duplicate ranks are rejected, since either one
/// breaks the bijection the decoder relies on.
pub fn load_tiktoken_bpe(data: &[u8]) -> Result<RankMap, VocabError> {
    let mut ranks: FxHashMap<Vec<u8>, Rank> = FxHashMap::default();
    let mut seen_ranks: FxHashMap<Rank, usize> = FxHashMap::default();

    for (line_no, line) in data.split(|&b| b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let (token, rank) = parse_line(line)?;

        if let Some(prev) = seen_ranks.insert(rank, line_no) {
            return Err(VocabError::ParseError(format!(
                "rank {} on line {} already assigned on line {}",
                rank,
                line_no + 1,
                prev + 1
            )));
        }
        if ranks.insert(token, rank).is_some() {
            return Err(VocabError::ParseError(format!(
                "duplicate token on line {}",
                line_no + 1
            )));
        }
    }

    Ok(RankMap { ranks })
}

/// Load a tiktoken BPE vocabulary from a file path.
pub fn load_tiktoken_bpe_file(path: &str) -> Result<RankMap, VocabError> {
    let data = std::fs::read(path)?;
    load_tiktoken_bpe(&data)
}
