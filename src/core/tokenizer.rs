use aho_corasick::{AhoCorasick, Input, MatchKind};
use fancy_regex::Regex;
use log::debug;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::bpe::byte_pair_encode;
use super::pretokenize::Pieces;
use super::vocab::{load_tiktoken_bpe, load_tiktoken_bpe_file, Rank, RankMap, VocabError};

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Regex error: {0}")]
    Regex(#[from] fancy_regex::Error),
    #[error("Vocabulary error: {0}")]
    VocabError(#[from] VocabError),
    #[error("Vocabulary gap: no rank for byte sequence {bytes:?}")]
    VocabularyGap { bytes: Vec<u8> },
    #[error("Token id {0} not found in vocabulary or special tokens")]
    TokenNotFound(Rank),
    #[error("Piece {0:?} not found in vocabulary or special tokens")]
    PieceNotFound(Vec<u8>),
    #[error("Special token {token:?} reuses ordinary rank {rank}")]
    SpecialTokenCollision { token: String, rank: Rank },
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("Decoding error: invalid UTF-8")]
    Utf8Error,
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasickError(#[from] aho_corasick::BuildError),
}

/// Byte-pair-encoding tokenizer over a fixed vocabulary.
///
/// All tables are built once in [`Tokenizer::new`] and never mutated, so a
/// tokenizer can be shared by reference across threads without locking. Each
/// encode call scans with its own cursor (see [`Pieces`]).
///
/// # Key Properties
///
/// - Exact byte-content lookups through `FxHashMap<Vec<u8>, Rank>`
/// - Whole-piece fast path before byte-pair merging
/// - Aho-Corasick matching for special tokens, opted into per call
/// - Rayon parallelism across texts for batch helpers
pub struct Tokenizer {
    encoder: RankMap,
    decoder: FxHashMap<Rank, Vec<u8>>,
    special_tokens: FxHashMap<String, Rank>,
    special_tokens_decoder: FxHashMap<Rank, Vec<u8>>,
    special_token_strings: Vec<String>,
    special_matcher: Option<AhoCorasick>,
    regex: Regex,
    pattern: String,
    sorted_token_bytes: Vec<Vec<u8>>,
}

impl Tokenizer {
    /// Create a new tokenizer from a rank table, special tokens, and split pattern.
    ///
    /// # Arguments
    /// * `encoder` - Byte sequences and their ranks; must rank all 256 single bytes
    /// * `special_tokens` - Special token literals and their ids
    /// * `pattern` - Pre-tokenization regex
    ///
    /// # Errors
    /// [`TokenizerError::VocabularyGap`] if a single byte has no rank,
    /// [`TokenizerError::SpecialTokenCollision`] if a special id is also an
    /// ordinary rank, or a build error from the regex or Aho-Corasick automaton.
    pub fn new(
        encoder: RankMap,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
    ) -> Result<Self, TokenizerError> {
        if let Some(&byte) = encoder.missing_bytes().first() {
            return Err(TokenizerError::VocabularyGap { bytes: vec![byte] });
        }

        let decoder = encoder.inverted();
        for (token, &rank) in &special_tokens {
            if decoder.contains_key(&rank) {
                return Err(TokenizerError::SpecialTokenCollision {
                    token: token.clone(),
                    rank,
                });
            }
        }
        let special_tokens_decoder: FxHashMap<Rank, Vec<u8>> = special_tokens
            .iter()
            .map(|(k, v)| (*v, k.as_bytes().to_vec()))
            .collect();

        let regex = Regex::new(pattern)?;

        let special_token_strings: Vec<String> = special_tokens.keys().cloned().collect();
        let special_matcher = if special_token_strings.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(&special_token_strings)?,
            )
        };

        let mut sorted_token_bytes = encoder.keys();
        sorted_token_bytes.sort_unstable();

        debug!(
            "built tokenizer: {} ranks, {} special tokens",
            encoder.len(),
            special_tokens.len()
        );

        Ok(Self {
            encoder,
            decoder,
            special_tokens,
            special_tokens_decoder,
            special_token_strings,
            special_matcher,
            regex,
            pattern: pattern.to_string(),
            sorted_token_bytes,
        })
    }

    /// Create a tokenizer from a tiktoken vocabulary file.
    pub fn from_file(
        vocab_path: &str,
        pattern: &str,
        special_tokens: FxHashMap<String, Rank>,
    ) -> Result<Self, TokenizerError> {
        let encoder = load_tiktoken_bpe_file(vocab_path)?;
        Self::new(encoder, special_tokens, pattern)
    }

    /// Create a tokenizer from raw tiktoken vocabulary bytes.
    pub fn from_bytes(
        vocab_data: &[u8],
        pattern: &str,
        special_tokens: FxHashMap<String, Rank>,
    ) -> Result<Self, TokenizerError> {
        let encoder = load_tiktoken_bpe(vocab_data)?;
        Self::new(encoder, special_tokens, pattern)
    }

    /// Encode one piece: whole-piece lookup first, byte-pair merge otherwise.
    ///
    /// Both paths agree for pieces that are themselves vocabulary entries.
    pub fn encode_single_piece(&self, piece: &[u8]) -> Result<Vec<Rank>, TokenizerError> {
        if let Some(rank) = self.encoder.get(piece) {
            return Ok(vec![rank]);
        }
        byte_pair_encode(piece, &self.encoder)
    }

    /// Append the tokens of `text` (no special tokens) to `out`.
    ///
    /// Returns the token count of the last piece.
    fn encode_ordinary_into(&self, text: &str, out: &mut Vec<Rank>) -> Result<usize, TokenizerError> {
        let mut last_piece_token_len = 0;
        for piece in Pieces::new(&self.regex, text) {
            let piece = piece?.as_bytes();
            match self.encoder.get(piece) {
                Some(rank) => {
                    out.push(rank);
                    last_piece_token_len = 1;
                }
                None => {
                    let tokens = byte_pair_encode(piece, &self.encoder)?;
                    last_piece_token_len = tokens.len();
                    out.extend(tokens);
                }
            }
        }
        Ok(last_piece_token_len)
    }

    /// Encode text to token ids. Special token literals are treated as plain text.
    pub fn encode_ordinary(&self, text: &str) -> Result<Vec<Rank>, TokenizerError> {
        let mut tokens = Vec::new();
        self.encode_ordinary_into(text, &mut tokens)?;
        Ok(tokens)
    }

    /// Number of tokens `text` encodes to, ignoring special tokens.
    pub fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(self.encode_ordinary(text)?.len())
    }

    /// Find the next special token at or after `from` whose literal is allowed.
    ///
    /// Disallowed occurrences are skipped by resuming one byte past their start.
    fn next_allowed_special(
        &self,
        text: &str,
        mut from: usize,
        allowed_special: &FxHashSet<&str>,
    ) -> Option<(usize, usize, Rank)> {
        let matcher = self.special_matcher.as_ref()?;
        while from < text.len() {
            let m = matcher.find(Input::new(text).range(from..))?;
            let literal = &self.special_token_strings[m.pattern().as_usize()];
            if allowed_special.contains(literal.as_str()) {
                let rank = *self.special_tokens.get(literal)?;
                return Some((m.start(), m.end(), rank));
            }
            from = m.start() + 1;
        }
        None
    }

    /// Encode text, recognizing the special tokens listed in `allowed_special`.
    ///
    /// Registered literals that are not allowed are encoded as ordinary text.
    /// Returns the tokens and the number of tokens produced by the last
    /// ordinary piece (0 if the text ends with a special token).
    pub fn encode(
        &self,
        text: &str,
        allowed_special: &FxHashSet<&str>,
    ) -> Result<(Vec<Rank>, usize), TokenizerError> {
        let mut tokens = Vec::new();
        let mut start = 0;
        let mut last_piece_token_len = 0;

        loop {
            let next_special = self.next_allowed_special(text, start, allowed_special);
            let end = next_special.map_or(text.len(), |(s, _, _)| s);

            if end > start {
                last_piece_token_len = self.encode_ordinary_into(&text[start..end], &mut tokens)?;
            }

            match next_special {
                Some((_, special_end, rank)) => {
                    tokens.push(rank);
                    start = special_end;
                    last_piece_token_len = 0;
                }
                None => break,
            }
        }

        Ok((tokens, last_piece_token_len))
    }

    /// Encode text with every registered special token allowed.
    pub fn encode_with_special(&self, text: &str) -> Result<Vec<Rank>, TokenizerError> {
        let allowed: FxHashSet<&str> = self.special_token_strings.iter().map(String::as_str).collect();
        Ok(self.encode(text, &allowed)?.0)
    }

    /// Speculative retokenization of the trailing piece. Not supported.
    pub fn encode_with_unstable(
        &self,
        _text: &str,
        _allowed_special: &FxHashSet<&str>,
    ) -> Result<(Vec<Rank>, Vec<Vec<Rank>>), TokenizerError> {
        Err(TokenizerError::Unsupported("encode_with_unstable"))
    }

    /// Map an exact byte sequence to its id, checking ordinary ranks first and
    /// then special token literals.
    pub fn encode_single_token(&self, piece: &[u8]) -> Result<Rank, TokenizerError> {
        if let Some(rank) = self.encoder.get(piece) {
            return Ok(rank);
        }
        if let Ok(literal) = std::str::from_utf8(piece) {
            if let Some(&rank) = self.special_tokens.get(literal) {
                return Ok(rank);
            }
        }
        Err(TokenizerError::PieceNotFound(piece.to_vec()))
    }

    /// Split text into the pieces the pre-tokenizer produces.
    pub fn split_pieces<'t>(&self, text: &'t str) -> Result<Vec<&'t str>, TokenizerError> {
        Pieces::new(&self.regex, text).collect()
    }

    /// Bytes for one token id, ordinary decoder first, special decoder second.
    pub fn decode_single_token_bytes(&self, token: Rank) -> Result<Vec<u8>, TokenizerError> {
        self.token_bytes(token)
            .map(<[u8]>::to_vec)
            .ok_or(TokenizerError::TokenNotFound(token))
    }

    #[inline]
    fn token_bytes(&self, token: Rank) -> Option<&[u8]> {
        self.decoder
            .get(&token)
            .or_else(|| self.special_tokens_decoder.get(&token))
            .map(Vec::as_slice)
    }

    /// Decode token ids back to bytes.
    pub fn decode_bytes(&self, tokens: &[Rank]) -> Result<Vec<u8>, TokenizerError> {
        let mut result = Vec::with_capacity(tokens.len() * 4);
        for &token in tokens {
            let bytes = self
                .token_bytes(token)
                .ok_or(TokenizerError::TokenNotFound(token))?;
            result.extend_from_slice(bytes);
        }
        Ok(result)
    }

    /// Decode token ids to a string.
    pub fn decode(&self, tokens: &[Rank]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        String::from_utf8(bytes).map_err(|_| TokenizerError::Utf8Error)
    }

    /// Decode token ids to a string, replacing invalid UTF-8 with the replacement character.
    pub fn decode_lossy(&self, tokens: &[Rank]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Batch encode multiple texts in parallel.
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<Rank>>, TokenizerError> {
        texts
            .par_iter()
            .map(|text| self.encode_ordinary(text))
            .collect()
    }

    /// Batch count tokens of multiple texts in parallel.
    pub fn count_tokens_batch(&self, texts: &[String]) -> Result<Vec<usize>, TokenizerError> {
        texts
            .par_iter()
            .map(|text| self.count_tokens(text))
            .collect()
    }

    /// All ordinary token byte sequences, sorted lexicographically.
    pub fn token_byte_values(&self) -> &[Vec<u8>] {
        &self.sorted_token_bytes
    }

    /// Vocabulary size: highest id (ordinary or special) plus one.
    pub fn vocab_size(&self) -> usize {
        let max_decoder_id = self.decoder.keys().max().copied().unwrap_or(0);
        let max_special_id = self.special_tokens.values().max().copied().unwrap_or(0);
        max_decoder_id.max(max_special_id) as usize + 1
    }

    /// Get the encoder table (token bytes -> id).
    pub fn encoder(&self) -> &RankMap {
        &self.encoder
    }

    /// Get the decoder map (token id -> bytes).
    pub fn decoder(&self) -> &FxHashMap<Rank, Vec<u8>> {
        &self.decoder
    }

    /// Get the special tokens map.
    pub fn special_tokens(&self) -> &FxHashMap<String, Rank> {
        &self.special_tokens
    }

    /// Get the special tokens decoder map.
    pub fn special_tokens_decoder(&self) -> &FxHashMap<Rank, Vec<u8>> {
        &self.special_tokens_decoder
    }

    /// The pre-tokenization pattern this tokenizer was built with.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_tokenizer() -> Tokenizer {
        let mut encoder: RankMap = (0..=255u8).map(|b| (vec![b], b as Rank)).collect();
        encoder.set(b"Hello", 300);
        encoder.set(b"World", 301);
        encoder.set(b" World", 302);
        encoder.set(b"ab", 303);
        encoder.set(b"abc", 304);

        let mut special_tokens = FxHashMap::default();
        special_tokens.insert("<|endoftext|>".to_string(), 50256);
        special_tokens.insert("<|fim|>".to_string(), 50257);

        let pattern = r"\S+|\s+";
        Tokenizer::new(encoder, special_tokens, pattern).unwrap()
    }

    fn allow<'a>(literals: &[&'a str]) -> FxHashSet<&'a str> {
        literals.iter().copied().collect()
    }

    #[test]
    fn test_encode_decode() {
        let tokenizer = make_test_tokenizer();
        let text = "Hello World";
        let tokens = tokenizer.encode_ordinary(text).unwrap();
        assert_eq!(tokens, vec![300, 32, 301]);
        assert_eq!(tokenizer.decode(&tokens).unwrap(), text);
    }

    #[test]
    fn test_empty_text() {
        let tokenizer = make_test_tokenizer();
        assert!(tokenizer.encode_ordinary("").unwrap().is_empty());
        assert_eq!(tokenizer.count_tokens("").unwrap(), 0);
        assert_eq!(tokenizer.encode("", &allow(&["<|fim|>"])).unwrap(), (vec![], 0));
    }

    #[test]
    fn test_whole_piece_and_merge_paths_agree() {
        let tokenizer = make_test_tokenizer();
        assert_eq!(tokenizer.encode_single_piece(b"abc").unwrap(), vec![304]);
        assert_eq!(byte_pair_encode(b"abc", tokenizer.encoder()).unwrap(), vec![304]);
        assert_eq!(
            tokenizer.encode_single_piece(b"abcd").unwrap(),
            vec![304, b'd' as Rank]
        );
    }

    #[test]
    fn test_encode_ordinary_ignores_special() {
        let tokenizer = make_test_tokenizer();
        let tokens = tokenizer.encode_ordinary("a<|endoftext|>").unwrap();
        assert!(!tokens.contains(&50256));
        assert_eq!(tokenizer.decode(&tokens).unwrap(), "a<|endoftext|>");
    }

    #[test]
    fn test_encode_allowed_special() {
        let tokenizer = make_test_tokenizer();
        let (tokens, last) = tokenizer
            .encode("abc<|endoftext|>ab", &allow(&["<|endoftext|>"]))
            .unwrap();
        assert_eq!(tokens, vec![304, 50256, 303]);
        assert_eq!(last, 1);

        let (tokens, last) = tokenizer
            .encode("abc<|endoftext|>", &allow(&["<|endoftext|>"]))
            .unwrap();
        assert_eq!(tokens, vec![304, 50256]);
        assert_eq!(last, 0);
    }

    #[test]
    fn test_encode_disallowed_special_is_text() {
        let tokenizer = make_test_tokenizer();
        let text = "<|endoftext|><|fim|>";
        let (tokens, _) = tokenizer.encode(text, &allow(&["<|fim|>"])).unwrap();
        assert_eq!(tokens.last(), Some(&50257));
        assert!(!tokens.contains(&50256));
        assert_eq!(tokenizer.decode(&tokens).unwrap(), text);

        let (tokens, _) = tokenizer.encode(text, &FxHashSet::default()).unwrap();
        assert_eq!(tokens, tokenizer.encode_ordinary(text).unwrap());
    }

    #[test]
    fn test_encode_with_special() {
        let tokenizer = make_test_tokenizer();
        let tokens = tokenizer.encode_with_special("Hello<|endoftext|>World").unwrap();
        assert_eq!(tokens, vec![300, 50256, 301]);
    }

    #[test]
    fn test_last_piece_token_len_counts_merged_piece() {
        let tokenizer = make_test_tokenizer();
        let (tokens, last) = tokenizer.encode("x abcd", &FxHashSet::default()).unwrap();
        assert_eq!(tokens, vec![b'x' as Rank, 32, 304, b'd' as Rank]);
        assert_eq!(last, 2);
    }

    #[test]
    fn test_encode_with_unstable_is_unsupported() {
        let tokenizer = make_test_tokenizer();
        assert!(matches!(
            tokenizer.encode_with_unstable("Hello", &FxHashSet::default()),
            Err(TokenizerError::Unsupported(_))
        ));
    }

    #[test]
    fn test_encode_single_token() {
        let tokenizer = make_test_tokenizer();
        assert_eq!(tokenizer.encode_single_token(b"Hello").unwrap(), 300);
        assert_eq!(tokenizer.encode_single_token(b"<|fim|>").unwrap(), 50257);
        assert!(matches!(
            tokenizer.encode_single_token(b"Hello World"),
            Err(TokenizerError::PieceNotFound(_))
        ));
    }

    #[test]
    fn test_decode_unknown_token() {
        let tokenizer = make_test_tokenizer();
        assert!(matches!(
            tokenizer.decode_bytes(&[300, 99999]),
            Err(TokenizerError::TokenNotFound(99999))
        ));
        assert!(matches!(
            tokenizer.decode_single_token_bytes(12345),
            Err(TokenizerError::TokenNotFound(12345))
        ));
        assert_eq!(
            tokenizer.decode_single_token_bytes(50256).unwrap(),
            b"<|endoftext|>"
        );
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let tokenizer = make_test_tokenizer();
        assert!(matches!(
            tokenizer.decode(&[0xff]),
            Err(TokenizerError::Utf8Error)
        ));
        assert_eq!(tokenizer.decode_lossy(&[0xff]).unwrap(), "\u{fffd}");
    }

    #[test]
    fn test_missing_byte_rejected() {
        let encoder: RankMap = (1..=255u8).map(|b| (vec![b], b as Rank)).collect();
        match Tokenizer::new(encoder, FxHashMap::default(), r"\S+|\s+") {
            Err(TokenizerError::VocabularyGap { bytes }) => assert_eq!(bytes, vec![0]),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("tokenizer built over an incomplete vocabulary"),
        }
    }

    #[test]
    fn test_special_collision_rejected() {
        let encoder: RankMap = (0..=255u8).map(|b| (vec![b], b as Rank)).collect();
        let mut special = FxHashMap::default();
        special.insert("<|x|>".to_string(), 7);
        assert!(matches!(
            Tokenizer::new(encoder, special, r"\S+|\s+"),
            Err(TokenizerError::SpecialTokenCollision { rank: 7, .. })
        ));
    }

    #[test]
    fn test_token_byte_values_sorted() {
        let tokenizer = make_test_tokenizer();
        let values = tokenizer.token_byte_values();
        assert_eq!(values.len(), tokenizer.encoder().len());
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_batch_matches_individual() {
        let tokenizer = make_test_tokenizer();
        let texts = vec!["Hello World".to_string(), "abcab".to_string()];
        let batch = tokenizer.encode_batch(&texts).unwrap();
        let counts = tokenizer.count_tokens_batch(&texts).unwrap();
        for (i, text) in texts.iter().enumerate() {
            assert_eq!(batch[i], tokenizer.encode_ordinary(text).unwrap());
            assert_eq!(counts[i], batch[i].len());
        }
    }

    #[test]
    fn test_vocab_size() {
        let tokenizer = make_test_tokenizer();
        assert_eq!(tokenizer.vocab_size(), 50258);
    }
}
