//! Python bindings for the tallytok tokenizer.
//!
//! # Example
//!
//! ```python
//! from tallytok import Tokenizer, count_tokens
//!
//! tokenizer = Tokenizer.from_pretrained("cl100k_base")
//! tokens = tokenizer.encode_ordinary("Hello, world!")
//! text = tokenizer.decode(tokens)
//!
//! count_tokens("Hello, world!")  # 4
//! ```

use std::ops::Deref;

use pyo3::exceptions::{PyIOError, PyKeyError, PyNotImplementedError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::core::{shared, Rank, Tokenizer, TokenizerError};

/// Either the process-wide cl100k_base tokenizer or one built by the caller.
enum Handle {
    Shared(&'static Tokenizer),
    Owned(Tokenizer),
}

impl Deref for Handle {
    type Target = Tokenizer;

    fn deref(&self) -> &Tokenizer {
        match self {
            Handle::Shared(t) => t,
            Handle::Owned(t) => t,
        }
    }
}

fn to_py_err(err: TokenizerError) -> PyErr {
    match err {
        TokenizerError::TokenNotFound(_) | TokenizerError::PieceNotFound(_) => {
            PyKeyError::new_err(err.to_string())
        }
        TokenizerError::Unsupported(_) => PyNotImplementedError::new_err(err.to_string()),
        TokenizerError::VocabError(crate::core::VocabError::IoError(_)) => {
            PyIOError::new_err(err.to_string())
        }
        _ => PyValueError::new_err(err.to_string()),
    }
}

/// Python wrapper for the Rust Tokenizer.
#[pyclass(name = "Tokenizer")]
pub struct PyTokenizer {
    inner: Handle,
}

#[pymethods]
impl PyTokenizer {
    /// Create a new tokenizer from a vocabulary file.
    ///
    /// Args:
    ///     vocab_path: Path to a tiktoken-format vocabulary file
    ///     pattern: Pre-tokenization regex pattern
    ///     special_tokens: Optional dict of special tokens to IDs
    #[new]
    #[pyo3(signature = (vocab_path, pattern, special_tokens=None))]
    fn new(
        vocab_path: &str,
        pattern: &str,
        special_tokens: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Self> {
        let special = parse_special_tokens(special_tokens)?;
        let inner = Tokenizer::from_file(vocab_path, pattern, special).map_err(to_py_err)?;
        Ok(Self {
            inner: Handle::Owned(inner),
        })
    }

    /// The shared cl100k_base tokenizer (GPT-4, GPT-3.5-turbo).
    #[staticmethod]
    fn cl100k_base() -> PyResult<Self> {
        Ok(Self {
            inner: Handle::Shared(shared().map_err(to_py_err)?),
        })
    }

    /// Get the tokenizer for a bundled vocabulary. Only "cl100k_base" is bundled.
    #[staticmethod]
    fn from_pretrained(name: &str) -> PyResult<Self> {
        match name {
            "cl100k_base" => Self::cl100k_base(),
            _ => Err(PyValueError::new_err(format!(
                "Unknown pretrained vocabulary: {}. Only cl100k_base is bundled.",
                name
            ))),
        }
    }

    /// Create a tokenizer from raw tiktoken vocabulary bytes.
    #[staticmethod]
    #[pyo3(signature = (vocab_data, pattern, special_tokens=None))]
    fn from_bytes(
        vocab_data: &[u8],
        pattern: &str,
        special_tokens: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Self> {
        let special = parse_special_tokens(special_tokens)?;
        let inner = Tokenizer::from_bytes(vocab_data, pattern, special).map_err(to_py_err)?;
        Ok(Self {
            inner: Handle::Owned(inner),
        })
    }

    /// Encode text, treating special token literals as ordinary text.
    fn encode_ordinary(&self, text: &str) -> PyResult<Vec<Rank>> {
        self.inner.encode_ordinary(text).map_err(to_py_err)
    }

    /// Encode text, recognizing the special tokens in `allowed_special`.
    ///
    /// Args:
    ///     text: Input text to encode
    ///     allowed_special: Special token literals to recognize, or None for none
    ///
    /// Returns:
    ///     List of token IDs
    #[pyo3(signature = (text, allowed_special=None))]
    fn encode(&self, text: &str, allowed_special: Option<Vec<String>>) -> PyResult<Vec<Rank>> {
        let names = allowed_special.unwrap_or_default();
        let allowed: FxHashSet<&str> = names.iter().map(String::as_str).collect();
        self.inner
            .encode(text, &allowed)
            .map(|(tokens, _)| tokens)
            .map_err(to_py_err)
    }

    /// Encode text with every registered special token recognized.
    fn encode_with_special(&self, text: &str) -> PyResult<Vec<Rank>> {
        self.inner.encode_with_special(text).map_err(to_py_err)
    }

    /// Map an exact byte sequence to its token id.
    ///
    /// Raises:
    ///     KeyError: If the bytes are neither a vocabulary entry nor a special token
    fn encode_single_token(&self, piece: &[u8]) -> PyResult<Rank> {
        self.inner.encode_single_token(piece).map_err(to_py_err)
    }

    /// Number of tokens `encode_ordinary` would produce.
    fn count_tokens(&self, text: &str) -> PyResult<usize> {
        self.inner.count_tokens(text).map_err(to_py_err)
    }

    /// Batch encode multiple texts in parallel.
    fn encode_batch(&self, texts: Vec<String>) -> PyResult<Vec<Vec<Rank>>> {
        self.inner.encode_batch(&texts).map_err(to_py_err)
    }

    /// Decode token IDs to a string.
    ///
    /// Raises:
    ///     ValueError: If decoded bytes are not valid UTF-8
    ///     KeyError: If a token id is unknown
    fn decode(&self, tokens: Vec<Rank>) -> PyResult<String> {
        self.inner.decode(&tokens).map_err(to_py_err)
    }

    /// Decode token IDs to bytes.
    fn decode_bytes<'py>(&self, py: Python<'py>, tokens: Vec<Rank>) -> PyResult<Bound<'py, PyBytes>> {
        let bytes = self.inner.decode_bytes(&tokens).map_err(to_py_err)?;
        Ok(PyBytes::new(py, &bytes))
    }

    /// Decode token IDs to a string, replacing invalid UTF-8.
    fn decode_lossy(&self, tokens: Vec<Rank>) -> PyResult<String> {
        self.inner.decode_lossy(&tokens).map_err(to_py_err)
    }

    /// Bytes of a single token id.
    fn decode_single_token_bytes<'py>(
        &self,
        py: Python<'py>,
        token: Rank,
    ) -> PyResult<Bound<'py, PyBytes>> {
        let bytes = self
            .inner
            .decode_single_token_bytes(token)
            .map_err(to_py_err)?;
        Ok(PyBytes::new(py, &bytes))
    }

    /// Split text into pre-tokenization pieces.
    fn split_pieces(&self, text: &str) -> PyResult<Vec<String>> {
        let pieces = self.inner.split_pieces(text).map_err(to_py_err)?;
        Ok(pieces.into_iter().map(str::to_owned).collect())
    }

    /// Get the vocabulary size (including special tokens).
    #[getter]
    fn vocab_size(&self) -> usize {
        self.inner.vocab_size()
    }

    /// Special token literals and their ids.
    #[getter]
    fn special_tokens(&self) -> FxHashMap<String, Rank> {
        self.inner.special_tokens().clone()
    }

    fn __repr__(&self) -> String {
        format!("Tokenizer(vocab_size={})", self.inner.vocab_size())
    }
}

/// Count cl100k_base tokens in `text`, ignoring special tokens.
#[pyfunction]
pub fn count_tokens(text: &str) -> PyResult<usize> {
    crate::core::count_tokens(text).map_err(to_py_err)
}

fn parse_special_tokens(
    special_tokens: Option<&Bound<'_, PyDict>>,
) -> PyResult<FxHashMap<String, Rank>> {
    let mut result = FxHashMap::default();

    if let Some(dict) = special_tokens {
        for (key, value) in dict.iter() {
            let k: String = key.extract()?;
            let v: Rank = value.extract()?;
            result.insert(k, v);
        }
    }

    Ok(result)
}
