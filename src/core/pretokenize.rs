//! Pre-tokenization: splitting text into pieces with the vocabulary's pattern.
//!
//! Scanning is stateless. [`next_piece`] takes an explicit byte offset and
//! returns the next piece together with the offset to resume from, and
//! [`Pieces`] wraps it in an iterator that each call creates and owns. The
//! compiled pattern itself carries no cursor, so one `Regex` can be shared by
//! any number of concurrent callers.

use fancy_regex::Regex;

use super::tokenizer::TokenizerError;

/// Pre-tokenization pattern for cl100k_base (GPT-4, GPT-3.5-turbo).
///
/// Contractions, letter runs with an optional leading non-letter, digit runs
/// of at most three, punctuation runs, newline runs and whitespace runs. The
/// `\s+(?!\S)` branch keeps the last space of a run attached to the word that
/// follows it.
pub const CL100K_BASE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Find the piece starting at or after `offset`.
///
/// Returns `None` once the text is exhausted, otherwise the matched piece and
/// the offset to continue from. Empty matches are skipped so the offset always
/// moves forward.
pub fn next_piece<'t>(
    regex: &Regex,
    text: &'t str,
    mut offset: usize,
) -> Result<Option<(&'t str, usize)>, TokenizerError> {
    while offset < text.len() {
        let Some(m) = regex.find_from_pos(text, offset)? else {
            return Ok(None);
        };
        if m.end() > m.start() {
            return Ok(Some((m.as_str(), m.end())));
        }
        // Step over one whole character after an empty match.
        offset = m.end()
            + text[m.end()..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
    }
    Ok(None)
}

/// Iterator over the pieces of one text, owning its scan position.
pub struct Pieces<'r, 't> {
    regex: &'r Regex,
    text: &'t str,
    offset: usize,
    failed: bool,
}

impl<'r, 't> Pieces<'r, 't> {
    pub fn new(regex: &'r Regex, text: &'t str) -> Self {
        Self {
            regex,
            text,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset the next search starts from.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'r, 't> Iterator for Pieces<'r, 't> {
    type Item = Result<&'t str, TokenizerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match next_piece(self.regex, self.text, self.offset) {
            Ok(Some((piece, end))) => {
                self.offset = end;
                Some(Ok(piece))
            }
            Ok(None) => {
                self.offset = self.text.len();
                None
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(text: &str) -> Vec<&str> {
        let regex = Regex::new(CL100K_BASE_PATTERN).unwrap();
        Pieces::new(&regex, text).map(|p| p.unwrap()).collect()
    }

    #[test]
    fn test_words_and_punctuation() {
        assert_eq!(split("Hello, world!"), vec!["Hello", ",", " world", "!"]);
    }

    #[test]
    fn test_contractions() {
        assert_eq!(
            split("I'm doing great!"),
            vec!["I", "'m", " doing", " great", "!"]
        );
        assert_eq!(split("WE'LL"), vec!["WE", "'LL"]);
    }

    #[test]
    fn test_digits_group_by_three() {
        assert_eq!(split("1234567"), vec!["123", "456", "7"]);
    }

    #[test]
    fn test_whitespace_runs() {
        assert_eq!(
            split("hello  world\n\n"),
            vec!["hello", " ", " world", "\n\n"]
        );
        assert_eq!(split("tab\there"), vec!["tab", "\there"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(split("").is_empty());
    }

    #[test]
    fn test_pieces_cover_text() {
        let text = "  fn main() {\n    println!(\"héllo 🦀\");\n}\n";
        assert_eq!(split(text).concat(), text);
    }

    #[test]
    fn test_next_piece_from_offset() {
        let regex = Regex::new(CL100K_BASE_PATTERN).unwrap();
        let text = "Hello, world!";
        let (piece, end) = next_piece(&regex, text, 5).unwrap().unwrap();
        assert_eq!((piece, end), (",", 6));
        let (piece, end) = next_piece(&regex, text, end).unwrap().unwrap();
        assert_eq!((piece, end), (" world", 12));
        assert!(next_piece(&regex, text, text.len()).unwrap().is_none());
    }

    #[test]
    fn test_independent_cursors() {
        let regex = Regex::new(CL100K_BASE_PATTERN).unwrap();
        let mut a = Pieces::new(&regex, "one two three");
        let mut b = Pieces::new(&regex, "four five");
        assert_eq!(a.next().unwrap().unwrap(), "one");
        assert_eq!(b.next().unwrap().unwrap(), "four");
        assert_eq!(a.next().unwrap().unwrap(), " two");
        assert_eq!(b.next().unwrap().unwrap(), " five");
        assert_eq!(a.offset(), 7);
    }
}
