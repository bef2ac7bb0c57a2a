//! Recursive text splitting into overlapping chunks.

use std::collections::VecDeque;
use std::fmt;
use std::fmt::Formatter;
use std::sync::Arc;
use anyhow::{bail, Result};

use crate::utils::retrievers::Document;
use crate::utils::token::{count_tokens_by_chars, CountToken};

pub const DEFAULT_CHUNK_SIZE: usize = 2000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Source languages with their own split points, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Rust,
    /// Paragraphs, lines, words, characters.
    Plain,
}

impl Language {
    pub fn separators(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["\nclass ", "\ndef ", "\n\tdef ", "\n\n", "\n", " ", ""],
            Language::Rust => &[
                "\nfn ", "\nconst ", "\nlet ", "\nif ", "\nwhile ", "\nfor ", "\nloop ", "\nmatch ",
                "\n\n", "\n", " ", "",
            ],
            Language::Plain => &["\n\n", "\n", " ", ""],
        }
    }

    /// Guess from a file suffix such as `.py`.
    pub fn from_suffix(suffix: &str) -> Self {
        match suffix.trim_start_matches('.') {
            "py" => Language::Python,
            "rs" => Language::Rust,
            _ => Language::Plain,
        }
    }
}

/// Splits text on the first separator that occurs in it, recursing into pieces that are still too long,
/// then merges neighbouring pieces into chunks of at most `chunk_size` with about `chunk_overlap` shared
/// between consecutive chunks. Separators are kept at the start of the piece they precede.
#[derive(Clone)]
pub struct RecursiveTextSplitter {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    separators: Vec<String>,
    length: Arc<dyn CountToken + Send + Sync>,
}

impl fmt::Debug for RecursiveTextSplitter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveTextSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("separators", &self.separators)
            .finish_non_exhaustive()
    }
}

impl Default for RecursiveTextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: Language::Plain.separators().iter().map(|s| s.to_string()).collect(),
            length: Arc::new(count_tokens_by_chars),
        }
    }
}

impl RecursiveTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk size must be positive");
        }
        if chunk_overlap > chunk_size {
            bail!("chunk overlap ({}) is larger than chunk size ({})", chunk_overlap, chunk_size);
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            ..Self::default()
        })
    }

    pub fn from_language(language: Language, chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Ok(Self::new(chunk_size, chunk_overlap)?.with_separators(language.separators()))
    }

    pub fn with_separators(mut self, separators: &[&str]) -> Self {
        self.separators = separators.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Measure chunks with `counter` instead of characters, e.g. a [Tiktoken](crate::utils::token::tiktoken::Tiktoken).
    pub fn with_length<C: CountToken + Send + Sync + 'static>(mut self, counter: C) -> Self {
        self.length = Arc::new(counter);
        self
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        self.split_recursive(text, &separators)
    }

    /// Chunks of every document, each carrying the source of its document.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        documents.iter()
            .flat_map(|document| self.split_text(&document.content)
                .into_iter()
                .map(move |chunk| Document {
                    content: chunk,
                    source: document.source.clone(),
                    score: None,
                }))
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (idx, &candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                finer = &separators[idx + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut short: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if self.length.count_token(piece) < self.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                chunks.extend(self.merge(&short));
                short.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }
        if !short.is_empty() {
            chunks.extend(self.merge(&short));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0;
        for &piece in pieces {
            let len = self.length.count_token(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                push_joined(&mut chunks, &current);
                // drop from the front until what is left fits the overlap and leaves room for the piece
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            current.push_back((piece, len));
            total += len;
        }
        push_joined(&mut chunks, &current);
        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, current: &VecDeque<(&str, usize)>) {
    let joined: String = current.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// `text` cut before every occurrence of `separator`; the empty separator cuts between characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text.char_indices()
            .map(|(idx, c)| &text[idx..idx + c.len_utf8()])
            .collect();
    }
    let mut cuts: Vec<usize> = vec![0];
    cuts.extend(text.match_indices(separator).map(|(idx, _)| idx));
    cuts.push(text.len());
    cuts.windows(2)
        .map(|w| &text[w[0]..w[1]])
        .filter(|piece| !piece.is_empty())
        .collect()
}

#[cfg(test)]
mod test_splitter {
    use super::{split_keeping_separator, Language, RecursiveTextSplitter};
    use crate::utils::retrievers::Document;

    #[test]
    fn test_split_keeping_separator() {
        assert_eq!(split_keeping_separator("a\ndef b\ndef c", "\ndef "), vec!["a", "\ndef b", "\ndef c"]);
        assert_eq!(split_keeping_separator("\ndef b", "\ndef "), vec!["\ndef b"]);
        assert_eq!(split_keeping_separator("hé", ""), vec!["h", "é"]);
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = RecursiveTextSplitter::default();
        assert_eq!(splitter.split_text("  just a line  "), vec!["just a line"]);
        assert!(splitter.split_text("   ").is_empty());
    }

    #[test]
    fn test_python_split_points() {
        let splitter = RecursiveTextSplitter::from_language(Language::Python, 30, 0).unwrap();
        let code = "import os\n\nclass A:\n    pass\n\ndef f():\n    return 1\n";
        assert_eq!(splitter.split_text(code), vec![
            "import os",
            "class A:\n    pass",
            "def f():\n    return 1",
        ]);
    }

    #[test]
    fn test_overlap() {
        let splitter = RecursiveTextSplitter::new(5, 2).unwrap();
        let chunks = splitter.split_text("a b c d e f g h i j");
        assert_eq!(chunks.first().map(String::as_str), Some("a b c"));
        assert_eq!(chunks[1], "c d");
        assert_eq!(chunks.last().map(String::as_str), Some("i j"));
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
    }

    #[test]
    fn test_falls_back_to_characters() {
        let splitter = RecursiveTextSplitter::new(4, 0).unwrap();
        assert_eq!(splitter.split_text("abcdefghij"), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_custom_length() {
        let words = |s: &str| s.split_whitespace().count();
        let splitter = RecursiveTextSplitter::new(3, 0).unwrap().with_length(words);
        let chunks = splitter.split_text("one two three four five six seven");
        assert_eq!(chunks, vec!["one two three", "four five six", "seven"]);
    }

    #[test]
    fn test_split_documents_keeps_source() {
        let splitter = RecursiveTextSplitter::new(4, 0).unwrap();
        let docs = splitter.split_documents(&[Document::new("abcdefgh").with_source("src/a.py")]);
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.source.as_deref() == Some("src/a.py")));
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(RecursiveTextSplitter::new(0, 0).is_err());
        assert!(RecursiveTextSplitter::new(10, 11).is_err());
        assert_eq!(Language::from_suffix(".py"), Language::Python);
        assert_eq!(Language::from_suffix("rs"), Language::Rust);
    }
}
