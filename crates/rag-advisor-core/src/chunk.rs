//! Token-budget text splitter.
//!
//! Splits extracted document text into an ordered sequence of chunks, each
//! bounded by a token budget. Tokens are approximated at four characters
//! each, so the splitter needs no tokenizer model.
//!
//! # Algorithm
//!
//! 1. Take a window of `chunk_size × 4` characters from the remaining text.
//! 2. Skip windows that contain only whitespace.
//! 3. Cut the window after its last sentence punctuation (`.` `?` `!` or a
//!    newline) when that position lies beyond `min_chunk_size_chars`.
//! 4. Trim the piece (and flatten newlines when `keep_separator` is off);
//!    keep it only if it is longer than `min_chunk_length_to_embed`.
//! 5. After `max_num_chunks` pieces, the remaining text becomes one last
//!    chunk.
//!
//! ```rust
//! use rag_advisor_core::chunk::{SplitterOptions, TokenTextSplitter};
//!
//! let splitter = TokenTextSplitter::new(SplitterOptions::default());
//! let chunks = splitter.split("A short document about lighthouses.");
//! assert_eq!(chunks, vec!["A short document about lighthouses.".to_string()]);
//! ```

use serde::{Deserialize, Serialize};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

const SENTENCE_BREAKS: [char; 4] = ['.', '?', '!', '\n'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterOptions {
    /// Target chunk size in tokens.
    pub chunk_size: usize,
    pub min_chunk_size_chars: usize,
    /// Pieces this short or shorter are discarded.
    pub min_chunk_length_to_embed: usize,
    pub max_num_chunks: usize,
    pub keep_separator: bool,
}

impl Default for SplitterOptions {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            min_chunk_size_chars: 350,
            min_chunk_length_to_embed: 5,
            max_num_chunks: 10_000,
            keep_separator: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenTextSplitter {
    options: SplitterOptions,
}

impl TokenTextSplitter {
    pub fn new(options: SplitterOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SplitterOptions {
        &self.options
    }

    /// Split `text` into ordered chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let opts = &self.options;
        let window = opts.chunk_size.max(1) * CHARS_PER_TOKEN;
        let chars: Vec<char> = text.chars().collect();
        let mut start = 0;
        let mut chunks = Vec::new();

        while start < chars.len() && chunks.len() < opts.max_num_chunks {
            let end = (start + window).min(chars.len());
            let slice = &chars[start..end];

            if slice.iter().all(|c| c.is_whitespace()) {
                start = end;
                continue;
            }

            let cut = slice
                .iter()
                .rposition(|c| SENTENCE_BREAKS.contains(c))
                .filter(|&pos| pos > opts.min_chunk_size_chars)
                .map(|pos| pos + 1)
                .unwrap_or(slice.len());

            let piece: String = slice[..cut].iter().collect();
            self.push_piece(&mut chunks, &piece);
            start += cut;
        }

        if start < chars.len() {
            let rest: String = chars[start..].iter().collect();
            self.push_piece(&mut chunks, &rest);
        }

        chunks
    }

    fn push_piece(&self, chunks: &mut Vec<String>, piece: &str) {
        let piece = if self.options.keep_separator {
            piece.trim().to_string()
        } else {
            piece.replace(['\r', '\n'], " ").trim().to_string()
        };
        if piece.chars().count() > self.options.min_chunk_length_to_embed {
            chunks.push(piece);
        }
    }
}
