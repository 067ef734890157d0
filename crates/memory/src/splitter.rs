//! Token-window text splitter for document ingestion.
//!
//! Token counts are approximated at four characters per token. Each window is
//! cut back to its last sentence boundary when that boundary is far enough in
//! to leave a useful chunk.

use agentloop_core::memory::Document;

const CHARS_PER_TOKEN: usize = 4;
const SOURCE_KEY: &str = "source";

#[derive(Debug, Clone, PartialEq)]
pub struct TokenTextSplitter {
    /// Target chunk size in tokens
    pub chunk_size: usize,
    /// A sentence boundary before this many characters does not end a chunk
    pub min_chunk_size_chars: usize,
    /// Chunks this short or shorter are dropped
    pub min_chunk_length_to_embed: usize,
    pub max_num_chunks: usize,
    pub keep_separator: bool,
}

impl Default for TokenTextSplitter {
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

impl TokenTextSplitter {
    pub fn new(
        chunk_size: usize,
        min_chunk_size_chars: usize,
        min_chunk_length_to_embed: usize,
        max_num_chunks: usize,
        keep_separator: bool,
    ) -> Self {
        Self {
            chunk_size,
            min_chunk_size_chars,
            min_chunk_length_to_embed,
            max_num_chunks,
            keep_separator,
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let window = (self.chunk_size * CHARS_PER_TOKEN).max(1);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() && chunks.len() < self.max_num_chunks {
            let end = (start + window).min(chars.len());
            let slice = &chars[start..end];

            if slice.iter().all(|c| c.is_whitespace()) {
                start = end;
                continue;
            }

            let consumed = match slice
                .iter()
                .rposition(|c| matches!(c, '.' | '?' | '!' | '\n'))
            {
                Some(cut) if cut > self.min_chunk_size_chars => cut + 1,
                _ => slice.len(),
            };

            let raw: String = slice[..consumed].iter().collect();
            let chunk = if self.keep_separator {
                raw.trim().to_string()
            } else {
                raw.replace('\n', " ").trim().to_string()
            };
            if chunk.chars().count() > self.min_chunk_length_to_embed {
                chunks.push(chunk);
            }
            start += consumed;
        }

        chunks
    }

    /// Split `text` into documents tagged with their `source`.
    pub fn apply(&self, source: &str, text: &str) -> Vec<Document> {
        self.split(text)
            .into_iter()
            .map(|chunk| Document::new(chunk).with_metadata(SOURCE_KEY, source))
            .collect()
    }
}
