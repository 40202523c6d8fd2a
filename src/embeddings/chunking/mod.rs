
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::documents::{Document, DocumentFormat};

/// Separators tried in order: paragraphs, lines, sentences, words, then characters
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// Represents a chunk of document text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text
    pub content: String,
    /// Name of the document this chunk came from
    pub source: String,
    /// 1-based page number for paginated formats
    pub page: Option<u32>,
    /// Position of this chunk within its document
    pub chunk_index: usize,
}

/// Configuration for text chunking. Sizes are measured in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target maximum chunk length
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Splits text recursively, preferring the largest separator that keeps pieces
/// under `chunk_size`, and merges the pieces back into overlapping chunks.
#[derive(Debug, Clone)]
pub struct RecursiveTextSplitter {
    config: ChunkingConfig,
    separators: Vec<String>,
}

impl RecursiveTextSplitter {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Self {
        Self::with_separators(config, DEFAULT_SEPARATORS)
    }

    #[inline]
    pub fn with_separators(config: ChunkingConfig, separators: &[&str]) -> Self {
        Self {
            config,
            separators: separators.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split every page of a document into chunks, preserving source order.
    /// Chunks never span pages.
    #[inline]
    pub fn split_document(&self, document: &Document) -> Vec<Chunk> {
        let paginated = document.format == DocumentFormat::Pdf;
        let mut chunks = Vec::new();

        for (page_index, page) in document.pages.iter().enumerate() {
            let page_number =
                paginated.then(|| u32::try_from(page_index + 1).unwrap_or(u32::MAX));

            for content in self.split_text(page) {
                chunks.push(Chunk {
                    content,
                    source: document.source.clone(),
                    page: page_number,
                    chunk_index: chunks.len(),
                });
            }
        }

        debug!(
            "Split '{}' into {} chunks (avg {} chars)",
            document.source,
            chunks.len(),
            chunks
                .iter()
                .map(|c| c.content.chars().count())
                .sum::<usize>()
                / chunks.len().max(1)
        );

        chunks
    }

    /// Split raw text into trimmed, non-empty chunks
    #[inline]
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        self.split_recursive(text, &separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Pick the first separator present in the text; the empty separator always matches
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&str] = &[];
        for (i, &candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut final_chunks = Vec::new();
        let mut good_splits: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.config.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }

            if remaining.is_empty() {
                final_chunks.extend(trimmed(piece));
            } else {
                final_chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits));
        }

        final_chunks
    }

    /// Greedily pack pieces into chunks, carrying up to `chunk_overlap`
    /// characters of trailing pieces into the next chunk
    fn merge_splits(&self, splits: &[&str]) -> Vec<String> {
        let chunk_size = self.config.chunk_size;
        let chunk_overlap = self.config.chunk_overlap;

        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for piece in splits {
            let len = char_len(piece);

            if total + len > chunk_size && !current.is_empty() {
                if total > chunk_size {
                    warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total, chunk_size
                    );
                }

                docs.extend(join_pieces(&current));

                while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            current.push_back(piece);
            total += len;
        }

        docs.extend(join_pieces(&current));
        docs
    }
}

impl Default for RecursiveTextSplitter {
    #[inline]
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

/// Split on `separator`, leaving each separator attached to the end of the
/// piece it terminates. The empty separator splits into characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text.split_inclusive(|_: char| true).collect();
    }

    text.split_inclusive(separator)
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn join_pieces(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    trimmed(&joined)
}

fn trimmed(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
