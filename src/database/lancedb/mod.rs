// LanceDB vector database module
// Persists chunk text alongside its embedding and answers similarity searches


pub mod vector_store;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embeddings::chunking::Chunk;

pub use vector_store::{SearchResult, VectorStore};

/// A chunk and its embedding, as stored in LanceDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Opaque UUID v4 identifier
    pub id: String,
    /// The chunk's embedding
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Metadata stored alongside each embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// The chunk text
    pub content: String,
    /// Name of the document the chunk came from
    pub source: String,
    /// 1-based page number for PDFs
    pub page: Option<u32>,
    /// Index of this chunk within its document (for ordering)
    pub chunk_index: u32,
    /// RFC 3339 timestamp of insertion
    pub created_at: String,
}

impl ChunkRecord {
    /// Pair a chunk with its embedding under a fresh identifier
    #[inline]
    pub fn new(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            vector,
            metadata: ChunkMetadata {
                content: chunk.content.clone(),
                source: chunk.source.clone(),
                page: chunk.page,
                chunk_index: u32::try_from(chunk.chunk_index).unwrap_or(u32::MAX),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        }
    }
}
