// Text splitting and the Ollama client that embeds chunks and generates answers

pub mod chunking;
pub mod ollama;

pub use chunking::{Chunk, ChunkingConfig, DEFAULT_SEPARATORS, RecursiveTextSplitter};
pub use ollama::{DEFAULT_EMBEDDING_DIMENSION, OllamaClient};
