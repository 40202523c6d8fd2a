// Retrieval-augmented generation pipeline
// Ingests documents into the chunk store and answers questions over them


use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{ChunkRecord, SearchResult, VectorStore};
use crate::documents::{self, Document};
use crate::embeddings::{OllamaClient, RecursiveTextSplitter};
use crate::{RagError, Result};

const PROMPT_PREAMBLE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// Turns text into embedding vectors. Implementations may block.
pub trait Embedder: Send + Sync {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Produces a completion for a prompt. Implementations may block.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Append-only persistent collection of embedded chunks
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn append(&self, records: Vec<ChunkRecord>) -> Result<()>;

    /// The `k` nearest chunks to `query_vector`, most similar first
    async fn retrieve(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    async fn count(&self) -> Result<u64>;
}

/// Outcome of a best-effort directory ingestion
#[derive(Debug, Default)]
pub struct IngestReport {
    pub files_loaded: usize,
    pub chunks_added: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl IngestReport {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The loaded system: splitter, embedder, store and language model
pub struct RagPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn ChunkStore>,
    llm: Arc<dyn LanguageModel>,
    splitter: RecursiveTextSplitter,
    top_k: usize,
}

impl RagPipeline {
    #[inline]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn ChunkStore>,
        llm: Arc<dyn LanguageModel>,
        splitter: RecursiveTextSplitter,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            llm,
            splitter,
            top_k: top_k.max(1),
        }
    }

    /// Build the production pipeline: Ollama for embeddings and generation,
    /// LanceDB for storage
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let ollama = Arc::new(
            OllamaClient::new(&config.ollama)
                .map_err(|e| RagError::Config(format!("{:#}", e)))?,
        );
        let store = Arc::new(VectorStore::new(config).await?);

        Ok(Self::new(
            Arc::clone(&ollama) as Arc<dyn Embedder>,
            store,
            ollama,
            RecursiveTextSplitter::new(config.chunking.clone()),
            config.retrieval.top_k,
        ))
    }

    #[inline]
    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Chunk, embed and store one loaded document. Returns the number of chunks added.
    #[inline]
    pub async fn ingest_document(&self, document: &Document) -> Result<usize> {
        let chunks = self.splitter.split_document(document);
        if chunks.is_empty() {
            warn!("Document '{}' produced no chunks", document.source);
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embedder = Arc::clone(&self.embedder);
        let embeddings = tokio::task::spawn_blocking(move || embedder.embed_documents(&texts))
            .await
            .map_err(|e| RagError::Embedding(format!("Embedding task failed: {}", e)))??;

        if embeddings.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let records: Vec<ChunkRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, vector)| ChunkRecord::new(chunk, vector))
            .collect();
        let added = records.len();

        self.store.append(records).await?;

        info!("Ingested '{}' ({} chunks)", document.source, added);
        Ok(added)
    }

    /// Load a file from disk and ingest it. `display_name` decides the format
    /// and is recorded as the chunk source.
    #[inline]
    pub async fn ingest_file(&self, path: &Path, display_name: &str) -> Result<usize> {
        let document = load_blocking(path.to_path_buf(), display_name.to_string()).await?;
        self.ingest_document(&document).await
    }

    /// Ingest every file under `dir`, continuing past individual failures
    #[inline]
    pub async fn ingest_directory(&self, dir: &Path) -> IngestReport {
        let mut report = IngestReport::default();

        let dir_owned = dir.to_path_buf();
        let files = match tokio::task::spawn_blocking(move || documents::discover_files(&dir_owned))
            .await
        {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => {
                warn!("Could not scan {}: {}", dir.display(), e);
                report.failures.push((dir.to_path_buf(), e.to_string()));
                return report;
            }
            Err(e) => {
                warn!("Directory scan task failed: {}", e);
                report.failures.push((dir.to_path_buf(), e.to_string()));
                return report;
            }
        };

        info!("Found {} files in {}", files.len(), dir.display());

        for path in files {
            let name = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();

            match self.ingest_file(&path, &name).await {
                Ok(added) => {
                    report.files_loaded += 1;
                    report.chunks_added += added;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.failures.push((path, e.to_string()));
                }
            }
        }

        info!(
            "Directory ingestion finished: {} files, {} chunks, {} failures",
            report.files_loaded,
            report.chunks_added,
            report.failures.len()
        );
        report
    }

    /// Answer a question from the top-k retrieved chunks
    #[inline]
    pub async fn query(&self, question: &str) -> Result<String> {
        debug!("Answering query ({} chars)", question.len());

        let embedder = Arc::clone(&self.embedder);
        let owned_question = question.to_string();
        let query_vector =
            tokio::task::spawn_blocking(move || embedder.embed_query(&owned_question))
                .await
                .map_err(|e| RagError::Embedding(format!("Embedding task failed: {}", e)))??;

        let results = self.store.retrieve(&query_vector, self.top_k).await?;
        debug!("Retrieved {} chunks for query", results.len());

        let context: Vec<&str> = results
            .iter()
            .map(|r| r.chunk_metadata.content.as_str())
            .collect();
        let prompt = build_prompt(&context, question);

        let llm = Arc::clone(&self.llm);
        tokio::task::spawn_blocking(move || llm.complete(&prompt))
            .await
            .map_err(|e| RagError::Llm(format!("Completion task failed: {}", e)))?
    }
}

/// The "stuff" prompt: every retrieved chunk, then the question
#[inline]
pub fn build_prompt(context: &[&str], question: &str) -> String {
    format!(
        "{}\n\n{}\n\nQuestion: {}\nHelpful Answer:",
        PROMPT_PREAMBLE,
        context.join("\n\n"),
        question
    )
}

async fn load_blocking(path: PathBuf, name: String) -> Result<Document> {
    tokio::task::spawn_blocking(move || documents::load_document(&path, &name))
        .await
        .map_err(|e| RagError::Ingestion(format!("Document loading task failed: {}", e)))?
}
