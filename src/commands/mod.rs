
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::VectorStore;
use crate::embeddings::OllamaClient;
use crate::rag::{IngestReport, RagPipeline};
use crate::server;

/// Run the HTTP service until interrupted
#[inline]
pub async fn serve(config: Config, bind: Option<&str>) -> Result<()> {
    let addr: SocketAddr = match bind {
        Some(bind) => bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", bind))?,
        None => config.bind_address()?,
    };

    info!(
        "Starting RAG service on {} (data directory: {})",
        addr,
        config.data_dir.display()
    );

    server::serve(config, addr)
        .await
        .context("HTTP server failed")
}

/// Ingest a single file or every file under a directory
#[inline]
pub async fn ingest(config: &Config, path: &Path) -> Result<IngestReport> {
    let pipeline = RagPipeline::from_config(config)
        .await
        .context("Failed to initialize RAG pipeline")?;

    let report = if path.is_dir() {
        pipeline.ingest_directory(path).await
    } else {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Not a file: {}", path.display()))?;

        let mut report = IngestReport::default();
        match pipeline.ingest_file(path, &name).await {
            Ok(added) => {
                report.files_loaded = 1;
                report.chunks_added = added;
            }
            Err(e) => report.failures.push((path.to_path_buf(), e.to_string())),
        }
        report
    };

    println!("📥 Ingestion Report");
    println!("{}", "=".repeat(50));
    println!("   📄 Files loaded: {}", report.files_loaded);
    println!("   🧩 Chunks added: {}", report.chunks_added);
    if report.is_clean() {
        println!("   ✅ No failures");
    } else {
        println!("   ⚠️  Failures: {}", report.failures.len());
        for (failed, reason) in &report.failures {
            println!("      • {}: {}", failed.display(), reason);
        }
    }

    Ok(report)
}

/// Answer a single question against the persisted store
#[inline]
pub async fn query(config: &Config, question: &str) -> Result<String> {
    let pipeline = RagPipeline::from_config(config)
        .await
        .context("Failed to initialize RAG pipeline")?;

    let answer = pipeline.query(question).await.context("Query failed")?;
    println!("{}", answer);
    Ok(answer)
}

/// Show connectivity and store statistics
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 RAG Service Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            let client = Arc::new(client);
            let checker = Arc::clone(&client);
            match tokio::task::spawn_blocking(move || checker.health_check()).await {
                Ok(Ok(())) => {
                    println!("   ✅ Ollama: Connected ({})", client.base_url());
                }
                Ok(Err(e)) => {
                    println!("   ⚠️  Ollama: Unhealthy - {:#}", e);
                }
                Err(e) => {
                    println!("   ❌ Ollama: Health check did not complete - {}", e);
                }
            }
            println!("   📋 Embedding model: {}", config.ollama.embedding_model);
            println!("   💬 LLM model: {}", config.ollama.llm_model);
            println!("   🔢 Batch Size: {}", config.ollama.batch_size);
        }
        Err(e) => {
            println!("   ❌ Ollama: Invalid configuration - {:#}", e);
        }
    }

    println!();
    println!("🔍 Vector Database Status:");
    match VectorStore::new(config).await {
        Ok(store) => {
            println!("   ✅ LanceDB: Connected");
            println!("   🔢 Vector dimension: {}", store.vector_dimension());
            match store.validate_integrity().await {
                Ok(true) => println!("   ✅ Integrity: OK"),
                Ok(false) => println!("   ⚠️  Integrity: Problems detected"),
                Err(e) => println!("   ❌ Integrity: Check failed - {}", e),
            }
            match store.count_chunks().await {
                Ok(count) => println!("   📄 Chunks stored: {}", count),
                Err(e) => println!("   ❌ Failed to count chunks - {}", e),
            }
        }
        Err(e) => {
            println!("   ❌ LanceDB: Failed to connect - {}", e);
        }
    }

    println!();
    println!("📁 Data directory: {}", config.data_dir.display());
    if !config.data_dir.is_dir() {
        println!("   ⚠️  Not found; startup ingestion will be skipped");
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'rag-service ingest <path>' to add documents");
    println!("   • Use 'rag-service query <text>' to ask a question");
    println!("   • Use 'rag-service serve' to start the HTTP API");

    Ok(())
}

/// Print the effective configuration
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    println!("📋 Current Configuration");
    println!();

    println!("Server Settings:");
    println!("  Bind: {}:{}", config.server.host, config.server.port);
    println!("  Data directory: {}", config.data_dir.display());
    match &config.server.upload_dir {
        Some(dir) => println!("  Upload directory: {}", dir.display()),
        None => println!("  Upload directory: system temp"),
    }

    println!();
    println!("Ollama Settings:");
    match config.ollama_url() {
        Ok(url) => println!("  URL: {}", url),
        Err(e) => println!("  URL: Invalid ({})", e),
    }
    println!("  Embedding model: {}", config.ollama.embedding_model);
    println!("  Embedding dimension: {}", config.ollama.embedding_dimension);
    println!("  LLM model: {}", config.ollama.llm_model);
    println!("  Batch Size: {}", config.ollama.batch_size);
    println!("  Retry attempts: {}", config.ollama.retry_attempts);
    match config.ollama.timeout_seconds {
        Some(seconds) => println!("  Timeout: {}s", seconds),
        None => println!("  Timeout: none"),
    }

    println!();
    println!("Retrieval Settings:");
    println!("  Chunk size: {}", config.chunking.chunk_size);
    println!("  Chunk overlap: {}", config.chunking.chunk_overlap);
    println!("  Top k: {}", config.retrieval.top_k);

    println!();
    println!("Config file: {}", config.config_file_path().display());

    Ok(())
}

/// Write the configuration stored in `config_dir`, filled with defaults, back to
/// its config file. Environment overrides are not persisted.
#[inline]
pub fn write_config(config_dir: &Path) -> Result<PathBuf> {
    let config = Config::load(config_dir)?;
    let path = config.config_file_path();
    if path.exists() {
        warn!("Overwriting existing configuration at {}", path.display());
    }

    config.save().context("Failed to save configuration")?;
    println!("✅ Configuration written to {}", path.display());
    Ok(path)
}
