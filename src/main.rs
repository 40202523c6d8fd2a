use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rag_service::commands::{ingest, query, serve, show_config, show_status, write_config};
use rag_service::config::Config;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "rag-service")]
#[command(about = "Answer questions over your documents with LanceDB and Ollama")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector store
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to listen on, e.g. 0.0.0.0:8000
        #[arg(long)]
        bind: Option<String>,
    },
    /// Ingest a file or a directory of documents
    Ingest {
        path: PathBuf,
    },
    /// Ask a question against the stored documents
    Query {
        text: String,
    },
    /// Show store and Ollama status
    Status,
    /// Show or write the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::config_dir().context("Failed to determine config directory")?,
    };
    let config = Config::load_with_env(&config_dir)?;

    match cli.command {
        Commands::Serve { bind } => {
            serve(config, bind.as_deref()).await?;
        }
        Commands::Ingest { path } => {
            ingest(&config, &path).await?;
        }
        Commands::Query { text } => {
            query(&config, &text).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                write_config(&config_dir)?;
            }
        }
    }

    Ok(())
}
