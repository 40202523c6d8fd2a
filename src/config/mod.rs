// Configuration management module
// TOML settings in the config directory, with environment overrides for deployment

pub mod settings;

pub use settings::{Config, ConfigError, OllamaConfig, RetrievalConfig, ServerConfig};
