use super::*;
use std::collections::HashMap;
use tempfile::TempDir;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.data_dir, PathBuf::from("/app/data"));
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "ollama");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.embedding_model, "all-minilm:latest");
    assert_eq!(config.ollama.embedding_dimension, 384);
    assert_eq!(config.ollama.llm_model, "qwen2.5-coder");
    assert_eq!(config.ollama.retry_attempts, 1);
    assert_eq!(config.ollama.timeout_seconds, None);
    assert_eq!(config.chunking.chunk_size, 1000);
    assert_eq!(config.chunking.chunk_overlap, 200);
    assert_eq!(config.retrieval.top_k, 4);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.llm_model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.embedding_model = "  ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.retry_attempts = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_overlap = invalid_config.chunking.chunk_size;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::OverlapTooLarge(1000, 1000))
    ));

    let mut invalid_config = config;
    invalid_config.retrieval.top_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://ollama:11434/");
}

#[test]
fn bind_address_generation() {
    let config = Config::default();
    let addr = config.bind_address().expect("default bind address parses");
    assert_eq!(addr.port(), 8000);

    let mut invalid = config;
    invalid.server.host = "not an address".to_string();
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::InvalidBindAddress(_))
    ));
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn toml_serialization_with_timeout() {
    let mut config = Config::default();
    config.ollama.timeout_seconds = Some(120);
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    assert!(toml_str.contains("timeout_seconds = 120"));

    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(parsed_config.ollama.timeout_seconds, Some(120));
}

#[test]
fn partial_toml_uses_defaults() {
    let partial = r#"
        data_dir = "/srv/docs"

        [ollama]
        host = "localhost"
    "#;

    let config: Config = toml::from_str(partial).expect("partial config parses");
    assert_eq!(config.data_dir, PathBuf::from("/srv/docs"));
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.chunking, ChunkingConfig::default());
}

#[test]
fn load_missing_config_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("missing config loads defaults");
    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(
        config.vector_database_path(),
        temp_dir.path().join("vectors")
    );
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let mut config = Config::load(temp_dir.path()).expect("defaults load");
    config.retrieval.top_k = 8;
    config.ollama.host = "gpu-box".to_string();
    config.save().expect("config saves");

    let reloaded = Config::load(temp_dir.path()).expect("saved config loads");
    assert_eq!(reloaded.retrieval.top_k, 8);
    assert_eq!(reloaded.ollama.host, "gpu-box");
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[chunking]\nchunk_size = 300\nchunk_overlap = 400\n",
    )
    .expect("write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn environment_overrides() {
    let mut config = Config::default();
    config
        .apply_overrides(lookup_from(&[
            (DATA_DIR_ENV, "/tmp/docs"),
            (OLLAMA_URL_ENV, "https://llm.internal:8443"),
            (MODEL_ENV, "llama3.2"),
        ]))
        .expect("overrides apply");

    assert_eq!(config.data_dir, PathBuf::from("/tmp/docs"));
    assert_eq!(config.ollama.protocol, "https");
    assert_eq!(config.ollama.host, "llm.internal");
    assert_eq!(config.ollama.port, 8443);
    assert_eq!(config.ollama.llm_model, "llama3.2");
    // The embedding model is not affected by MODEL
    assert_eq!(config.ollama.embedding_model, "all-minilm:latest");
}

#[test]
fn environment_overrides_ignore_empty_values() {
    let mut config = Config::default();
    config
        .apply_overrides(lookup_from(&[(DATA_DIR_ENV, ""), (MODEL_ENV, "  ")]))
        .expect("empty overrides are ignored");
    assert_eq!(config, Config::default());
}

#[test]
fn environment_override_with_bad_url() {
    let mut config = Config::default();
    let result = config.apply_overrides(lookup_from(&[(OLLAMA_URL_ENV, "ftp://ollama:21")]));
    assert!(matches!(result, Err(ConfigError::InvalidProtocol(_))));

    let result = config.apply_overrides(lookup_from(&[(OLLAMA_URL_ENV, "not a url")]));
    assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));
}

#[test]
fn url_without_port_uses_scheme_default() {
    let mut config = OllamaConfig::default();
    config
        .set_url("https://ollama.example.com")
        .expect("url applies");
    assert_eq!(config.port, 443);
    assert_eq!(
        config.ollama_url().expect("url builds").as_str(),
        "https://ollama.example.com/"
    );
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_llm_model("new-model".to_string()).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_protocol("HTTP".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_llm_model(String::new()).is_err());
}

#[test]
fn error_display_messages() {
    let errors = vec![
        ConfigError::InvalidProtocol("ftp".to_string()),
        ConfigError::InvalidPort(0),
        ConfigError::InvalidBatchSize(0),
        ConfigError::InvalidModel(String::new()),
        ConfigError::InvalidUrl("invalid-url".to_string()),
        ConfigError::OverlapTooLarge(300, 200),
    ];

    for error in errors {
        let message = format!("{error}");
        assert!(message.len() > 10);
    }
}
