#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Integration tests that require a local Ollama instance with both models pulled
// Run with: cargo test --test integration_ollama -- --ignored

use rag_service::config::OllamaConfig;
use rag_service::embeddings::ollama::OllamaClient;
use std::env;
use std::time::Duration;
use tracing::info;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

fn create_integration_test_client() -> OllamaClient {
    let mut config = OllamaConfig {
        batch_size: 5,
        ..OllamaConfig::default()
    };
    let url = env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
    config.set_url(&url).expect("OLLAMA_URL should be valid");
    if let Ok(model) = env::var("MODEL") {
        config.llm_model = model;
    }

    OllamaClient::new(&config)
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(120))
        .with_retry_attempts(3)
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_health_check() {
    init_test_tracing();

    let client = create_integration_test_client();

    info!("Testing health check against real Ollama instance");
    let result = client.health_check();

    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_list_models() {
    init_test_tracing();

    let client = create_integration_test_client();
    let models = client.list_models().expect("should list models");

    assert!(!models.is_empty(), "Ollama should have at least one model");
    for model in &models {
        assert!(!model.name.is_empty());
    }
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_single_embedding() {
    init_test_tracing();

    let client = create_integration_test_client();
    let embedding = client
        .generate_embedding("Rust guarantees memory safety without a garbage collector.")
        .expect("should embed text");

    assert_eq!(embedding.len(), 384);
    assert!(embedding.iter().all(|v| v.is_finite()));
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_batch_embeddings() {
    init_test_tracing();

    let client = create_integration_test_client();
    let texts: Vec<String> = (0..12)
        .map(|i| format!("Document chunk number {} about vector databases.", i))
        .collect();

    let embeddings = client
        .generate_embeddings_batch(&texts)
        .expect("should embed batch");

    assert_eq!(embeddings.len(), texts.len());
    assert!(embeddings.iter().all(|e| e.len() == 384));
    assert_ne!(embeddings[0], embeddings[1]);
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_similar_texts_embed_closer() {
    init_test_tracing();

    let client = create_integration_test_client();
    let texts = vec![
        "The cat sat on the mat.".to_string(),
        "A cat was sitting on a rug.".to_string(),
        "Quarterly revenue grew by twelve percent.".to_string(),
    ];
    let embeddings = client
        .generate_embeddings_batch(&texts)
        .expect("should embed batch");

    let distance = |a: &[f32], b: &[f32]| -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    };

    assert!(
        distance(&embeddings[0], &embeddings[1]) < distance(&embeddings[0], &embeddings[2])
    );
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_generate() {
    init_test_tracing();

    let client = create_integration_test_client();
    let response = client
        .generate("Reply with the single word: pong")
        .expect("should generate a completion");

    assert!(!response.trim().is_empty());
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_empty_input() {
    init_test_tracing();

    let client = create_integration_test_client();
    let embeddings = client
        .generate_embeddings_batch(&[])
        .expect("empty batch should succeed");
    assert!(embeddings.is_empty());
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_missing_model() {
    init_test_tracing();

    let client = create_integration_test_client();
    let result = client.validate_model("definitely-not-a-real-model:0b");
    assert!(result.is_err());
}
