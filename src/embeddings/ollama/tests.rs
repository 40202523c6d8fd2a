use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> OllamaConfig {
    let mut config = OllamaConfig {
        embedding_dimension: 4,
        batch_size: 2,
        ..OllamaConfig::default()
    };
    config.set_url(&server.uri()).expect("mock server url is valid");
    config
}

async fn run_blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking task should not panic")
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        embedding_model: "embed-model".to_string(),
        llm_model: "chat-model".to_string(),
        batch_size: 128,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.embedding_model, "embed-model");
    assert_eq!(client.llm_model, "chat-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.embedding_dimension, 384);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);
    assert_eq!(client.retry_attempts, 5);

    let client = client.with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn model_name_matching() {
    assert!(model_matches("qwen2.5-coder", "qwen2.5-coder"));
    assert!(model_matches("qwen2.5-coder", "qwen2.5-coder:latest"));
    assert!(model_matches("all-minilm:latest", "all-minilm:latest"));
    assert!(!model_matches("all-minilm:l6-v2", "all-minilm:latest"));
    assert!(!model_matches("qwen2.5", "qwen2.5-coder:latest"));
}

#[test]
fn error_message_prefers_ollama_error_field() {
    assert_eq!(
        error_message(404, Some(r#"{"error":"model 'x' not found"}"#)),
        "HTTP 404: model 'x' not found"
    );
    assert_eq!(error_message(502, Some("<html>bad gateway</html>")), "HTTP 502");
    assert_eq!(error_message(500, None), "HTTP 500");
}

#[tokio::test]
async fn generate_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "qwen2.5-coder",
            "prompt": "Say hi",
            "stream": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "qwen2.5-coder",
            "response": "Hi there!",
            "done": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let response = run_blocking(move || client.generate("Say hi")).await;

    assert_eq!(response.expect("completion succeeds"), "Hi there!");
}

#[tokio::test]
async fn generate_surfaces_client_errors_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "model 'qwen2.5-coder' not found"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server))
        .expect("client builds")
        .with_retry_attempts(3);
    let result = run_blocking(move || client.complete("question")).await;

    let err = result.expect_err("404 should fail");
    assert!(matches!(err, RagError::Llm(_)));
    assert!(err.to_string().contains("model 'qwen2.5-coder' not found"));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "recovered",
            "done": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server))
        .expect("client builds")
        .with_retry_attempts(2);
    let response = run_blocking(move || client.generate("retry me")).await;

    assert_eq!(response.expect("second attempt succeeds"), "recovered");
}

#[tokio::test]
async fn default_configuration_does_not_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let result = run_blocking(move || client.generate("once")).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn embeddings_are_batched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["one", "two"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "all-minilm:latest",
            "embeddings": [[0.1, 0.2, 0.3, 0.4], [0.5, 0.6, 0.7, 0.8]],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["three"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "all-minilm:latest",
            "embeddings": [[0.9, 1.0, 1.1, 1.2]],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
    let embeddings = run_blocking(move || client.embed_documents(&texts))
        .await
        .expect("embeddings succeed");

    assert_eq!(embeddings.len(), 3);
    assert_eq!(embeddings[2], vec![0.9, 1.0, 1.1, 1.2]);
}

#[tokio::test]
async fn embedding_dimension_mismatch_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.1, 0.2]],
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let result = run_blocking(move || client.embed_query("query")).await;

    let err = result.expect_err("wrong dimension should fail");
    assert!(matches!(err, RagError::Embedding(_)));
    assert!(err.to_string().contains("expected 4"));
}

#[tokio::test]
async fn health_check_validates_both_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "all-minilm:latest"},
                {"name": "qwen2.5-coder:latest"},
            ],
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let result = run_blocking(move || client.health_check()).await;
    assert!(result.is_ok(), "health check failed: {:?}", result.err());
}

#[tokio::test]
async fn health_check_reports_missing_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "all-minilm:latest"}],
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("client builds");
    let result = run_blocking(move || client.health_check()).await;
    let err = result.expect_err("missing llm model should fail");
    assert!(format!("{:#}", err).contains("qwen2.5-coder"));
}

#[tokio::test]
async fn unreachable_server_is_an_error() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    drop(server);

    let client = OllamaClient::new(&config).expect("client builds");
    let result = run_blocking(move || client.ping()).await;
    assert!(result.is_err());
}
