//! Gemini `generateContent` contract tests.
//!
//! Verify the request path, key parameter and body shape, reply extraction,
//! and which failures are retried.

use feedspeak::PipelineError;
use feedspeak::config::LlmConfig;
use feedspeak::llm::{CompletionClient, GeminiClient, RetryPolicy};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENERATE_PATH: &str = "/v1beta/models/gemini-1.5-flash-latest:generateContent";

fn client_for(server: &MockServer, retry: RetryPolicy) -> GeminiClient {
    let config = LlmConfig {
        api_key: "test-key".into(),
        base_url: server.uri(),
        retry,
        ..LlmConfig::default()
    };
    GeminiClient::new(&config).unwrap()
}

/// Two retries after the first attempt: three requests at most.
fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(2)
        .with_base_delay_ms(1)
        .with_max_delay_ms(5)
}

fn reply_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }]
    })
}

#[tokio::test]
async fn request_carries_buffer_as_ordered_parts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(query_param("key", "test-key"))
        .and(body_json(json!({
            "contents": [{"parts": [
                {"text": "You are a radio host."},
                {"text": "**hi there**"}
            ]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("Hello, *listeners*!")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::none());
    let reply = client
        .complete(&["You are a radio host.".into(), "**hi there**".into()])
        .await
        .unwrap();

    // Emphasis is stripped by the pipeline, not the client.
    assert_eq!(reply, "Hello, *listeners*!");
}

#[tokio::test]
async fn service_unavailable_is_retried_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry());
    let reply = client.complete(&["prompt".into()]).await.unwrap();
    assert_eq!(reply, "recovered");
}

#[tokio::test]
async fn rate_limit_exhausts_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry());
    let err = client.complete(&["prompt".into()]).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn bad_request_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry());
    let err = client.complete(&["prompt".into()]).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Completion {
            retryable: false,
            ..
        }
    ));
}

#[tokio::test]
async fn missing_candidate_text_is_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [],
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry());
    let err = client.complete(&["prompt".into()]).await.unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn errors_never_leak_the_api_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::none());
    let err = client.complete(&["prompt".into()]).await.unwrap_err();
    assert!(!err.to_string().contains("test-key"));
    assert!(!format!("{client:?}").contains("test-key"));
}
