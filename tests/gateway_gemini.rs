use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use isq_harness::gateway::gemini::{GeminiAdapter, GenerateProvider};
use isq_harness::gateway::{
    Attribution, GatewayConfig, GenerateRequest, ModelGateway, NoopUsageSink, ProviderError,
    ProviderGateway,
};
use isq_harness::json_extract::extract_payload;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const GENERATE_PATH: &str = "/models/gemini-test:generateContent";

fn adapter(server: &MockServer) -> GeminiAdapter {
    GeminiAdapter::with_config("test-key", server.uri(), Duration::from_secs(5)).unwrap()
}

fn gateway(server: &MockServer, max_retries: u32) -> ProviderGateway<NoopUsageSink> {
    ProviderGateway::new(
        adapter(server),
        Arc::new(NoopUsageSink),
        GatewayConfig {
            max_retries,
            retry_base_delay: Duration::from_millis(1),
        },
    )
}

fn request() -> GenerateRequest {
    GenerateRequest::new("gemini-test", "hi", Attribution::new("test"))
        .temperature(0.4)
        .max_output_tokens(256)
        .json()
}

fn text_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
}

#[tokio::test]
async fn gemini_sends_key_and_generation_config_and_parses_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(query_param("key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{ "parts": [{ "text": "hi" }] }],
            "generationConfig": {
                "maxOutputTokens": 256,
                "responseMimeType": "application/json"
            }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(text_body("```json\n{\"a\": 1}\n```")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let resp = adapter(&server).generate(&request()).await.unwrap();
    assert_eq!(extract_payload(&resp), Some(json!({"a": 1})));
}

#[tokio::test]
async fn gemini_unreadable_success_body_is_an_empty_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let resp = adapter(&server).generate(&request()).await.unwrap();
    assert!(resp.candidates.is_empty());
    assert_eq!(extract_payload(&resp), None);
}

#[derive(Clone)]
struct FlipResponder {
    calls: Arc<AtomicUsize>,
    first: ResponseTemplate,
    second: ResponseTemplate,
}

impl Respond for FlipResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.first.clone()
        } else {
            self.second.clone()
        }
    }
}

#[tokio::test]
async fn provider_gateway_retries_overloaded_and_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first: ResponseTemplate::new(503).set_body_json(json!({
                "error": { "message": "model is overloaded", "status": "UNAVAILABLE" }
            })),
            second: ResponseTemplate::new(200).set_body_json(text_body("{\"ok\": true}")),
        })
        .mount(&server)
        .await;

    let resp = gateway(&server, 3).generate(request()).await.unwrap();
    assert_eq!(extract_payload(&resp), Some(json!({"ok": true})));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
}

#[tokio::test]
async fn provider_gateway_gives_up_after_retry_ceiling() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED" }
        })))
        .mount(&server)
        .await;

    let err = gateway(&server, 2).generate(request()).await.unwrap_err();
    match &err {
        ProviderError::Overloaded { status, context, .. } => {
            assert_eq!(*status, 429);
            let ctx = context.as_ref().expect("expected error context");
            assert_eq!(ctx.provider_code.as_deref(), Some("RESOURCE_EXHAUSTED"));
        }
        other => panic!("expected Overloaded, got {other:?}"),
    }
    assert!(err.is_quota());

    // Initial call plus two retries.
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn provider_gateway_does_not_retry_quota_exhaustion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "You exceeded your current quota", "status": "RESOURCE_EXHAUSTED" }
        })))
        .mount(&server)
        .await;

    let err = gateway(&server, 3).generate(request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::QuotaExhausted { .. }));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn provider_gateway_does_not_retry_client_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "Invalid JSON payload", "status": "INVALID_ARGUMENT" }
        })))
        .mount(&server)
        .await;

    let err = gateway(&server, 3).generate(request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Upstream { status: 400, .. }));
    assert!(!err.is_quota());

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}

#[test]
fn empty_api_key_is_a_config_error() {
    let err = GeminiAdapter::with_config("", "http://localhost", Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, ProviderError::Config(_)));
}

#[tokio::test]
async fn gemini_client_timeout_is_reported_as_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(text_body("{}"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let slow = GeminiAdapter::with_config("test-key", server.uri(), Duration::from_millis(200)).unwrap();
    let err = slow.generate(&request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Timeout(d) if d == Duration::from_millis(200)));
    assert!(err.is_retryable());
}
