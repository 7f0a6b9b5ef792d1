// Unit tests for OpenAI drivers

use crate::{compatible_vendor, register_drivers, DriverRegistry, OpenAILlmDriver};
use futures::StreamExt;
use parley_core::error::ParleyError;
use parley_core::llm_driver_registry::{
    ClientOptions, InvocationStyle, LlmCallConfig, LlmDriver, LlmMessage, LlmStreamEvent,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn test_driver_debug_redacts_key() {
    let driver = OpenAILlmDriver::new("sk-live-secret");
    let debug = format!("{:?}", driver);
    assert!(debug.contains("OpenAILlmDriver"));
    assert!(!debug.contains("sk-live-secret"));
}

#[test]
fn test_register_drivers() {
    let mut registry = DriverRegistry::new();
    assert!(!registry.has_provider("openai"));

    register_drivers(&mut registry);

    assert!(registry.has_provider("openai"));
    assert!(registry.has_provider("ollama"));
    assert!(registry.has_provider("groq"));
    assert_eq!(registry.invocation_style("openai"), InvocationStyle::Direct);
    assert_eq!(
        registry.invocation_style("ollama"),
        InvocationStyle::ChatMethod
    );
}

#[test]
fn test_official_openai_requires_key() {
    let mut registry = DriverRegistry::new();
    register_drivers(&mut registry);

    let result = registry.resolve_client("openai", &ClientOptions::new());
    assert!(matches!(result, Err(ParleyError::ProviderUnconfigured(_))));

    let options = ClientOptions::new().with_api_key("sk-test");
    assert!(registry.resolve_client("openai", &options).is_ok());
}

#[test]
fn test_local_runtime_needs_no_key() {
    let mut registry = DriverRegistry::new();
    register_drivers(&mut registry);

    assert!(registry
        .resolve_client("ollama", &ClientOptions::new())
        .is_ok());
    assert!(registry
        .resolve_client("lmstudio", &ClientOptions::new())
        .is_ok());
    assert!(matches!(
        registry.resolve_client("groq", &ClientOptions::new()),
        Err(ParleyError::ProviderUnconfigured(_))
    ));
}

#[test]
fn test_vendor_table_defaults() {
    let ollama = compatible_vendor("Ollama").unwrap();
    assert_eq!(ollama.base_url, "http://localhost:11434/v1");
    assert!(!ollama.requires_api_key);

    let mut registry = DriverRegistry::new();
    register_drivers(&mut registry);
    assert_eq!(
        registry.default_base_url("lmstudio").as_deref(),
        Some("http://localhost:1234/v1")
    );
    assert!(compatible_vendor("not-a-vendor").is_none());

    assert!(registry.is_local_runtime("ollama"));
    assert!(registry.is_local_runtime("lmstudio"));
    assert!(!registry.is_local_runtime("openrouter"));
    assert!(!registry.is_local_runtime("openai"));
}

#[tokio::test]
async fn test_responses_stream() {
    let server = MockServer::start().await;
    let body = [
        r#"{"type":"response.created","response":{"id":"resp_1"}}"#,
        r#"{"type":"response.output_text.delta","item_id":"msg_1","output_index":0,"content_index":0,"delta":"Bon"}"#,
        r#"{"type":"response.output_text.delta","item_id":"msg_1","output_index":0,"content_index":0,"delta":"jour"}"#,
        r#"{"type":"response.completed","response":{"id":"resp_1","usage":{"input_tokens":4,"output_tokens":2,"total_tokens":6}}}"#,
    ]
    .iter()
    .map(|d| format!("data: {}\n\n", d))
    .collect::<String>();

    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4.1-mini",
            "stream": true,
            "instructions": "Be brief"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let driver = OpenAILlmDriver::with_base_url("sk-test", &format!("{}/v1", server.uri()));
    let config = LlmCallConfig::new("gpt-4.1-mini").with_system("Be brief");
    let stream = driver
        .chat_completion_stream(vec![LlmMessage::user("Hello")], &config)
        .await
        .unwrap();
    let events: Vec<LlmStreamEvent> = stream.map(|e| e.unwrap()).collect().await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], LlmStreamEvent::TextDelta("Bon".to_string()));
    assert_eq!(events[1], LlmStreamEvent::TextDelta("jour".to_string()));
    match &events[2] {
        LlmStreamEvent::Done(meta) => assert_eq!(meta.total_tokens, Some(6)),
        other => panic!("Expected Done, got {:?}", other),
    }
}

#[tokio::test]
async fn test_responses_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string(
            r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#,
        ))
        .mount(&server)
        .await;

    let driver = OpenAILlmDriver::with_base_url("bad", &server.uri());
    let result = driver
        .chat_completion_stream(vec![LlmMessage::user("Hello")], &LlmCallConfig::new("m"))
        .await;

    match result {
        Err(ParleyError::Upstream { provider, message }) => {
            assert_eq!(provider, "openai");
            assert!(message.contains("Incorrect API key provided"));
        }
        _ => panic!("Expected Upstream error"),
    }
}
