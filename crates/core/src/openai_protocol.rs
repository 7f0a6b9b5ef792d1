// OpenAI Protocol LLM Driver
//
// Implementation of the OpenAI chat-completions streaming protocol.
// Used for every provider invoked through the generic chat method: local
// runtimes (Ollama, LM Studio), hosted OpenAI-compatible vendors, and the
// fallback for unrecognized provider names.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};
use crate::llm_driver_registry::{
    LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmMessage, LlmMessageRole,
    LlmResponseStream, LlmStreamEvent,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Protocol LLM Driver
///
/// `LlmDriver` for any endpoint that speaks `POST {base}/chat/completions`
/// with `stream: true`.
///
/// ```ignore
/// let driver = OpenAIProtocolLlmDriver::compatible("ollama", None, "http://localhost:11434/v1");
/// ```
#[derive(Clone)]
pub struct OpenAIProtocolLlmDriver {
    client: Client,
    provider: String,
    api_key: Option<String>,
    api_url: String,
}

impl OpenAIProtocolLlmDriver {
    /// Create a driver for api.openai.com chat completions
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::compatible("openai", Some(api_key.into()), DEFAULT_BASE_URL)
    }

    /// Create a driver for an OpenAI-compatible endpoint rooted at `base_url`
    pub fn compatible(
        provider: impl Into<String>,
        api_key: Option<String>,
        base_url: &str,
    ) -> Self {
        Self {
            client: Client::new(),
            provider: provider.into(),
            api_key,
            api_url: chat_completions_url(base_url),
        }
    }

    /// Get the API URL
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn convert_role(role: LlmMessageRole) -> &'static str {
        match role {
            LlmMessageRole::System => "system",
            LlmMessageRole::User => "user",
            LlmMessageRole::Assistant => "assistant",
        }
    }

    fn convert_messages(messages: &[LlmMessage], config: &LlmCallConfig) -> Vec<OpenAiMessage> {
        let system = config.system.as_ref().map(|system| OpenAiMessage {
            role: "system".to_string(),
            content: system.clone(),
        });

        system
            .into_iter()
            .chain(messages.iter().map(|msg| OpenAiMessage {
                role: Self::convert_role(msg.role).to_string(),
                content: msg.content.clone(),
            }))
            .collect()
    }
}

/// `{base}/chat/completions`, tolerating a trailing slash or a full endpoint URL
pub fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

/// Pull a human-readable message out of a vendor error body.
///
/// Understands `{"error":{"message":..}}` (OpenAI, Anthropic, Gemini),
/// `{"error":"..."}` (Ollama) and `{"message":..}`; falls back to the raw body.
pub fn extract_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<serde_json::Value>,
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        match parsed.error {
            Some(serde_json::Value::String(s)) => return s,
            Some(serde_json::Value::Object(obj)) => {
                if let Some(serde_json::Value::String(msg)) = obj.get("message") {
                    return msg.clone();
                }
            }
            _ => {}
        }
        if let Some(msg) = parsed.message {
            return msg;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty error response".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Turn a non-success HTTP response into `ParleyError::Upstream`
pub async fn upstream_error(provider: &str, response: reqwest::Response) -> ParleyError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ParleyError::upstream(
        provider,
        format!("{} ({})", extract_error_message(&body), status),
    )
}

#[async_trait]
impl LlmDriver for OpenAIProtocolLlmDriver {
    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let request = OpenAiRequest {
            model: config.model.clone(),
            messages: Self::convert_messages(&messages, config),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: true,
        };

        let mut builder = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            ParleyError::upstream(&self.provider, format!("Failed to send request: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(upstream_error(&self.provider, response).await);
        }

        let mut state = ChunkState::new(config.model.clone());
        let converted_stream: LlmResponseStream = Box::pin(
            response
                .bytes_stream()
                .eventsource()
                .scan(false, move |finished, result| {
                    if *finished {
                        return futures::future::ready(None);
                    }
                    let event = match result {
                        Ok(event) => state.on_data(&event.data),
                        Err(e) => Some(LlmStreamEvent::Error(format!("Stream error: {}", e))),
                    };
                    if matches!(
                        event,
                        Some(LlmStreamEvent::Done(_)) | Some(LlmStreamEvent::Error(_))
                    ) {
                        *finished = true;
                    }
                    futures::future::ready(Some(event))
                })
                .filter_map(|event| futures::future::ready(event.map(Ok))),
        );

        Ok(converted_stream)
    }
}

impl std::fmt::Debug for OpenAIProtocolLlmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIProtocolLlmDriver")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ============================================================================
// Stream state
// ============================================================================

/// Accumulates usage and finish reason across chunks. A completion is
/// reported once, on the first of `finish_reason` or `[DONE]`.
struct ChunkState {
    model: String,
    finish_reason: Option<String>,
    usage: Option<OpenAiUsage>,
}

impl ChunkState {
    fn new(model: String) -> Self {
        Self {
            model,
            finish_reason: None,
            usage: None,
        }
    }

    fn done(&self) -> LlmStreamEvent {
        LlmStreamEvent::Done(LlmCompletionMetadata {
            total_tokens: self.usage.as_ref().map(|u| u.total_tokens),
            prompt_tokens: self.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: self.usage.as_ref().map(|u| u.completion_tokens),
            model: Some(self.model.clone()),
            finish_reason: Some(
                self.finish_reason
                    .clone()
                    .unwrap_or_else(|| "stop".to_string()),
            ),
        })
    }

    fn on_data(&mut self, data: &str) -> Option<LlmStreamEvent> {
        if data == "[DONE]" {
            return Some(self.done());
        }

        let chunk = match serde_json::from_str::<OpenAiStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => return Some(LlmStreamEvent::Error(format!("Failed to parse chunk: {}", e))),
        };

        if let Some(error) = chunk.error {
            return Some(LlmStreamEvent::Error(error.message));
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let choice = chunk.choices.into_iter().next()?;
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
            return Some(self.done());
        }

        choice
            .delta
            .and_then(|d| d.content)
            .filter(|c| !c.is_empty())
            .map(LlmStreamEvent::TextDelta)
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    #[serde(default)]
    error: Option<OpenAiStreamError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    delta: Option<OpenAiDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(lines: &[&str]) -> String {
        lines
            .iter()
            .map(|l| format!("data: {}\n\n", l))
            .collect::<String>()
    }

    #[test]
    fn test_chat_completions_url() {
        assert_eq!(
            chat_completions_url("http://localhost:11434/v1"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("http://localhost:11434/v1/"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://x.test/v1/chat/completions"),
            "https://x.test/v1/chat/completions"
        );
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"Invalid API key","type":"auth"}}"#),
            "Invalid API key"
        );
        assert_eq!(
            extract_error_message(r#"{"error":"model not found"}"#),
            "model not found"
        );
        assert_eq!(extract_error_message(r#"{"message":"nope"}"#), "nope");
        assert_eq!(extract_error_message("Bad Gateway"), "Bad Gateway");
        assert_eq!(extract_error_message(""), "empty error response");
    }

    #[test]
    fn test_system_prompt_is_prepended() {
        let config = LlmCallConfig::new("m").with_system("Be brief");
        let converted = OpenAIProtocolLlmDriver::convert_messages(
            &[LlmMessage::user("hi"), LlmMessage::assistant("hello")],
            &config,
        );
        let roles: Vec<&str> = converted.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(converted[0].content, "Be brief");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let driver = OpenAIProtocolLlmDriver::new("sk-secret-value");
        let debug = format!("{:?}", driver);
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_streams_text_deltas_until_done() {
        let server = MockServer::start().await;
        let body = sse(&[
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]);
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let driver = OpenAIProtocolLlmDriver::compatible(
            "groq",
            Some("test-key".to_string()),
            &format!("{}/v1", server.uri()),
        );
        let stream = driver
            .chat_completion_stream(vec![LlmMessage::user("hi")], &LlmCallConfig::new("m"))
            .await
            .unwrap();
        let events: Vec<LlmStreamEvent> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], LlmStreamEvent::TextDelta("Hel".to_string()));
        assert_eq!(events[1], LlmStreamEvent::TextDelta("lo".to_string()));
        match &events[2] {
            LlmStreamEvent::Done(meta) => {
                assert_eq!(meta.finish_reason.as_deref(), Some("stop"))
            }
            other => panic!("Expected Done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_without_done_just_ends() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(sse(&[r#"{"choices":[{"delta":{"content":"partial"}}]}"#])),
            )
            .mount(&server)
            .await;

        let driver = OpenAIProtocolLlmDriver::compatible("local", None, &server.uri());
        let stream = driver
            .chat_completion_stream(vec![LlmMessage::user("hi")], &LlmCallConfig::new("m"))
            .await
            .unwrap();
        let events: Vec<LlmStreamEvent> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(
            events,
            vec![LlmStreamEvent::TextDelta("partial".to_string())]
        );
    }

    #[tokio::test]
    async fn test_error_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_string(r#"{"error":{"message":"Rate limit reached"}}"#),
            )
            .mount(&server)
            .await;

        let driver =
            OpenAIProtocolLlmDriver::compatible("groq", Some("k".to_string()), &server.uri());
        let result = driver
            .chat_completion_stream(vec![LlmMessage::user("hi")], &LlmCallConfig::new("m"))
            .await;

        match result {
            Err(ParleyError::Upstream { provider, message }) => {
                assert_eq!(provider, "groq");
                assert!(message.contains("Rate limit reached"));
            }
            _ => panic!("Expected Upstream error"),
        }
    }

    #[tokio::test]
    async fn test_in_stream_error_terminates() {
        let server = MockServer::start().await;
        let body = sse(&[
            r#"{"choices":[{"delta":{"content":"a"}}]}"#,
            r#"{"error":{"message":"overloaded"}}"#,
            r#"{"choices":[{"delta":{"content":"ignored"}}]}"#,
        ]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let driver = OpenAIProtocolLlmDriver::compatible("x", None, &server.uri());
        let stream = driver
            .chat_completion_stream(vec![LlmMessage::user("hi")], &LlmCallConfig::new("m"))
            .await
            .unwrap();
        let events: Vec<LlmStreamEvent> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(
            events,
            vec![
                LlmStreamEvent::TextDelta("a".to_string()),
                LlmStreamEvent::Error("overloaded".to_string()),
            ]
        );
    }
}
