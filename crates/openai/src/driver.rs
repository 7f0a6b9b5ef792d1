// OpenAI Responses LLM Driver
//
// Implementation of LlmDriver for OpenAI's Responses API (`POST /v1/responses`).
// Official OpenAI models are invoked directly through this endpoint; generic
// chat-completions access lives in parley_core::openai_protocol.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use parley_core::error::{ParleyError, Result};
use parley_core::llm_driver_registry::{
    LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmMessage, LlmMessageRole,
    LlmResponseStream, LlmStreamEvent,
};
use parley_core::openai_protocol::upstream_error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI LLM Driver
///
/// ```ignore
/// let driver = OpenAILlmDriver::new("sk-...");
/// let driver = OpenAILlmDriver::with_base_url("sk-...", "https://gateway.internal/v1");
/// ```
#[derive(Clone)]
pub struct OpenAILlmDriver {
    client: Client,
    api_key: String,
    api_url: String,
}

impl OpenAILlmDriver {
    /// Create a new driver with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a new driver rooted at a custom base URL
    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let api_url = if base.ends_with("/responses") {
            base.to_string()
        } else {
            format!("{}/responses", base)
        };
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url,
        }
    }

    /// Get the API URL
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn build_request(messages: &[LlmMessage], config: &LlmCallConfig) -> ResponsesRequest {
        let mut instructions = config.system.clone();
        let mut input = Vec::with_capacity(messages.len());

        for msg in messages {
            match msg.role {
                // Inline system messages are folded into instructions
                LlmMessageRole::System => {
                    instructions = Some(match instructions {
                        Some(existing) => format!("{}\n\n{}", existing, msg.content),
                        None => msg.content.clone(),
                    });
                }
                LlmMessageRole::User => input.push(ResponsesInputMessage {
                    role: "user",
                    content: msg.content.clone(),
                }),
                LlmMessageRole::Assistant => input.push(ResponsesInputMessage {
                    role: "assistant",
                    content: msg.content.clone(),
                }),
            }
        }

        ResponsesRequest {
            model: config.model.clone(),
            input,
            instructions,
            max_output_tokens: config.max_tokens,
            temperature: config.temperature,
            stream: true,
            store: false,
        }
    }
}

#[async_trait]
impl LlmDriver for OpenAILlmDriver {
    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let request = Self::build_request(&messages, config);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ParleyError::upstream("openai", format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            return Err(upstream_error("openai", response).await);
        }

        let model = config.model.clone();
        let converted_stream: LlmResponseStream = Box::pin(
            response
                .bytes_stream()
                .eventsource()
                .scan(false, move |finished, result| {
                    if *finished {
                        return futures::future::ready(None);
                    }
                    let event = match result {
                        Ok(event) => convert_event(&event.data, &model),
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

impl std::fmt::Debug for OpenAILlmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAILlmDriver")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Map one Responses API event to a driver event; lifecycle events are skipped
fn convert_event(data: &str, model: &str) -> Option<LlmStreamEvent> {
    let event = match serde_json::from_str::<ResponsesEvent>(data) {
        Ok(event) => event,
        Err(e) => return Some(LlmStreamEvent::Error(format!("Failed to parse event: {}", e))),
    };

    match event.r#type.as_str() {
        "response.output_text.delta" => event
            .delta
            .filter(|d| !d.is_empty())
            .map(LlmStreamEvent::TextDelta),
        "response.completed" | "response.incomplete" => {
            let response = event.response.unwrap_or_default();
            let usage = response.usage;
            let finish_reason = match response.incomplete_details {
                Some(details) => details.reason.unwrap_or_else(|| "incomplete".to_string()),
                None => "stop".to_string(),
            };
            Some(LlmStreamEvent::Done(LlmCompletionMetadata {
                total_tokens: usage.as_ref().map(|u| u.total_tokens),
                prompt_tokens: usage.as_ref().map(|u| u.input_tokens),
                completion_tokens: usage.as_ref().map(|u| u.output_tokens),
                model: Some(response.model.unwrap_or_else(|| model.to_string())),
                finish_reason: Some(finish_reason),
            }))
        }
        "response.failed" => {
            let message = event
                .response
                .and_then(|r| r.error)
                .map(|e| e.message)
                .unwrap_or_else(|| "Response failed".to_string());
            Some(LlmStreamEvent::Error(message))
        }
        "error" => Some(LlmStreamEvent::Error(
            event
                .message
                .unwrap_or_else(|| "OpenAI stream error".to_string()),
        )),
        _ => None,
    }
}

// ============================================================================
// Responses API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<ResponsesInputMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    store: bool,
}

#[derive(Debug, Serialize)]
struct ResponsesInputMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ResponsesEvent {
    r#type: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    response: Option<ResponsesResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
    #[serde(default)]
    error: Option<ResponsesError>,
    #[serde(default)]
    incomplete_details: Option<ResponsesIncomplete>,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ResponsesError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResponsesIncomplete {
    #[serde(default)]
    reason: Option<String>,
}
