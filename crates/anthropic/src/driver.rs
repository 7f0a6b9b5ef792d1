// Anthropic Claude LLM Driver
//
// Implementation of LlmDriver for Anthropic's Claude API.
// Uses the Messages API with streaming support.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use parley_core::error::{ParleyError, Result};
use parley_core::llm_driver_registry::{
    BoxedLlmDriver, ClientOptions, DriverRegistry, InvocationStyle, LlmCallConfig,
    LlmCompletionMetadata, LlmDriver, LlmMessage, LlmMessageRole, LlmResponseStream,
    LlmStreamEvent, ProviderCapabilities, ProviderVariant,
};
use parley_core::openai_protocol::upstream_error;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Claude LLM Driver
///
/// Implements `LlmDriver` for Anthropic's Messages API.
///
/// # Example
///
/// ```ignore
/// use parley_anthropic::AnthropicLlmDriver;
///
/// let driver = AnthropicLlmDriver::new("your-api-key");
/// // or with custom endpoint
/// let driver = AnthropicLlmDriver::with_base_url("your-api-key", "https://proxy.example.com/v1");
/// ```
#[derive(Clone)]
pub struct AnthropicLlmDriver {
    client: Client,
    api_key: String,
    api_url: String,
}

impl AnthropicLlmDriver {
    /// Create a new driver with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a new driver rooted at a custom base URL
    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let api_url = if base.ends_with("/messages") {
            base.to_string()
        } else {
            format!("{}/messages", base)
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

    /// Split out system content and merge consecutive same-role turns
    fn convert_messages(
        messages: &[LlmMessage],
        config: &LlmCallConfig,
    ) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts: Vec<String> = config.system.iter().cloned().collect();
        let mut converted: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());

        for msg in messages {
            let role = match msg.role {
                // System is handled separately in Anthropic
                LlmMessageRole::System => {
                    system_parts.push(msg.content.clone());
                    continue;
                }
                LlmMessageRole::User => "user",
                LlmMessageRole::Assistant => "assistant",
            };

            match converted.last_mut() {
                Some(last) if last.role == role => last.content.push(AnthropicContentBlock::Text {
                    text: msg.content.clone(),
                }),
                _ => converted.push(AnthropicMessage {
                    role: role.to_string(),
                    content: vec![AnthropicContentBlock::Text {
                        text: msg.content.clone(),
                    }],
                }),
            }
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, converted)
    }
}

#[async_trait]
impl LlmDriver for AnthropicLlmDriver {
    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let (system, anthropic_messages) = Self::convert_messages(&messages, config);

        let request = AnthropicRequest {
            model: config.model.clone(),
            messages: anthropic_messages,
            // Required by Anthropic
            max_tokens: config
                .max_tokens
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: config.temperature,
            system,
            stream: true,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                ParleyError::upstream("anthropic", format!("Failed to send request: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(upstream_error("anthropic", response).await);
        }

        let mut state = StreamState::new(config.model.clone());
        let converted_stream: LlmResponseStream = Box::pin(
            response
                .bytes_stream()
                .eventsource()
                .scan(false, move |finished, result| {
                    if *finished {
                        return futures::future::ready(None);
                    }
                    let event = match result {
                        Ok(event) => state.on_event(&event.event, &event.data),
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

impl std::fmt::Debug for AnthropicLlmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicLlmDriver")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Stream state
// ============================================================================

struct StreamState {
    model: String,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<String>,
}

impl StreamState {
    fn new(model: String) -> Self {
        Self {
            model,
            input_tokens: 0,
            output_tokens: 0,
            stop_reason: None,
        }
    }

    fn on_event(&mut self, event: &str, data: &str) -> Option<LlmStreamEvent> {
        match event {
            "message_start" => {
                if let Ok(start) = serde_json::from_str::<AnthropicMessageStart>(data) {
                    if let Some(usage) = start.message.usage {
                        self.input_tokens = usage.input_tokens;
                    }
                    if let Some(model) = start.message.model {
                        self.model = model;
                    }
                }
                None
            }
            "content_block_delta" => {
                match serde_json::from_str::<AnthropicContentBlockDeltaEvent>(data) {
                    Ok(AnthropicContentBlockDeltaEvent {
                        delta: AnthropicDelta::TextDelta { text },
                    }) if !text.is_empty() => Some(LlmStreamEvent::TextDelta(text)),
                    _ => None,
                }
            }
            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<AnthropicMessageDelta>(data) {
                    if let Some(usage) = delta.usage {
                        self.output_tokens = usage.output_tokens;
                    }
                    if delta.delta.stop_reason.is_some() {
                        self.stop_reason = delta.delta.stop_reason;
                    }
                }
                None
            }
            "message_stop" => Some(LlmStreamEvent::Done(LlmCompletionMetadata {
                total_tokens: Some(self.input_tokens + self.output_tokens),
                prompt_tokens: Some(self.input_tokens),
                completion_tokens: Some(self.output_tokens),
                model: Some(self.model.clone()),
                finish_reason: Some(
                    self.stop_reason
                        .clone()
                        .unwrap_or_else(|| "end_turn".to_string()),
                ),
            })),
            "error" => {
                let message = serde_json::from_str::<AnthropicStreamError>(data)
                    .map(|e| e.error.message)
                    .unwrap_or_else(|_| data.to_string());
                Some(LlmStreamEvent::Error(format!(
                    "Anthropic stream error: {}",
                    message
                )))
            }
            // ping, content_block_start, content_block_stop
            _ => None,
        }
    }
}

// ============================================================================
// Driver Registration
// ============================================================================

/// Register the Anthropic driver with the driver registry
///
/// This should be called at application startup to enable Anthropic model support.
pub fn register_driver(registry: &mut DriverRegistry) {
    registry.register(
        "anthropic",
        ProviderVariant::new(InvocationStyle::Direct, |options: &ClientOptions| {
            let api_key = options.require_api_key("anthropic")?;
            let driver = match options.base_url.as_deref() {
                Some(url) => AnthropicLlmDriver::with_base_url(api_key, url),
                None => AnthropicLlmDriver::new(api_key),
            };
            Ok(Box::new(driver) as BoxedLlmDriver)
        })
        .with_capabilities(ProviderCapabilities {
            streaming: true,
            vision: true,
            tools: true,
        })
        .with_default_base_url(DEFAULT_BASE_URL),
    );
}

// ============================================================================
// Anthropic API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct AnthropicMessageStart {
    message: AnthropicMessageInfo,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageInfo {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlockDeltaEvent {
    delta: AnthropicDelta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageDelta {
    delta: AnthropicMessageDeltaData,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageDeltaData {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

#[cfg(test)]
pub(crate) fn convert_for_test(
    messages: &[LlmMessage],
    config: &LlmCallConfig,
) -> (Option<String>, serde_json::Value) {
    let (system, converted) = AnthropicLlmDriver::convert_messages(messages, config);
    (system, serde_json::to_value(converted).unwrap_or_default())
}
