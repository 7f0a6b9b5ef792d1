// Google Gemini LLM Driver
//
// Implementation of LlmDriver for `models/{model}:streamGenerateContent?alt=sse`.
// The same wire protocol serves the Gemini API (API key) and Vertex AI
// (OAuth access token, project/location scoped URL).

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

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone)]
enum GeminiAuth {
    ApiKey(String),
    Bearer(String),
}

/// Gemini / Vertex AI LLM Driver
///
/// ```ignore
/// let gemini = GeminiLlmDriver::new("AIza...");
/// let vertex = GeminiLlmDriver::vertex("my-project", "us-central1", "ya29...");
/// ```
#[derive(Clone)]
pub struct GeminiLlmDriver {
    client: Client,
    provider: &'static str,
    auth: GeminiAuth,
    /// Root under which `models/{model}` is addressed
    models_root: String,
}

impl GeminiLlmDriver {
    /// Create a Gemini API driver with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a Gemini API driver rooted at a custom base URL
    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            provider: "google",
            auth: GeminiAuth::ApiKey(api_key.into()),
            models_root: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a Vertex AI driver for a project and location
    pub fn vertex(project: &str, location: &str, access_token: impl Into<String>) -> Self {
        Self::vertex_with_root(vertex_publisher_root(project, location), access_token)
    }

    /// Create a Vertex AI driver with an explicit publisher root URL
    pub fn vertex_with_root(root: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            provider: "vertex",
            auth: GeminiAuth::Bearer(access_token.into()),
            models_root: root.into().trim_end_matches('/').to_string(),
        }
    }

    /// Streaming endpoint for a model
    pub fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.models_root, model
        )
    }

    fn build_request(messages: &[LlmMessage], config: &LlmCallConfig) -> GeminiRequest {
        let mut system_parts: Vec<GeminiPart> = config
            .system
            .iter()
            .map(|text| GeminiPart { text: text.clone() })
            .collect();
        let mut contents: Vec<GeminiContent> = Vec::with_capacity(messages.len());

        for msg in messages {
            let role = match msg.role {
                LlmMessageRole::System => {
                    system_parts.push(GeminiPart {
                        text: msg.content.clone(),
                    });
                    continue;
                }
                LlmMessageRole::User => "user",
                LlmMessageRole::Assistant => "model",
            };
            let part = GeminiPart {
                text: msg.content.clone(),
            };
            match contents.last_mut() {
                Some(last) if last.role == role => last.parts.push(part),
                _ => contents.push(GeminiContent {
                    role: role.to_string(),
                    parts: vec![part],
                }),
            }
        }

        GeminiRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then_some(GeminiSystemInstruction {
                parts: system_parts,
            }),
            generation_config: GeminiGenerationConfig {
                max_output_tokens: config.max_tokens,
                temperature: config.temperature,
            },
        }
    }
}

/// `https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google`
pub fn vertex_publisher_root(project: &str, location: &str) -> String {
    let host = if location == "global" {
        "aiplatform.googleapis.com".to_string()
    } else {
        format!("{}-aiplatform.googleapis.com", location)
    };
    format!(
        "https://{}/v1/projects/{}/locations/{}/publishers/google",
        host, project, location
    )
}

#[async_trait]
impl LlmDriver for GeminiLlmDriver {
    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let request = Self::build_request(&messages, config);

        let builder = self
            .client
            .post(self.endpoint(&config.model))
            .header("Content-Type", "application/json")
            .json(&request);
        let builder = match &self.auth {
            GeminiAuth::ApiKey(key) => builder.header("x-goog-api-key", key),
            GeminiAuth::Bearer(token) => builder.bearer_auth(token),
        };

        let provider = self.provider;
        let response = builder.send().await.map_err(|e| {
            ParleyError::upstream(provider, format!("Failed to send request: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(upstream_error(provider, response).await);
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
                    let events = match result {
                        Ok(event) => convert_chunk(&event.data, &model),
                        Err(e) => vec![LlmStreamEvent::Error(format!("Stream error: {}", e))],
                    };
                    if events.iter().any(|e| {
                        matches!(e, LlmStreamEvent::Done(_) | LlmStreamEvent::Error(_))
                    }) {
                        *finished = true;
                    }
                    futures::future::ready(Some(events))
                })
                .flat_map(|events| futures::stream::iter(events.into_iter().map(Ok))),
        );

        Ok(converted_stream)
    }
}

impl std::fmt::Debug for GeminiLlmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLlmDriver")
            .field("provider", &self.provider)
            .field("models_root", &self.models_root)
            .field("auth", &"[REDACTED]")
            .finish()
    }
}

/// One SSE chunk can carry text and the finish reason together
pub(crate) fn convert_chunk(data: &str, model: &str) -> Vec<LlmStreamEvent> {
    let chunk = match serde_json::from_str::<GeminiStreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => return vec![LlmStreamEvent::Error(format!("Failed to parse chunk: {}", e))],
    };

    if let Some(error) = chunk.error {
        return vec![LlmStreamEvent::Error(error.message)];
    }

    let mut events = Vec::new();
    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return events;
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if !text.is_empty() {
        events.push(LlmStreamEvent::TextDelta(text));
    }

    if let Some(reason) = candidate.finish_reason {
        let usage = chunk.usage_metadata;
        events.push(LlmStreamEvent::Done(LlmCompletionMetadata {
            total_tokens: usage.as_ref().map(|u| u.total_token_count),
            prompt_tokens: usage.as_ref().map(|u| u.prompt_token_count),
            completion_tokens: usage.as_ref().map(|u| u.candidates_token_count),
            model: Some(chunk.model_version.unwrap_or_else(|| model.to_string())),
            finish_reason: Some(reason.to_lowercase()),
        }));
    }

    events
}

// ============================================================================
// Gemini API Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[cfg(test)]
pub(crate) fn request_json(messages: &[LlmMessage], config: &LlmCallConfig) -> serde_json::Value {
    serde_json::to_value(GeminiLlmDriver::build_request(messages, config)).unwrap_or_default()
}
