// Chat transport: POST /v1/chat and GET /v1/chat/{id}/stream
//
// Parses the UI message stream (SSE) into chunks. The stream ends at
// `[DONE]` or at the end of the body; deciding whether that end was a proper
// finish is the controller's job.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use parley_core::{ChatRequest, UiChunk, UiFrame};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid stream data: {0}")]
    Decode(String),
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<UiChunk, TransportError>> + Send>>;

/// Where chat turns are sent
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Start a turn; the returned stream yields its chunks
    async fn send(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError>;

    /// Reattach to a chat's latest turn; `None` when there is nothing to resume
    async fn resume(&self, chat_id: &str) -> Result<Option<ChunkStream>, TransportError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Transport over the Parley HTTP API
#[derive(Clone)]
pub struct HttpChatTransport {
    base_url: String,
    http: Client,
}

impl HttpChatTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn api_error(response: reqwest::Response) -> TransportError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        TransportError::Api { status, message }
    }

    fn chunks(response: reqwest::Response) -> ChunkStream {
        Box::pin(
            response
                .bytes_stream()
                .eventsource()
                .scan(false, |done, result| {
                    if *done {
                        return futures::future::ready(None);
                    }
                    let item = match result {
                        Ok(event) => match UiFrame::parse(&event.data) {
                            Ok(UiFrame::Chunk(chunk)) => Some(Ok(chunk)),
                            Ok(UiFrame::Done) => {
                                *done = true;
                                None
                            }
                            Err(e) => {
                                *done = true;
                                Some(Err(TransportError::Decode(e.to_string())))
                            }
                        },
                        Err(e) => {
                            *done = true;
                            Some(Err(TransportError::Decode(e.to_string())))
                        }
                    };
                    futures::future::ready(Some(item))
                })
                .filter_map(futures::future::ready),
        )
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        let response = self
            .http
            .post(format!("{}/v1/chat", self.base_url))
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(Self::chunks(response))
    }

    async fn resume(&self, chat_id: &str) -> Result<Option<ChunkStream>, TransportError> {
        let response = self
            .http
            .get(format!("{}/v1/chat/{}/stream", self.base_url, chat_id))
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(Self::chunks(response))),
            _ => Err(Self::api_error(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ChatRequestMessage, ChatRole};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            id: Some("chat-1".to_string()),
            model: "model-1".to_string(),
            system_prompt_id: None,
            messages: vec![ChatRequestMessage {
                id: "m1".to_string(),
                role: ChatRole::User,
                content: "Hello".to_string(),
            }],
            max_output_tokens: None,
        }
    }

    fn sse(chunks: &[&str]) -> String {
        chunks.iter().map(|c| format!("data: {}\n\n", c)).collect()
    }

    #[tokio::test]
    async fn test_send_parses_chunks_until_done() {
        let server = MockServer::start().await;
        let body = sse(&[
            r#"{"type":"start","messageId":"msg-1"}"#,
            r#"{"type":"text-delta","id":"t","delta":"Hi"}"#,
            r#"{"type":"finish"}"#,
            "[DONE]",
            r#"{"type":"text-delta","id":"t","delta":"ignored"}"#,
        ]);
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let transport = HttpChatTransport::new(&server.uri()).unwrap();
        let chunks: Vec<UiChunk> = transport
            .send(&request())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], UiChunk::Finish);
    }

    #[tokio::test]
    async fn test_send_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({ "error": "Model not found: model-1" })),
            )
            .mount(&server)
            .await;

        let transport = HttpChatTransport::new(&server.uri()).unwrap();
        let err = match transport.send(&request()).await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        match err {
            TransportError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Model not found: model-1");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_chunk_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse(&["not json"])),
            )
            .mount(&server)
            .await;

        let transport = HttpChatTransport::new(&server.uri()).unwrap();
        let items: Vec<Result<UiChunk, TransportError>> =
            transport.send(&request()).await.unwrap().collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(TransportError::Decode(_))));
    }

    #[tokio::test]
    async fn test_resume_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/chat/chat-1/stream"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let transport = HttpChatTransport::new(&server.uri()).unwrap();
        assert!(transport.resume("chat-1").await.unwrap().is_none());
    }
}
