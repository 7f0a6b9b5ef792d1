// Chat API endpoints (SSE)
//
// POST /v1/chat streams one assistant turn in the UI message stream framing.
// Failures detected before the upstream stream opens are plain JSON errors;
// afterwards they arrive as an in-band `error` chunk.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use parley_core::ui_stream::{DONE_MARKER, UI_MESSAGE_STREAM_HEADER, UI_MESSAGE_STREAM_VERSION};
use parley_core::{ChatRequest, UiChunk};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use super::common::{error_response, ApiError};
use crate::services::{ChatService, UiChunkStream};

type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent, Infallible>> + Send>>;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
}

impl AppState {
    pub fn new(service: Arc<ChatService>) -> Self {
        Self { service }
    }
}

fn sse_response(chunks: UiChunkStream) -> Response {
    let events: SseStream = Box::pin(
        chunks
            .map(|chunk| Ok::<_, Infallible>(SseEvent::default().data(chunk.to_data())))
            .chain(stream::once(async {
                Ok(SseEvent::default().data(DONE_MARKER))
            })),
    );

    (
        [(UI_MESSAGE_STREAM_HEADER, UI_MESSAGE_STREAM_VERSION)],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "UI message stream (text/event-stream)", body = UiChunk, content_type = "text/event-stream"),
        (status = 400, description = "Invalid request or unknown system prompt", body = super::ErrorResponse),
        (status = 404, description = "Model not found or not invocable", body = super::ErrorResponse),
        (status = 500, description = "Stored credential could not be decrypted", body = super::ErrorResponse),
        (status = 502, description = "Upstream rejected the request", body = super::ErrorResponse)
    ),
    tag = "chat"
)]
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let chunks = state
        .service
        .start_turn(request)
        .await
        .map_err(error_response)?;
    Ok(sse_response(chunks))
}

#[utoipa::path(
    get,
    path = "/v1/chat/{chat_id}/stream",
    params(
        ("chat_id" = String, Path, description = "Chat ID used when the turn was started")
    ),
    responses(
        (status = 200, description = "Replay of the chat's latest turn, then live chunks", content_type = "text/event-stream"),
        (status = 204, description = "Nothing to resume")
    ),
    tag = "chat"
)]
pub async fn resume_stream(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Response {
    match state.service.resume(&chat_id) {
        Some(chunks) => sse_response(chunks),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/chat/:chat_id/stream", get(resume_stream))
        .with_state(state)
}
