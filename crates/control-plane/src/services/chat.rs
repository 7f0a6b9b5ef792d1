// Chat service: one streamed assistant turn per request
//
// Pre-stream failures (unknown prompt, unknown model, credentials, upstream
// refusing the request) are returned as errors. Once the upstream stream is
// open, everything is reported in-band as UI chunks.
//
// Turns that carry a chat id run on their own task and are checkpointed, so a
// dropped connection does not end the turn; the client can resume it.

use futures::{Stream, StreamExt};
use parley_core::{
    ChatRequest, LlmMessage, LlmResponseStream, LlmStreamEvent, ParleyError, Result, UiChunk,
    UiStreamFramer,
};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use super::dispatcher::CompletionDispatcher;
use super::stream_checkpoint::{CheckpointWriter, StreamCheckpointStore, STREAM_INTERRUPTED};
use crate::config::SystemPromptCatalog;

pub type UiChunkStream = Pin<Box<dyn Stream<Item = UiChunk> + Send>>;

pub struct ChatService {
    dispatcher: Arc<CompletionDispatcher>,
    prompts: Arc<SystemPromptCatalog>,
    checkpoints: Arc<StreamCheckpointStore>,
}

impl ChatService {
    pub fn new(
        dispatcher: Arc<CompletionDispatcher>,
        prompts: Arc<SystemPromptCatalog>,
        checkpoints: Arc<StreamCheckpointStore>,
    ) -> Self {
        Self {
            dispatcher,
            prompts,
            checkpoints,
        }
    }

    pub fn prompts(&self) -> &SystemPromptCatalog {
        &self.prompts
    }

    /// Open the upstream stream and frame it as UI chunks
    ///
    /// Requests carrying a chat id are checkpointed for resume.
    pub async fn start_turn(&self, request: ChatRequest) -> Result<UiChunkStream> {
        if request.messages.is_empty() {
            return Err(ParleyError::validation("messages must not be empty"));
        }

        let system_prompt = self
            .prompts
            .resolve(request.system_prompt_id.as_deref())?
            .map(str::to_string);
        let model = self.dispatcher.get_invocable_model(&request.model).await?;

        let messages: Vec<LlmMessage> = request.messages.iter().map(LlmMessage::from).collect();
        let upstream = self
            .dispatcher
            .stream_completion(
                &model,
                messages,
                system_prompt.as_deref(),
                request.max_output_tokens,
            )
            .await?;

        let writer = request
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| self.checkpoints.begin(id));

        tracing::info!(
            chat_id = request.id.as_deref().unwrap_or("-"),
            provider = %model.provider_name,
            model_id = %model.model_id,
            "Chat turn started"
        );
        let chunks = frame_turn(upstream, Uuid::now_v7().to_string());
        Ok(match writer {
            Some(writer) => spawn_checkpointed(chunks, writer),
            None => chunks,
        })
    }

    /// Replay of a chat's retained turn, if any
    pub fn resume(&self, chat_id: &str) -> Option<UiChunkStream> {
        self.checkpoints
            .subscribe(chat_id)
            .map(|subscription| subscription.into_stream().boxed())
    }
}

/// Run a framed turn to completion on its own task, mirroring every chunk
/// into the checkpoint
///
/// The returned stream follows the task for as long as the requester keeps
/// it. A turn whose checkpoint was replaced by a newer turn stops once nobody
/// is listening.
pub fn spawn_checkpointed(mut chunks: UiChunkStream, writer: CheckpointWriter) -> UiChunkStream {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(chunk) = chunks.next().await {
            if writer.is_closed() && tx.is_closed() {
                tracing::debug!(
                    chat_id = %writer.chat_id(),
                    "Replaced turn has no listener, stopping"
                );
                return;
            }
            writer.push(chunk.clone());
            // Requester may have disconnected; the checkpoint still gets the chunk
            let _ = tx.send(chunk);
        }
        writer.complete();
    });

    Box::pin(UnboundedReceiverStream::new(rx))
}

struct TurnState {
    upstream: LlmResponseStream,
    framer: UiStreamFramer,
    pending: VecDeque<UiChunk>,
    finished: bool,
}

/// Reframe driver events as UI chunks
pub fn frame_turn(upstream: LlmResponseStream, message_id: String) -> UiChunkStream {
    let framer = UiStreamFramer::new(message_id);
    let state = TurnState {
        upstream,
        pending: framer.start().into(),
        framer,
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((chunk, state));
            }
            if state.finished {
                return None;
            }

            let chunks = match state.upstream.next().await {
                Some(Ok(LlmStreamEvent::TextDelta(delta))) if delta.is_empty() => Vec::new(),
                Some(Ok(LlmStreamEvent::TextDelta(delta))) => state.framer.text(delta),
                Some(Ok(LlmStreamEvent::Done(metadata))) => {
                    tracing::debug!(
                        message_id = %state.framer.message_id(),
                        total_tokens = ?metadata.total_tokens,
                        finish_reason = ?metadata.finish_reason,
                        "Chat turn finished"
                    );
                    state.finished = true;
                    state.framer.finish()
                }
                Some(Ok(LlmStreamEvent::Error(message))) => {
                    tracing::warn!(error = %message, "Upstream stream error");
                    state.finished = true;
                    vec![UiChunk::error(message)]
                }
                Some(Err(ParleyError::StreamInterrupted)) | None => {
                    tracing::warn!("Upstream closed without completing the turn");
                    state.finished = true;
                    vec![UiChunk::error(STREAM_INTERRUPTED)]
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Upstream stream failed");
                    state.finished = true;
                    vec![UiChunk::error(e.to_string())]
                }
            };
            state.pending.extend(chunks);
        }
    }))
}
