// Chat stream controller
//
// Owns one chat's in-flight turn. The turn task races a CancellationToken
// against every await, so `stop()` takes effect immediately. Status
// transitions happen under the turn lock and are ignored once the turn's
// token is cancelled, so a stopped turn can never overwrite a newer one.

use crate::history::{merge_messages, prepare_history, DisplayMessage};
use crate::store::{LocalStore, NewMessage, StoreError};
use crate::transport::{ChatTransport, ChunkStream, TransportError};
use futures::StreamExt;
use parking_lot::Mutex;
use parley_core::{ChatRequest, ChatRole, UiChunk};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Error text for a stream that ended without `finish`
pub const STREAM_INTERRUPTED: &str = "Stream interrupted";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("A turn is already in progress")]
    Busy,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Lifecycle of the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    #[default]
    Idle,
    Submitted,
    Streaming,
    Finished,
    Errored,
    Stopped,
}

impl TurnStatus {
    /// A turn is in flight; sends are rejected
    pub fn is_active(&self) -> bool {
        matches!(self, TurnStatus::Submitted | TurnStatus::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    NoContent,
}

#[derive(Default)]
struct TurnState {
    live: Vec<DisplayMessage>,
    error: Option<String>,
    save_error: Option<String>,
    cancel: Option<CancellationToken>,
}

struct Shared {
    store: LocalStore,
    transport: Arc<dyn ChatTransport>,
    chat_id: String,
    model: String,
    system_prompt_id: Option<String>,
    status: watch::Sender<TurnStatus>,
    /// Assistant text received so far in the current turn
    draft: watch::Sender<String>,
    state: Mutex<TurnState>,
}

impl Shared {
    /// Run `f` against the turn state unless the turn was cancelled
    fn with_turn<R>(
        &self,
        token: &CancellationToken,
        f: impl FnOnce(&mut TurnState, &watch::Sender<TurnStatus>) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return None;
        }
        Some(f(&mut state, &self.status))
    }

    /// Final transition: the turn no longer owns the state afterwards
    fn end_turn(&self, token: &CancellationToken, status: TurnStatus, error: Option<String>) -> bool {
        self.with_turn(token, |state, tx| {
            state.cancel = None;
            state.error = error;
            tx.send_replace(status);
        })
        .is_some()
    }

    fn fail(&self, token: &CancellationToken, error: String) {
        tracing::warn!(chat_id = %self.chat_id, error = %error, "Chat turn failed");
        self.end_turn(token, TurnStatus::Errored, Some(error));
    }

    fn record_save_error(&self, error: &StoreError) {
        tracing::warn!(chat_id = %self.chat_id, error = %error, "Failed to persist message");
        self.state.lock().save_error = Some(error.to_string());
    }
}

/// Whether a finished turn's text may already be in the store
#[derive(Clone, Copy)]
enum TurnKind {
    Send,
    Resume,
}

/// Drives streaming turns for one chat
pub struct ChatStreamController {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatStreamController {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn ChatTransport>,
        chat_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self::with_system_prompt(store, transport, chat_id, model, None)
    }

    pub fn with_system_prompt(
        store: LocalStore,
        transport: Arc<dyn ChatTransport>,
        chat_id: impl Into<String>,
        model: impl Into<String>,
        system_prompt_id: Option<String>,
    ) -> Self {
        let (status, _) = watch::channel(TurnStatus::Idle);
        let (draft, _) = watch::channel(String::new());
        Self {
            shared: Arc::new(Shared {
                store,
                transport,
                chat_id: chat_id.into(),
                model: model.into(),
                system_prompt_id,
                status,
                draft,
                state: Mutex::new(TurnState::default()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.shared.chat_id
    }

    pub fn status(&self) -> TurnStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TurnStatus> {
        self.shared.status.subscribe()
    }

    /// Streamed assistant text of the current turn, for hosts that render tokens
    pub fn subscribe_draft(&self) -> watch::Receiver<String> {
        self.shared.draft.subscribe()
    }

    /// Error of the last turn, cleared when the next one starts
    pub fn error(&self) -> Option<String> {
        self.shared.state.lock().error.clone()
    }

    /// Last persistence failure
    pub fn save_error(&self) -> Option<String> {
        self.shared.state.lock().save_error.clone()
    }

    /// Start a turn with the given user message. Returns once the turn is
    /// spawned; follow progress through [`Self::subscribe_status`].
    pub fn send(&self, content: impl Into<String>) -> Result<(), ControllerError> {
        let user = DisplayMessage::new(Uuid::now_v7().to_string(), ChatRole::User, content);
        let token = self.begin_turn(vec![user.clone()])?;

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            run_send(shared, token, user).await;
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Reattach to the chat's latest server-side turn
    pub async fn resume_stream(&self) -> Result<ResumeOutcome, ControllerError> {
        let token = self.begin_turn(Vec::new())?;

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(ResumeOutcome::NoContent),
            opened = self.shared.transport.resume(&self.shared.chat_id) => opened,
        };

        match opened {
            Ok(Some(stream)) => {
                let shared = self.shared.clone();
                let handle = tokio::spawn(async move {
                    consume(&shared, &token, stream, TurnKind::Resume).await;
                });
                *self.task.lock() = Some(handle);
                Ok(ResumeOutcome::Resumed)
            }
            Ok(None) => {
                self.shared.end_turn(&token, TurnStatus::Idle, None);
                Ok(ResumeOutcome::NoContent)
            }
            Err(e) => {
                self.shared.fail(&token, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Abort the active turn; nothing it produced is persisted
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if !self.shared.status.borrow().is_active() {
            return;
        }
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        state.live.clear();
        self.shared.status.send_replace(TurnStatus::Stopped);
        tracing::info!(chat_id = %self.shared.chat_id, "Chat turn stopped");
    }

    /// Wait for the current turn task to exit
    pub async fn wait(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(chat_id = %self.shared.chat_id, error = %e, "Chat turn task failed");
            }
        }
    }

    /// Persisted messages merged with the in-flight overlay
    pub async fn messages(&self) -> Result<Vec<DisplayMessage>, ControllerError> {
        let persisted: Vec<DisplayMessage> = self
            .shared
            .store
            .get_chat_messages(&self.shared.chat_id)
            .await?
            .iter()
            .map(DisplayMessage::from)
            .collect();

        let state = self.shared.state.lock();
        Ok(merge_messages(&persisted, &state.live, self.status()))
    }

    fn begin_turn(&self, live: Vec<DisplayMessage>) -> Result<CancellationToken, ControllerError> {
        let mut state = self.shared.state.lock();
        if self.shared.status.borrow().is_active() {
            return Err(ControllerError::Busy);
        }

        let token = CancellationToken::new();
        state.cancel = Some(token.clone());
        state.live = live;
        state.error = None;
        self.shared.draft.send_replace(String::new());
        self.shared.status.send_replace(TurnStatus::Submitted);
        Ok(token)
    }
}

impl Drop for ChatStreamController {
    fn drop(&mut self) {
        if let Some(token) = self.shared.state.lock().cancel.take() {
            token.cancel();
        }
    }
}

async fn run_send(shared: Arc<Shared>, token: CancellationToken, user: DisplayMessage) {
    let new_message = NewMessage::new(&shared.chat_id, ChatRole::User, &user.content);
    let persisted = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        result = shared.store.add_message(new_message) => result,
    };
    let user_persisted = match persisted {
        Ok(_) => true,
        Err(e) => {
            shared.record_save_error(&e);
            false
        }
    };

    let mut history: Vec<DisplayMessage> = match shared.store.get_chat_messages(&shared.chat_id).await
    {
        Ok(messages) => messages.iter().map(DisplayMessage::from).collect(),
        Err(e) => {
            shared.record_save_error(&e);
            Vec::new()
        }
    };
    if !user_persisted {
        history.push(user);
    }

    let request = ChatRequest {
        id: Some(shared.chat_id.clone()),
        model: shared.model.clone(),
        system_prompt_id: shared.system_prompt_id.clone(),
        messages: prepare_history(&history),
        max_output_tokens: None,
    };
    tracing::debug!(
        chat_id = %shared.chat_id,
        model = %shared.model,
        history = request.messages.len(),
        "Opening chat stream"
    );

    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        opened = shared.transport.send(&request) => opened,
    };
    match opened {
        Ok(stream) => consume(&shared, &token, stream, TurnKind::Send).await,
        Err(e) => shared.fail(&token, e.to_string()),
    }
}

async fn consume(shared: &Shared, token: &CancellationToken, mut stream: ChunkStream, kind: TurnKind) {
    let mut text = String::new();
    let mut message_id = Uuid::now_v7().to_string();

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(UiChunk::Start { message_id: id })) => message_id = id,
            Some(Ok(UiChunk::TextDelta { delta, .. })) => {
                text.push_str(&delta);
                let applied = shared.with_turn(token, |state, tx| {
                    match state
                        .live
                        .iter_mut()
                        .find(|m| m.role == ChatRole::Assistant && m.id == message_id)
                    {
                        Some(live) => live.content.push_str(&delta),
                        None => state.live.push(DisplayMessage::new(
                            message_id.clone(),
                            ChatRole::Assistant,
                            text.clone(),
                        )),
                    }
                    shared.draft.send_modify(|draft| draft.push_str(&delta));
                    tx.send_if_modified(|status| {
                        if *status == TurnStatus::Submitted {
                            *status = TurnStatus::Streaming;
                            true
                        } else {
                            false
                        }
                    });
                });
                if applied.is_none() {
                    return;
                }
            }
            Some(Ok(UiChunk::Finish)) => break,
            Some(Ok(UiChunk::Error { error_text })) => return shared.fail(token, error_text),
            Some(Ok(_)) => {}
            Some(Err(e)) => return shared.fail(token, e.to_string()),
            None => return shared.fail(token, STREAM_INTERRUPTED.to_string()),
        }
    }

    // Release the connection before touching the store
    drop(stream);

    // The turn stays active until the reply is stored
    if !text.trim().is_empty() && !token.is_cancelled() {
        let duplicate = matches!(kind, TurnKind::Resume) && already_persisted(shared, &text).await;
        if !duplicate {
            let assistant = NewMessage::new(&shared.chat_id, ChatRole::Assistant, text.as_str());
            if let Err(e) = shared.store.add_message(assistant).await {
                shared.record_save_error(&e);
            }
        }
    }

    if shared.end_turn(token, TurnStatus::Finished, None) {
        tracing::debug!(chat_id = %shared.chat_id, chars = text.len(), "Chat turn finished");
    }
}

/// A replayed turn may have been saved by the session that started it
async fn already_persisted(shared: &Shared, text: &str) -> bool {
    match shared.store.get_chat_messages(&shared.chat_id).await {
        Ok(messages) => messages
            .last()
            .is_some_and(|m| m.role == ChatRole::Assistant && m.content == text),
        Err(_) => false,
    }
}
