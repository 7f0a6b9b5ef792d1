// Stream checkpoints for resumable chat streams
//
// Each chat's most recent turn is buffered in memory as UI chunks. A client
// that reconnects receives the buffered chunks, then whatever the producer
// emits afterwards. Snapshot and subscription are taken under the same lock,
// so nothing is missed or sent twice.
//
// Checkpoints are not persisted; a restart makes every chat non-resumable.

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use parley_core::UiChunk;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

const CHANNEL_CAPACITY: usize = 1024;

/// Error text used when a producer goes away mid-turn
pub const STREAM_INTERRUPTED: &str = "Stream interrupted";

struct CheckpointState {
    chunks: Vec<UiChunk>,
    /// Dropped on completion so live subscribers see the end of the channel
    sender: Option<broadcast::Sender<UiChunk>>,
    completed_at: Option<Instant>,
}

/// Buffered chunks of one turn
pub struct StreamCheckpoint {
    chat_id: String,
    state: Mutex<CheckpointState>,
}

impl StreamCheckpoint {
    fn new(chat_id: String) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            chat_id,
            state: Mutex::new(CheckpointState {
                chunks: Vec::new(),
                sender: Some(sender),
                completed_at: None,
            }),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().completed_at.is_some()
    }

    fn push(&self, chunk: UiChunk) {
        let mut state = self.state.lock();
        if state.completed_at.is_some() {
            return;
        }
        let terminal = chunk.is_terminal();
        state.chunks.push(chunk.clone());
        if let Some(sender) = &state.sender {
            // No receivers is fine
            let _ = sender.send(chunk);
        }
        if terminal {
            Self::finish(&mut state);
        }
    }

    fn complete(&self) {
        Self::finish(&mut self.state.lock());
    }

    fn finish(state: &mut CheckpointState) {
        if state.completed_at.is_none() {
            state.completed_at = Some(Instant::now());
            state.sender = None;
        }
    }

    fn expired(&self, retention: Duration) -> bool {
        self.state
            .lock()
            .completed_at
            .is_some_and(|at| at.elapsed() >= retention)
    }

    fn subscribe(&self) -> CheckpointSubscription {
        let state = self.state.lock();
        CheckpointSubscription {
            snapshot: state.chunks.clone(),
            live: state.sender.as_ref().map(|s| s.subscribe()),
        }
    }
}

/// Producer handle for a checkpoint
///
/// Dropping the writer before `complete` (or a terminal chunk), for example
/// when its task is aborted at shutdown, closes the checkpoint with a trailing
/// `Stream interrupted` error chunk.
pub struct CheckpointWriter {
    checkpoint: Arc<StreamCheckpoint>,
}

impl CheckpointWriter {
    pub fn push(&self, chunk: UiChunk) {
        self.checkpoint.push(chunk);
    }

    pub fn complete(self) {
        self.checkpoint.complete();
    }

    /// No longer accepting chunks: terminal chunk seen, or replaced by a newer turn
    pub fn is_closed(&self) -> bool {
        self.checkpoint.is_complete()
    }

    pub fn chat_id(&self) -> &str {
        self.checkpoint.chat_id()
    }
}

impl Drop for CheckpointWriter {
    fn drop(&mut self) {
        if !self.checkpoint.is_complete() {
            tracing::debug!(chat_id = %self.checkpoint.chat_id, "Stream producer dropped mid-turn");
            self.checkpoint.push(UiChunk::error(STREAM_INTERRUPTED));
            self.checkpoint.complete();
        }
    }
}

/// Buffered chunks plus, for an active turn, the live feed
pub struct CheckpointSubscription {
    pub snapshot: Vec<UiChunk>,
    pub live: Option<broadcast::Receiver<UiChunk>>,
}

impl CheckpointSubscription {
    /// Replay then follow, ending after the first terminal chunk
    pub fn into_stream(self) -> impl Stream<Item = UiChunk> + Send {
        let replay_done = self.snapshot.last().is_some_and(|c| c.is_terminal());
        let live = match self.live {
            Some(receiver) if !replay_done => BroadcastStream::new(receiver).boxed(),
            _ => futures::stream::empty().boxed(),
        };

        let live = live.scan(false, |finished, item| {
            if *finished {
                return futures::future::ready(None);
            }
            // A lagged receiver cannot recover the missed chunks
            let chunk = item.unwrap_or_else(|_| UiChunk::error(STREAM_INTERRUPTED));
            *finished = chunk.is_terminal();
            futures::future::ready(Some(chunk))
        });

        futures::stream::iter(self.snapshot).chain(live)
    }
}

/// Checkpoints keyed by chat id
pub struct StreamCheckpointStore {
    retention: Duration,
    entries: Mutex<HashMap<String, Arc<StreamCheckpoint>>>,
}

impl StreamCheckpointStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Start buffering a new turn, replacing any earlier checkpoint of the chat
    pub fn begin(&self, chat_id: &str) -> CheckpointWriter {
        let checkpoint = Arc::new(StreamCheckpoint::new(chat_id.to_string()));
        let mut entries = self.entries.lock();
        self.prune(&mut entries);
        if let Some(previous) = entries.insert(chat_id.to_string(), checkpoint.clone()) {
            previous.complete();
        }
        CheckpointWriter { checkpoint }
    }

    /// Snapshot and live feed for a chat, if it has a retained checkpoint
    pub fn subscribe(&self, chat_id: &str) -> Option<CheckpointSubscription> {
        let mut entries = self.entries.lock();
        self.prune(&mut entries);
        entries.get(chat_id).map(|c| c.subscribe())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self, entries: &mut HashMap<String, Arc<StreamCheckpoint>>) {
        entries.retain(|_, checkpoint| !checkpoint.expired(self.retention));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> UiChunk {
        UiChunk::TextDelta {
            id: "t".to_string(),
            delta: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_completed_turn_replays_snapshot() {
        let store = StreamCheckpointStore::new(Duration::from_secs(300));
        let writer = store.begin("chat-1");
        writer.push(UiChunk::StartStep);
        writer.push(delta("Hello"));
        writer.push(UiChunk::Finish);
        drop(writer);

        let subscription = store.subscribe("chat-1").unwrap();
        assert!(subscription.live.is_none());
        let chunks: Vec<UiChunk> = subscription.into_stream().collect().await;
        assert_eq!(chunks, vec![UiChunk::StartStep, delta("Hello"), UiChunk::Finish]);
    }

    #[tokio::test]
    async fn test_active_turn_replays_then_follows() {
        let store = StreamCheckpointStore::new(Duration::from_secs(300));
        let writer = store.begin("chat-1");
        writer.push(delta("one"));

        let subscription = store.subscribe("chat-1").unwrap();
        assert_eq!(subscription.snapshot, vec![delta("one")]);
        let reader = tokio::spawn(subscription.into_stream().collect::<Vec<_>>());

        writer.push(delta("two"));
        writer.push(UiChunk::Finish);

        let chunks = reader.await.unwrap();
        assert_eq!(chunks, vec![delta("one"), delta("two"), UiChunk::Finish]);
    }

    #[tokio::test]
    async fn test_dropped_writer_marks_interrupted() {
        let store = StreamCheckpointStore::new(Duration::from_secs(300));
        let writer = store.begin("chat-1");
        writer.push(delta("par"));
        let subscription = store.subscribe("chat-1").unwrap();
        drop(writer);

        let chunks: Vec<UiChunk> = subscription.into_stream().collect().await;
        assert_eq!(chunks, vec![delta("par"), UiChunk::error(STREAM_INTERRUPTED)]);

        let replay = store.subscribe("chat-1").unwrap();
        assert_eq!(replay.snapshot.last(), Some(&UiChunk::error(STREAM_INTERRUPTED)));
    }

    #[tokio::test]
    async fn test_completed_writer_adds_nothing() {
        let store = StreamCheckpointStore::new(Duration::from_secs(300));
        let writer = store.begin("chat-1");
        writer.push(delta("x"));
        writer.complete();

        let subscription = store.subscribe("chat-1").unwrap();
        assert_eq!(subscription.snapshot, vec![delta("x")]);
        assert!(subscription.live.is_none());
    }

    #[test]
    fn test_unknown_chat_has_no_checkpoint() {
        let store = StreamCheckpointStore::new(Duration::from_secs(300));
        assert!(store.subscribe("nope").is_none());
    }

    #[test]
    fn test_begin_replaces_previous_turn() {
        let store = StreamCheckpointStore::new(Duration::from_secs(300));
        let first = store.begin("chat-1");
        first.push(delta("old"));
        assert!(!first.is_closed());
        let second = store.begin("chat-1");
        second.push(delta("new"));
        assert!(first.is_closed());
        assert!(!second.is_closed());

        assert_eq!(store.subscribe("chat-1").unwrap().snapshot, vec![delta("new")]);
        // The replaced checkpoint is already complete, so dropping adds nothing visible
        drop(first);
        assert_eq!(store.len(), 1);
        drop(second);
    }

    #[test]
    fn test_expired_checkpoints_are_pruned() {
        let store = StreamCheckpointStore::new(Duration::ZERO);
        let writer = store.begin("chat-1");
        writer.push(UiChunk::Finish);
        drop(writer);

        assert!(store.subscribe("chat-1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_active_checkpoints_survive_pruning() {
        let store = StreamCheckpointStore::new(Duration::ZERO);
        let writer = store.begin("chat-1");
        writer.push(delta("still going"));

        let _ = store.begin("chat-2");
        assert!(store.subscribe("chat-1").is_some());
        drop(writer);
    }
}
