// Outgoing history and display merge
//
// Both functions are pure: the controller feeds them store rows and the
// in-flight overlay and never writes mid-stream.

use crate::controller::TurnStatus;
use crate::store::Message;
use parley_core::{ChatRequestMessage, ChatRole};
use serde::Serialize;
use std::collections::HashSet;

/// Most recent messages sent with each turn
pub const MAX_HISTORY_MESSAGES: usize = 20;

/// A message as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
}

impl DisplayMessage {
    pub fn new(id: impl Into<String>, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
        }
    }

    fn key(&self) -> (ChatRole, &str) {
        (self.role, self.content.as_str())
    }
}

impl From<&Message> for DisplayMessage {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.clone(),
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}

/// Build the request history: blank assistant turns are dropped, user turns
/// always kept, and only the last [`MAX_HISTORY_MESSAGES`] survive.
pub fn prepare_history(messages: &[DisplayMessage]) -> Vec<ChatRequestMessage> {
    let kept: Vec<&DisplayMessage> = messages
        .iter()
        .filter(|m| m.role == ChatRole::User || !m.content.trim().is_empty())
        .collect();
    let skip = kept.len().saturating_sub(MAX_HISTORY_MESSAGES);

    kept.into_iter()
        .skip(skip)
        .map(|m| ChatRequestMessage {
            id: m.id.clone(),
            role: m.role,
            content: m.content.clone(),
        })
        .collect()
}

/// Persisted messages, plus the live overlay while a turn is in flight.
///
/// Live entries already persisted (same role and content) are not repeated.
pub fn merge_messages(
    persisted: &[DisplayMessage],
    live: &[DisplayMessage],
    status: TurnStatus,
) -> Vec<DisplayMessage> {
    let mut merged = persisted.to_vec();
    if !status.is_active() {
        return merged;
    }

    let seen: HashSet<(ChatRole, &str)> = persisted.iter().map(DisplayMessage::key).collect();
    merged.extend(live.iter().filter(|m| !seen.contains(&m.key())).cloned());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, content: &str) -> DisplayMessage {
        DisplayMessage::new(id, ChatRole::User, content)
    }

    fn assistant(id: &str, content: &str) -> DisplayMessage {
        DisplayMessage::new(id, ChatRole::Assistant, content)
    }

    #[test]
    fn test_history_drops_blank_assistant_turns() {
        let history = prepare_history(&[
            user("1", "Hi"),
            assistant("2", "   "),
            user("3", ""),
            assistant("4", "Hello"),
        ]);

        let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "4"]);
    }

    #[test]
    fn test_history_keeps_last_twenty() {
        let messages: Vec<DisplayMessage> = (0..25)
            .map(|i| {
                if i % 2 == 0 {
                    user(&i.to_string(), "question")
                } else {
                    assistant(&i.to_string(), "answer")
                }
            })
            .collect();

        let history = prepare_history(&messages);
        assert_eq!(history.len(), MAX_HISTORY_MESSAGES);
        assert_eq!(history[0].id, "5");
        assert_eq!(history[19].id, "24");
    }

    #[test]
    fn test_merge_while_streaming_dedupes_persisted() {
        let persisted = vec![user("db-1", "Hello")];
        let live = vec![user("live-1", "Hello"), assistant("live-2", "Hi th")];

        let merged = merge_messages(&persisted, &live, TurnStatus::Streaming);
        let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["db-1", "live-2"]);
    }

    #[test]
    fn test_merge_when_idle_is_persisted_only() {
        let persisted = vec![user("db-1", "Hello")];
        let live = vec![assistant("live-2", "partial")];

        for status in [
            TurnStatus::Idle,
            TurnStatus::Finished,
            TurnStatus::Errored,
            TurnStatus::Stopped,
        ] {
            assert_eq!(merge_messages(&persisted, &live, status), persisted);
        }
    }
}
