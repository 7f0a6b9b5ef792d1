// Chat request wire types
//
// Body of `POST /v1/chat`, shared by the server handler and the client transport.

use serde::{Deserialize, Serialize};

use crate::llm_driver_registry::{LlmMessage, LlmMessageRole};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Role of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChatRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ChatRole::User),
            "assistant" => Ok(ChatRole::Assistant),
            _ => Err(format!("Unknown chat role: {}", s)),
        }
    }
}

impl From<ChatRole> for LlmMessageRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::User => LlmMessageRole::User,
            ChatRole::Assistant => LlmMessageRole::Assistant,
        }
    }
}

/// One message of the outgoing history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ChatRequestMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
}

impl From<&ChatRequestMessage> for LlmMessage {
    fn from(msg: &ChatRequestMessage) -> Self {
        LlmMessage::text(msg.role.into(), msg.content.clone())
    }
}

/// Request body for the streaming chat endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Chat identifier; enables resuming the stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Public model identifier
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_id: Option<String>,
    pub messages: Vec<ChatRequestMessage>,
    /// Upper bound on generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}
