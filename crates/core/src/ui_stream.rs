// UI message stream framing
//
// The chat endpoint streams one JSON chunk per SSE `data:` line and ends with
// `data: [DONE]`. A turn is framed as:
//
//   start, start-step, text-start, text-delta*, text-end, finish-step, finish
//
// or cut short by a single terminal `error` chunk. Both the server (producer)
// and the client transport (consumer) use these types.

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Response header advertising the framing version
pub const UI_MESSAGE_STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const UI_MESSAGE_STREAM_VERSION: &str = "v1";

/// SSE payload that terminates the stream
pub const DONE_MARKER: &str = "[DONE]";

/// One chunk of the UI message stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiChunk {
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    FinishStep,
    Finish,
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
}

impl UiChunk {
    pub fn error(text: impl Into<String>) -> Self {
        UiChunk::Error {
            error_text: text.into(),
        }
    }

    /// `finish` or `error`: nothing follows except the done marker
    pub fn is_terminal(&self) -> bool {
        matches!(self, UiChunk::Finish | UiChunk::Error { .. })
    }

    /// Serialize as an SSE data payload
    pub fn to_data(&self) -> String {
        // Serializing a plain enum of strings cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parsed SSE data payload
#[derive(Debug, Clone, PartialEq)]
pub enum UiFrame {
    Chunk(UiChunk),
    Done,
}

impl UiFrame {
    /// Parse one SSE `data:` payload
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        if data.trim() == DONE_MARKER {
            return Ok(UiFrame::Done);
        }
        serde_json::from_str(data).map(UiFrame::Chunk)
    }
}

/// Builds the framed chunk sequence for one assistant message
#[derive(Debug, Clone)]
pub struct UiStreamFramer {
    message_id: String,
    text_id: String,
    text_open: bool,
}

impl UiStreamFramer {
    pub fn new(message_id: impl Into<String>) -> Self {
        let message_id = message_id.into();
        Self {
            text_id: format!("text-{}", message_id),
            message_id,
            text_open: false,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Opening chunks
    pub fn start(&self) -> Vec<UiChunk> {
        vec![
            UiChunk::Start {
                message_id: self.message_id.clone(),
            },
            UiChunk::StartStep,
        ]
    }

    /// Chunks for one text fragment; opens the text part on first use
    pub fn text(&mut self, delta: String) -> Vec<UiChunk> {
        let mut chunks = Vec::with_capacity(2);
        if !self.text_open {
            self.text_open = true;
            chunks.push(UiChunk::TextStart {
                id: self.text_id.clone(),
            });
        }
        chunks.push(UiChunk::TextDelta {
            id: self.text_id.clone(),
            delta,
        });
        chunks
    }

    /// Closing chunks for a completed turn
    pub fn finish(&mut self) -> Vec<UiChunk> {
        let mut chunks = Vec::with_capacity(3);
        if self.text_open {
            self.text_open = false;
            chunks.push(UiChunk::TextEnd {
                id: self.text_id.clone(),
            });
        }
        chunks.push(UiChunk::FinishStep);
        chunks.push(UiChunk::Finish);
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_wire_format() {
        let start = UiChunk::Start {
            message_id: "m1".to_string(),
        };
        assert_eq!(start.to_data(), r#"{"type":"start","messageId":"m1"}"#);

        let delta = UiChunk::TextDelta {
            id: "t".to_string(),
            delta: "Hi".to_string(),
        };
        assert_eq!(
            delta.to_data(),
            r#"{"type":"text-delta","id":"t","delta":"Hi"}"#
        );

        assert_eq!(UiChunk::StartStep.to_data(), r#"{"type":"start-step"}"#);
        assert_eq!(
            UiChunk::error("boom").to_data(),
            r#"{"type":"error","errorText":"boom"}"#
        );
    }

    #[test]
    fn test_parse_frames() {
        assert_eq!(UiFrame::parse("[DONE]").unwrap(), UiFrame::Done);
        assert_eq!(
            UiFrame::parse(r#"{"type":"finish"}"#).unwrap(),
            UiFrame::Chunk(UiChunk::Finish)
        );
        assert!(UiFrame::parse("not json").is_err());
    }

    #[test]
    fn test_framer_sequence() {
        let mut framer = UiStreamFramer::new("abc");
        let mut chunks = framer.start();
        chunks.extend(framer.text("Hel".to_string()));
        chunks.extend(framer.text("lo".to_string()));
        chunks.extend(framer.finish());

        let types: Vec<String> = chunks
            .iter()
            .map(|c| {
                serde_json::to_value(c).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(
            types,
            vec![
                "start",
                "start-step",
                "text-start",
                "text-delta",
                "text-delta",
                "text-end",
                "finish-step",
                "finish"
            ]
        );
        assert!(chunks.last().unwrap().is_terminal());
    }

    #[test]
    fn test_framer_finish_without_text() {
        let mut framer = UiStreamFramer::new("abc");
        assert_eq!(framer.finish(), vec![UiChunk::FinishStep, UiChunk::Finish]);
    }
}
