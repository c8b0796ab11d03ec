//! Raw events emitted by the agent's `stream-json` output.
//!
//! Each stdout line of the agent is one JSON object tagged by `type`. Only the
//! fields the thought pipeline needs are modelled; unknown event and content
//! block types are tolerated.

use serde::{Deserialize, Serialize};

/// One block of an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// Transport or runtime error surfaced inside the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// One agent stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    Assistant {
        #[serde(default)]
        message: AssistantMessage,
    },
    User,
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}

impl RawEvent {
    /// Build an error event.
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            error: StreamError {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }

    /// Assistant event with a single text block.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant {
            message: AssistantMessage {
                content: vec![ContentBlock::Text { text: text.into() }],
            },
        }
    }

    /// Terminal result event.
    pub fn result(text: impl Into<String>) -> Self {
        Self::Result {
            subtype: Some("success".to_string()),
            result: Some(text.into()),
            is_error: false,
        }
    }

    /// Parse one stdout line. Unparsable lines become `parse_error` events.
    pub fn from_line(line: &str) -> Self {
        serde_json::from_str(line).unwrap_or_else(|err| {
            Self::error("parse_error", format!("{}: {}", err, line))
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Text payload: all text and thinking blocks of an assistant message
    /// concatenated, or the final result text.
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Assistant { message } => {
                let text: String = message
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        ContentBlock::Thinking { thinking } => Some(thinking.as_str()),
                        ContentBlock::Other => None,
                    })
                    .collect();
                (!text.is_empty()).then_some(text)
            }
            Self::Result { result, .. } => result.clone().filter(|r| !r.is_empty()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assistant_blocks() {
        let line = r#"{"type":"assistant","message":{"id":"m1","content":[{"type":"thinking","thinking":"Let me look.\n"},{"type":"tool_use","id":"t","name":"Read","input":{}},{"type":"text","text":"Reviewing auth."}]}}"#;
        let event = RawEvent::from_line(line);
        assert_eq!(event.text().as_deref(), Some("Let me look.\nReviewing auth."));
    }

    #[test]
    fn test_parse_result() {
        let line = r#"{"type":"result","subtype":"success","result":"All done","is_error":false,"duration_ms":10}"#;
        let event = RawEvent::from_line(line);
        assert!(matches!(event, RawEvent::Result { is_error: false, .. }));
        assert_eq!(event.text().as_deref(), Some("All done"));
    }

    #[test]
    fn test_parse_system_and_unknown() {
        let system = RawEvent::from_line(r#"{"type":"system","subtype":"init","cwd":"/tmp"}"#);
        assert!(matches!(system, RawEvent::System { .. }));
        assert_eq!(system.text(), None);

        let user = RawEvent::from_line(r#"{"type":"user","message":{"content":[]}}"#);
        assert_eq!(user, RawEvent::User);

        let other = RawEvent::from_line(r#"{"type":"stream_event","event":{}}"#);
        assert_eq!(other, RawEvent::Other);
    }

    #[test]
    fn test_unparsable_line_becomes_error() {
        let event = RawEvent::from_line("not json at all");
        match event {
            RawEvent::Error { error } => {
                assert_eq!(error.kind, "parse_error");
                assert!(error.message.contains("not json at all"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }
}
