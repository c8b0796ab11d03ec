//! Filtered units of agent output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Intent of a thought line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtKind {
    Progress,
    Suggestion,
    Analysis,
    Thinking,
}

impl std::fmt::Display for ThoughtKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Progress => write!(f, "progress"),
            Self::Suggestion => write!(f, "suggestion"),
            Self::Analysis => write!(f, "analysis"),
            Self::Thinking => write!(f, "thinking"),
        }
    }
}

/// One human-readable line the agent produced, with the file it was
/// discussing at the time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub kind: ThoughtKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Thought {
    pub fn new(content: impl Into<String>, kind: ThoughtKind, file: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            content: content.into(),
            kind,
            file,
        }
    }
}
