//! Comment model for reviewer remarks on a pull request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::fingerprint;

/// One reviewer remark, either attached to a file/line or to the
/// conversation as a whole.
///
/// The engine never mutates comments; it only classifies them and records
/// having processed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// GitHub comment ID. Zero or negative for synthetic comments parsed out
    /// of review bodies, which have no native ID.
    pub id: i64,

    /// Review thread node ID (GraphQL), used to resolve the thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Comment author's login.
    #[serde(default)]
    pub author: String,

    /// File path for inline comments (`None` or empty means general).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    /// Line in the new version of the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,

    /// Last line of a multi-line range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i64>,

    /// Comment content (Markdown).
    pub body: String,

    /// Machine-actionable excerpt ("Prompt for AI Agents" block).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_prompt: Option<String>,

    /// HTML URL of the comment.
    #[serde(default)]
    pub url: String,

    /// Thread resolution status.
    #[serde(default)]
    pub is_resolved: bool,

    /// Nitpick classification.
    #[serde(default)]
    pub is_nit: bool,

    /// Anchored to a diff that no longer exists.
    #[serde(default)]
    pub is_outdated: bool,

    /// Parsed from an "Outside diff range" review section.
    #[serde(default)]
    pub is_outside_diff: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Comment {
    /// Create a comment with only the fields the dedup logic looks at.
    pub fn new(id: i64, file_path: Option<&str>, line: Option<i64>, body: impl Into<String>) -> Self {
        Self {
            id,
            thread_id: None,
            author: String::new(),
            file_path: file_path.map(str::to_string),
            line,
            end_line: None,
            body: body.into(),
            ai_prompt: None,
            url: String::new(),
            is_resolved: false,
            is_nit: false,
            is_outdated: false,
            is_outside_diff: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// File path if this is an inline comment.
    pub fn path(&self) -> Option<&str> {
        self.file_path.as_deref().filter(|p| !p.is_empty())
    }

    /// Check if this is a general comment (not inline).
    pub fn is_general(&self) -> bool {
        self.path().is_none()
    }

    /// Synthetic comments have no native GitHub ID and cannot be resolved.
    pub fn is_synthetic(&self) -> bool {
        self.id <= 0
    }

    /// Text handed to the agent: the excerpt when present, else the body.
    pub fn effective_body(&self) -> &str {
        match self.ai_prompt.as_deref() {
            Some(prompt) if !prompt.trim().is_empty() => prompt,
            _ => &self.body,
        }
    }

    /// `L12` or `L12-18`, if the comment has a line.
    pub fn location(&self) -> Option<String> {
        let start = self.line?;
        match self.end_line {
            Some(end) if end > start => Some(format!("L{}-{}", start, end)),
            _ => Some(format!("L{}", start)),
        }
    }

    /// Content fingerprint over (path, line, body).
    pub fn fingerprint(&self) -> String {
        fingerprint(self.path(), self.line, &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_comment_with_empty_path() {
        let comment = Comment::new(1, Some(""), None, "overall looks fine");
        assert!(comment.is_general());
        assert_eq!(comment.path(), None);
    }

    #[test]
    fn test_effective_body_prefers_ai_prompt() {
        let mut comment = Comment::new(1, Some("src/a.rs"), Some(3), "long human text");
        assert_eq!(comment.effective_body(), "long human text");

        comment.ai_prompt = Some("Rename foo to bar".to_string());
        assert_eq!(comment.effective_body(), "Rename foo to bar");

        comment.ai_prompt = Some("   ".to_string());
        assert_eq!(comment.effective_body(), "long human text");
    }

    #[test]
    fn test_location_formats() {
        let mut comment = Comment::new(1, Some("a.go"), Some(10), "x");
        assert_eq!(comment.location().as_deref(), Some("L10"));
        comment.end_line = Some(14);
        assert_eq!(comment.location().as_deref(), Some("L10-14"));
        comment.line = None;
        assert_eq!(comment.location(), None);
    }

    #[test]
    fn test_synthetic_ids() {
        assert!(Comment::new(0, None, None, "x").is_synthetic());
        assert!(Comment::new(-4, None, None, "x").is_synthetic());
        assert!(!Comment::new(99, None, None, "x").is_synthetic());
    }

    #[test]
    fn test_deserialize_minimal_payload() {
        let comment: Comment = serde_json::from_str(r#"{"id": 7, "body": "hi"}"#).unwrap();
        assert_eq!(comment.id, 7);
        assert!(!comment.is_resolved);
        assert!(comment.is_general());
    }
}
