//! CI check status for a pull request head commit.

use serde::{Deserialize, Serialize};

/// Maximum characters of raw check output kept when there are no annotations.
pub const MAX_OUTPUT_CHARS: usize = 5000;

const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// A located message attached to a failed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiAnnotation {
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    /// `failure` or `warning`.
    pub level: String,
    #[serde(default)]
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_details: Option<String>,
}

impl CiAnnotation {
    /// `path:L12` or `path:L12-20`.
    pub fn location(&self) -> String {
        if self.end_line > self.start_line {
            format!("{}:L{}-{}", self.path, self.start_line, self.end_line)
        } else {
            format!("{}:L{}", self.path, self.start_line)
        }
    }
}

/// One failed check run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiFailure {
    pub check_name: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub log_url: String,
    #[serde(default)]
    pub annotations: Vec<CiAnnotation>,
    /// Truncated raw output, only kept when `annotations` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Aggregated check-run status for a commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CiStatus {
    pub failures: Vec<CiFailure>,
    pub pending_count: usize,
    pub pending_names: Vec<String>,
    pub passed_count: usize,
    pub total_count: usize,
    /// The automated reviewer has a check run on this commit.
    pub reviewer_found: bool,
    /// The automated reviewer's check run has completed.
    pub reviewer_completed: bool,
}

impl CiStatus {
    /// No check is queued or running.
    pub fn all_complete(&self) -> bool {
        self.pending_count == 0
    }

    pub fn all_passed(&self) -> bool {
        self.all_complete() && self.failures.is_empty()
    }
}

/// Cap raw output at [`MAX_OUTPUT_CHARS`] characters, marking the cut.
pub fn truncate_output(text: &str) -> String {
    match text.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_output_short_text_unchanged() {
        assert_eq!(truncate_output("error: boom"), "error: boom");
    }

    #[test]
    fn test_truncate_output_long_text() {
        let text = "x".repeat(MAX_OUTPUT_CHARS + 10);
        let truncated = truncate_output(&text);
        assert!(truncated.ends_with("... [truncated]"));
        assert_eq!(
            truncated.len(),
            MAX_OUTPUT_CHARS + TRUNCATION_MARKER.len()
        );
    }

    #[test]
    fn test_annotation_location() {
        let mut ann = CiAnnotation {
            path: "src/lib.rs".to_string(),
            start_line: 4,
            end_line: 4,
            level: "failure".to_string(),
            title: String::new(),
            message: "boom".to_string(),
            raw_details: None,
        };
        assert_eq!(ann.location(), "src/lib.rs:L4");
        ann.end_line = 9;
        assert_eq!(ann.location(), "src/lib.rs:L4-9");
    }

    #[test]
    fn test_status_completion() {
        let mut status = CiStatus::default();
        assert!(status.all_passed());
        status.pending_count = 1;
        assert!(!status.all_complete());
        assert!(!status.all_passed());
    }
}
