//! Review session: one in-memory run of the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CiFailure, Comment, ConversationId, ConversationMetadata, Thought};

/// Lifecycle of a review session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Fetching,
    Reviewing,
    Completed,
    Satisfied,
    Failed,
}

impl ReviewStatus {
    /// Exhaustive transition table.
    pub fn can_transition_to(self, next: ReviewStatus) -> bool {
        use ReviewStatus::*;
        match (self, next) {
            (Pending, Fetching) | (Pending, Failed) => true,
            (Fetching, Reviewing) | (Fetching, Satisfied) | (Fetching, Failed) => true,
            (Reviewing, Completed) | (Reviewing, Failed) => true,
            (Pending, _) | (Fetching, _) | (Reviewing, _) => false,
            (Completed, _) | (Satisfied, _) | (Failed, _) => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Satisfied | Self::Failed)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fetching => write!(f, "fetching"),
            Self::Reviewing => write!(f, "reviewing"),
            Self::Completed => write!(f, "completed"),
            Self::Satisfied => write!(f, "satisfied"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One review run against a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSession {
    /// Per-run UUID.
    pub id: String,
    pub conversation: ConversationId,
    pub metadata: ConversationMetadata,
    pub status: ReviewStatus,

    /// Unresolved, unprocessed comments handled by this run.
    pub comments: Vec<Comment>,
    /// Comments surviving the config filter, before dedup.
    pub total_found_count: usize,
    /// Comments surviving both filters.
    pub new_comments_count: usize,
    /// `total_found_count - new_comments_count`.
    pub already_addressed: usize,

    pub ci_failures: Vec<CiFailure>,
    pub ci_pending_count: usize,
    pub ci_pending_names: Vec<String>,
    pub ci_passed_count: usize,
    pub ci_total_count: usize,
    pub ci_all_complete: bool,
    pub reviewer_found: bool,
    pub reviewer_completed: bool,

    pub thoughts: Vec<Thought>,
    pub processed_count: usize,
    pub remaining_count: usize,
    pub current_file: Option<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ReviewSession {
    pub fn new(conversation: ConversationId) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation,
            metadata: ConversationMetadata::default(),
            status: ReviewStatus::Pending,
            comments: Vec::new(),
            total_found_count: 0,
            new_comments_count: 0,
            already_addressed: 0,
            ci_failures: Vec::new(),
            ci_pending_count: 0,
            ci_pending_names: Vec::new(),
            ci_passed_count: 0,
            ci_total_count: 0,
            ci_all_complete: true,
            reviewer_found: false,
            reviewer_completed: false,
            thoughts: Vec::new(),
            processed_count: 0,
            remaining_count: 0,
            current_file: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    fn transition(&mut self, next: ReviewStatus) -> bool {
        if !self.status.can_transition_to(next) {
            log::warn!(
                "[review] Ignoring illegal session transition {} -> {} ({})",
                self.status,
                next,
                self.id
            );
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    pub fn begin_fetch(&mut self) -> bool {
        self.transition(ReviewStatus::Fetching)
    }

    pub fn begin_review(&mut self) -> bool {
        self.transition(ReviewStatus::Reviewing)
    }

    pub fn mark_completed(&mut self) -> bool {
        self.transition(ReviewStatus::Completed)
    }

    pub fn mark_satisfied(&mut self) -> bool {
        self.transition(ReviewStatus::Satisfied)
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        let moved = self.transition(ReviewStatus::Failed);
        if moved {
            self.error = Some(error.into());
        }
        moved
    }

    /// Zero unprocessed comments, zero CI failures and nothing pending.
    pub fn is_clear(&self) -> bool {
        self.new_comments_count == 0 && self.ci_failures.is_empty() && self.ci_pending_count == 0
    }

    /// Record a thought and update the progress counters.
    pub fn record_thought(&mut self, thought: Thought) {
        if thought.file.is_some() {
            self.current_file = thought.file.clone();
        }
        self.processed_count += 1;
        self.thoughts.push(thought);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThoughtKind;

    fn session() -> ReviewSession {
        ReviewSession::new(ConversationId::new("o", "r", 1))
    }

    #[test]
    fn test_transition_table() {
        use ReviewStatus::*;
        let all = [Pending, Fetching, Reviewing, Completed, Satisfied, Failed];
        let allowed = [
            (Pending, Fetching),
            (Pending, Failed),
            (Fetching, Reviewing),
            (Fetching, Satisfied),
            (Fetching, Failed),
            (Reviewing, Completed),
            (Reviewing, Failed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_happy_path() {
        let mut s = session();
        assert!(s.begin_fetch());
        assert!(s.begin_review());
        assert!(s.mark_completed());
        assert_eq!(s.status, ReviewStatus::Completed);
        assert!(s.completed_at.is_some());
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut s = session();
        assert!(!s.mark_completed());
        assert_eq!(s.status, ReviewStatus::Pending);
        assert!(s.completed_at.is_none());
    }

    #[test]
    fn test_mark_failed_keeps_error() {
        let mut s = session();
        s.begin_fetch();
        assert!(s.mark_failed("boom"));
        assert_eq!(s.error.as_deref(), Some("boom"));
        assert!(!s.mark_failed("again"));
        assert_eq!(s.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_record_thought_tracks_file() {
        let mut s = session();
        s.record_thought(Thought::new("Checking", ThoughtKind::Progress, Some("a.rs".into())));
        s.record_thought(Thought::new("Done", ThoughtKind::Thinking, None));
        assert_eq!(s.processed_count, 2);
        assert_eq!(s.current_file.as_deref(), Some("a.rs"));
    }
}
