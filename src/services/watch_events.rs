//! Watch loop event types.
//!
//! The event stream is the only contract a presentation layer (TUI, log
//! line, script) implements against.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::satisfaction::SatisfactionVerdict;
use crate::error::ReviewError;
use crate::models::{ReviewSession, Thought};

/// Capacity of the watch event channel.
pub const WATCH_EVENT_CHANNEL_CAPACITY: usize = 32;

/// Why a processing cycle was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingTrigger {
    Comments,
    CiFailures,
}

/// Payload of a watch event.
#[derive(Debug)]
pub enum WatchEventKind {
    /// A poll happened (or was skipped because a cycle is running).
    Polling,

    /// Waiting for more remarks before starting a cycle.
    BatchWait { remaining: Duration },

    /// New or outstanding comments were detected.
    NewComments { count: usize },

    /// New CI failures were detected on the head commit.
    NewCiFailures { count: usize },

    /// A cycle started; `thoughts` is its live stream.
    Processing {
        trigger: ProcessingTrigger,
        session: Box<ReviewSession>,
        thoughts: mpsc::Receiver<Thought>,
    },

    /// The cycle's stream closed and its comments were recorded.
    ReviewComplete { session: Box<ReviewSession> },

    /// In cooldown; polling resumes once `remaining` elapses.
    Cooldown { remaining: Duration },

    /// The conversation is satisfied; no further work is started.
    Satisfied { verdict: SatisfactionVerdict },

    /// The conversation appears satisfied and awaits a human decision.
    ManualConfirmRequired { verdict: SatisfactionVerdict },

    /// A poll or cycle failed. The loop resumes polling on the next tick.
    Error { error: ReviewError },

    /// The watch was cancelled. Always the last event.
    Cancelled,
}

/// One event from the watch loop.
#[derive(Debug)]
pub struct WatchEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            kind,
        }
    }

    /// Short snake_case name of the event kind.
    pub fn name(&self) -> &'static str {
        match self.kind {
            WatchEventKind::Polling => "polling",
            WatchEventKind::BatchWait { .. } => "batch_wait",
            WatchEventKind::NewComments { .. } => "new_comments",
            WatchEventKind::NewCiFailures { .. } => "new_ci_failures",
            WatchEventKind::Processing { .. } => "processing",
            WatchEventKind::ReviewComplete { .. } => "review_complete",
            WatchEventKind::Cooldown { .. } => "cooldown",
            WatchEventKind::Satisfied { .. } => "satisfied",
            WatchEventKind::ManualConfirmRequired { .. } => "manual_confirm_required",
            WatchEventKind::Error { .. } => "error",
            WatchEventKind::Cancelled => "cancelled",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, WatchEventKind::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = WatchEvent::new(WatchEventKind::Cooldown { remaining: Duration::from_secs(3) }, "cooling");
        assert_eq!(event.name(), "cooldown");
        assert_eq!(event.message, "cooling");
        assert!(!event.is_error());

        let event = WatchEvent::new(WatchEventKind::Error { error: ReviewError::network("down") }, "failed");
        assert_eq!(event.name(), "error");
        assert!(event.is_error());
    }
}
