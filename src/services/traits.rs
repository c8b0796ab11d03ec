//! Collaborator seams for the review engine.
//!
//! The orchestrator only talks to the outside world through these traits:
//! the GitHub client implements [`ConversationSource`] and [`CiProvider`],
//! the Claude CLI wrapper implements [`AgentRunner`], and tests substitute
//! in-memory fakes.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ReviewError;
use crate::models::{CiStatus, Comment, ConversationId, ConversationMetadata, RawEvent};

/// Where review comments come from.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    async fn get_metadata(&self, id: &ConversationId) -> Result<ConversationMetadata, ReviewError>;

    /// All reviewer comments. Fails with [`ReviewError::NoComments`] when the
    /// reviewer has said nothing yet.
    async fn list_comments(&self, id: &ConversationId) -> Result<Vec<Comment>, ReviewError>;

    /// Head commit SHA.
    async fn get_latest_commit(&self, id: &ConversationId) -> Result<String, ReviewError>;

    /// Resolve the thread holding `comment`.
    async fn resolve_comment(&self, id: &ConversationId, comment: &Comment) -> Result<(), ReviewError>;
}

/// Check-run status for a commit.
#[async_trait]
pub trait CiProvider: Send + Sync {
    async fn get_ci_status(&self, id: &ConversationId, commit_sha: &str) -> Result<CiStatus, ReviewError>;
}

/// An AI agent that can be driven with a prompt.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Binary or backend name, for error messages.
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    /// Start a run. Events arrive in emission order; the channel closes when
    /// the agent exits or `cancel` fires.
    async fn stream_run(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawEvent>, ReviewError>;
}
