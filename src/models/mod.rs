//! Data models for the review engine.
//!
//! These models represent the remote conversation (comments, CI checks),
//! the agent's output and the in-memory review session. All of them derive
//! Serialize so a presentation layer can consume them directly.

pub mod agent_event;
pub mod ci;
pub mod comment;
pub mod conversation;
pub mod review;
pub mod thought;

// Re-exports for convenient access
pub use agent_event::{AssistantMessage, ContentBlock, RawEvent, StreamError};
pub use ci::{truncate_output, CiAnnotation, CiFailure, CiStatus, MAX_OUTPUT_CHARS};
pub use comment::Comment;
pub use conversation::{ConversationId, ConversationMetadata};
pub use review::{ReviewSession, ReviewStatus};
pub use thought::{Thought, ThoughtKind};
