//! Review Watch - continuous review engine for pull requests.
//!
//! Polls a pull request for reviewer comments and CI failures, hands them to
//! an AI coding agent, streams the agent's reasoning back as filtered
//! thoughts and decides when the reviewer is satisfied.
//!
//! The crate is a library; a TUI or script embeds it through
//! [`ReviewService`] (one cycle) and [`WatchEngine`] (repeated cycles).

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

pub use config::Settings;
pub use error::ReviewError;
pub use models::{Comment, ConversationId, ReviewSession, ReviewStatus, Thought, ThoughtKind};
pub use services::{
    ReviewConfig, ReviewService, SatisfactionVerdict, WatchEngine, WatchEvent, WatchEventKind,
    WatchOptions, WatchState,
};
pub use store::CommentStore;
