//! Business logic services.
//!
//! This module contains the review engine proper (orchestrator, thought
//! filter, satisfaction detector, watch loop) and the adapters it drives:
//! the GitHub client, the Claude CLI runner and local git helpers.
//!
//! The engine only depends on the traits in [`traits`], so every service
//! can be tested against in-memory fakes.

pub mod agent_runner;
pub mod comment_parser;
pub mod credentials;
pub mod git;
pub mod github_client;
pub mod heuristics;
pub mod prompt;
pub mod review_service;
pub mod satisfaction;
pub mod thought_filter;
pub mod traits;
pub mod watch_engine;
pub mod watch_events;

pub use agent_runner::{AgentConfig, ClaudeCli};
pub use credentials::CredentialService;
pub use github_client::{GitHubClient, GitHubConfig};
pub use prompt::PromptBuilder;
pub use review_service::{ReviewConfig, ReviewRun, ReviewService, ReviewStream};
pub use satisfaction::{SatisfactionDetector, SatisfactionVerdict};
pub use thought_filter::ThoughtRules;
pub use traits::{AgentRunner, CiProvider, ConversationSource};
pub use watch_engine::{WatchEngine, WatchOptions, WatchState};
pub use watch_events::{ProcessingTrigger, WatchEvent, WatchEventKind};
