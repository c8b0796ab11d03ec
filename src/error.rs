//! Engine error types.
//!
//! These errors are serializable so an embedding UI can render them as
//! structured, dismissible events.

use serde::Serialize;
use thiserror::Error;

/// Errors produced by the review engine and its collaborators.
///
/// All variants serialize to a structured JSON object for presentation layers.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum ReviewError {
    /// GitHub API request failed.
    #[error("GitHub API error: {message}")]
    GitHubApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// The API refused the request because of rate limiting.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Unix timestamp at which the limit resets, when the server says so.
        #[serde(skip_serializing_if = "Option::is_none")]
        reset_at: Option<i64>,
    },

    /// Authentication failed or credentials invalid.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Network request failed.
    #[error("Network error: {message}")]
    Network { message: String },

    /// A remote response or agent line could not be parsed.
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// The conversation has no reviewer comments. Callers treat this as empty.
    #[error("No review comments found")]
    NoComments,

    /// The agent binary is not installed or not on PATH.
    #[error("Agent unavailable: {binary} not found on PATH")]
    AgentUnavailable { binary: String },

    /// The agent process failed to start or run.
    #[error("Agent error: {message}")]
    Agent { message: String },

    /// Credential storage operation failed.
    #[error("Credential storage error: {message}")]
    CredentialStorage { message: String },

    /// Comment store I/O failed.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Internal engine error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ReviewError {
    /// Create a GitHub API error.
    pub fn github_api(message: impl Into<String>) -> Self {
        Self::GitHubApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a GitHub API error with status code and endpoint.
    pub fn github_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::GitHubApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a rate limit error.
    pub fn rate_limited(message: impl Into<String>, reset_at: Option<i64>) -> Self {
        Self::RateLimited {
            message: message.into(),
            reset_at,
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            context: None,
        }
    }

    /// Create a parse error with context (endpoint, offending line).
    pub fn parse_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an agent-unavailable error.
    pub fn agent_unavailable(binary: impl Into<String>) -> Self {
        Self::AgentUnavailable {
            binary: binary.into(),
        }
    }

    /// Create an agent runtime error.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
        }
    }

    /// Create a credential storage error.
    pub fn credential_storage(message: impl Into<String>) -> Self {
        Self::CredentialStorage {
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            path: None,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Authentication { .. } | Self::Network { .. }
        )
    }

    /// Check if this is the "nothing to review" condition.
    pub fn is_no_comments(&self) -> bool {
        matches!(self, Self::NoComments)
    }
}

// Conversions from common error types

impl From<reqwest::Error> for ReviewError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else if err.is_decode() {
            Self::parse(format!("Invalid response body: {}", err))
        } else if err.is_status() {
            Self::github_api(format!("HTTP error: {}", err))
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ReviewError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(format!("JSON error: {}", err))
    }
}

impl From<crate::store::StoreError> for ReviewError {
    fn from(err: crate::store::StoreError) -> Self {
        let path = err.path().map(|p| p.display().to_string());
        Self::Storage {
            message: err.to_string(),
            path,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReviewError>;
