//! Conversation (pull request) identity and metadata.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

/// Identifies one reviewable pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl ConversationId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    /// Comment store key, e.g. `owner/repo#123`.
    pub fn key(&self) -> String {
        format!("{}/{}#{}", self.owner, self.repo, self.number)
    }

    /// Parse `owner/repo#123`.
    pub fn parse(key: &str) -> Result<Self, ReviewError> {
        let invalid = || ReviewError::invalid_input_field(format!("Invalid conversation key: {}", key), "key");

        let (slug, number) = key.rsplit_once('#').ok_or_else(invalid)?;
        let (owner, repo) = slug.split_once('/').ok_or_else(invalid)?;
        let number: u64 = number.parse().map_err(|_| invalid())?;

        if owner.is_empty() || repo.is_empty() || number == 0 {
            return Err(invalid());
        }
        Ok(Self::new(owner, repo, number))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Pull request metadata needed for a review cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub title: String,
    pub author: String,
    pub branch: String,
    pub base_branch: String,
    pub head_commit: String,
    pub base_commit: String,
    #[serde(default)]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let id = ConversationId::new("acme", "widgets", 42);
        assert_eq!(id.key(), "acme/widgets#42");
        assert_eq!(id.to_string(), "acme/widgets#42");
    }

    #[test]
    fn test_parse_key() {
        let id = ConversationId::parse("acme/widgets#42").unwrap();
        assert_eq!(id, ConversationId::new("acme", "widgets", 42));
    }

    #[test]
    fn test_parse_key_rejects_garbage() {
        assert!(ConversationId::parse("acme#1").is_err());
        assert!(ConversationId::parse("acme/widgets").is_err());
        assert!(ConversationId::parse("acme/widgets#abc").is_err());
        assert!(ConversationId::parse("/widgets#1").is_err());
    }
}
