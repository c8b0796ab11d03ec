//! Local repository detection through the `git` binary.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use crate::error::ReviewError;

static GITHUB_REMOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"github\.com[:/]([^/\s]+)/([^/\s]+?)(?:\.git)?/?$").unwrap()
});

/// Owner and repository name of a GitHub remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

/// Parse `https://github.com/o/r(.git)` or `git@github.com:o/r(.git)`.
pub fn parse_remote_url(url: &str) -> Option<RepoSlug> {
    let caps = GITHUB_REMOTE.captures(url.trim())?;
    Some(RepoSlug {
        owner: caps.get(1)?.as_str().to_string(),
        repo: caps.get(2)?.as_str().to_string(),
    })
}

async fn git(dir: &Path, args: &[&str]) -> Result<String, ReviewError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| ReviewError::internal(format!("Failed to run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ReviewError::invalid_input(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Repository slug from `remote.origin.url` of the checkout at `dir`.
pub async fn detect_repository(dir: &Path) -> Result<RepoSlug, ReviewError> {
    let url = git(dir, &["config", "--get", "remote.origin.url"]).await?;
    parse_remote_url(&url).ok_or_else(|| {
        ReviewError::invalid_input_field(format!("Not a GitHub remote: {}", url), "remote.origin.url")
    })
}

/// Checked-out branch name; fails on a detached HEAD.
pub async fn current_branch(dir: &Path) -> Result<String, ReviewError> {
    let branch = git(dir, &["branch", "--show-current"]).await?;
    if branch.is_empty() {
        return Err(ReviewError::invalid_input("HEAD is detached"));
    }
    Ok(branch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug(owner: &str, repo: &str) -> Option<RepoSlug> {
        Some(RepoSlug {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    #[test]
    fn test_parse_https_remote() {
        assert_eq!(parse_remote_url("https://github.com/acme/widgets.git"), slug("acme", "widgets"));
        assert_eq!(parse_remote_url("https://github.com/acme/widgets"), slug("acme", "widgets"));
    }

    #[test]
    fn test_parse_ssh_remote() {
        assert_eq!(parse_remote_url("git@github.com:acme/widgets.git\n"), slug("acme", "widgets"));
    }

    #[test]
    fn test_parse_dotted_repo_name() {
        assert_eq!(parse_remote_url("git@github.com:acme/widgets.rs.git"), slug("acme", "widgets.rs"));
    }

    #[test]
    fn test_non_github_remote() {
        assert_eq!(parse_remote_url("https://gitlab.com/acme/widgets.git"), None);
    }

    #[tokio::test]
    async fn test_detect_outside_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect_repository(dir.path()).await.is_err());
    }
}
