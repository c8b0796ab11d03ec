//! Comment store: durable per-conversation dedup state.
//!
//! One JSON document per conversation key under a state directory. The
//! documents are human-readable and safe to delete to force a full
//! reprocess. All load/save calls go through one async mutex, so a
//! `mark_processed` read-modify-write is atomic within the process.

pub mod tracker;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::Comment;

pub use tracker::{fingerprint, ConversationState, SeenInfo, GENERAL_PATH};

/// Store-related errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not determine a per-user data directory")]
    NoDataDir,
}

impl StoreError {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Io { path, .. } | Self::Corrupt { path, .. } => Some(path),
            Self::NoDataDir => None,
        }
    }
}

/// File-backed comment store.
#[derive(Debug)]
pub struct CommentStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl CommentStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store under the per-user state directory.
    pub fn open_default() -> Result<Self, StoreError> {
        let root = crate::config::default_state_dir().ok_or(StoreError::NoDataDir)?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the state for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", urlencoding::encode(key)))
    }

    /// Load state for `key`. A missing file yields an empty state.
    pub async fn load(&self, key: &str) -> Result<ConversationState, StoreError> {
        let _guard = self.lock.lock().await;
        self.read(key).await
    }

    /// Persist state for `key`, creating the state directory if needed.
    pub async fn save(&self, key: &str, state: &ConversationState) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.write(key, state).await
    }

    /// Merge `comments` into the processed sets for `key` and persist.
    ///
    /// An unreadable existing document is replaced rather than blocking
    /// progress. Returns the merged state.
    pub async fn mark_processed(
        &self,
        key: &str,
        comments: &[Comment],
        review_at: Option<DateTime<Utc>>,
    ) -> Result<ConversationState, StoreError> {
        let _guard = self.lock.lock().await;

        let mut state = match self.read(key).await {
            Ok(state) => state,
            Err(e) => {
                log::warn!("[store] Discarding unreadable state for {}: {}", key, e);
                ConversationState::default()
            }
        };

        state.record(comments, review_at);
        self.write(key, &state).await?;

        log::debug!(
            "[store] Marked {} comments processed for {} ({} total)",
            comments.len(),
            key,
            state.processed_fingerprints.len()
        );
        Ok(state)
    }

    /// Delete the entry for `key`. Missing entries are not an error.
    pub async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(key);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::info!("[store] Reset state for {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    async fn read(&self, key: &str) -> Result<ConversationState, StoreError> {
        let path = self.path_for(key);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConversationState::default())
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt { path, source })
    }

    async fn write(&self, key: &str, state: &ConversationState) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;

        let path = self.path_for(key);
        let content = serde_json::to_vec_pretty(state).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;

        // Write then rename so a crash never leaves a half-written document.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &content)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_path_for_encodes_key() {
        let store = CommentStore::new("/tmp/state");
        let path = store.path_for("acme/widgets#42");
        assert_eq!(
            path,
            PathBuf::from("/tmp/state/acme%2Fwidgets%2342.json")
        );
    }

    #[tokio::test]
    async fn test_load_missing_is_empty() {
        let dir = tempdir().unwrap();
        let store = CommentStore::new(dir.path().join("nested"));
        let state = store.load("o/r#1").await.unwrap();
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_save_creates_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("a").join("b");
        let store = CommentStore::new(&root);

        let mut state = ConversationState::default();
        state.record(&[Comment::new(1, None, None, "x")], None);
        store.save("o/r#1", &state).await.unwrap();

        assert!(root.exists());
        assert_eq!(store.load("o/r#1").await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let store = CommentStore::new(dir.path());
        std::fs::write(store.path_for("o/r#1"), b"{not json").unwrap();

        let err = store.load("o/r#1").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(err.path().is_some());
    }

    #[tokio::test]
    async fn test_mark_processed_replaces_corrupt_file() {
        let dir = tempdir().unwrap();
        let store = CommentStore::new(dir.path());
        std::fs::write(store.path_for("o/r#1"), b"garbage").unwrap();

        let state = store
            .mark_processed("o/r#1", &[Comment::new(5, None, None, "x")], None)
            .await
            .unwrap();
        assert!(state.processed_comment_ids.contains(&5));
        assert_eq!(store.load("o/r#1").await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_reset_missing_is_ok() {
        let dir = tempdir().unwrap();
        let store = CommentStore::new(dir.path());
        store.reset("o/r#404").await.unwrap();
    }
}
