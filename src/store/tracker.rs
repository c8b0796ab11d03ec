//! Per-conversation dedup state and the pure checks over it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::Comment;

/// Path sentinel for comments not attached to a file.
pub const GENERAL_PATH: &str = "GENERAL";

/// SHA-256 (lowercase hex) of `path|line|body`.
///
/// An empty or missing path hashes as [`GENERAL_PATH`]; a missing line as `0`.
pub fn fingerprint(file_path: Option<&str>, line: Option<i64>, body: &str) -> String {
    let path = match file_path {
        Some(p) if !p.is_empty() => p,
        _ => GENERAL_PATH,
    };
    let input = format!("{}|{}|{}", path, line.unwrap_or(0), body);

    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// What the store remembers about a comment it has handled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeenInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub fingerprint: String,
}

/// Dedup state for one conversation key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub processed_comment_ids: BTreeSet<i64>,
    #[serde(default)]
    pub processed_fingerprints: BTreeSet<String>,
    #[serde(default)]
    pub seen_comments: BTreeMap<i64, SeenInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    /// Processed if either the ID or the content fingerprint was recorded.
    ///
    /// ID `0` means "no native ID" and is only matched by fingerprint.
    pub fn is_processed(&self, comment: &Comment) -> bool {
        if comment.id != 0 && self.processed_comment_ids.contains(&comment.id) {
            return true;
        }
        self.processed_fingerprints.contains(&comment.fingerprint())
    }

    /// Never seen, or edited since it was recorded.
    ///
    /// ID-less comments have no stable slot, so they count as unchanged only
    /// when their exact content was recorded.
    pub fn has_changed(&self, comment: &Comment) -> bool {
        if comment.id == 0 {
            return !self.processed_fingerprints.contains(&comment.fingerprint());
        }
        let Some(seen) = self.seen_comments.get(&comment.id) else {
            return true;
        };
        if comment.updated_at.is_some() && seen.updated_at != comment.updated_at {
            return true;
        }
        seen.fingerprint != comment.fingerprint()
    }

    /// Comments not yet processed, order preserved.
    pub fn filter_unprocessed(&self, comments: &[Comment]) -> Vec<Comment> {
        comments
            .iter()
            .filter(|c| !self.is_processed(c))
            .cloned()
            .collect()
    }

    /// Merge comments into the processed sets. Set semantics, so repeating a
    /// batch is a no-op.
    pub fn record(&mut self, comments: &[Comment], review_at: Option<DateTime<Utc>>) {
        for comment in comments {
            let fp = comment.fingerprint();
            if comment.id != 0 {
                self.processed_comment_ids.insert(comment.id);
                self.seen_comments.insert(
                    comment.id,
                    SeenInfo {
                        updated_at: comment.updated_at,
                        fingerprint: fp.clone(),
                    },
                );
            }
            self.processed_fingerprints.insert(fp);
        }

        if review_at.is_some() {
            self.last_review_at = review_at;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.processed_comment_ids.is_empty() && self.processed_fingerprints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint(Some("src/main.rs"), Some(10), "use a constant");
        let b = fingerprint(Some("src/main.rs"), Some(10), "use a constant");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_changes_with_body() {
        let a = fingerprint(Some("src/main.rs"), Some(10), "use a constant");
        let b = fingerprint(Some("src/main.rs"), Some(10), "use a constant!");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_general_sentinel() {
        assert_eq!(
            fingerprint(None, None, "x"),
            fingerprint(Some(""), Some(0), "x")
        );
        assert_eq!(
            fingerprint(None, Some(3), "x"),
            fingerprint(Some(GENERAL_PATH), Some(3), "x")
        );
    }

    #[test]
    fn test_fingerprint_known_value() {
        // sha256("GENERAL|0|") computed independently
        let expected = {
            let digest = Sha256::digest(b"GENERAL|0|");
            digest.iter().map(|b| format!("{:02x}", b)).collect::<String>()
        };
        assert_eq!(fingerprint(None, None, ""), expected);
    }

    #[test]
    fn test_is_processed_by_id_or_fingerprint() {
        let mut state = ConversationState::default();
        let original = Comment::new(-11, Some("a.rs"), Some(4), "nit: spacing");
        state.record(&[original.clone()], None);

        assert!(state.is_processed(&original));

        // Same content, regenerated synthetic ID
        let regenerated = Comment::new(-99, Some("a.rs"), Some(4), "nit: spacing");
        assert!(state.is_processed(&regenerated));

        // Same ID, edited body
        let edited = Comment::new(-11, Some("a.rs"), Some(4), "nit: spacing please");
        assert!(state.is_processed(&edited));

        let unrelated = Comment::new(5, Some("b.rs"), Some(1), "other");
        assert!(!state.is_processed(&unrelated));
    }

    #[test]
    fn test_zero_id_matches_only_by_fingerprint() {
        let mut state = ConversationState::default();
        state.record(&[Comment::new(0, None, None, "first")], None);
        assert!(state.processed_comment_ids.is_empty());
        assert!(!state.is_processed(&Comment::new(0, None, None, "second")));
        assert!(state.is_processed(&Comment::new(0, None, None, "first")));
    }

    #[test]
    fn test_zero_id_comments_do_not_share_a_seen_slot() {
        let first = Comment::new(0, Some("a.rs"), Some(3), "rename this");
        let second = Comment::new(0, None, None, "add a changelog entry");

        let mut state = ConversationState::default();
        state.record(&[first.clone(), second.clone()], None);

        assert!(state.seen_comments.is_empty());
        assert!(!state.has_changed(&first));
        assert!(!state.has_changed(&second));
        assert!(state.has_changed(&Comment::new(0, None, None, "something new")));
    }

    #[test]
    fn test_record_is_idempotent() {
        let comments = vec![
            Comment::new(1, Some("a.rs"), Some(1), "one"),
            Comment::new(2, None, None, "two"),
        ];
        let mut once = ConversationState::default();
        once.record(&comments, None);

        let mut twice = ConversationState::default();
        twice.record(&comments, None);
        twice.record(&comments, None);

        assert_eq!(once, twice);
        assert_eq!(twice.processed_comment_ids.len(), 2);
        assert_eq!(twice.processed_fingerprints.len(), 2);
    }

    #[test]
    fn test_record_review_timestamp_optional() {
        let mut state = ConversationState::default();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        state.record(&[], Some(ts));
        state.record(&[], None);
        assert_eq!(state.last_review_at, Some(ts));
    }

    #[test]
    fn test_has_changed() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut comment = Comment::new(1, Some("a.rs"), Some(1), "body");
        comment.updated_at = Some(ts);

        let mut state = ConversationState::default();
        assert!(state.has_changed(&comment));

        state.record(&[comment.clone()], None);
        assert!(!state.has_changed(&comment));

        let mut bumped = comment.clone();
        bumped.updated_at = Some(ts + chrono::Duration::minutes(5));
        assert!(state.has_changed(&bumped));

        let mut edited = comment.clone();
        edited.body = "new body".to_string();
        assert!(state.has_changed(&edited));

        // Changed but still processed: has_changed never forces reprocessing
        assert!(state.is_processed(&edited));
    }

    #[test]
    fn test_filter_unprocessed_preserves_order() {
        let mut state = ConversationState::default();
        let c1 = Comment::new(1, None, None, "one");
        let c2 = Comment::new(2, None, None, "two");
        let c3 = Comment::new(3, None, None, "three");
        state.record(&[c2.clone()], None);

        let remaining = state.filter_unprocessed(&[c3.clone(), c2, c1.clone()]);
        assert_eq!(remaining, vec![c3, c1]);
    }

    #[test]
    fn test_state_json_roundtrip_keeps_integer_keys() {
        let mut state = ConversationState::default();
        state.record(&[Comment::new(-3, None, None, "x")], None);
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
