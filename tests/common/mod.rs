//! In-memory fakes of the collaborator traits, shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use review_watch::error::ReviewError;
use review_watch::models::{CiStatus, Comment, ConversationId, ConversationMetadata, RawEvent};
use review_watch::services::{AgentRunner, CiProvider, ConversationSource, ReviewService};
use review_watch::store::CommentStore;

pub fn conversation() -> ConversationId {
    ConversationId::new("acme", "widgets", 7)
}

pub fn inline(id: i64, path: &str, line: i64, body: &str) -> Comment {
    Comment::new(id, Some(path), Some(line), body)
}

pub fn general(id: i64, body: &str) -> Comment {
    Comment::new(id, None, None, body)
}

pub fn nit(id: i64, path: &str, body: &str) -> Comment {
    let mut comment = Comment::new(id, Some(path), Some(1), body);
    comment.is_nit = true;
    comment
}

/// Conversation source backed by a mutable comment list.
pub struct FakeSource {
    metadata: Mutex<ConversationMetadata>,
    comments: Mutex<Vec<Comment>>,
    fail_listing: Mutex<bool>,
    resolved: Mutex<Vec<i64>>,
    list_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(comments: Vec<Comment>) -> Self {
        Self {
            metadata: Mutex::new(ConversationMetadata {
                title: "Add widget cache".to_string(),
                author: "octocat".to_string(),
                branch: "feature/cache".to_string(),
                base_branch: "main".to_string(),
                head_commit: "abc123".to_string(),
                base_commit: "def456".to_string(),
                url: "https://github.com/acme/widgets/pull/7".to_string(),
            }),
            comments: Mutex::new(comments),
            fail_listing: Mutex::new(false),
            resolved: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_comments(&self, comments: Vec<Comment>) {
        *self.comments.lock().unwrap() = comments;
    }

    pub fn set_head(&self, sha: &str) {
        self.metadata.lock().unwrap().head_commit = sha.to_string();
    }

    pub fn fail_listing(&self, fail: bool) {
        *self.fail_listing.lock().unwrap() = fail;
    }

    pub fn resolved(&self) -> Vec<i64> {
        self.resolved.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationSource for FakeSource {
    async fn get_metadata(&self, _: &ConversationId) -> Result<ConversationMetadata, ReviewError> {
        Ok(self.metadata.lock().unwrap().clone())
    }

    async fn list_comments(&self, _: &ConversationId) -> Result<Vec<Comment>, ReviewError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_listing.lock().unwrap() {
            return Err(ReviewError::network("connection reset"));
        }
        let comments = self.comments.lock().unwrap().clone();
        if comments.is_empty() {
            return Err(ReviewError::NoComments);
        }
        Ok(comments)
    }

    async fn get_latest_commit(&self, _: &ConversationId) -> Result<String, ReviewError> {
        Ok(self.metadata.lock().unwrap().head_commit.clone())
    }

    async fn resolve_comment(&self, _: &ConversationId, comment: &Comment) -> Result<(), ReviewError> {
        self.resolved.lock().unwrap().push(comment.id);
        Ok(())
    }
}

/// CI provider returning a fixed status, or failing when unset.
pub struct FakeCi {
    status: Mutex<Option<CiStatus>>,
}

impl FakeCi {
    /// All checks green, reviewer check present and complete.
    pub fn green() -> Self {
        Self {
            status: Mutex::new(Some(CiStatus {
                passed_count: 2,
                total_count: 2,
                reviewer_found: true,
                reviewer_completed: true,
                ..Default::default()
            })),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            status: Mutex::new(None),
        }
    }

    pub fn set_status(&self, status: Option<CiStatus>) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl CiProvider for FakeCi {
    async fn get_ci_status(&self, _: &ConversationId, _: &str) -> Result<CiStatus, ReviewError> {
        self.status
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ReviewError::network("checks unavailable"))
    }
}

/// Agent that replays a script of raw events.
///
/// With a gate, the stream stays open after the script until
/// [`FakeAgent::release`] is called or the run is cancelled.
pub struct FakeAgent {
    available: bool,
    script: Vec<RawEvent>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeAgent {
    pub fn new(script: Vec<RawEvent>) -> Self {
        Self {
            available: true,
            script,
            gate: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn gated(script: Vec<RawEvent>) -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::new(script)
        }
    }

    pub fn missing() -> Self {
        Self {
            available: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRunner for FakeAgent {
    fn name(&self) -> &str {
        "fake-agent"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn stream_run(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawEvent>, ReviewError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let (tx, rx) = mpsc::channel(16);
        let script = self.script.clone();
        let gate = self.gate.clone();
        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if let Some(gate) = gate {
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = cancel.cancelled() => {}
                }
            }
        });
        Ok(rx)
    }
}

/// The three fakes plus a service wired to them.
pub struct Harness {
    pub source: Arc<FakeSource>,
    pub ci: Arc<FakeCi>,
    pub agent: Arc<FakeAgent>,
    pub service: Arc<ReviewService>,
}

impl Harness {
    pub fn new(dir: &Path, source: FakeSource, ci: FakeCi, agent: FakeAgent) -> Self {
        let source = Arc::new(source);
        let ci = Arc::new(ci);
        let agent = Arc::new(agent);
        let store = Arc::new(CommentStore::new(dir));
        let service = Arc::new(ReviewService::new(
            source.clone(),
            ci.clone(),
            agent.clone(),
            store,
        ));
        Self {
            source,
            ci,
            agent,
            service,
        }
    }

    pub fn store(&self) -> &CommentStore {
        self.service.store()
    }
}

/// Script of a short agent run that ends with a result event.
pub fn agent_script(lines: &[&str]) -> Vec<RawEvent> {
    let mut events = vec![RawEvent::System {
        subtype: Some("init".to_string()),
    }];
    events.extend(lines.iter().map(|l| RawEvent::assistant_text(format!("{}\n", l))));
    events.push(RawEvent::result("Done."));
    events
}
