//! Review orchestrator.
//!
//! Fetches a conversation snapshot, reconciles it with the comment store,
//! and drives one agent run end-to-end. The returned thought stream is
//! wrapped so that the session is updated as thoughts pass through and the
//! handled comments are marked processed once the stream closes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::prompt::PromptBuilder;
use super::satisfaction::{SatisfactionDetector, SatisfactionVerdict};
use super::thought_filter::{
    spawn_filter, FilteredStream, StreamOutcome, ThoughtRules, THOUGHT_CHANNEL_CAPACITY,
};
use super::traits::{AgentRunner, CiProvider, ConversationSource};
use crate::error::ReviewError;
use crate::models::{Comment, ConversationId, ReviewSession, ReviewStatus, Thought};
use crate::store::{CommentStore, ConversationState};

/// Options for one review cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewConfig {
    pub conversation: ConversationId,
    pub include_nits: bool,
    pub include_outdated: bool,
    /// Clear stored dedup state before fetching.
    pub reset_state: bool,
    /// Resolve handled threads on the remote once the run completes.
    pub mark_addressed: bool,
}

impl ReviewConfig {
    pub fn new(conversation: ConversationId) -> Self {
        Self {
            conversation,
            include_nits: true,
            include_outdated: true,
            reset_state: false,
            mark_addressed: false,
        }
    }
}

/// Resolves to the final session once a run's thought stream has closed and
/// its comments have been recorded.
#[derive(Debug)]
pub struct ReviewCompletion(JoinHandle<ReviewSession>);

impl ReviewCompletion {
    pub async fn wait(self) -> Result<ReviewSession, ReviewError> {
        self.0
            .await
            .map_err(|e| ReviewError::internal(format!("Review task failed: {}", e)))
    }
}

/// Live output of an agent run.
///
/// Dropping `thoughts` does not stop the run; the remaining thoughts are
/// still recorded on the session.
#[derive(Debug)]
pub struct ReviewStream {
    pub thoughts: mpsc::Receiver<Thought>,
    pub completion: ReviewCompletion,
}

/// Result of [`ReviewService::run_review_cycle`].
#[derive(Debug)]
pub struct ReviewRun {
    /// Session as of the moment the run started (or finished, on the fast path).
    pub session: ReviewSession,
    /// `None` when nothing needed doing and the agent was not invoked.
    pub stream: Option<ReviewStream>,
}

impl ReviewRun {
    pub fn is_satisfied(&self) -> bool {
        self.session.status == ReviewStatus::Satisfied
    }
}

/// Orchestrates review cycles against one set of collaborators.
pub struct ReviewService {
    source: Arc<dyn ConversationSource>,
    ci: Arc<dyn CiProvider>,
    agent: Arc<dyn AgentRunner>,
    store: Arc<CommentStore>,
    prompt: PromptBuilder,
    thought_rules: Arc<ThoughtRules>,
    detector: SatisfactionDetector,
}

impl ReviewService {
    pub fn new(
        source: Arc<dyn ConversationSource>,
        ci: Arc<dyn CiProvider>,
        agent: Arc<dyn AgentRunner>,
        store: Arc<CommentStore>,
    ) -> Self {
        Self {
            source,
            ci,
            agent,
            store,
            prompt: PromptBuilder::new(),
            thought_rules: Arc::new(ThoughtRules::default()),
            detector: SatisfactionDetector::default(),
        }
    }

    pub fn with_thought_rules(mut self, rules: ThoughtRules) -> Self {
        self.thought_rules = Arc::new(rules);
        self
    }

    pub fn with_detector(mut self, detector: SatisfactionDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn store(&self) -> &Arc<CommentStore> {
        &self.store
    }

    /// Fails with `AgentUnavailable` if the agent cannot be started.
    pub fn ensure_agent_available(&self) -> Result<(), ReviewError> {
        if self.agent.is_available() {
            Ok(())
        } else {
            Err(ReviewError::agent_unavailable(self.agent.name()))
        }
    }

    /// Clear stored dedup state. Failures are logged.
    pub async fn reset_state(&self, conversation: &ConversationId) {
        if let Err(e) = self.store.reset(&conversation.key()).await {
            log::warn!("[review] Failed to reset state for {}: {}", conversation, e);
        }
    }

    /// Config filter: drop resolved comments always, nits and outdated
    /// comments when excluded.
    pub fn filter_comments(&self, comments: Vec<Comment>, config: &ReviewConfig) -> Vec<Comment> {
        comments
            .into_iter()
            .filter(|c| !c.is_resolved)
            .filter(|c| config.include_nits || !c.is_nit)
            .filter(|c| config.include_outdated || !c.is_outdated)
            .collect()
    }

    /// Read-only snapshot: everything up to the satisfied check, never
    /// invoking the agent. A clear snapshot has status `Satisfied`.
    pub async fn fetch_snapshot(&self, config: &ReviewConfig) -> Result<ReviewSession, ReviewError> {
        let conversation = &config.conversation;
        let key = conversation.key();

        if config.reset_state {
            self.reset_state(conversation).await;
        }

        let state = match self.store.load(&key).await {
            Ok(state) => state,
            Err(e) => {
                log::warn!("[review] Failed to load state for {}, continuing without: {}", key, e);
                ConversationState::default()
            }
        };

        let mut session = ReviewSession::new(conversation.clone());
        session.begin_fetch();

        session.metadata = self.source.get_metadata(conversation).await?;

        let comments = match self.source.list_comments(conversation).await {
            Ok(comments) => comments,
            Err(e) if e.is_no_comments() => Vec::new(),
            Err(e) => return Err(e),
        };

        let filtered = self.filter_comments(comments, config);
        let edited = filtered
            .iter()
            .filter(|c| state.is_processed(c) && state.has_changed(c))
            .count();
        if edited > 0 {
            log::info!(
                "[review] {} already-processed comments on {} were edited upstream",
                edited,
                key
            );
        }

        let unprocessed = state.filter_unprocessed(&filtered);
        session.total_found_count = filtered.len();
        session.new_comments_count = unprocessed.len();
        session.remaining_count = unprocessed.len();
        session.already_addressed = filtered.len() - unprocessed.len();
        session.comments = unprocessed;

        let head = session.metadata.head_commit.clone();
        match self.ci.get_ci_status(conversation, &head).await {
            Ok(ci) => {
                session.ci_all_complete = ci.all_complete();
                session.ci_pending_count = ci.pending_count;
                session.ci_pending_names = ci.pending_names;
                session.ci_passed_count = ci.passed_count;
                session.ci_total_count = ci.total_count;
                session.reviewer_found = ci.reviewer_found;
                session.reviewer_completed = ci.reviewer_completed;
                session.ci_failures = ci.failures;
            }
            Err(e) => log::warn!("[review] CI status unavailable for {}: {}", key, e),
        }

        log::debug!(
            "[review] Snapshot {}: {} found, {} new, {} CI failures, {} pending",
            key,
            session.total_found_count,
            session.new_comments_count,
            session.ci_failures.len(),
            session.ci_pending_count
        );

        if session.is_clear() {
            session.mark_satisfied();
        }
        Ok(session)
    }

    /// Run one full review cycle.
    ///
    /// Returns immediately with a satisfied session and no stream when there
    /// is nothing to do. Otherwise the agent is started and the returned
    /// stream yields its thoughts in emission order. Comments are marked
    /// processed only after the stream has closed, and never for a cycle
    /// that was cancelled or whose agent run failed. Such cycles end with
    /// status `Failed` and the error on the session.
    pub async fn run_review_cycle(
        &self,
        config: &ReviewConfig,
        cancel: CancellationToken,
    ) -> Result<ReviewRun, ReviewError> {
        let mut session = self.fetch_snapshot(config).await?;
        if session.status == ReviewStatus::Satisfied {
            log::info!("[review] Nothing to address on {}", config.conversation);
            return Ok(ReviewRun { session, stream: None });
        }

        if let Err(e) = self.ensure_agent_available() {
            session.mark_failed(e.to_string());
            return Err(e);
        }

        let prompt = self.prompt.build_for_session(&session);
        let raw = match self.agent.stream_run(&prompt, cancel.clone()).await {
            Ok(raw) => raw,
            Err(e) => {
                session.mark_failed(e.to_string());
                return Err(e);
            }
        };
        session.begin_review();

        log::info!(
            "[review] Started {} on {} ({} comments, {} CI failures)",
            self.agent.name(),
            config.conversation,
            session.comments.len(),
            session.ci_failures.len()
        );

        let filtered = spawn_filter(raw, Arc::clone(&self.thought_rules));
        let (tx, rx) = mpsc::channel(THOUGHT_CHANNEL_CAPACITY);
        let completion = tokio::spawn(track_run(
            session.clone(),
            filtered,
            tx,
            Arc::clone(&self.store),
            Arc::clone(&self.source),
            config.mark_addressed,
            cancel,
        ));

        Ok(ReviewRun {
            session,
            stream: Some(ReviewStream {
                thoughts: rx,
                completion: ReviewCompletion(completion),
            }),
        })
    }

    /// Combined verdict from `thoughts` (if an agent run happened) and the
    /// freshly fetched comment set.
    ///
    /// "No comments" counts as an empty set. Any other fetch failure leaves
    /// only the thought verdict.
    pub async fn check_satisfaction(
        &self,
        conversation: &ConversationId,
        thoughts: Option<&[Thought]>,
    ) -> SatisfactionVerdict {
        let comments = match self.source.list_comments(conversation).await {
            Ok(comments) => comments,
            Err(e) if e.is_no_comments() => Vec::new(),
            Err(e) => {
                log::warn!("[review] Satisfaction check without remote state: {}", e);
                return self.detector.evaluate_thoughts(thoughts.unwrap_or_default());
            }
        };
        self.detector.evaluate(thoughts, &comments)
    }
}

/// Forward thoughts while recording them, then finish the session.
async fn track_run(
    mut session: ReviewSession,
    filtered: FilteredStream,
    tx: mpsc::Sender<Thought>,
    store: Arc<CommentStore>,
    source: Arc<dyn ConversationSource>,
    mark_addressed: bool,
    cancel: CancellationToken,
) -> ReviewSession {
    let key = session.conversation.key();
    let FilteredStream {
        mut thoughts,
        outcome,
    } = filtered;
    let mut forwarding = true;

    while let Some(thought) = thoughts.recv().await {
        session.record_thought(thought.clone());
        if forwarding && tx.send(thought).await.is_err() {
            log::debug!("[review] Thought consumer dropped for {}, still draining", key);
            forwarding = false;
        }
    }
    drop(tx);

    if cancel.is_cancelled() {
        log::info!("[review] Cycle on {} cancelled, nothing marked processed", key);
        session.mark_failed("cancelled");
        return session;
    }

    let outcome = outcome
        .await
        .unwrap_or_else(|e| StreamOutcome::Failed(format!("Thought filter failed: {}", e)));
    if let StreamOutcome::Failed(message) = outcome {
        log::warn!("[review] Agent run on {} failed, nothing marked processed: {}", key, message);
        session.mark_failed(message);
        return session;
    }

    session.mark_completed();
    session.remaining_count = 0;

    if let Err(e) = store.mark_processed(&key, &session.comments, None).await {
        log::warn!("[review] Failed to record processed comments for {}: {}", key, e);
    }

    if mark_addressed {
        for comment in session.comments.iter().filter(|c| !c.is_synthetic()) {
            if let Err(e) = source.resolve_comment(&session.conversation, comment).await {
                log::warn!("[review] Failed to resolve comment {}: {}", comment.id, e);
            }
        }
    }

    log::info!(
        "[review] Cycle on {} complete: {} thoughts, {} comments recorded",
        key,
        session.processed_count,
        session.comments.len()
    );
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::models::{CiStatus, ConversationMetadata, RawEvent};

    struct NoSource;

    #[async_trait]
    impl ConversationSource for NoSource {
        async fn get_metadata(&self, _: &ConversationId) -> Result<ConversationMetadata, ReviewError> {
            Ok(ConversationMetadata::default())
        }
        async fn list_comments(&self, _: &ConversationId) -> Result<Vec<Comment>, ReviewError> {
            Err(ReviewError::NoComments)
        }
        async fn get_latest_commit(&self, _: &ConversationId) -> Result<String, ReviewError> {
            Ok(String::new())
        }
        async fn resolve_comment(&self, _: &ConversationId, _: &Comment) -> Result<(), ReviewError> {
            Ok(())
        }
    }

    struct NoCi;

    #[async_trait]
    impl CiProvider for NoCi {
        async fn get_ci_status(&self, _: &ConversationId, _: &str) -> Result<CiStatus, ReviewError> {
            Err(ReviewError::network("offline"))
        }
    }

    struct MissingAgent;

    #[async_trait]
    impl AgentRunner for MissingAgent {
        fn name(&self) -> &str {
            "missing"
        }
        fn is_available(&self) -> bool {
            false
        }
        async fn stream_run(
            &self,
            _: &str,
            _: CancellationToken,
        ) -> Result<mpsc::Receiver<RawEvent>, ReviewError> {
            Err(ReviewError::agent_unavailable("missing"))
        }
    }

    fn service(dir: &std::path::Path) -> ReviewService {
        ReviewService::new(
            Arc::new(NoSource),
            Arc::new(NoCi),
            Arc::new(MissingAgent),
            Arc::new(CommentStore::new(dir)),
        )
    }

    #[test]
    fn test_filter_comments() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let mut resolved = Comment::new(1, None, None, "a");
        resolved.is_resolved = true;
        let mut nit = Comment::new(2, None, None, "b");
        nit.is_nit = true;
        let mut outdated = Comment::new(3, None, None, "c");
        outdated.is_outdated = true;
        let plain = Comment::new(4, None, None, "d");
        let all = vec![resolved, nit, outdated, plain];

        let mut config = ReviewConfig::new(ConversationId::new("o", "r", 1));
        let ids: Vec<i64> = svc.filter_comments(all.clone(), &config).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);

        config.include_nits = false;
        config.include_outdated = false;
        let ids: Vec<i64> = svc.filter_comments(all, &config).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![4]);
    }

    #[test]
    fn test_missing_agent_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = service(dir.path()).ensure_agent_available().unwrap_err();
        assert!(matches!(err, ReviewError::AgentUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_no_comments_with_ci_unavailable_is_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReviewConfig::new(ConversationId::new("o", "r", 1));

        let run = service(dir.path())
            .run_review_cycle(&config, CancellationToken::new())
            .await
            .unwrap();
        assert!(run.is_satisfied());
        assert!(run.stream.is_none());
        assert_eq!(run.session.total_found_count, 0);
    }
}
