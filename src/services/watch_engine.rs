//! Watch loop: repeated review cycles for one conversation.
//!
//! A background task polls on a fixed interval, optionally waits out a batch
//! window before starting a cycle, and enforces a cooldown after each cycle.
//! Everything a presentation layer needs arrives on the event channel
//! returned by [`WatchEngine::start`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::review_service::{ReviewConfig, ReviewRun, ReviewService, ReviewStream};
use super::watch_events::{
    ProcessingTrigger, WatchEvent, WatchEventKind, WATCH_EVENT_CHANNEL_CAPACITY,
};
use crate::error::ReviewError;
use crate::models::{ConversationId, ReviewSession, ReviewStatus, Thought};

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Default cooldown after a cycle in seconds.
pub const DEFAULT_COOLDOWN_SECS: u64 = 180;

/// Default batch window in seconds.
pub const DEFAULT_BATCH_WAIT_SECS: u64 = 30;

/// Watch loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    pub poll_interval_secs: u64,

    pub cooldown_secs: u64,

    /// Delay before starting a cycle so more remarks can land. Zero disables it.
    pub batch_wait_secs: u64,

    /// Ask a human before treating the conversation as satisfied.
    pub require_manual_confirm: bool,

    pub include_nits: bool,

    pub include_outdated: bool,

    /// Resolve handled threads on the remote after each cycle.
    pub mark_addressed: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            batch_wait_secs: DEFAULT_BATCH_WAIT_SECS,
            require_manual_confirm: true,
            include_nits: true,
            include_outdated: true,
            mark_addressed: false,
        }
    }
}

impl WatchOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn batch_wait(&self) -> Duration {
        Duration::from_secs(self.batch_wait_secs)
    }

    /// Per-cycle config. State reset is handled once by the loop, not per cycle.
    pub fn review_config(&self, conversation: ConversationId) -> ReviewConfig {
        ReviewConfig {
            conversation,
            include_nits: self.include_nits,
            include_outdated: self.include_outdated,
            reset_state: false,
            mark_addressed: self.mark_addressed,
        }
    }
}

/// State of the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Idle,
    Polling,
    BatchWait,
    Processing,
    Cooldown,
    Satisfied,
    Error,
}

impl WatchState {
    /// Exhaustive transition table.
    pub fn can_transition_to(self, next: WatchState) -> bool {
        use WatchState::*;
        match (self, next) {
            (Idle, Polling) => true,
            (Polling, BatchWait) | (Polling, Processing) | (Polling, Satisfied) | (Polling, Error) => {
                true
            }
            (BatchWait, Processing) | (BatchWait, Error) => true,
            (Processing, Cooldown) | (Processing, Error) => true,
            (Cooldown, Polling) => true,
            (Error, Polling) => true,
            (Satisfied, Polling) => true,
            (Idle, _) | (Polling, _) | (BatchWait, _) | (Processing, _) => false,
            (Cooldown, _) | (Satisfied, _) | (Error, _) => false,
        }
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::BatchWait => "batch_wait",
            Self::Processing => "processing",
            Self::Cooldown => "cooldown",
            Self::Satisfied => "satisfied",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Mutable loop state, guarded by the engine's mutex.
#[derive(Debug)]
struct WatchInner {
    state: WatchState,
    last_commit: Option<String>,
    last_comment_count: usize,
    last_ci_failure_count: usize,
    /// CI failures on `last_commit` have been handed to the agent once.
    ci_processed_for_commit: bool,
    cooldown_until: Option<Instant>,
    batch_wait_until: Option<Instant>,
    /// Thoughts of the last completed cycle, for the satisfaction check.
    last_thoughts: Option<Vec<Thought>>,
}

impl WatchInner {
    fn new() -> Self {
        Self {
            state: WatchState::Idle,
            last_commit: None,
            last_comment_count: 0,
            last_ci_failure_count: 0,
            ci_processed_for_commit: false,
            cooldown_until: None,
            batch_wait_until: None,
            last_thoughts: None,
        }
    }

    /// Apply a transition, logging ones outside the table.
    fn transition(&mut self, next: WatchState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            log::warn!("[watch] Unexpected transition {} -> {}", self.state, next);
        } else {
            log::debug!("[watch] {} -> {}", self.state, next);
        }
        self.state = next;
    }
}

/// Watches one conversation until satisfied or cancelled.
pub struct WatchEngine {
    service: Arc<ReviewService>,
    conversation: ConversationId,
    options: WatchOptions,
    inner: Mutex<WatchInner>,
}

impl WatchEngine {
    pub fn new(service: Arc<ReviewService>, conversation: ConversationId, options: WatchOptions) -> Self {
        Self {
            service,
            conversation,
            options,
            inner: Mutex::new(WatchInner::new()),
        }
    }

    pub fn options(&self) -> &WatchOptions {
        &self.options
    }

    pub async fn state(&self) -> WatchState {
        self.inner.lock().await.state
    }

    /// Time left in cooldown; zero outside the cooldown state.
    pub async fn cooldown_remaining(&self) -> Duration {
        let inner = self.inner.lock().await;
        match (inner.state, inner.cooldown_until) {
            (WatchState::Cooldown, Some(until)) => until.saturating_duration_since(Instant::now()),
            _ => Duration::ZERO,
        }
    }

    /// Time left in the batch window; zero outside the batch-wait state.
    pub async fn batch_wait_remaining(&self) -> Duration {
        let inner = self.inner.lock().await;
        match (inner.state, inner.batch_wait_until) {
            (WatchState::BatchWait, Some(until)) => until.saturating_duration_since(Instant::now()),
            _ => Duration::ZERO,
        }
    }

    /// Clear an error. Counters and timers are kept.
    pub async fn dismiss_error(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == WatchState::Error {
            inner.transition(WatchState::Polling);
        }
    }

    /// A human confirmed the conversation is satisfied.
    pub async fn confirm_satisfied(&self) {
        self.inner.lock().await.transition(WatchState::Satisfied);
        log::info!("[watch] Satisfaction confirmed for {}", self.conversation);
    }

    /// A human declined the "appears satisfied" prompt; keep watching.
    pub async fn reject_satisfied(&self) {
        self.inner.lock().await.transition(WatchState::Polling);
        log::info!("[watch] Satisfaction rejected for {}, resuming", self.conversation);
    }

    /// Start the background loop.
    ///
    /// Fails up front if the agent is unavailable. With `reset_state`, stored
    /// dedup state is cleared once before the first poll. The returned
    /// channel ends with a `Cancelled` event after `cancel` fires.
    pub fn start(
        self: &Arc<Self>,
        reset_state: bool,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<WatchEvent>, ReviewError> {
        self.service.ensure_agent_available()?;

        let (tx, rx) = mpsc::channel(WATCH_EVENT_CHANNEL_CAPACITY);
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(tx, reset_state, cancel).await });

        Ok(rx)
    }

    async fn run(self: Arc<Self>, tx: mpsc::Sender<WatchEvent>, reset_state: bool, cancel: CancellationToken) {
        self.inner.lock().await.transition(WatchState::Polling);

        if reset_state {
            self.service.reset_state(&self.conversation).await;
        }

        log::info!(
            "[watch] Watching {} every {}s",
            self.conversation,
            self.options.poll_interval().as_secs()
        );

        let mut interval = time::interval(self.options.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.tick(&tx, &cancel) => {}
                    }
                    if tx.is_closed() {
                        log::info!("[watch] Event consumer dropped, stopping {}", self.conversation);
                        return;
                    }
                }
            }
        }

        emit(&tx, WatchEventKind::Cancelled, "Watch cancelled").await;
        log::info!("[watch] Stopped watching {}", self.conversation);
    }

    /// One poll.
    async fn tick(self: &Arc<Self>, tx: &mpsc::Sender<WatchEvent>, cancel: &CancellationToken) {
        let (state, cooldown_until) = {
            let inner = self.inner.lock().await;
            (inner.state, inner.cooldown_until)
        };

        match state {
            WatchState::Processing => {
                emit(tx, WatchEventKind::Polling, "Review in progress, waiting...").await;
                return;
            }
            WatchState::Satisfied => return,
            WatchState::Cooldown => {
                let remaining = cooldown_until
                    .map(|until| until.saturating_duration_since(Instant::now()))
                    .unwrap_or_default();
                if !remaining.is_zero() {
                    emit(tx, WatchEventKind::Cooldown { remaining }, "In cooldown period").await;
                    return;
                }
                self.inner.lock().await.transition(WatchState::Polling);
            }
            WatchState::Error => {
                log::info!("[watch] Recovering from error on {}", self.conversation);
                self.inner.lock().await.transition(WatchState::Polling);
            }
            WatchState::Idle | WatchState::Polling | WatchState::BatchWait => {}
        }

        emit(tx, WatchEventKind::Polling, "Checking for new comments...").await;

        let config = self.options.review_config(self.conversation.clone());
        let snapshot = match self.service.fetch_snapshot(&config).await {
            Ok(snapshot) => snapshot,
            Err(e) => return self.fail(tx, e, "Failed to fetch review data").await,
        };

        if self.check_satisfied(tx, &snapshot).await {
            return;
        }

        let Some((mut trigger, count, fresh)) = self.detect_work(&snapshot).await else {
            emit(tx, WatchEventKind::Polling, "No changes").await;
            return;
        };

        match trigger {
            ProcessingTrigger::Comments => {
                let message = if fresh {
                    format!("{} new comments", count)
                } else {
                    format!("{} comments still outstanding", count)
                };
                emit(tx, WatchEventKind::NewComments { count }, message).await;
            }
            ProcessingTrigger::CiFailures => {
                emit(
                    tx,
                    WatchEventKind::NewCiFailures { count },
                    format!("{} CI failures on {}", count, snapshot.metadata.head_commit),
                )
                .await;
            }
        }

        let batch = self.options.batch_wait();
        if !batch.is_zero() {
            {
                let mut inner = self.inner.lock().await;
                inner.transition(WatchState::BatchWait);
                inner.batch_wait_until = Some(Instant::now() + batch);
            }
            emit(
                tx,
                WatchEventKind::BatchWait { remaining: batch },
                "Waiting for more comments to arrive...",
            )
            .await;

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = time::sleep(batch) => {}
            }
            self.inner.lock().await.batch_wait_until = None;

            let refreshed = match self.service.fetch_snapshot(&config).await {
                Ok(refreshed) => refreshed,
                Err(e) => return self.fail(tx, e, "Failed to refresh review data").await,
            };
            let before = match trigger {
                ProcessingTrigger::Comments => count,
                ProcessingTrigger::CiFailures => 0,
            };
            let after = refreshed.comments.len();
            if after > before {
                self.inner.lock().await.last_comment_count = after;
                trigger = ProcessingTrigger::Comments;
                emit(
                    tx,
                    WatchEventKind::NewComments { count: after },
                    format!("{} comments after batch window", after),
                )
                .await;
            }
        }

        self.inner.lock().await.transition(WatchState::Processing);

        // The cycle takes its own snapshot; the one above only reports arrivals.
        let run = match self.service.run_review_cycle(&config, cancel.clone()).await {
            Ok(run) => run,
            Err(e) => return self.fail(tx, e, "Failed to start review").await,
        };
        let ReviewRun { session, stream } = run;
        self.inner.lock().await.last_comment_count = session.comments.len();

        let Some(ReviewStream { thoughts, completion }) = stream else {
            // Became clear during the batch window.
            return self.finish_cycle(tx, session).await;
        };

        emit(
            tx,
            WatchEventKind::Processing {
                trigger,
                session: Box::new(session),
                thoughts,
            },
            "Processing new items...",
        )
        .await;

        let engine = Arc::clone(self);
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = completion.wait() => result,
            };
            match result {
                Ok(_) if cancel.is_cancelled() => {}
                Ok(session) if session.status == ReviewStatus::Failed => {
                    let message = session.error.unwrap_or_else(|| "agent run failed".to_string());
                    engine.fail(&tx, ReviewError::agent(message), "Review cycle failed").await;
                }
                Ok(session) => engine.finish_cycle(&tx, session).await,
                Err(e) => engine.fail(&tx, e, "Review cycle failed").await,
            }
        });
    }

    /// Satisfied precondition plus the detector. Returns true if the tick is done.
    async fn check_satisfied(&self, tx: &mpsc::Sender<WatchEvent>, snapshot: &ReviewSession) -> bool {
        let reviewer_done = snapshot.reviewer_found && snapshot.reviewer_completed;
        if !(snapshot.comments.is_empty()
            && snapshot.ci_failures.is_empty()
            && snapshot.ci_all_complete
            && reviewer_done)
        {
            return false;
        }

        let thoughts = self.inner.lock().await.last_thoughts.clone();
        let verdict = self
            .service
            .check_satisfaction(&self.conversation, thoughts.as_deref())
            .await;
        if !verdict.satisfied {
            log::debug!(
                "[watch] Not satisfied yet ({:.2}): {:?}",
                verdict.confidence,
                verdict.action_required
            );
            return false;
        }

        if self.options.require_manual_confirm {
            emit(
                tx,
                WatchEventKind::ManualConfirmRequired { verdict },
                "Review appears satisfied. Confirm to stop watching.",
            )
            .await;
        } else {
            self.inner.lock().await.transition(WatchState::Satisfied);
            log::info!("[watch] {} is satisfied", self.conversation);
            emit(tx, WatchEventKind::Satisfied { verdict }, "Reviewer is satisfied").await;
        }
        true
    }

    /// Compare against the last poll. Returns the trigger, item count and
    /// whether the comments are new since the last poll.
    async fn detect_work(&self, snapshot: &ReviewSession) -> Option<(ProcessingTrigger, usize, bool)> {
        let mut inner = self.inner.lock().await;

        let head = &snapshot.metadata.head_commit;
        let comment_count = snapshot.comments.len();
        let failure_count = snapshot.ci_failures.len();

        let new_commit = inner.last_commit.as_deref() != Some(head.as_str());
        let new_comments = comment_count > inner.last_comment_count;
        let new_failures = failure_count > inner.last_ci_failure_count;

        if new_commit {
            inner.ci_processed_for_commit = false;
        }
        inner.last_commit = Some(head.clone());
        inner.last_comment_count = comment_count;
        inner.last_ci_failure_count = failure_count;

        if comment_count > 0 {
            Some((ProcessingTrigger::Comments, comment_count, new_comments))
        } else if failure_count > 0 && (!inner.ci_processed_for_commit || new_failures) {
            inner.ci_processed_for_commit = true;
            Some((ProcessingTrigger::CiFailures, failure_count, true))
        } else {
            None
        }
    }

    async fn finish_cycle(&self, tx: &mpsc::Sender<WatchEvent>, session: ReviewSession) {
        let cooldown = self.options.cooldown();
        {
            let mut inner = self.inner.lock().await;
            if session.status == ReviewStatus::Completed {
                inner.last_thoughts = Some(session.thoughts.clone());
            }
            inner.transition(WatchState::Cooldown);
            inner.cooldown_until = Some(Instant::now() + cooldown);
        }

        log::info!(
            "[watch] Cycle on {} finished ({}), cooling down {}s",
            self.conversation,
            session.status,
            cooldown.as_secs()
        );

        emit(
            tx,
            WatchEventKind::ReviewComplete {
                session: Box::new(session),
            },
            "Review iteration complete",
        )
        .await;
        emit(
            tx,
            WatchEventKind::Cooldown { remaining: cooldown },
            "Entering cooldown period",
        )
        .await;
    }

    async fn fail(&self, tx: &mpsc::Sender<WatchEvent>, error: ReviewError, message: &str) {
        log::warn!("[watch] {} on {}: {}", message, self.conversation, error);
        {
            let mut inner = self.inner.lock().await;
            inner.transition(WatchState::Error);
            inner.batch_wait_until = None;
        }
        emit(tx, WatchEventKind::Error { error }, message).await;
    }
}

async fn emit(tx: &mpsc::Sender<WatchEvent>, kind: WatchEventKind, message: impl Into<String>) {
    // A closed channel is noticed by the loop after the tick.
    let _ = tx.send(WatchEvent::new(kind, message)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = WatchOptions::default();
        assert_eq!(options.poll_interval(), Duration::from_secs(15));
        assert_eq!(options.cooldown(), Duration::from_secs(180));
        assert_eq!(options.batch_wait(), Duration::from_secs(30));
        assert!(options.require_manual_confirm);
        assert!(options.include_nits);
        assert!(!options.mark_addressed);
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let options = WatchOptions {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(options.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_transition_table() {
        use WatchState::*;
        let all = [Idle, Polling, BatchWait, Processing, Cooldown, Satisfied, Error];
        let allowed = [
            (Idle, Polling),
            (Polling, BatchWait),
            (Polling, Processing),
            (Polling, Satisfied),
            (Polling, Error),
            (BatchWait, Processing),
            (BatchWait, Error),
            (Processing, Cooldown),
            (Processing, Error),
            (Cooldown, Polling),
            (Error, Polling),
            (Satisfied, Polling),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_satisfied_only_left_by_rejection() {
        use WatchState::*;
        for next in [Idle, BatchWait, Processing, Cooldown, Error] {
            assert!(!Satisfied.can_transition_to(next));
        }
        assert!(Satisfied.can_transition_to(Polling));
    }

    #[test]
    fn test_review_config_never_resets() {
        let options = WatchOptions {
            include_nits: false,
            mark_addressed: true,
            ..Default::default()
        };
        let config = options.review_config(ConversationId::new("o", "r", 2));
        assert!(!config.include_nits);
        assert!(config.mark_addressed);
        assert!(!config.reset_state);
    }
}
