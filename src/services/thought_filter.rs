//! Thought stream filter.
//!
//! Turns the agent's raw event stream into classified, human-readable
//! [`Thought`]s. Text is buffered and split on newlines; lines that look like
//! source code are dropped; survivors are classified by intent and tagged
//! with the file most recently mentioned.

use std::sync::{Arc, LazyLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::heuristics::RuleSet;
use crate::models::{RawEvent, Thought, ThoughtKind};

/// Capacity of the thought channel handed to consumers.
pub const THOUGHT_CHANNEL_CAPACITY: usize = 100;

/// Stream error kind for an unparsable stdout line. The run continues.
const PARSE_ERROR_KIND: &str = "parse_error";

/// Lines longer than this many characters are treated as code.
pub const MAX_PROSE_LINE_CHARS: usize = 500;

static CODE_RULES: LazyLock<RuleSet<()>> = LazyLock::new(|| {
    RuleSet::from_patterns(&[
        // import/export statements
        (r"^\s*(import|export|from)\s+", ()),
        // definitions
        (
            r"^\s*(pub\s+)?(fn|func|function|class|const|let|var|def|async|await|impl)\s+\w+",
            (),
        ),
        (r"^\s*(if|else|for|while|switch|case|return|try|catch)\b\s*[\(\{]?", ()),
        // file dump with line numbers ("12→")
        (r"^\s*\d+→", ()),
        (r"^\s*(package|module)\s+\w+", ()),
        (r"^\s*(type|interface|struct|enum)\s+\w+", ()),
        // whole-line JSON object or array
        (r"^\s*[\{\[].*[\}\]]\s*$", ()),
        // bare punctuation ("}", "});")
        (r"^[\{\}\(\)\[\];,]+$", ()),
    ])
});

static KIND_RULES: LazyLock<RuleSet<ThoughtKind>> = LazyLock::new(|| {
    RuleSet::from_patterns(&[
        (
            r"(?i)analyzing|reviewing|checking|looking at|examining",
            ThoughtKind::Progress,
        ),
        (
            r"(?i)suggest|recommend|consider|should|could",
            ThoughtKind::Suggestion,
        ),
        (
            r"(?i)this is|the issue|the problem|because|since",
            ThoughtKind::Analysis,
        ),
    ])
});

static FILE_RULES: LazyLock<RuleSet<()>> = LazyLock::new(|| {
    RuleSet::from_patterns(&[
        (r#"\b(?:in|at|file)\s+["'`]?([\w\-./]+\.[A-Za-z]+)["'`]?"#, ()),
        (r"([\w\-./]+\.[A-Za-z]+):\d+", ()),
        (r"\*\*([\w\-./]+\.[A-Za-z]+)\*\*", ()),
    ])
});

/// The three rule tables the filter uses.
#[derive(Debug, Clone)]
pub struct ThoughtRules {
    pub code: RuleSet<()>,
    pub kinds: RuleSet<ThoughtKind>,
    pub files: RuleSet<()>,
    pub max_line_chars: usize,
}

impl Default for ThoughtRules {
    fn default() -> Self {
        Self {
            code: CODE_RULES.clone(),
            kinds: KIND_RULES.clone(),
            files: FILE_RULES.clone(),
            max_line_chars: MAX_PROSE_LINE_CHARS,
        }
    }
}

impl ThoughtRules {
    pub fn is_code(&self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        line.chars().count() > self.max_line_chars || self.code.is_match(line)
    }

    pub fn classify(&self, line: &str) -> ThoughtKind {
        self.kinds.classify(line).unwrap_or(ThoughtKind::Thinking)
    }

    pub fn file_reference<'t>(&self, line: &'t str) -> Option<&'t str> {
        self.files.first_capture(line)
    }
}

/// Stateful line splitter and classifier for one agent run.
#[derive(Debug)]
pub struct ThoughtFilter {
    rules: Arc<ThoughtRules>,
    buffer: String,
    current_file: Option<String>,
    failure: Option<String>,
}

impl Default for ThoughtFilter {
    fn default() -> Self {
        Self::new(Arc::new(ThoughtRules::default()))
    }
}

impl ThoughtFilter {
    pub fn new(rules: Arc<ThoughtRules>) -> Self {
        Self {
            rules,
            buffer: String::new(),
            current_file: None,
            failure: None,
        }
    }

    pub fn current_file(&self) -> Option<&str> {
        self.current_file.as_deref()
    }

    /// First error that ended the run, if any. Parse errors do not count.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn record_failure(&mut self, message: &str) {
        if self.failure.is_none() {
            self.failure = Some(message.to_string());
        }
    }

    /// Feed one raw event; returns the thoughts completed by it.
    pub fn push_event(&mut self, event: &RawEvent) -> Vec<Thought> {
        match event {
            RawEvent::Error { error } => {
                if error.kind == PARSE_ERROR_KIND {
                    log::debug!("[agent] Skipping unparsable line: {}", error.message);
                } else {
                    log::warn!("[agent] Run failed ({}): {}", error.kind, error.message);
                    self.record_failure(&format!("{}: {}", error.kind, error.message));
                }
                return Vec::new();
            }
            RawEvent::Result {
                is_error: true,
                result,
                subtype,
            } => {
                let message = result
                    .as_deref()
                    .or(subtype.as_deref())
                    .unwrap_or("agent reported an error");
                log::warn!("[agent] Run ended with error result: {}", message);
                self.record_failure(message);
                return self.finish().into_iter().collect();
            }
            RawEvent::System { .. } => return Vec::new(),
            _ => {}
        }

        let Some(text) = event.text() else {
            return Vec::new();
        };

        let mut thoughts = self.push_text(&text);
        if matches!(event, RawEvent::Result { .. }) {
            thoughts.extend(self.finish());
        }
        thoughts
    }

    /// Append text and process every completed line.
    pub fn push_text(&mut self, text: &str) -> Vec<Thought> {
        self.buffer.push_str(text);

        let mut thoughts = Vec::new();
        while let Some(idx) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=idx).collect();
            if let Some(thought) = self.process_line(&line) {
                thoughts.push(thought);
            }
        }
        thoughts
    }

    /// Flush a trailing partial line.
    pub fn finish(&mut self) -> Option<Thought> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.process_line(&rest)
    }

    /// Filter and classify a single line.
    pub fn process_line(&mut self, line: &str) -> Option<Thought> {
        let trimmed = line.trim();
        if trimmed.is_empty() || self.rules.is_code(trimmed) {
            return None;
        }

        let kind = self.rules.classify(trimmed);
        if let Some(file) = self.rules.file_reference(trimmed) {
            self.current_file = Some(file.to_string());
        }

        Some(Thought::new(trimmed, kind, self.current_file.clone()))
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.current_file = None;
        self.failure = None;
    }
}

/// How an agent stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Finished,
    /// The agent exited abnormally, the stream broke, or the final result
    /// was flagged as an error.
    Failed(String),
}

/// Thoughts of one run plus how the underlying stream ended.
#[derive(Debug)]
pub struct FilteredStream {
    pub thoughts: mpsc::Receiver<Thought>,
    /// Resolves after the raw stream has closed.
    pub outcome: JoinHandle<StreamOutcome>,
}

/// Run a [`ThoughtFilter`] over `events` on its own task.
///
/// The thought channel is bounded, so a slow consumer applies backpressure
/// all the way to the agent's stdout reader. It closes after the raw stream
/// closes and any partial line has been flushed. A dropped consumer stops
/// forwarding but the raw stream is still read to the end, so the outcome
/// is always known.
pub fn spawn_filter(mut events: mpsc::Receiver<RawEvent>, rules: Arc<ThoughtRules>) -> FilteredStream {
    let (tx, rx) = mpsc::channel(THOUGHT_CHANNEL_CAPACITY);

    let outcome = tokio::spawn(async move {
        let mut filter = ThoughtFilter::new(rules);
        let mut forwarding = true;

        while let Some(event) = events.recv().await {
            for thought in filter.push_event(&event) {
                if forwarding && tx.send(thought).await.is_err() {
                    log::debug!("[agent] Thought consumer dropped, draining the stream");
                    forwarding = false;
                }
            }
        }

        if let Some(thought) = filter.finish() {
            if forwarding {
                let _ = tx.send(thought).await;
            }
        }

        match filter.failure() {
            Some(message) => StreamOutcome::Failed(message.to_string()),
            None => StreamOutcome::Finished,
        }
    });

    FilteredStream { thoughts: rx, outcome }
}
