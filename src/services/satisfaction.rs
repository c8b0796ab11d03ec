//! Satisfaction detector.
//!
//! Two evaluators decide whether a conversation needs more work: one scans
//! the agent's recent thoughts for approval and action-required signals, the
//! other looks at the resolution state of the remote comments. The combined
//! verdict is satisfied only when both agree.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use super::heuristics::RuleSet;
use crate::models::{Comment, Thought};

/// How many trailing thoughts the text evaluator looks at.
pub const RECENT_THOUGHTS: usize = 20;

/// Which way a signal points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Satisfied,
    ActionRequired,
}

/// Label of a satisfaction rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub polarity: Polarity,
    pub weight: u32,
    /// Keyword rules are reported as keywords, regex rules as patterns.
    pub keyword: bool,
}

impl Signal {
    const fn pattern(polarity: Polarity) -> Self {
        Self {
            polarity,
            weight: 1,
            keyword: false,
        }
    }

    const fn keyword(polarity: Polarity, weight: u32) -> Self {
        Self {
            polarity,
            weight,
            keyword: true,
        }
    }
}

const SATISFIED: Signal = Signal::pattern(Polarity::Satisfied);
const ACTION: Signal = Signal::pattern(Polarity::ActionRequired);
const SATISFIED_KEYWORD: Signal = Signal::keyword(Polarity::Satisfied, 2);
const ISSUE_KEYWORD: Signal = Signal::keyword(Polarity::ActionRequired, 1);

static DEFAULT_RULES: LazyLock<RuleSet<Signal>> = LazyLock::new(|| {
    let mut rules = RuleSet::from_patterns(&[
        (r"(?i)looks?\s+good", SATISFIED),
        (r"(?i)LGTM", SATISFIED),
        (r"(?i)approved?", SATISFIED),
        (r"(?i)ready\s+to\s+merge", SATISFIED),
        (r"(?i)no\s+(further\s+)?issues?", SATISFIED),
        (r"(?i)no\s+(more\s+)?comments?", SATISFIED),
        (r"(?i)all\s+addressed", SATISFIED),
        (r"(?i)nothing\s+(else\s+)?to\s+(add|review)", SATISFIED),
        (r"(?i)changes?\s+look\s+good", SATISFIED),
        (r"(?i)✅.*addressed", SATISFIED),
        (r"(?i)✅.*fixed", SATISFIED),
        (r"(?i)needs?\s+(to\s+)?(be\s+)?(change|fix|update|address|review)", ACTION),
        (r"(?i)should\s+(be\s+)?(change|fix|update|address)", ACTION),
        (r"(?i)must\s+(be\s+)?(change|fix|update|address)", ACTION),
        (r"(?i)requires?\s+(change|fix|update|attention)", ACTION),
        (r"(?i)please\s+(change|fix|update|address|review)", ACTION),
        (r"(?i)still\s+(has|have|need)", ACTION),
        (r"(?i)not\s+(yet\s+)?(address|fix|resolved)", ACTION),
        (r"(?i)issue\s+remain", ACTION),
        (r"(?i)bug\s+(in|found|detected)", ACTION),
    ]);

    let keywords = RuleSet::from_keywords(&[
        ("SATISFIED", SATISFIED_KEYWORD),
        ("COMPLETE", SATISFIED_KEYWORD),
        ("DONE", SATISFIED_KEYWORD),
        ("APPROVED", SATISFIED_KEYWORD),
        ("SHIP IT", SATISFIED_KEYWORD),
        ("TODO", ISSUE_KEYWORD),
        ("FIXME", ISSUE_KEYWORD),
        ("BUG", ISSUE_KEYWORD),
        ("ERROR", ISSUE_KEYWORD),
        ("FAIL", ISSUE_KEYWORD),
        ("ISSUE", ISSUE_KEYWORD),
        ("PROBLEM", ISSUE_KEYWORD),
    ]);
    rules.extend(keywords);
    rules
});

/// Outcome of an evaluation. Recomputed every time, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionVerdict {
    pub satisfied: bool,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub action_required: Vec<String>,
}

impl SatisfactionVerdict {
    fn empty() -> Self {
        Self {
            satisfied: false,
            confidence: 0.0,
            reasons: Vec::new(),
            action_required: Vec::new(),
        }
    }

    /// Logical AND of two verdicts with averaged confidence.
    pub fn combine(self, other: SatisfactionVerdict) -> SatisfactionVerdict {
        let mut reasons = self.reasons;
        reasons.extend(other.reasons);
        let mut action_required = self.action_required;
        action_required.extend(other.action_required);

        SatisfactionVerdict {
            satisfied: self.satisfied && other.satisfied,
            confidence: (self.confidence + other.confidence) / 2.0,
            reasons,
            action_required,
        }
    }
}

/// Heuristic satisfaction detector.
#[derive(Debug, Clone)]
pub struct SatisfactionDetector {
    rules: RuleSet<Signal>,
    recent: usize,
}

impl Default for SatisfactionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_RULES.clone())
    }
}

impl SatisfactionDetector {
    pub fn new(rules: RuleSet<Signal>) -> Self {
        Self {
            rules,
            recent: RECENT_THOUGHTS,
        }
    }

    /// Score the last [`RECENT_THOUGHTS`] thoughts.
    pub fn evaluate_thoughts(&self, thoughts: &[Thought]) -> SatisfactionVerdict {
        let start = thoughts.len().saturating_sub(self.recent);
        let text = thoughts[start..]
            .iter()
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.evaluate_text(&text)
    }

    /// Score free-form text.
    ///
    /// Satisfied requires a satisfaction score of at least 2, more
    /// satisfaction than action signals, and confidence above 0.6.
    pub fn evaluate_text(&self, text: &str) -> SatisfactionVerdict {
        let mut verdict = SatisfactionVerdict::empty();
        let mut satisfaction_score = 0u32;
        let mut action_score = 0u32;

        for rule in self.rules.matches(text) {
            let signal = rule.label();
            let kind = if signal.keyword { "keyword" } else { "pattern" };
            match signal.polarity {
                Polarity::Satisfied => {
                    satisfaction_score += signal.weight;
                    verdict
                        .reasons
                        .push(format!("Found satisfaction {}: {}", kind, rule.name()));
                }
                Polarity::ActionRequired => {
                    action_score += signal.weight;
                    let label = if signal.keyword { "issue" } else { "action" };
                    verdict
                        .action_required
                        .push(format!("Found {} {}: {}", label, kind, rule.name()));
                }
            }
        }

        let total = satisfaction_score + action_score;
        verdict.confidence = if total == 0 {
            0.5
        } else {
            f64::from(satisfaction_score) / f64::from(total)
        };
        verdict.satisfied = satisfaction_score >= 2
            && satisfaction_score > action_score
            && verdict.confidence > 0.6;
        verdict
    }

    /// Score the remote comment set by resolution state.
    pub fn evaluate_comments(&self, comments: &[Comment]) -> SatisfactionVerdict {
        let mut verdict = SatisfactionVerdict::empty();

        if comments.is_empty() {
            verdict.satisfied = true;
            verdict.confidence = 1.0;
            verdict.reasons.push("No reviewer comments remaining".to_string());
            return verdict;
        }

        let mut resolved = 0usize;
        for comment in comments {
            if comment.is_resolved {
                resolved += 1;
            } else {
                let location = match (comment.path(), comment.location()) {
                    (Some(path), Some(line)) => format!("{}:{}", path, line),
                    (Some(path), None) => path.to_string(),
                    _ => "general".to_string(),
                };
                verdict
                    .action_required
                    .push(format!("Unresolved comment on {}", location));
            }
        }

        verdict.confidence = resolved as f64 / comments.len() as f64;
        verdict.satisfied = resolved == comments.len();
        if verdict.satisfied {
            verdict.reasons.push("All reviewer comments resolved".to_string());
        }
        verdict
    }

    /// Combined verdict. Without thoughts (no agent run yet) only the remote
    /// evaluator is used.
    pub fn evaluate(&self, thoughts: Option<&[Thought]>, comments: &[Comment]) -> SatisfactionVerdict {
        let remote = self.evaluate_comments(comments);
        match thoughts {
            Some(thoughts) => self.evaluate_thoughts(thoughts).combine(remote),
            None => remote,
        }
    }
}
