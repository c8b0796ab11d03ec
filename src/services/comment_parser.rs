//! Parsing of the automated reviewer's Markdown/HTML comment bodies.
//!
//! The reviewer posts most remarks as review threads, but nitpicks and
//! remarks outside the diff range only exist inside the review summary body.
//! Those are turned into synthetic comments here.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::models::Comment;

static AI_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Prompt for AI Agents.*?```[a-zA-Z]*\n?(.*?)```").unwrap());

static NIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)nit:|nitpick|\bnit\b").unwrap());

static NITPICK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<summary>[^<]*Nitpick comments \(\d+\)</summary>").unwrap()
});

static OUTSIDE_DIFF_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Outside diff range comments \(\d+\)(?:</summary>)?").unwrap()
});

/// Any top-level section of the review body; ends the previous section.
static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<summary>[^<]*(?:Nitpick comments|Outside diff range comments|Additional comments|Duplicate comments|Actionable comments|Review details)[^<]*</summary>",
    )
    .unwrap()
});

static FILE_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<summary>\s*([^<]+?)\s*\(\d+\)\s*</summary>").unwrap());

static ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`(\d+)(?:-(\d+))?`:\s*\*\*([^*]+)\*\*").unwrap());

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?(?:details|summary|blockquote)>").unwrap());

const AUTO_GENERATED_MARKERS: &[&str] = &[
    "auto-generated comment",
    "auto-generated reply",
    "summarized by CodeRabbit",
    "## Walkthrough",
    "## Summary",
    "✅ Test",
    "All tests passed",
];

/// Offset separating outside-diff IDs from nitpick IDs within one review.
const OUTSIDE_DIFF_OFFSET: i64 = 500;

/// The fenced block under "Prompt for AI Agents", trimmed.
pub fn extract_ai_prompt(body: &str) -> Option<String> {
    AI_PROMPT
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn is_nit(body: &str) -> bool {
    NIT.is_match(body)
}

/// Summary, walkthrough and similar bot posts that carry no actionable remark.
pub fn is_auto_generated(body: &str) -> bool {
    AUTO_GENERATED_MARKERS.iter().any(|m| body.contains(m))
}

/// Which section a synthetic comment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Nitpick,
    OutsideDiff,
}

/// Synthetic comments from a review summary body.
///
/// IDs are negative and derived from `review_id`, so the same review yields
/// the same IDs on every poll.
pub fn parse_review_body(
    review_id: i64,
    body: &str,
    url: &str,
    submitted_at: Option<DateTime<Utc>>,
) -> Vec<Comment> {
    let mut comments = Vec::new();
    for (kind, header) in [
        (SectionKind::Nitpick, &*NITPICK_HEADER),
        (SectionKind::OutsideDiff, &*OUTSIDE_DIFF_HEADER),
    ] {
        let Some(section) = section_content(body, header) else {
            continue;
        };
        for (index, mut comment) in parse_items(section).into_iter().enumerate() {
            let offset = match kind {
                SectionKind::Nitpick => 0,
                SectionKind::OutsideDiff => OUTSIDE_DIFF_OFFSET,
            };
            comment.id = -(review_id.saturating_mul(1000) + offset + index as i64 + 1);
            comment.is_nit = kind == SectionKind::Nitpick;
            comment.is_outside_diff = kind == SectionKind::OutsideDiff;
            comment.url = url.to_string();
            comment.created_at = submitted_at;
            comment.updated_at = submitted_at;
            comments.push(comment);
        }
    }
    comments
}

/// Text between `header` and the next top-level section header.
fn section_content<'a>(body: &'a str, header: &Regex) -> Option<&'a str> {
    let start = header.find(body)?.end();
    let end = SECTION_HEADER
        .find_at(body, start)
        .map(|m| m.start())
        .unwrap_or(body.len());
    Some(&body[start..end])
}

fn parse_items(section: &str) -> Vec<Comment> {
    let files: Vec<(usize, &str)> = FILE_SUMMARY
        .captures_iter(section)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), caps.get(1)?.as_str()))
        })
        .collect();
    let items: Vec<regex::Captures> = ITEM.captures_iter(section).collect();

    let mut comments = Vec::new();
    for (i, caps) in items.iter().enumerate() {
        let Some(whole) = caps.get(0) else { continue };

        let path = files
            .iter()
            .take_while(|(pos, _)| *pos < whole.start())
            .last()
            .map(|(_, path)| *path);

        // Body runs to the next item or the next file summary, whichever is first.
        let next_item = items
            .get(i + 1)
            .and_then(|c| c.get(0))
            .map(|m| m.start())
            .unwrap_or(section.len());
        let next_file = files
            .iter()
            .map(|(pos, _)| *pos)
            .find(|pos| *pos > whole.end())
            .unwrap_or(section.len());
        let raw_body = &section[whole.end()..next_item.min(next_file)];
        let text = HTML_TAG.replace_all(raw_body, "");

        let title = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
        let line = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let end_line = caps.get(2).and_then(|m| m.as_str().parse().ok());

        let body = format!("**{}** {}", title, text.trim());
        let mut comment = Comment::new(0, path, line, body.trim_end());
        comment.end_line = end_line;
        comment.ai_prompt = extract_ai_prompt(raw_body);
        comments.push(comment);
    }
    comments
}
