//! Task prompt for the agent.
//!
//! Merges unresolved comments (inline, outside-diff, nitpick) and CI failure
//! details into a single numbered checklist.

use std::fmt::Write as _;

use crate::models::{CiFailure, Comment, ReviewSession};
use crate::store::GENERAL_PATH;

const INTRO_BOTH: &str = "Please address the following CI/test failures AND review comments.
Assess each comment and decide whether you agree with it. If you do, address it. If you do not, leave it unchanged.
Each item is numbered. Work through the items one by one and keep track of your progress.";

const INTRO_CI_ONLY: &str = "Please fix the following CI/test failures.";

const INTRO_COMMENTS_ONLY: &str = "Please address the following review comments.
Assess each comment and decide whether you agree with it. If you do, address it. If you do not, leave it unchanged.
Each item is numbered. Work through the items one by one and keep track of your progress.";

const INSTRUCTIONS: &str = "- Make minimal, safe edits aligned with project style.
- If a change requires design or product input, do NOT edit; instead, leave a clear comment reply explaining the decision and tradeoffs.
- After making your changes, run the project's tests and linters and make sure they pass with no new errors or warnings.
- If you need more context on an item, use the GitHub CLI (gh) to fetch it from the pull request.

When you are happy with the changes, commit them and push to the branch.";

/// Builds the agent prompt from a review snapshot.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build_for_session(&self, session: &ReviewSession) -> String {
        self.build(&session.comments, &session.ci_failures)
    }

    pub fn build(&self, comments: &[Comment], failures: &[CiFailure]) -> String {
        let (nits, rest): (Vec<&Comment>, Vec<&Comment>) = comments.iter().partition(|c| c.is_nit);
        let (outside, inline): (Vec<&Comment>, Vec<&Comment>) =
            rest.into_iter().partition(|c| c.is_outside_diff);

        let mut number = 1;
        let mut sections = Vec::new();
        for (title, group) in [
            ("Inline Review Comments", &inline),
            ("Outside Diff Range Comments", &outside),
            ("Nitpick Comments", &nits),
        ] {
            if !group.is_empty() {
                sections.push(comment_section(title, group, &mut number));
            }
        }
        if !failures.is_empty() {
            sections.push(ci_section(failures));
        }

        let intro = match (!failures.is_empty(), !comments.is_empty()) {
            (true, true) => INTRO_BOTH,
            (true, false) => INTRO_CI_ONLY,
            _ => INTRO_COMMENTS_ONLY,
        };

        format!("{}\n\n{}\n\n{}", intro, INSTRUCTIONS, sections.join("\n\n"))
    }
}

/// Group by file in first-seen order; general comments under `GENERAL`.
fn group_by_file<'a>(comments: &[&'a Comment]) -> Vec<(&'a str, Vec<&'a Comment>)> {
    let mut groups: Vec<(&str, Vec<&Comment>)> = Vec::new();
    for &comment in comments {
        let file = comment.path().unwrap_or(GENERAL_PATH);
        match groups.iter_mut().find(|(f, _)| *f == file) {
            Some((_, list)) => list.push(comment),
            None => groups.push((file, vec![comment])),
        }
    }
    groups
}

fn comment_section(title: &str, comments: &[&Comment], number: &mut usize) -> String {
    let mut out = format!("--- {} ---\n", title);

    for (file, group) in group_by_file(comments) {
        let _ = writeln!(out, "## {}", file);
        for comment in group {
            let location = comment.location().unwrap_or_default();
            let _ = writeln!(out, "- [ ] {}. {} ({})", number, location, comment.url);
            let _ = writeln!(out, "{}", indent(comment.effective_body(), "   "));
            out.push('\n');
            *number += 1;
        }
    }

    out.trim_end().to_string()
}

fn ci_section(failures: &[CiFailure]) -> String {
    let mut out = String::from("--- Failed CI Checks / Tests ---\n\n");

    for failure in failures {
        if failure.app_name.is_empty() {
            let _ = writeln!(out, "## {}", failure.check_name);
        } else {
            let _ = writeln!(out, "## {} ({})", failure.check_name, failure.app_name);
        }
        let _ = writeln!(out, "URL: {}", failure.log_url);
        if !failure.summary.is_empty() {
            let _ = writeln!(out, "Summary: {}", failure.summary);
        }

        if !failure.annotations.is_empty() {
            out.push_str("\nFailure Details:\n");
            for annotation in &failure.annotations {
                let _ = writeln!(out, "- {}", annotation.location());
                if !annotation.title.is_empty() {
                    let _ = writeln!(out, "  Title: {}", annotation.title);
                }
                let _ = writeln!(out, "  {}", annotation.message);
                if let Some(details) = annotation.raw_details.as_deref().filter(|d| !d.is_empty()) {
                    let _ = writeln!(out, "{}", indent(details, "    "));
                }
            }
        } else if let Some(output) = failure.output.as_deref().filter(|o| !o.is_empty()) {
            let _ = write!(out, "\nTest Output:\n```\n{}\n```\n", output);
        }

        out.push('\n');
    }

    out.trim_end().to_string()
}

fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{}{}", prefix, line))
        .collect::<Vec<_>>()
        .join("\n")
}
