//! GitHub API client.
//!
//! REST for pull requests, conversation comments, reviews and check runs;
//! GraphQL for review threads, which carry the resolution state REST lacks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::comment_parser::{extract_ai_prompt, is_auto_generated, is_nit, parse_review_body};
use super::traits::{CiProvider, ConversationSource};
use crate::error::ReviewError;
use crate::models::{
    truncate_output, CiAnnotation, CiFailure, CiStatus, Comment, ConversationId,
    ConversationMetadata,
};

const USER_AGENT: &str = concat!("review-watch/", env!("CARGO_PKG_VERSION"));

const REVIEW_THREADS_QUERY: &str = r#"
query($owner: String!, $repo: String!, $number: Int!) {
  repository(owner: $owner, name: $repo) {
    pullRequest(number: $number) {
      reviewThreads(first: 100) {
        nodes {
          id
          isResolved
          isOutdated
          comments(first: 10) {
            nodes {
              databaseId
              body
              path
              line: originalLine
              createdAt
              updatedAt
              url
              author { login }
            }
          }
        }
      }
    }
  }
}"#;

const RESOLVE_THREAD_MUTATION: &str = r#"
mutation($threadId: ID!) {
  resolveReviewThread(input: {threadId: $threadId}) {
    thread { id isResolved }
  }
}"#;

/// GitHub client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// REST API root (e.g., `https://api.github.com`).
    pub api_url: String,

    /// Access token. Never persisted; resolved at startup.
    #[serde(skip)]
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Case-insensitive substring of the automated reviewer's login.
    pub reviewer_login: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: String::new(),
            timeout_secs: 30,
            reviewer_login: "coderabbit".to_string(),
        }
    }
}

impl GitHubConfig {
    /// True if `login` belongs to the automated reviewer.
    pub fn is_reviewer(&self, login: &str) -> bool {
        !self.reviewer_login.is_empty()
            && login
                .to_lowercase()
                .contains(&self.reviewer_login.to_lowercase())
    }
}

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    config: GitHubConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GhPullRequest {
    number: u64,
    title: String,
    html_url: String,
    user: Option<GhUser>,
    head: GhRef,
    base: GhRef,
}

#[derive(Debug, Clone, Deserialize)]
struct GhIssueComment {
    id: i64,
    #[serde(default)]
    body: String,
    html_url: String,
    user: Option<GhUser>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GhReview {
    id: i64,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: String,
    user: Option<GhUser>,
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GhCheckOutput {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    annotations_count: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GhApp {
    #[serde(default)]
    name: String,
    #[serde(default)]
    slug: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GhCheckRun {
    id: i64,
    name: String,
    status: String,
    conclusion: Option<String>,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    output: GhCheckOutput,
    #[serde(default)]
    app: Option<GhApp>,
}

#[derive(Debug, Clone, Deserialize)]
struct GhCheckRunList {
    check_runs: Vec<GhCheckRun>,
}

#[derive(Debug, Clone, Deserialize)]
struct GhAnnotation {
    #[serde(default)]
    path: String,
    #[serde(default)]
    start_line: i64,
    #[serde(default)]
    end_line: i64,
    #[serde(default)]
    annotation_level: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    raw_details: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsData {
    repository: Option<ThreadsRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsRepository {
    pull_request: Option<ThreadsPullRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsPullRequest {
    review_threads: Nodes<ReviewThread>,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewThread {
    id: String,
    is_resolved: bool,
    #[serde(default)]
    is_outdated: bool,
    comments: Nodes<ThreadComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadComment {
    database_id: Option<i64>,
    #[serde(default)]
    body: String,
    path: Option<String>,
    line: Option<i64>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    url: String,
    author: Option<GhUser>,
}

impl GitHubClient {
    /// Create a new GitHub client.
    pub fn new(config: GitHubConfig) -> Result<Self, ReviewError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static("2022-11-28"),
        );

        // Anonymous access works for public REST reads; GraphQL needs a token.
        if !config.token.is_empty() {
            let token_value = header::HeaderValue::from_str(&format!("Bearer {}", config.token))
                .map_err(|_| ReviewError::authentication("Invalid token format"))?;
            headers.insert(header::AUTHORIZATION, token_value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ReviewError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// GraphQL endpoint; Enterprise hosts serve it beside `/api/v3`.
    fn graphql_url(&self) -> String {
        graphql_url_for(&self.config.api_url)
    }

    fn repo_path(id: &ConversationId) -> String {
        format!(
            "/repos/{}/{}",
            urlencoding::encode(&id.owner),
            urlencoding::encode(&id.repo)
        )
    }

    /// Map non-success statuses to errors and decode the body.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, ReviewError> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| {
                ReviewError::parse_with_context(format!("Failed to parse response: {}", e), endpoint)
            });
        }

        let header_value = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let rate_remaining = header_value("x-ratelimit-remaining");
        let rate_reset = header_value("x-ratelimit-reset").and_then(|v| v.parse::<i64>().ok());

        let status_code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        let body_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string));

        match status {
            StatusCode::UNAUTHORIZED => Err(ReviewError::authentication(
                "GitHub token missing, expired or revoked",
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(ReviewError::rate_limited("GitHub rate limit exceeded", rate_reset))
            }
            StatusCode::FORBIDDEN if rate_remaining.as_deref() == Some("0") => {
                Err(ReviewError::rate_limited("GitHub rate limit exceeded", rate_reset))
            }
            StatusCode::NOT_FOUND => Err(ReviewError::not_found_with_id("GitHub resource", endpoint)),
            _ => {
                let message = body_message
                    .unwrap_or_else(|| format!("Request failed ({}): {}", status_code, body));
                Err(ReviewError::github_api_full(message, status_code, endpoint))
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ReviewError> {
        let response = self.client.get(self.api_url(endpoint)).send().await?;
        self.handle_response(response, endpoint).await
    }

    /// Follow `Link: rel="next"` until exhausted, unwrapping each page.
    async fn get_pages<P, T>(
        &self,
        endpoint: &str,
        unwrap: impl Fn(P) -> Vec<T>,
    ) -> Result<Vec<T>, ReviewError>
    where
        P: DeserializeOwned,
    {
        let mut all_data = Vec::new();
        let mut next = Some(self.api_url(endpoint));
        let mut first = true;

        while let Some(url) = next.take() {
            let mut request = self.client.get(&url);
            if first {
                request = request.query(&[("per_page", "100")]);
                first = false;
            }

            let response = request.send().await?;
            next = next_page_url(response.headers());
            let page: P = self.handle_response(response, endpoint).await?;
            all_data.extend(unwrap(page));
        }

        Ok(all_data)
    }

    /// Fetch all pages of a list endpoint.
    pub async fn get_all_pages<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>, ReviewError> {
        self.get_pages(endpoint, |page: Vec<T>| page).await
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ReviewError> {
        let endpoint = "/graphql";
        let response = self
            .client
            .post(self.graphql_url())
            .json(&serde_json::json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let body: GraphQlResponse<T> = self.handle_response(response, endpoint).await?;
        if let Some(error) = body.errors.first() {
            return Err(ReviewError::github_api_full(error.message.clone(), 200, endpoint));
        }
        body.data
            .ok_or_else(|| ReviewError::parse_with_context("GraphQL response without data", endpoint))
    }

    async fn review_threads(&self, id: &ConversationId) -> Result<Vec<ReviewThread>, ReviewError> {
        let data: ThreadsData = self
            .graphql(
                REVIEW_THREADS_QUERY,
                serde_json::json!({ "owner": id.owner, "repo": id.repo, "number": id.number }),
            )
            .await?;

        data.repository
            .and_then(|r| r.pull_request)
            .map(|pr| pr.review_threads.nodes)
            .ok_or_else(|| ReviewError::not_found_with_id("PullRequest", id.key()))
    }

    async fn issue_comments(&self, id: &ConversationId) -> Result<Vec<Comment>, ReviewError> {
        let endpoint = format!("{}/issues/{}/comments", Self::repo_path(id), id.number);
        let comments: Vec<GhIssueComment> = self.get_all_pages(&endpoint).await?;
        Ok(comments_from_issue_comments(comments, &self.config))
    }

    async fn review_body_comments(&self, id: &ConversationId) -> Result<Vec<Comment>, ReviewError> {
        let endpoint = format!("{}/pulls/{}/reviews", Self::repo_path(id), id.number);
        let reviews: Vec<GhReview> = self.get_all_pages(&endpoint).await?;
        Ok(comments_from_reviews(reviews, &self.config))
    }

    /// Post a threaded reply to an inline review comment.
    pub async fn reply_to_comment(
        &self,
        id: &ConversationId,
        comment_id: i64,
        body: &str,
    ) -> Result<(), ReviewError> {
        let endpoint = format!(
            "{}/pulls/{}/comments/{}/replies",
            Self::repo_path(id),
            id.number,
            comment_id
        );
        let response = self
            .client
            .post(self.api_url(&endpoint))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;

        let _: serde_json::Value = self.handle_response(response, &endpoint).await?;
        Ok(())
    }

    /// The open pull request whose head is `branch`, if any.
    pub async fn find_pull_request_for_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<ConversationId>, ReviewError> {
        let endpoint = format!(
            "/repos/{}/{}/pulls?state=open&head={}",
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            urlencoding::encode(&format!("{}:{}", owner, branch))
        );
        let pulls: Vec<GhPullRequest> = self.get(&endpoint).await?;

        Ok(pulls
            .first()
            .map(|pr| ConversationId::new(owner, repo, pr.number)))
    }

    async fn annotations(
        &self,
        id: &ConversationId,
        check_run_id: i64,
    ) -> Result<Vec<CiAnnotation>, ReviewError> {
        let endpoint = format!("{}/check-runs/{}/annotations", Self::repo_path(id), check_run_id);
        let annotations: Vec<GhAnnotation> = self.get_all_pages(&endpoint).await?;
        Ok(keep_failure_annotations(annotations))
    }
}

#[async_trait]
impl ConversationSource for GitHubClient {
    async fn get_metadata(&self, id: &ConversationId) -> Result<ConversationMetadata, ReviewError> {
        let endpoint = format!("{}/pulls/{}", Self::repo_path(id), id.number);
        let pr: GhPullRequest = self.get(&endpoint).await?;

        Ok(ConversationMetadata {
            title: pr.title,
            author: pr.user.map(|u| u.login).unwrap_or_default(),
            branch: pr.head.name,
            base_branch: pr.base.name,
            head_commit: pr.head.sha,
            base_commit: pr.base.sha,
            url: pr.html_url,
        })
    }

    async fn list_comments(&self, id: &ConversationId) -> Result<Vec<Comment>, ReviewError> {
        let threads = self.review_threads(id).await?;
        let mut comments = comments_from_threads(threads, &self.config);

        // Conversation comments and review bodies are best-effort.
        match self.issue_comments(id).await {
            Ok(found) => comments.extend(found),
            Err(e) => log::warn!("[github] Failed to fetch conversation comments for {}: {}", id, e),
        }
        match self.review_body_comments(id).await {
            Ok(found) => comments.extend(found),
            Err(e) => log::warn!("[github] Failed to fetch review bodies for {}: {}", id, e),
        }

        log::debug!("[github] {} reviewer comments on {}", comments.len(), id);

        if comments.is_empty() {
            return Err(ReviewError::NoComments);
        }
        Ok(comments)
    }

    async fn get_latest_commit(&self, id: &ConversationId) -> Result<String, ReviewError> {
        self.get_metadata(id).await.map(|m| m.head_commit)
    }

    async fn resolve_comment(&self, id: &ConversationId, comment: &Comment) -> Result<(), ReviewError> {
        if comment.is_synthetic() {
            return Ok(());
        }

        let threads = self.review_threads(id).await?;
        let thread = threads.iter().find(|t| {
            t.comments
                .nodes
                .iter()
                .any(|c| c.database_id == Some(comment.id))
        });

        let Some(thread) = thread else {
            log::debug!("[github] No review thread for comment {} on {}", comment.id, id);
            return Ok(());
        };
        if thread.is_resolved {
            return Ok(());
        }

        let _: serde_json::Value = self
            .graphql(
                RESOLVE_THREAD_MUTATION,
                serde_json::json!({ "threadId": thread.id }),
            )
            .await?;

        log::info!("[github] Resolved thread {} for comment {}", thread.id, comment.id);
        Ok(())
    }
}

#[async_trait]
impl CiProvider for GitHubClient {
    async fn get_ci_status(&self, id: &ConversationId, commit_sha: &str) -> Result<CiStatus, ReviewError> {
        let endpoint = format!(
            "{}/commits/{}/check-runs",
            Self::repo_path(id),
            urlencoding::encode(commit_sha)
        );
        let runs = self
            .get_pages(&endpoint, |page: GhCheckRunList| page.check_runs)
            .await?;

        let mut status = summarize_check_runs(&runs, &self.config);

        for (failure, run) in status
            .failures
            .iter_mut()
            .zip(runs.iter().filter(|r| is_failed(r)))
        {
            if run.output.annotations_count > 0 {
                match self.annotations(id, run.id).await {
                    Ok(annotations) => failure.annotations = annotations,
                    Err(e) => log::debug!("[github] Failed to fetch annotations for {}: {}", run.name, e),
                }
            }
            if failure.annotations.is_empty() {
                failure.output = run
                    .output
                    .text
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .map(truncate_output);
            }
        }

        Ok(status)
    }
}

fn graphql_url_for(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    match base.strip_suffix("/api/v3") {
        Some(host) => format!("{}/api/graphql", host),
        None => format!("{}/graphql", base),
    }
}

/// Extract the `rel="next"` target from a `Link` header.
fn next_page_url(headers: &header::HeaderMap) -> Option<String> {
    let link = headers.get(header::LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (url, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == r#"rel="next""#)
            .then(|| url.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

fn comments_from_threads(threads: Vec<ReviewThread>, config: &GitHubConfig) -> Vec<Comment> {
    let mut comments = Vec::new();
    for thread in threads {
        for node in thread.comments.nodes {
            let login = node.author.map(|a| a.login).unwrap_or_default();
            if !config.is_reviewer(&login) {
                continue;
            }

            let mut comment = Comment::new(
                node.database_id.unwrap_or(0),
                node.path.as_deref(),
                node.line,
                node.body,
            );
            comment.thread_id = Some(thread.id.clone());
            comment.author = login;
            comment.ai_prompt = extract_ai_prompt(&comment.body);
            comment.is_nit = is_nit(&comment.body);
            comment.url = node.url;
            comment.is_resolved = thread.is_resolved;
            comment.is_outdated = thread.is_outdated;
            comment.created_at = node.created_at;
            comment.updated_at = node.updated_at;
            comments.push(comment);
        }
    }
    comments
}

fn comments_from_issue_comments(items: Vec<GhIssueComment>, config: &GitHubConfig) -> Vec<Comment> {
    items
        .into_iter()
        .filter_map(|item| {
            let login = item.user.map(|u| u.login).unwrap_or_default();
            if !config.is_reviewer(&login) || is_auto_generated(&item.body) {
                return None;
            }

            let mut comment = Comment::new(item.id, None, None, item.body);
            comment.author = login;
            comment.ai_prompt = extract_ai_prompt(&comment.body);
            comment.is_nit = is_nit(&comment.body);
            comment.url = item.html_url;
            comment.created_at = item.created_at;
            comment.updated_at = item.updated_at;
            Some(comment)
        })
        .collect()
}

fn comments_from_reviews(reviews: Vec<GhReview>, config: &GitHubConfig) -> Vec<Comment> {
    reviews
        .into_iter()
        .filter(|r| r.user.as_ref().is_some_and(|u| config.is_reviewer(&u.login)))
        .flat_map(|review| {
            let login = review.user.map(|u| u.login).unwrap_or_default();
            let body = review.body.unwrap_or_default();
            parse_review_body(review.id, &body, &review.html_url, review.submitted_at)
                .into_iter()
                .map(move |mut c| {
                    c.author = login.clone();
                    c
                })
        })
        .collect()
}

fn is_failed(run: &GhCheckRun) -> bool {
    run.status == "completed" && run.conclusion.as_deref() == Some("failure")
}

/// Tally check runs; failures carry no annotations or output yet.
fn summarize_check_runs(runs: &[GhCheckRun], config: &GitHubConfig) -> CiStatus {
    let mut status = CiStatus {
        total_count: runs.len(),
        ..Default::default()
    };

    for run in runs {
        let app = run.app.clone().unwrap_or_default();
        let is_reviewer = config.is_reviewer(&run.name)
            || config.is_reviewer(&app.name)
            || config.is_reviewer(&app.slug);
        if is_reviewer {
            status.reviewer_found = true;
        }

        match run.status.as_str() {
            "completed" => {
                if is_reviewer {
                    status.reviewer_completed = true;
                }
                match run.conclusion.as_deref() {
                    Some("failure") => status.failures.push(CiFailure {
                        check_name: run.name.clone(),
                        app_name: app.name,
                        summary: run.output.summary.clone().unwrap_or_default(),
                        log_url: run.html_url.clone(),
                        annotations: Vec::new(),
                        output: None,
                    }),
                    Some("success") => status.passed_count += 1,
                    // neutral, cancelled, skipped: counted in total only
                    _ => {}
                }
            }
            "queued" | "in_progress" | "waiting" | "pending" | "requested" => {
                status.pending_count += 1;
                status.pending_names.push(run.name.clone());
            }
            other => log::debug!("[github] Unknown check run status {} for {}", other, run.name),
        }
    }

    status
}

fn keep_failure_annotations(annotations: Vec<GhAnnotation>) -> Vec<CiAnnotation> {
    annotations
        .into_iter()
        .filter(|a| a.annotation_level == "failure" || a.annotation_level == "warning")
        .map(|a| CiAnnotation {
            path: a.path,
            start_line: a.start_line,
            end_line: a.end_line,
            level: a.annotation_level,
            title: a.title.unwrap_or_default(),
            message: a.message,
            raw_details: a.raw_details.filter(|d| !d.is_empty()),
        })
        .collect()
}
