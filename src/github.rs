//! GitHub API client for pull requests and their comment threads
//!
//! Covers the four calls the pipeline needs:
//! - fetch a pull request by number
//! - resolve a commit SHA to its pull request
//! - list issue comments on a pull request (paginated)
//! - post a confirmation comment

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{GitHubConfig, RepoSlug};
use crate::error::GitHubError;

const COMMENTS_PER_PAGE: usize = 100;

/// Upper bound on comment pages fetched for a single pull request
const MAX_COMMENT_PAGES: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseRepository {
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestBase {
    pub repo: BaseRepository,
}

/// Pull request snapshot, fetched once per run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub body: Option<String>,
    pub base: PullRequestBase,
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub html_url: String,
}

impl PullRequest {
    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    /// Repository the pull request targets; comments live there
    pub fn base_repo(&self) -> Option<RepoSlug> {
        self.base.repo.full_name.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub body: Option<String>,
    /// Null for deleted accounts
    pub user: Option<GitHubUser>,
    pub created_at: DateTime<Utc>,
}

impl IssueComment {
    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    pub fn author(&self) -> &str {
        self.user
            .as_ref()
            .map(|u| u.login.as_str())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Deserialize)]
struct PullRequestNumber {
    number: u64,
}

#[derive(Debug, Serialize)]
struct NewComment<'a> {
    body: &'a str,
}

/// The hosting-platform calls consumed by the pipeline
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    async fn pull_request(&self, repo: &RepoSlug, number: u64)
        -> Result<PullRequest, GitHubError>;

    async fn pull_request_for_commit(&self, repo: &RepoSlug, sha: &str)
        -> Result<u64, GitHubError>;

    async fn issue_comments(
        &self,
        repo: &RepoSlug,
        number: u64,
    ) -> Result<Vec<IssueComment>, GitHubError>;

    async fn create_issue_comment(
        &self,
        repo: &RepoSlug,
        number: u64,
        body: &str,
    ) -> Result<IssueComment, GitHubError>;
}

pub struct GitHubClient {
    client: reqwest::Client,
    api_base: String,
    user_agent: String,
    token: SecretString,
}

impl GitHubClient {
    pub fn new(client: reqwest::Client, config: &GitHubConfig, token: SecretString) -> Self {
        info!("GitHub client initialized against {}", config.api_base);
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            token,
        }
    }

    fn build_request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header(
                "Authorization",
                format!("Bearer {}", self.token.expose_secret()),
            )
    }

    fn repo_url(&self, repo: &RepoSlug, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            repo.owner,
            repo.repo,
            path.trim_start_matches('/')
        )
    }

    async fn check(
        response: reqwest::Response,
        context: impl FnOnce() -> String,
    ) -> Result<reqwest::Response, GitHubError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(GitHubError::Status {
            context: context(),
            status,
            body,
        })
    }
}

#[async_trait]
impl HostingPlatform for GitHubClient {
    async fn pull_request(
        &self,
        repo: &RepoSlug,
        number: u64,
    ) -> Result<PullRequest, GitHubError> {
        let url = self.repo_url(repo, &format!("pulls/{}", number));
        debug!("Fetching pull request: {}", url);

        let response = self.build_request(Method::GET, &url).send().await?;
        let response = Self::check(response, || {
            format!("Failed to fetch pull request #{}", number)
        })
        .await?;

        Ok(response.json().await?)
    }

    async fn pull_request_for_commit(
        &self,
        repo: &RepoSlug,
        sha: &str,
    ) -> Result<u64, GitHubError> {
        let url = self.repo_url(repo, &format!("commits/{}/pulls", sha));
        debug!("Resolving pull request for commit: {}", url);

        let response = self.build_request(Method::GET, &url).send().await?;
        let response = Self::check(response, || {
            format!("Failed to look up pull requests for commit {}", sha)
        })
        .await?;

        let pulls: Vec<PullRequestNumber> = response.json().await?;
        pulls
            .first()
            .map(|pr| pr.number)
            .ok_or_else(|| GitHubError::NoPullRequestForCommit(sha.to_string()))
    }

    async fn issue_comments(
        &self,
        repo: &RepoSlug,
        number: u64,
    ) -> Result<Vec<IssueComment>, GitHubError> {
        let mut all_comments = Vec::new();
        let mut page = 1;

        loop {
            let url = self.repo_url(
                repo,
                &format!(
                    "issues/{}/comments?per_page={}&page={}",
                    number, COMMENTS_PER_PAGE, page
                ),
            );
            debug!("Fetching comments page {}: {}", page, url);

            let response = self.build_request(Method::GET, &url).send().await?;
            let response = Self::check(response, || {
                format!("Failed to fetch comments for #{}", number)
            })
            .await?;

            let comments: Vec<IssueComment> = response.json().await?;
            let count = comments.len();
            all_comments.extend(comments);

            if count < COMMENTS_PER_PAGE || page >= MAX_COMMENT_PAGES {
                break;
            }
            page += 1;
        }

        debug!("Fetched {} comments for #{}", all_comments.len(), number);
        Ok(all_comments)
    }

    async fn create_issue_comment(
        &self,
        repo: &RepoSlug,
        number: u64,
        body: &str,
    ) -> Result<IssueComment, GitHubError> {
        let url = self.repo_url(repo, &format!("issues/{}/comments", number));

        let response = self
            .build_request(Method::POST, &url)
            .json(&NewComment { body })
            .send()
            .await?;
        let response = Self::check(response, || {
            format!("Failed to comment on #{}", number)
        })
        .await?;

        Ok(response.json().await?)
    }
}
