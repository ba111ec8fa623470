//! Issuance pipeline
//!
//! Start -> LocatingEmail -> Provisioning -> Notifying -> Confirming -> Done,
//! with an absorbing Aborted state reachable from each step. The pipeline
//! never exits the process; it returns a `RunReport` whose outcome maps to
//! the exit code at the binary boundary.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::{Config, EmailConfig, ProgramConfig, PullRequestTarget, RepoSlug};
use crate::github::{HostingPlatform, PullRequest};
use crate::locator::{EmailLocator, LocatedEmail, TextSource};
use crate::notifier::{format_limit, DeliveryOutcome, EmailSender, RewardMessage};
use crate::provisioner::KeyProvisioner;
use crate::validator::ValidatedEmail;

pub const EXIT_SUCCESS: i32 = 0;
/// No resolvable email; an expected outcome, not a fault
pub const EXIT_NO_EMAIL: i32 = 1;
pub const EXIT_FAILURE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    LocatingEmail,
    Provisioning,
    Notifying,
    Confirming,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::LocatingEmail => "locating-email",
            Self::Provisioning => "provisioning",
            Self::Notifying => "notifying",
            Self::Confirming => "confirming",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The pull request could not be resolved or fetched
    Lookup,
    NoEmail,
    ProvisionFailed,
    DeliveryFailed,
    /// The key was delivered but the confirmation comment could not be posted
    ConfirmationFailed,
    Unexpected,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lookup => "lookup",
            Self::NoEmail => "no-email",
            Self::ProvisionFailed => "provision-failed",
            Self::DeliveryFailed => "delivery-failed",
            Self::ConfirmationFailed => "confirmation-failed",
            Self::Unexpected => "unexpected",
        };
        f.write_str(name)
    }
}

/// What the binary does with a run that found no email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoEmailPolicy {
    #[default]
    Fail,
    Succeed,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        email: ValidatedEmail,
        pull_request: u64,
    },
    Aborted {
        stage: Stage,
        reason: AbortReason,
        detail: String,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn reason(&self) -> Option<AbortReason> {
        match self {
            Self::Completed { .. } => None,
            Self::Aborted { reason, .. } => Some(*reason),
        }
    }

    pub fn exit_code(&self, policy: NoEmailPolicy) -> i32 {
        match self.reason() {
            None => EXIT_SUCCESS,
            Some(AbortReason::NoEmail) => match policy {
                NoEmailPolicy::Fail => EXIT_NO_EMAIL,
                NoEmailPolicy::Succeed => EXIT_SUCCESS,
            },
            Some(_) => EXIT_FAILURE,
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    /// Every state the run entered, in order
    pub stages: Vec<Stage>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn final_stage(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Start)
    }
}

#[derive(Debug)]
struct Abort {
    reason: AbortReason,
    detail: String,
}

impl Abort {
    fn new(reason: AbortReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Body of the comment posted once the key has been delivered
pub fn confirmation_comment(email: &ValidatedEmail, limit: f64, program: &ProgramConfig) -> String {
    format!(
        "✅ {} {} API key sent to `{}`. Thanks for your contribution to the {}!",
        format_limit(limit),
        program.provider_name,
        email,
        program.program_name
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn advance(stages: &mut Vec<Stage>, next: Stage) {
    if let Some(current) = stages.last() {
        debug!("Pipeline: {} -> {}", current, next);
    }
    stages.push(next);
}

pub struct Pipeline {
    platform: Arc<dyn HostingPlatform>,
    provisioner: Arc<dyn KeyProvisioner>,
    sender: Arc<dyn EmailSender>,
    locator: EmailLocator,
    email: EmailConfig,
    program: ProgramConfig,
}

impl Pipeline {
    pub fn new(
        platform: Arc<dyn HostingPlatform>,
        provisioner: Arc<dyn KeyProvisioner>,
        sender: Arc<dyn EmailSender>,
        locator: EmailLocator,
        config: &Config,
    ) -> Self {
        Self {
            platform,
            provisioner,
            sender,
            locator,
            email: config.email.clone(),
            program: config.program.clone(),
        }
    }

    /// Run the pipeline once against one pull request
    pub async fn run(&self, repo: &RepoSlug, target: &PullRequestTarget) -> RunReport {
        let mut stages = vec![Stage::Start];

        let result = AssertUnwindSafe(self.drive(repo, target, &mut stages))
            .catch_unwind()
            .await;
        let stage = stages.last().copied().unwrap_or(Stage::Start);

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(abort)) => {
                if abort.reason == AbortReason::NoEmail {
                    info!("{}. Skipping key issuance.", abort.detail);
                } else {
                    error!("Run aborted at {} ({}): {}", stage, abort.reason, abort.detail);
                }
                RunOutcome::Aborted {
                    stage,
                    reason: abort.reason,
                    detail: abort.detail,
                }
            }
            Err(payload) => {
                let detail = panic_message(&*payload);
                error!("Unexpected error at {}: {}", stage, detail);
                RunOutcome::Aborted {
                    stage,
                    reason: AbortReason::Unexpected,
                    detail,
                }
            }
        };

        RunReport { stages, outcome }
    }

    async fn drive(
        &self,
        repo: &RepoSlug,
        target: &PullRequestTarget,
        stages: &mut Vec<Stage>,
    ) -> Result<RunOutcome, Abort> {
        let pr = self.fetch_pull_request(repo, target).await?;
        // Comments and the confirmation live on the base repository
        let pr_repo = pr.base_repo().unwrap_or_else(|| repo.clone());

        advance(stages, Stage::LocatingEmail);
        let located = self.locate_email(&pr_repo, &pr).await.ok_or_else(|| {
            Abort::new(
                AbortReason::NoEmail,
                "No valid email found in PR body or comments",
            )
        })?;
        info!("Found email: {} (in {})", located.email, located.origin);

        advance(stages, Stage::Provisioning);
        let credential = self
            .provisioner
            .provision()
            .await
            .map_err(|e| Abort::new(AbortReason::ProvisionFailed, e.to_string()))?;
        let limit = credential.limit();

        advance(stages, Stage::Notifying);
        let message = RewardMessage::new(&self.email, &self.program).render(&located.email, credential);
        match self.sender.send(&message).await {
            DeliveryOutcome::Sent { status } => {
                info!("Key delivered to {} (status {})", located.email, status)
            }
            DeliveryOutcome::Rejected { status, reason } => {
                return Err(Abort::new(
                    AbortReason::DeliveryFailed,
                    format!("email rejected with status {}: {}", status, reason),
                ))
            }
            DeliveryOutcome::TransportFailed { reason } => {
                return Err(Abort::new(
                    AbortReason::DeliveryFailed,
                    format!("email could not be sent: {}", reason),
                ))
            }
        }
        drop(message);

        advance(stages, Stage::Confirming);
        info!("Commenting on PR #{}", pr.number);
        let body = confirmation_comment(&located.email, limit, &self.program);
        self.platform
            .create_issue_comment(&pr_repo, pr.number, &body)
            .await
            .map_err(|e| Abort::new(AbortReason::ConfirmationFailed, e.to_string()))?;
        info!("Confirmation comment added to PR #{}", pr.number);

        advance(stages, Stage::Done);
        Ok(RunOutcome::Completed {
            email: located.email,
            pull_request: pr.number,
        })
    }

    async fn fetch_pull_request(
        &self,
        repo: &RepoSlug,
        target: &PullRequestTarget,
    ) -> Result<PullRequest, Abort> {
        let number = match target {
            PullRequestTarget::Number(number) => *number,
            PullRequestTarget::Commit(sha) => {
                let number = self
                    .platform
                    .pull_request_for_commit(repo, sha)
                    .await
                    .map_err(|e| Abort::new(AbortReason::Lookup, e.to_string()))?;
                debug!("Commit {} belongs to PR #{}", sha, number);
                number
            }
        };

        info!("Fetching PR #{} from {}", number, repo);
        self.platform
            .pull_request(repo, number)
            .await
            .map_err(|e| Abort::new(AbortReason::Lookup, e.to_string()))
    }

    /// Body first; comments are only fetched when the body yields nothing
    async fn locate_email(&self, repo: &RepoSlug, pr: &PullRequest) -> Option<LocatedEmail> {
        info!("Searching for email in PR body");
        if let Some(found) = self
            .locator
            .locate([TextSource::body(pr.body_text())])
            .await
        {
            return Some(found);
        }

        info!("No valid email found in PR body, checking comments");
        let comments = match self.platform.issue_comments(repo, pr.number).await {
            Ok(comments) => comments,
            Err(e) => {
                warn!("Failed to fetch PR comments: {}", e);
                Vec::new()
            }
        };

        self.locator
            .locate(
                comments
                    .iter()
                    .map(|c| TextSource::comment(c.author(), c.body_text())),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::deliverability::testing::StaticMailDomains;
    use crate::error::{GitHubError, ProvisionError};
    use crate::github::{BaseRepository, GitHubUser, IssueComment, PullRequestBase};
    use crate::notifier::{classify_response, EmailMessage};
    use crate::provisioner::{parse_key_response, KeyRequest, ProvisionedCredential};

    #[derive(Default)]
    struct FakePlatform {
        body: Option<String>,
        comments: Vec<(String, String)>,
        commit_pr: Option<u64>,
        fail_comment_fetch: bool,
        fail_comment_post: bool,
        comment_fetches: AtomicUsize,
        posted: Mutex<Vec<(u64, String)>>,
    }

    impl FakePlatform {
        fn with_body(body: &str) -> Self {
            Self {
                body: Some(body.to_string()),
                ..Default::default()
            }
        }

        fn comment(mut self, author: &str, body: &str) -> Self {
            self.comments.push((author.to_string(), body.to_string()));
            self
        }

        fn posted(&self) -> Vec<(u64, String)> {
            self.posted.lock().unwrap().clone()
        }
    }

    fn status_error(context: &str, status: u16) -> GitHubError {
        GitHubError::Status {
            context: context.to_string(),
            status,
            body: String::new(),
        }
    }

    #[async_trait]
    impl HostingPlatform for FakePlatform {
        async fn pull_request(
            &self,
            _repo: &RepoSlug,
            number: u64,
        ) -> Result<PullRequest, GitHubError> {
            Ok(PullRequest {
                number,
                body: self.body.clone(),
                base: PullRequestBase {
                    repo: BaseRepository {
                        full_name: "block/goose".to_string(),
                    },
                },
                user: None,
                html_url: String::new(),
            })
        }

        async fn pull_request_for_commit(
            &self,
            _repo: &RepoSlug,
            sha: &str,
        ) -> Result<u64, GitHubError> {
            self.commit_pr
                .ok_or_else(|| GitHubError::NoPullRequestForCommit(sha.to_string()))
        }

        async fn issue_comments(
            &self,
            _repo: &RepoSlug,
            _number: u64,
        ) -> Result<Vec<IssueComment>, GitHubError> {
            self.comment_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_comment_fetch {
                return Err(status_error("comments", 502));
            }
            Ok(self
                .comments
                .iter()
                .enumerate()
                .map(|(i, (author, body))| IssueComment {
                    id: i as u64,
                    body: Some(body.clone()),
                    user: Some(GitHubUser {
                        login: author.clone(),
                    }),
                    created_at: Utc::now(),
                })
                .collect())
        }

        async fn create_issue_comment(
            &self,
            _repo: &RepoSlug,
            number: u64,
            body: &str,
        ) -> Result<IssueComment, GitHubError> {
            if self.fail_comment_post {
                return Err(status_error("Failed to comment", 403));
            }
            self.posted.lock().unwrap().push((number, body.to_string()));
            Ok(IssueComment {
                id: 99,
                body: Some(body.to_string()),
                user: None,
                created_at: Utc::now(),
            })
        }
    }

    /// Answers with a canned HTTP status and body, parsed like the real client
    struct FakeProvisioner {
        status: u16,
        body: String,
        panics: bool,
        calls: AtomicUsize,
    }

    impl FakeProvisioner {
        fn responding(status: u16, body: &str) -> Self {
            Self {
                status,
                body: body.to_string(),
                panics: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeyProvisioner for FakeProvisioner {
        async fn provision(&self) -> Result<ProvisionedCredential, ProvisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("provisioning backend exploded");
            }
            let request = KeyRequest {
                name: "goose contributor".to_string(),
                label: "goose-cookbook".to_string(),
                limit: 10.0,
            };
            parse_key_response(self.status, &self.body, &request)
        }
    }

    struct FakeSender {
        /// None simulates a transport failure
        status: Option<u16>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl FakeSender {
        fn responding(status: u16) -> Self {
            Self {
                status: Some(status),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn unreachable() -> Self {
            Self {
                status: None,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailSender for FakeSender {
        async fn send(&self, message: &EmailMessage) -> DeliveryOutcome {
            self.sent
                .lock()
                .unwrap()
                .push((message.to.to_string(), message.html.clone()));
            match self.status {
                Some(status) => classify_response(status, r#"{"errors":[]}"#),
                None => DeliveryOutcome::TransportFailed {
                    reason: "connection refused".to_string(),
                },
            }
        }
    }

    struct Harness {
        platform: Arc<FakePlatform>,
        provisioner: Arc<FakeProvisioner>,
        sender: Arc<FakeSender>,
        domains: Arc<StaticMailDomains>,
    }

    impl Harness {
        fn new(platform: FakePlatform, provisioner: FakeProvisioner, sender: FakeSender) -> Self {
            Self {
                platform: Arc::new(platform),
                provisioner: Arc::new(provisioner),
                sender: Arc::new(sender),
                domains: Arc::new(StaticMailDomains::open()),
            }
        }

        fn with_domains(mut self, domains: StaticMailDomains) -> Self {
            self.domains = Arc::new(domains);
            self
        }

        async fn run(&self, target: PullRequestTarget) -> RunReport {
            let pipeline = Pipeline::new(
                self.platform.clone(),
                self.provisioner.clone(),
                self.sender.clone(),
                EmailLocator::new(self.domains.clone()),
                &Config::embedded().unwrap(),
            );
            pipeline
                .run(&RepoSlug::new("block", "goose"), &target)
                .await
        }
    }

    fn key_ok() -> FakeProvisioner {
        FakeProvisioner::responding(200, r#"{"key":"sk-test-123"}"#)
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let harness = Harness::new(
            FakePlatform::with_body("Thanks! **Email**: dev@example.com"),
            key_ok(),
            FakeSender::responding(202),
        );

        let report = harness.run(PullRequestTarget::Number(42)).await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.outcome.exit_code(NoEmailPolicy::Fail), EXIT_SUCCESS);
        assert_eq!(
            report.stages,
            vec![
                Stage::Start,
                Stage::LocatingEmail,
                Stage::Provisioning,
                Stage::Notifying,
                Stage::Confirming,
                Stage::Done
            ]
        );

        assert_eq!(harness.provisioner.calls(), 1);
        let sent = harness.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "dev@example.com");
        assert!(sent[0].1.contains("sk-test-123"));

        let posted = harness.platform.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, 42);
        assert!(posted[0].1.contains("`dev@example.com`"));
        assert!(posted[0].1.contains("$10 OpenRouter API key"));
        assert!(!posted[0].1.contains("sk-test-123"));

        // Found in the body, so the comment thread is never fetched
        assert_eq!(harness.platform.comment_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_email_has_no_side_effects() {
        let harness = Harness::new(
            FakePlatform::with_body("Adds a new recipe").comment("alice", "LGTM"),
            key_ok(),
            FakeSender::responding(202),
        );

        let report = harness.run(PullRequestTarget::Number(7)).await;

        assert_eq!(report.outcome.reason(), Some(AbortReason::NoEmail));
        assert_eq!(report.final_stage(), Stage::LocatingEmail);
        assert_eq!(report.outcome.exit_code(NoEmailPolicy::Fail), EXIT_NO_EMAIL);
        assert_eq!(report.outcome.exit_code(NoEmailPolicy::Succeed), EXIT_SUCCESS);

        assert_eq!(harness.platform.comment_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(harness.provisioner.calls(), 0);
        assert!(harness.sender.sent().is_empty());
        assert!(harness.platform.posted().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_body_email_falls_back_to_comment() {
        let harness = Harness::new(
            FakePlatform::with_body("**Email**: broken..name@example.com")
                .comment("alice", "Nice work")
                .comment("contributor", "Sorry, my email: Dev@Example.COM"),
            key_ok(),
            FakeSender::responding(202),
        );

        let report = harness.run(PullRequestTarget::Number(3)).await;

        match &report.outcome {
            RunOutcome::Completed { email, .. } => assert_eq!(email.as_str(), "Dev@example.com"),
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(harness.sender.sent()[0].0, "Dev@example.com");
    }

    #[tokio::test]
    async fn test_comment_fetch_failure_counts_as_no_comments() {
        let platform = FakePlatform {
            fail_comment_fetch: true,
            ..FakePlatform::with_body("no address")
        };
        let harness = Harness::new(platform, key_ok(), FakeSender::responding(202));

        let report = harness.run(PullRequestTarget::Number(3)).await;

        assert_eq!(report.outcome.reason(), Some(AbortReason::NoEmail));
        assert_eq!(harness.provisioner.calls(), 0);
    }

    #[tokio::test]
    async fn test_undeliverable_domain_has_no_side_effects() {
        let harness = Harness::new(
            FakePlatform::with_body("**Email**: dev@this-domain-does-not-exist-zq9x7.com"),
            key_ok(),
            FakeSender::responding(202),
        )
        .with_domains(StaticMailDomains::rejecting(&[
            "this-domain-does-not-exist-zq9x7.com",
        ]));

        let report = harness.run(PullRequestTarget::Number(4)).await;

        assert_eq!(report.outcome.reason(), Some(AbortReason::NoEmail));
        assert_eq!(report.outcome.exit_code(NoEmailPolicy::Fail), EXIT_NO_EMAIL);
        assert_eq!(harness.platform.comment_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(harness.provisioner.calls(), 0);
        assert!(harness.sender.sent().is_empty());
        assert!(harness.platform.posted().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_aborts_before_email() {
        let harness = Harness::new(
            FakePlatform::with_body("**Email**: dev@example.com"),
            FakeProvisioner::responding(200, r#"{"data": {"label": "goose-cookbook"}}"#),
            FakeSender::responding(202),
        );

        let report = harness.run(PullRequestTarget::Number(5)).await;

        assert_eq!(report.outcome.reason(), Some(AbortReason::ProvisionFailed));
        assert_eq!(report.final_stage(), Stage::Provisioning);
        assert_eq!(report.outcome.exit_code(NoEmailPolicy::Fail), EXIT_FAILURE);
        assert_eq!(harness.provisioner.calls(), 1);
        assert!(harness.sender.sent().is_empty());
        assert!(harness.platform.posted().is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_error_status_aborts() {
        let harness = Harness::new(
            FakePlatform::with_body("**Email**: dev@example.com"),
            FakeProvisioner::responding(401, r#"{"error":"bad key"}"#),
            FakeSender::responding(202),
        );

        let report = harness.run(PullRequestTarget::Number(5)).await;

        match report.outcome {
            RunOutcome::Aborted { reason, detail, .. } => {
                assert_eq!(reason, AbortReason::ProvisionFailed);
                assert!(detail.contains("401"));
            }
            other => panic!("expected Aborted, got {:?}", other),
        }
        assert!(harness.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_delivery_posts_no_comment() {
        let harness = Harness::new(
            FakePlatform::with_body("**Email**: dev@example.com"),
            key_ok(),
            FakeSender::responding(429),
        );

        let report = harness.run(PullRequestTarget::Number(9)).await;

        assert_eq!(report.outcome.reason(), Some(AbortReason::DeliveryFailed));
        assert_eq!(report.final_stage(), Stage::Notifying);
        assert_eq!(report.outcome.exit_code(NoEmailPolicy::Succeed), EXIT_FAILURE);
        assert_eq!(harness.sender.sent().len(), 1);
        assert!(harness.platform.posted().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_posts_no_comment() {
        let harness = Harness::new(
            FakePlatform::with_body("**Email**: dev@example.com"),
            key_ok(),
            FakeSender::unreachable(),
        );

        let report = harness.run(PullRequestTarget::Number(9)).await;

        assert_eq!(report.outcome.reason(), Some(AbortReason::DeliveryFailed));
        assert!(harness.platform.posted().is_empty());
    }

    #[tokio::test]
    async fn test_comment_post_failure_is_a_run_failure() {
        let platform = FakePlatform {
            fail_comment_post: true,
            ..FakePlatform::with_body("**Email**: dev@example.com")
        };
        let harness = Harness::new(platform, key_ok(), FakeSender::responding(202));

        let report = harness.run(PullRequestTarget::Number(9)).await;

        assert_eq!(
            report.outcome.reason(),
            Some(AbortReason::ConfirmationFailed)
        );
        assert_eq!(report.final_stage(), Stage::Confirming);
        assert_eq!(report.outcome.exit_code(NoEmailPolicy::Fail), EXIT_FAILURE);
        assert_eq!(harness.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_target_is_resolved() {
        let platform = FakePlatform {
            commit_pr: Some(128),
            ..FakePlatform::with_body("**Email**: dev@example.com")
        };
        let harness = Harness::new(platform, key_ok(), FakeSender::responding(202));

        let report = harness
            .run(PullRequestTarget::Commit("abc123".to_string()))
            .await;

        match report.outcome {
            RunOutcome::Completed { pull_request, .. } => assert_eq!(pull_request, 128),
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(harness.platform.posted()[0].0, 128);
    }

    #[tokio::test]
    async fn test_commit_without_pull_request_is_a_lookup_failure() {
        let harness = Harness::new(
            FakePlatform::with_body("**Email**: dev@example.com"),
            key_ok(),
            FakeSender::responding(202),
        );

        let report = harness
            .run(PullRequestTarget::Commit("deadbeef".to_string()))
            .await;

        assert_eq!(report.outcome.reason(), Some(AbortReason::Lookup));
        assert_eq!(report.stages, vec![Stage::Start]);
        assert_eq!(report.outcome.exit_code(NoEmailPolicy::Fail), EXIT_FAILURE);
        assert_eq!(harness.provisioner.calls(), 0);
    }

    #[tokio::test]
    async fn test_panicking_collaborator_maps_to_unexpected() {
        let provisioner = FakeProvisioner {
            panics: true,
            ..key_ok()
        };
        let harness = Harness::new(
            FakePlatform::with_body("**Email**: dev@example.com"),
            provisioner,
            FakeSender::responding(202),
        );

        let report = harness.run(PullRequestTarget::Number(1)).await;

        match report.outcome {
            RunOutcome::Aborted {
                stage,
                reason,
                ref detail,
            } => {
                assert_eq!(stage, Stage::Provisioning);
                assert_eq!(reason, AbortReason::Unexpected);
                assert!(detail.contains("exploded"));
            }
            ref other => panic!("expected Aborted, got {:?}", other),
        }
        assert_eq!(report.outcome.exit_code(NoEmailPolicy::Fail), EXIT_FAILURE);
        assert!(harness.sender.sent().is_empty());
    }

    #[test]
    fn test_confirmation_comment_text() {
        let email = crate::validator::check("dev@example.com").unwrap();
        let body = confirmation_comment(&email, 10.0, &Config::embedded().unwrap().program);
        assert_eq!(
            body,
            "✅ $10 OpenRouter API key sent to `dev@example.com`. Thanks for your contribution to the goose cookbook!"
        );
    }

    #[test]
    fn test_stage_and_reason_names() {
        assert_eq!(Stage::LocatingEmail.to_string(), "locating-email");
        assert_eq!(AbortReason::NoEmail.to_string(), "no-email");
    }

    #[test]
    fn test_run_with_blocking_executor() {
        let harness = Harness::new(
            FakePlatform::with_body("email: dev@example.com"),
            key_ok(),
            FakeSender::responding(200),
        );

        let report = tokio_test::block_on(harness.run(PullRequestTarget::Number(11)));

        assert_eq!(report.final_stage(), Stage::Done);
        assert_eq!(harness.platform.posted().len(), 1);
    }
}
