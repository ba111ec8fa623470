//! Configuration management
//!
//! Two layers:
//! - `Config`: non-secret settings from config.toml, embedded in the binary
//!   and replaceable by an explicit path. Endpoints, key payload, email
//!   identity, timeouts.
//! - `Environment`: secrets and pull-request identity, resolved once at
//!   process entry from raw values the CLI captured.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub github: GitHubConfig,
    pub provisioning: ProvisioningConfig,
    pub email: EmailConfig,
    pub program: ProgramConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub api_base: String,
    pub user_agent: String,
}

/// Payload sent with every key request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    pub api_base: String,
    /// Display name identifying the reward program
    pub key_name: String,
    /// Label identifying this issuance channel
    pub key_label: String,
    /// Soft spend ceiling in dollars
    pub limit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub api_base: String,
    pub from_email: String,
    pub from_name: String,
    pub subject: String,
    pub docs_url: String,
}

/// Names used in the email body and the confirmation comment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub provider_name: String,
    /// Used in the confirmation comment
    pub program_name: String,
    /// Used in the email body
    pub email_program_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Look up MX/address records before accepting an address
    pub check_deliverability: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_deliverability: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout; 0 disables it
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Build an HTTP client honoring the configured timeout
    pub fn build_client(&self) -> Result<reqwest::Client, ConfigError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

impl Config {
    /// The configuration shipped inside the binary
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::parse(DEFAULT_CONFIG)
    }

    /// Load an explicitly named file; a missing file is an error
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if !(self.provisioning.limit.is_finite() && self.provisioning.limit > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "provisioning.limit".to_string(),
                message: format!("must be a positive amount, got {}", self.provisioning.limit),
            });
        }
        if self.email.from_email.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "email.from_email".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Repository identifier in `owner/name` form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl FromStr for RepoSlug {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue {
            key: "GITHUB_REPOSITORY".to_string(),
            message: format!("expected owner/name, got '{}'", s),
        };
        let (owner, repo) = s.trim().split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(invalid());
        }
        Ok(Self::new(owner, repo))
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// How the pull request for this run is identified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestTarget {
    Number(u64),
    /// Resolved through the commit -> pull request association
    Commit(String),
}

impl fmt::Display for PullRequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "#{}", n),
            Self::Commit(sha) => write!(f, "commit {}", sha),
        }
    }
}

/// Raw values as captured at process entry, before validation.
/// Holds plaintext secrets, so it must never implement `Debug`.
#[derive(Default, Clone)]
pub struct RawEnvironment {
    pub github_token: Option<String>,
    pub repository: Option<String>,
    pub pr_number: Option<String>,
    pub commit_sha: Option<String>,
    pub provisioning_api_key: Option<String>,
    pub email_api_key: Option<String>,
}

/// Fully resolved run environment
#[derive(Debug)]
pub struct Environment {
    pub github_token: SecretString,
    pub repository: RepoSlug,
    pub target: PullRequestTarget,
    pub provisioning_api_key: SecretString,
    pub email_api_key: SecretString,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Environment {
    /// Resolve raw values, reporting every missing variable at once
    pub fn resolve(raw: RawEnvironment) -> Result<Self, ConfigError> {
        let github_token = present(raw.github_token);
        let repository = present(raw.repository);
        let pr_number = present(raw.pr_number);
        let commit_sha = present(raw.commit_sha);
        let provisioning_api_key = present(raw.provisioning_api_key);
        let email_api_key = present(raw.email_api_key);

        let mut missing = Vec::new();
        if github_token.is_none() {
            missing.push("GITHUB_TOKEN".to_string());
        }
        if repository.is_none() {
            missing.push("GITHUB_REPOSITORY".to_string());
        }
        if pr_number.is_none() && commit_sha.is_none() {
            missing.push("PR_NUMBER or GITHUB_SHA".to_string());
        }
        if provisioning_api_key.is_none() {
            missing.push("PROVISIONING_API_KEY".to_string());
        }
        if email_api_key.is_none() {
            missing.push("EMAIL_API_KEY".to_string());
        }

        let (
            Some(github_token),
            Some(repository),
            Some(provisioning_api_key),
            Some(email_api_key),
        ) = (github_token, repository, provisioning_api_key, email_api_key)
        else {
            return Err(ConfigError::MissingEnv(missing));
        };
        if !missing.is_empty() {
            return Err(ConfigError::MissingEnv(missing));
        }

        let target = match (pr_number, commit_sha) {
            (Some(number), _) => {
                let number = number
                    .parse::<u64>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        key: "PR_NUMBER".to_string(),
                        message: format!("expected a positive integer, got '{}'", number),
                    })?;
                PullRequestTarget::Number(number)
            }
            (None, Some(sha)) => PullRequestTarget::Commit(sha),
            (None, None) => return Err(ConfigError::MissingEnv(missing)),
        };

        Ok(Self {
            github_token: SecretString::from(github_token),
            repository: repository.parse()?,
            target,
            provisioning_api_key: SecretString::from(provisioning_api_key),
            email_api_key: SecretString::from(email_api_key),
        })
    }
}
