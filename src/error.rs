//! Error types for the issuance pipeline
//!
//! One enum per boundary: configuration, the GitHub API and the
//! provisioning API. Delivery failures are values (`DeliveryOutcome`),
//! and validator rejections live next to the validator.

use thiserror::Error;

/// Precondition errors, detected before any network call is made
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Errors from the hosting platform (GitHub REST API)
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context}: GitHub returned {status}: {body}")]
    Status {
        context: String,
        status: u16,
        body: String,
    },

    #[error("No pull request found for commit {0}")]
    NoPullRequestForCommit(String),
}

/// Errors from the key provisioning service
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Provisioning request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provisioning service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provisioning response did not include a key")]
    MissingKey,

    #[error("Provisioning response was not valid JSON: {0}")]
    MalformedResponse(#[from] serde_json::Error),
}

impl ProvisionError {
    /// True when the service answered successfully but the body was unusable
    pub fn is_response_shape(&self) -> bool {
        matches!(self, Self::MissingKey | Self::MalformedResponse(_))
    }
}
