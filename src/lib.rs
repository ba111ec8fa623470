//! Reward Key - issue a metered API key to the author of a merged pull request
//!
//! Runs once per merge event. The pipeline finds the contributor's email in
//! the pull request, provisions a spending-capped key, emails it, and posts a
//! confirmation comment that never contains the key itself.
//!
//! # How it works
//!
//! 1. Resolve the pull request (by number, or through the merge commit)
//! 2. Search the body, then the comments, for a valid address on a domain
//!    that can receive mail
//! 3. Create the key with the provisioning service
//! 4. Deliver it by transactional email
//! 5. Confirm on the pull request with exactly one comment
//!
//! Every external service sits behind a trait (`HostingPlatform`,
//! `KeyProvisioner`, `EmailSender`, `MailDomainCheck`) so the pipeline runs
//! against fakes in tests.

pub mod config;
pub mod deliverability;
pub mod error;
pub mod github;
pub mod locator;
pub mod notifier;
pub mod pipeline;
pub mod provisioner;
pub mod validator;

pub use config::{Config, Environment, PullRequestTarget, RawEnvironment, RepoSlug};
pub use deliverability::{
    Deliverability, DnsMailDomainCheck, MailDomainCheck, SkipMailDomainCheck,
};
pub use error::{ConfigError, GitHubError, ProvisionError};
pub use github::{GitHubClient, HostingPlatform};
pub use locator::{EmailLocator, LocatedEmail};
pub use notifier::{DeliveryOutcome, EmailSender, SendGridClient};
pub use pipeline::{
    AbortReason, NoEmailPolicy, Pipeline, RunOutcome, RunReport, Stage, EXIT_FAILURE,
    EXIT_NO_EMAIL, EXIT_SUCCESS,
};
pub use provisioner::{KeyProvisioner, ProvisionedCredential, ProvisioningClient};
pub use validator::{EmailRejection, ValidatedEmail};
