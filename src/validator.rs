//! Email address validation and normalization
//!
//! Syntax is parsed by `email_address` (unquoted dot-atom local part, no
//! display text, no domain literals, at least one dot in the domain). On top
//! of that the domain must be an LDH hostname with an alphabetic TLD and not
//! a special-use name, and it must be able to receive mail. The domain is
//! lower-cased; the local part is kept as written.

use std::fmt;

use email_address::{EmailAddress, Options};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::deliverability::{Deliverability, MailDomainCheck};

const MAX_ADDRESS_LEN: usize = 254;

/// Domains reserved for special use (RFC 6761 and friends)
const SPECIAL_USE_DOMAINS: &[&str] = &["arpa", "invalid", "local", "localhost", "onion", "test"];

/// An address that passed validation, in canonical form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ValidatedEmail(String);

impl ValidatedEmail {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn local_part(&self) -> &str {
        self.0.rsplit_once('@').map(|(l, _)| l).unwrap_or("")
    }

    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map(|(_, d)| d).unwrap_or("")
    }
}

impl fmt::Display for ValidatedEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ValidatedEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailRejection {
    #[error("the address is empty")]
    Empty,
    #[error("the address is too long ({0} characters, at most 254)")]
    TooLong(usize),
    #[error("the address must contain an @ sign")]
    AtSign,
    #[error("there must be something before the @ sign")]
    EmptyLocalPart,
    #[error("the part before the @ sign is too long")]
    LocalPartTooLong,
    #[error("quoted local parts are not accepted")]
    QuotedLocalPart,
    #[error("there must be something after the @ sign")]
    EmptyDomain,
    #[error("the domain name is too long")]
    DomainTooLong,
    #[error("the domain name must contain a period")]
    SingleLabelDomain,
    #[error("the domain name contains an invalid character: {0:?}")]
    InvalidDomainCharacter(char),
    #[error("a domain label cannot start or end with a hyphen: {0}")]
    LabelHyphen(String),
    #[error("the top-level domain {0} is not valid")]
    InvalidTld(String),
    #[error("the domain name {0} is a special-use or reserved name that cannot receive mail")]
    SpecialUseDomain(String),
    #[error("the address is not valid: {0}")]
    Malformed(String),
    #[error("the domain cannot receive mail: {0}")]
    Undeliverable(String),
}

impl From<email_address::Error> for EmailRejection {
    fn from(error: email_address::Error) -> Self {
        use email_address::Error;

        match error {
            Error::MissingSeparator => Self::AtSign,
            Error::LocalPartEmpty => Self::EmptyLocalPart,
            Error::LocalPartTooLong => Self::LocalPartTooLong,
            Error::DomainEmpty => Self::EmptyDomain,
            Error::DomainTooLong => Self::DomainTooLong,
            Error::DomainTooFew => Self::SingleLabelDomain,
            other => Self::Malformed(other.to_string()),
        }
    }
}

fn parse_options() -> Options {
    Options::default()
        .with_required_tld()
        .without_domain_literal()
        .without_display_text()
}

/// Hostname policy on an already parsed domain; returns it lower-cased
fn check_domain(domain: &str) -> Result<String, EmailRejection> {
    let domain = domain.to_ascii_lowercase();
    if !domain.contains('.') {
        return Err(EmailRejection::SingleLabelDomain);
    }

    for label in domain.split('.') {
        if let Some(c) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        {
            return Err(EmailRejection::InvalidDomainCharacter(c));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(EmailRejection::LabelHyphen(label.to_string()));
        }
    }

    let tld = domain.rsplit('.').next().unwrap_or("");
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(EmailRejection::InvalidTld(tld.to_string()));
    }

    // The domain itself or any parent of it
    let reserved = SPECIAL_USE_DOMAINS.iter().any(|special| {
        domain == *special || domain.ends_with(&format!(".{}", special))
    });
    if reserved {
        return Err(EmailRejection::SpecialUseDomain(domain));
    }

    Ok(domain)
}

/// Structural validation and normalization, naming the reason on failure
pub fn check(candidate: &str) -> Result<ValidatedEmail, EmailRejection> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return Err(EmailRejection::Empty);
    }
    if candidate.len() > MAX_ADDRESS_LEN {
        return Err(EmailRejection::TooLong(candidate.len()));
    }

    let parsed = EmailAddress::parse_with_options(candidate, parse_options())?;
    let local = parsed.local_part();
    if local.starts_with('"') {
        return Err(EmailRejection::QuotedLocalPart);
    }
    let domain = check_domain(parsed.domain())?;

    Ok(ValidatedEmail(format!("{}@{}", local, domain)))
}

/// Structural validation followed by the deliverability lookup. A lookup
/// that cannot complete does not reject the address.
pub async fn verify(
    candidate: &str,
    domains: &dyn MailDomainCheck,
) -> Result<ValidatedEmail, EmailRejection> {
    let email = check(candidate)?;

    match domains.check(email.domain()).await {
        Deliverability::Deliverable => Ok(email),
        Deliverability::Unknown(reason) => {
            warn!(
                "Could not verify that {} receives mail ({}), accepting",
                email.domain(),
                reason
            );
            Ok(email)
        }
        Deliverability::Undeliverable(reason) => Err(EmailRejection::Undeliverable(reason)),
    }
}

/// Validate a candidate, logging the outcome. Rejections are not errors
/// for the caller: the search simply moves on.
pub async fn validate(candidate: &str, domains: &dyn MailDomainCheck) -> Option<ValidatedEmail> {
    match verify(candidate, domains).await {
        Ok(email) => {
            info!("Email validation passed: {}", email);
            Some(email)
        }
        Err(reason) => {
            warn!("Email validation failed for {:?}: {}", candidate, reason);
            None
        }
    }
}
