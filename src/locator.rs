//! Email locator
//!
//! Searches ordered text sources (pull request body, then comments) for the
//! contributor's address. Each source gets one attempt: the matchers run in
//! priority order, the first hit is validated (structure, then mail-domain
//! deliverability), and on rejection the search moves on to the next source
//! rather than the next matcher.

use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::deliverability::MailDomainCheck;
use crate::validator::{self, ValidatedEmail};

/// Local part, `@`, domain, `.`, TLD of two or more letters
const ADDRESS: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

lazy_static! {
    static ref LABELED_FIELD: Regex = compile(&format!(r"\*\*Email\*\*:\s*({})", ADDRESS));
    static ref LOOSE_LABEL: Regex = compile(&format!(r"(?i:email):\s*({})", ADDRESS));
    static ref BARE_ADDRESS: Regex = compile(&format!(r"\b({})\b", ADDRESS));
}

fn compile(pattern: &str) -> Regex {
    // Patterns are constants, exercised by the tests below
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid email pattern {}: {}", pattern, e))
}

/// A pure matcher: finds at most one candidate address in a text
#[derive(Clone, Copy)]
pub struct EmailMatcher {
    pub name: &'static str,
    find: fn(&str) -> Option<&str>,
}

impl EmailMatcher {
    pub fn new(name: &'static str, find: fn(&str) -> Option<&str>) -> Self {
        Self { name, find }
    }

    pub fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        (self.find)(text)
    }
}

impl fmt::Debug for EmailMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailMatcher").field("name", &self.name).finish()
    }
}

fn first_capture<'a>(regex: &Regex, text: &'a str) -> Option<&'a str> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// `**Email**: addr`, the field from the pull request template
pub fn labeled_field(text: &str) -> Option<&str> {
    first_capture(&LABELED_FIELD, text)
}

/// `email: addr` with any capitalization of the label
pub fn loose_label(text: &str) -> Option<&str> {
    first_capture(&LOOSE_LABEL, text)
}

/// Any address-shaped token
pub fn bare_address(text: &str) -> Option<&str> {
    first_capture(&BARE_ADDRESS, text)
}

/// Matchers in priority order
pub fn default_matchers() -> Vec<EmailMatcher> {
    vec![
        EmailMatcher::new("labeled-field", labeled_field),
        EmailMatcher::new("loose-label", loose_label),
        EmailMatcher::new("bare-address", bare_address),
    ]
}

/// Where a piece of text came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    Body,
    Comment { author: String },
}

impl fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body => write!(f, "pull request body"),
            Self::Comment { author } => write!(f, "comment by {}", author),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextSource<'a> {
    pub origin: SourceOrigin,
    pub text: &'a str,
}

impl<'a> TextSource<'a> {
    pub fn body(text: &'a str) -> Self {
        Self {
            origin: SourceOrigin::Body,
            text,
        }
    }

    pub fn comment(author: impl Into<String>, text: &'a str) -> Self {
        Self {
            origin: SourceOrigin::Comment {
                author: author.into(),
            },
            text,
        }
    }
}

/// Unvalidated address as it appeared in the text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailCandidate<'a> {
    pub address: &'a str,
    pub matcher: &'static str,
}

/// A validated address and the source it was found in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedEmail {
    pub email: ValidatedEmail,
    pub origin: SourceOrigin,
    pub matcher: &'static str,
}

#[derive(Clone)]
pub struct EmailLocator {
    matchers: Vec<EmailMatcher>,
    domains: Arc<dyn MailDomainCheck>,
}

impl EmailLocator {
    pub fn new(domains: Arc<dyn MailDomainCheck>) -> Self {
        Self::with_matchers(default_matchers(), domains)
    }

    pub fn with_matchers(matchers: Vec<EmailMatcher>, domains: Arc<dyn MailDomainCheck>) -> Self {
        Self { matchers, domains }
    }

    pub fn matchers(&self) -> &[EmailMatcher] {
        &self.matchers
    }

    /// First matcher to hit wins; later matchers are not consulted
    pub fn extract<'a>(&self, text: &'a str) -> Option<EmailCandidate<'a>> {
        self.matchers.iter().find_map(|m| {
            m.find(text).map(|address| EmailCandidate {
                address,
                matcher: m.name,
            })
        })
    }

    /// One candidate per source; returns the first that validates
    pub async fn locate<'a, I>(&self, sources: I) -> Option<LocatedEmail>
    where
        I: IntoIterator<Item = TextSource<'a>>,
    {
        for source in sources {
            let Some(candidate) = self.extract(source.text) else {
                debug!("No email candidate in {}", source.origin);
                continue;
            };

            info!(
                "Found email in {} ({}): {}",
                source.origin, candidate.matcher, candidate.address
            );

            match validator::validate(candidate.address, &*self.domains).await {
                Some(email) => {
                    return Some(LocatedEmail {
                        email,
                        origin: source.origin,
                        matcher: candidate.matcher,
                    })
                }
                None => warn!("Email in {} is invalid, continuing search", source.origin),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliverability::testing::StaticMailDomains;

    fn locator() -> EmailLocator {
        EmailLocator::new(Arc::new(StaticMailDomains::open()))
    }

    #[test]
    fn test_labeled_field_wins() {
        let locator = locator();
        let text = "contact: other@example.net\n**Email**: a@b.co\nemail: third@example.org";
        let candidate = locator.extract(text).unwrap();
        assert_eq!(candidate.address, "a@b.co");
        assert_eq!(candidate.matcher, "labeled-field");
    }

    #[test]
    fn test_loose_label_is_case_insensitive() {
        assert_eq!(loose_label("EMAIL: dev@example.com"), Some("dev@example.com"));
        assert_eq!(loose_label("my email:   x.y@corp.io"), Some("x.y@corp.io"));
        assert_eq!(loose_label("dev@example.com"), None);

        let candidate = locator().extract("Email: dev@example.com").unwrap();
        assert_eq!(candidate.matcher, "loose-label");
    }

    #[test]
    fn test_bare_address_is_last_resort() {
        let locator = locator();
        let candidate = locator
            .extract("Reach me at someone+tag@mail.example.org, thanks!")
            .unwrap();
        assert_eq!(candidate.address, "someone+tag@mail.example.org");
        assert_eq!(candidate.matcher, "bare-address");

        assert_eq!(labeled_field("Reach me at someone@example.org"), None);
        assert_eq!(loose_label("Reach me at someone@example.org"), None);
    }

    #[test]
    fn test_no_candidate() {
        assert!(locator().extract("no address here @ all").is_none());
        assert!(locator().extract("").is_none());
    }

    #[test]
    fn test_labeled_field_tolerates_whitespace() {
        assert_eq!(
            labeled_field("**Email**:\n  dev@example.com"),
            Some("dev@example.com")
        );
    }

    #[tokio::test]
    async fn test_invalid_body_falls_through_to_comment() {
        let locator = locator();
        let sources = vec![
            TextSource::body("**Email**: dev..x@example.com\nalso good@example.com"),
            TextSource::comment("alice", "nothing here"),
            TextSource::comment("bob", "email: Bob@Example.COM"),
        ];

        let located = locator.locate(sources).await.unwrap();
        assert_eq!(located.email.as_str(), "Bob@example.com");
        assert_eq!(
            located.origin,
            SourceOrigin::Comment {
                author: "bob".to_string()
            }
        );
        assert_eq!(located.matcher, "loose-label");
    }

    #[tokio::test]
    async fn test_body_wins_over_comments() {
        let located = locator()
            .locate(vec![
                TextSource::body("Thanks! **Email**: dev@example.com"),
                TextSource::comment("alice", "email: other@example.com"),
            ])
            .await
            .unwrap();
        assert_eq!(located.email.as_str(), "dev@example.com");
        assert_eq!(located.origin, SourceOrigin::Body);
    }

    #[tokio::test]
    async fn test_exhausted_sources() {
        let located = locator()
            .locate(vec![
                TextSource::body("no address"),
                TextSource::comment("alice", "email: dev@printer.local"),
            ])
            .await;
        assert!(located.is_none());
    }

    #[tokio::test]
    async fn test_undeliverable_domain_moves_to_next_source() {
        let locator = EmailLocator::new(Arc::new(StaticMailDomains::rejecting(&[
            "this-domain-does-not-exist-zq9x7.com",
        ])));

        let located = locator
            .locate(vec![
                TextSource::body("**Email**: dev@this-domain-does-not-exist-zq9x7.com"),
                TextSource::comment("dev", "email: dev@example.com"),
            ])
            .await
            .unwrap();
        assert_eq!(located.email.as_str(), "dev@example.com");

        let located = locator
            .locate(vec![TextSource::body(
                "**Email**: dev@this-domain-does-not-exist-zq9x7.com",
            )])
            .await;
        assert!(located.is_none());
    }

    #[test]
    fn test_custom_matcher_order() {
        let locator = EmailLocator::with_matchers(
            vec![EmailMatcher::new("bare-address", bare_address)],
            Arc::new(StaticMailDomains::open()),
        );
        let candidate = locator.extract("**Email**: a@b.co").unwrap();
        assert_eq!(candidate.matcher, "bare-address");
        assert_eq!(locator.matchers().len(), 1);
    }

    #[test]
    fn test_source_origin_display() {
        assert_eq!(SourceOrigin::Body.to_string(), "pull request body");
        assert_eq!(
            TextSource::comment("octocat", "").origin.to_string(),
            "comment by octocat"
        );
    }
}
