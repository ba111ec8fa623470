//! Mail-domain deliverability
//!
//! A domain can receive mail when it publishes a non-null MX record or,
//! lacking MX records, resolves to an address (the RFC 5321 implicit MX).
//! A lookup that fails for any other reason is `Unknown`, not a rejection.

use async_trait::async_trait;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deliverability {
    Deliverable,
    /// The domain cannot receive mail
    Undeliverable(String),
    /// The lookup itself failed (timeout, unreachable resolver)
    Unknown(String),
}

#[async_trait]
pub trait MailDomainCheck: Send + Sync {
    async fn check(&self, domain: &str) -> Deliverability;
}

/// DNS-backed check using the system resolver configuration
pub struct DnsMailDomainCheck {
    resolver: TokioAsyncResolver,
}

impl DnsMailDomainCheck {
    pub fn from_system_conf() -> Result<Self, ResolveError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        info!("DNS deliverability check initialized");
        Ok(Self { resolver })
    }
}

fn no_records(error: &ResolveError) -> bool {
    matches!(error.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

#[async_trait]
impl MailDomainCheck for DnsMailDomainCheck {
    async fn check(&self, domain: &str) -> Deliverability {
        // Fully qualified: resolver search domains must not apply
        let fqdn = format!("{}.", domain.trim_end_matches('.'));

        match self.resolver.mx_lookup(fqdn.as_str()).await {
            Ok(lookup) => {
                let mut records = lookup.iter().peekable();
                if records.peek().is_some() {
                    if records.any(|mx| !mx.exchange().is_root()) {
                        debug!("{} has MX records", domain);
                        return Deliverability::Deliverable;
                    }
                    return Deliverability::Undeliverable(format!(
                        "{} publishes a null MX record",
                        domain
                    ));
                }
            }
            Err(e) if no_records(&e) => {}
            Err(e) => return Deliverability::Unknown(e.to_string()),
        }

        match self.resolver.lookup_ip(fqdn.as_str()).await {
            Ok(ips) if ips.iter().next().is_some() => {
                debug!("{} has no MX records but resolves to an address", domain);
                Deliverability::Deliverable
            }
            Ok(_) => Deliverability::Undeliverable(format!("{} has no MX or address records", domain)),
            Err(e) if no_records(&e) => {
                Deliverability::Undeliverable(format!("{} has no MX or address records", domain))
            }
            Err(e) => Deliverability::Unknown(e.to_string()),
        }
    }
}

/// Used when `validation.check_deliverability` is off
pub struct SkipMailDomainCheck;

#[async_trait]
impl MailDomainCheck for SkipMailDomainCheck {
    async fn check(&self, _domain: &str) -> Deliverability {
        Deliverability::Unknown("deliverability check disabled".to_string())
    }
}
