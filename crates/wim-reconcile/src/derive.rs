//! Status derivation: maps freshly fetched facts onto an asset's status set.
//!
//! Everything here is pure. The caller supplies `now`, so identical inputs
//! always yield identical outputs.

use chrono::{DateTime, NaiveDate, Utc};
use wim_common::facts::RawFacts;
use wim_common::types::{AssetFacts, LifecycleStatus, OpsStatus, RedirectHealth, WebsiteStatus};

pub const DEFAULT_UNREACHABLE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("certificate {hash} expires at {expires} before it was issued at {issued}")]
    CertificateValidity {
        hash: String,
        issued: DateTime<Utc>,
        expires: DateTime<Utc>,
    },

    #[error("registration expires on {expiry} before first registration on {registered}")]
    RegistrationDates {
        registered: NaiveDate,
        expiry: NaiveDate,
    },

    #[error("HTTP response code {0} is outside 100..=599")]
    ResponseCode(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationPolicy {
    /// Consecutive unreachable passes before an asset is demoted.
    pub unreachable_threshold: u32,
}

impl Default for DerivationPolicy {
    fn default() -> Self {
        Self {
            unreachable_threshold: DEFAULT_UNREACHABLE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedStatus {
    pub facts: AssetFacts,
    /// False when `facts` equals the input, so the status write can be skipped.
    pub changed: bool,
}

/// Derives the new status set for an asset from its persisted state and the
/// facts fetched this pass.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use wim_common::facts::RawFacts;
/// use wim_common::types::{AssetFacts, LifecycleStatus};
/// use wim_reconcile::derive::{derive, DerivationPolicy};
///
/// let existing = AssetFacts {
///     status: LifecycleStatus::New,
///     ops_status: None,
///     website_status: None,
///     redirect_health: None,
///     is_insecure: false,
///     unreachable_passes: 0,
/// };
/// let fetched = RawFacts {
///     nameservers: vec!["ns1.example.net".into()],
///     ..Default::default()
/// };
/// let derived = derive(&existing, &fetched, Utc::now(), &DerivationPolicy::default()).unwrap();
/// assert_eq!(derived.facts.status, LifecycleStatus::Active);
/// assert!(derived.changed);
/// ```
pub fn derive(
    existing: &AssetFacts,
    fetched: &RawFacts,
    now: DateTime<Utc>,
    policy: &DerivationPolicy,
) -> Result<DerivedStatus, ValidationError> {
    validate(fetched)?;

    let mut facts = if fetched.resolves() {
        reachable(existing, fetched)
    } else {
        unreachable(existing, fetched, policy)
    };
    // Domains carry no FQDN axes and never persist the flag.
    if existing.ops_status.is_some() {
        facts.is_insecure = insecure_flag(existing.is_insecure, fetched, now);
    }

    let changed = facts != *existing;
    Ok(DerivedStatus { facts, changed })
}

fn validate(fetched: &RawFacts) -> Result<(), ValidationError> {
    if let Some(cert) = &fetched.certificate {
        if let Some(issued) = cert.date_issued {
            if cert.date_expiration < issued {
                return Err(ValidationError::CertificateValidity {
                    hash: cert.hash_sha1.clone(),
                    issued,
                    expires: cert.date_expiration,
                });
            }
        }
    }
    if let (Some(registered), Some(expiry)) = (fetched.date_first_registered, fetched.date_expiry) {
        if expiry < registered {
            return Err(ValidationError::RegistrationDates { registered, expiry });
        }
    }
    if let Some(code) = fetched.http_response_code {
        if !(100..=599).contains(&code) {
            return Err(ValidationError::ResponseCode(code));
        }
    }
    Ok(())
}

fn reachable(existing: &AssetFacts, fetched: &RawFacts) -> AssetFacts {
    let status = match existing.status {
        LifecycleStatus::New | LifecycleStatus::Decommissioning => LifecycleStatus::Active,
        other => other,
    };
    AssetFacts {
        status,
        ops_status: existing.ops_status.map(|current| ops_status(current, fetched)),
        website_status: existing
            .website_status
            .map(|current| website_status(current, fetched.http_response_code)),
        redirect_health: existing.redirect_health.map(|current| {
            redirect_health(current, fetched.http_response_code, fetched.redirect_target_ok)
        }),
        is_insecure: existing.is_insecure,
        unreachable_passes: 0,
    }
}

/// Nothing resolved. Status only moves once the streak reaches the
/// threshold; before that only the counter advances.
fn unreachable(existing: &AssetFacts, fetched: &RawFacts, policy: &DerivationPolicy) -> AssetFacts {
    let passes = existing.unreachable_passes.saturating_add(1);
    let mut facts = AssetFacts {
        unreachable_passes: passes,
        ..existing.clone()
    };
    if passes < policy.unreachable_threshold.max(1) {
        return facts;
    }

    if existing.status != LifecycleStatus::Archived {
        facts.status = LifecycleStatus::Decommissioning;
    }
    let fallback = if fetched.has_registration() {
        OpsStatus::Whois
    } else {
        OpsStatus::Unknown
    };
    facts.ops_status = existing.ops_status.map(|_| fallback);
    facts.website_status = existing.website_status.map(|_| WebsiteStatus::Decommissioned);
    facts
}

/// Technical status from DNS and whether the host answers HTTP at all.
fn ops_status(current: OpsStatus, fetched: &RawFacts) -> OpsStatus {
    match fetched.http_response_code {
        Some(300..=399) => OpsStatus::Redirect,
        Some(_) if current == OpsStatus::Parked => OpsStatus::Parked,
        Some(_) => OpsStatus::Active,
        None if !fetched.ip_addresses.is_empty() => OpsStatus::DnsHostDown,
        None if !fetched.nameservers.is_empty() => OpsStatus::Dns,
        None => current,
    }
}

/// Website status from the HTTP response code only. Manually curated
/// classifications of a live site are kept while it keeps answering.
fn website_status(current: WebsiteStatus, code: Option<u16>) -> WebsiteStatus {
    match code {
        Some(200..=299) => match current {
            WebsiteStatus::CustomSplash
            | WebsiteStatus::DomainPointer
            | WebsiteStatus::DefaultServer
            | WebsiteStatus::NonWebsite => current,
            _ => WebsiteStatus::Valid,
        },
        Some(400..=599) => WebsiteStatus::Broken,
        _ => current,
    }
}

fn redirect_health(
    current: RedirectHealth,
    code: Option<u16>,
    target_ok: Option<bool>,
) -> RedirectHealth {
    match code {
        Some(300..=399) => match target_ok {
            Some(true) => RedirectHealth::Good,
            Some(false) => RedirectHealth::Bad,
            None => RedirectHealth::Unknown,
        },
        Some(_) => RedirectHealth::Unknown,
        None => current,
    }
}

/// An expired certificate flags the asset; with no certificate observed the
/// previous flag stands.
fn insecure_flag(current: bool, fetched: &RawFacts, now: DateTime<Utc>) -> bool {
    match &fetched.certificate {
        Some(cert) => cert.date_expiration < now,
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wim_common::facts::CertificateFacts;

    fn fqdn_facts(status: LifecycleStatus) -> AssetFacts {
        AssetFacts {
            status,
            ops_status: Some(OpsStatus::Unknown),
            website_status: Some(WebsiteStatus::Unknown),
            redirect_health: Some(RedirectHealth::Unknown),
            is_insecure: false,
            unreachable_passes: 0,
        }
    }

    fn live_site() -> RawFacts {
        RawFacts {
            ip_addresses: vec!["192.0.2.1".parse().unwrap()],
            http_response_code: Some(200),
            ..Default::default()
        }
    }

    fn certificate(issued: DateTime<Utc>, expires: DateTime<Utc>) -> CertificateFacts {
        CertificateFacts {
            hash_sha1: "ab12".into(),
            hash_sha256: None,
            subject_dn: "CN=www.example.com".into(),
            subject_cn: Some("www.example.com".into()),
            subject_org: None,
            san: vec![],
            issuer_dn: "CN=Test CA".into(),
            issuer_cn: None,
            issuer_org: None,
            date_issued: Some(issued),
            date_expiration: expires,
            signing_algorithm: None,
            key_type: None,
            key_bitlength: None,
            is_wildcard: false,
            is_self_signed: false,
        }
    }

    #[test]
    fn derive_is_deterministic() {
        let now = Utc::now();
        let existing = fqdn_facts(LifecycleStatus::New);
        let policy = DerivationPolicy::default();
        let first = derive(&existing, &live_site(), now, &policy).unwrap();
        let second = derive(&existing, &live_site(), now, &policy).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn live_site_becomes_active_and_valid() {
        let derived = derive(
            &fqdn_facts(LifecycleStatus::New),
            &live_site(),
            Utc::now(),
            &DerivationPolicy::default(),
        )
        .unwrap();
        assert!(derived.changed);
        assert_eq!(derived.facts.status, LifecycleStatus::Active);
        assert_eq!(derived.facts.ops_status, Some(OpsStatus::Active));
        assert_eq!(derived.facts.website_status, Some(WebsiteStatus::Valid));
    }

    #[test]
    fn single_unreachable_pass_keeps_status() {
        let mut existing = fqdn_facts(LifecycleStatus::Active);
        existing.ops_status = Some(OpsStatus::Active);
        let derived = derive(
            &existing,
            &RawFacts::default(),
            Utc::now(),
            &DerivationPolicy::default(),
        )
        .unwrap();
        assert_eq!(derived.facts.status, LifecycleStatus::Active);
        assert_eq!(derived.facts.ops_status, Some(OpsStatus::Active));
        assert_eq!(derived.facts.unreachable_passes, 1);
        // Only the streak counter moved.
        assert!(derived.changed);
    }

    #[test]
    fn threshold_of_unreachable_passes_decommissions() {
        let mut existing = fqdn_facts(LifecycleStatus::Active);
        existing.unreachable_passes = 2;
        let fetched = RawFacts {
            registrar: Some("Example Registrar".into()),
            ..Default::default()
        };
        let derived = derive(&existing, &fetched, Utc::now(), &DerivationPolicy::default()).unwrap();
        assert_eq!(derived.facts.status, LifecycleStatus::Decommissioning);
        assert_eq!(derived.facts.ops_status, Some(OpsStatus::Whois));
        assert_eq!(derived.facts.website_status, Some(WebsiteStatus::Decommissioned));
        assert_eq!(derived.facts.unreachable_passes, 3);
    }

    #[test]
    fn archived_is_never_revived_or_demoted() {
        let mut existing = fqdn_facts(LifecycleStatus::Archived);
        let policy = DerivationPolicy::default();
        let derived = derive(&existing, &live_site(), Utc::now(), &policy).unwrap();
        assert_eq!(derived.facts.status, LifecycleStatus::Archived);

        existing.unreachable_passes = 10;
        let derived = derive(&existing, &RawFacts::default(), Utc::now(), &policy).unwrap();
        assert_eq!(derived.facts.status, LifecycleStatus::Archived);
    }

    #[test]
    fn expired_certificate_flags_without_demoting() {
        let now = Utc::now();
        let mut fetched = live_site();
        fetched.certificate = Some(certificate(now - Duration::days(100), now - Duration::days(1)));
        let derived = derive(
            &fqdn_facts(LifecycleStatus::Active),
            &fetched,
            now,
            &DerivationPolicy::default(),
        )
        .unwrap();
        assert!(derived.facts.is_insecure);
        assert_eq!(derived.facts.status, LifecycleStatus::Active);
    }

    #[test]
    fn redirect_and_website_axes_are_independent() {
        let mut existing = fqdn_facts(LifecycleStatus::Active);
        existing.website_status = Some(WebsiteStatus::DomainPointer);
        let fetched = RawFacts {
            ip_addresses: vec!["192.0.2.1".parse().unwrap()],
            http_response_code: Some(301),
            redirect_url: Some("https://www.example.com/".into()),
            redirect_target_ok: Some(false),
            ..Default::default()
        };
        let derived = derive(&existing, &fetched, Utc::now(), &DerivationPolicy::default()).unwrap();
        assert_eq!(derived.facts.ops_status, Some(OpsStatus::Redirect));
        assert_eq!(derived.facts.redirect_health, Some(RedirectHealth::Bad));
        assert_eq!(derived.facts.website_status, Some(WebsiteStatus::DomainPointer));
    }

    #[test]
    fn contradictory_facts_are_rejected() {
        let now = Utc::now();
        let mut fetched = live_site();
        fetched.certificate = Some(certificate(now, now - Duration::days(1)));
        let err = derive(
            &fqdn_facts(LifecycleStatus::Active),
            &fetched,
            now,
            &DerivationPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::CertificateValidity { .. }));

        let fetched = RawFacts {
            http_response_code: Some(42),
            ..live_site()
        };
        assert_eq!(
            derive(&fqdn_facts(LifecycleStatus::Active), &fetched, now, &DerivationPolicy::default()),
            Err(ValidationError::ResponseCode(42))
        );
    }

    #[test]
    fn domains_keep_fqdn_axes_empty() {
        let existing = AssetFacts {
            status: LifecycleStatus::New,
            ops_status: None,
            website_status: None,
            redirect_health: None,
            is_insecure: false,
            unreachable_passes: 0,
        };
        let derived = derive(&existing, &live_site(), Utc::now(), &DerivationPolicy::default()).unwrap();
        assert_eq!(derived.facts.ops_status, None);
        assert_eq!(derived.facts.website_status, None);
    }

    #[test]
    fn domain_with_expired_certificate_is_unchanged() {
        let now = Utc::now();
        let existing = AssetFacts {
            status: LifecycleStatus::Active,
            ops_status: None,
            website_status: None,
            redirect_health: None,
            is_insecure: false,
            unreachable_passes: 0,
        };
        let mut fetched = live_site();
        fetched.nameservers = vec!["ns1.example.net".into()];
        fetched.certificate = Some(certificate(now - Duration::days(100), now - Duration::days(1)));

        let derived = derive(&existing, &fetched, now, &DerivationPolicy::default()).unwrap();
        assert!(!derived.facts.is_insecure);
        assert!(!derived.changed);
    }
}
