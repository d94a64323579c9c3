use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::facts::CertificateFacts;

/// Declares a closed set of string-valued choices with `Display`/`FromStr`
/// round-tripping through the stored label.
macro_rules! choice_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant ),+
        }

        impl $name {
            /// The label persisted in storage.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok($name::$variant), )+
                    _ => Err(format!("unknown {}: {s}", stringify!($name))),
                }
            }
        }
    };
}

choice_enum! {
    /// Lifecycle status shared by domains and FQDNs.
    ///
    /// # Examples
    ///
    /// ```
    /// use wim_common::types::LifecycleStatus;
    ///
    /// let status: LifecycleStatus = "Decommissioning".parse().unwrap();
    /// assert_eq!(status, LifecycleStatus::Decommissioning);
    /// assert_eq!(LifecycleStatus::Archived.to_string(), "Archived");
    /// ```
    pub enum LifecycleStatus {
        New => "New",
        Active => "Active",
        Decommissioning => "Decommissioning",
        Archived => "Archived",
    }
}

choice_enum! {
    /// Confidence that a discovered asset is attributed to the right owner.
    pub enum AssetConfidence {
        Candidate => "Candidate",
        Confirmed => "Confirmed",
        Dismissed => "Dismissed",
    }
}

choice_enum! {
    pub enum OwnershipType {
        CompanyOwned => "Company-Owned",
        ProviderOwned => "Provider-Owned",
        Unknown => "Unknown",
    }
}

choice_enum! {
    /// Technical status of an FQDN, ordered roughly by how far up the stack
    /// the asset answers (registration, DNS, host, HTTP).
    pub enum OpsStatus {
        Unknown => "0-Unknown-Test",
        Whois => "1-Whois",
        Dns => "2-DNS",
        DnsHostDown => "2-DNS Host Server Down",
        Parked => "3-Parked",
        Redirect => "3-Redirect",
        Active => "5-Active",
        NotApplicable => "NA",
    }
}

choice_enum! {
    /// Operational status of the website served on an FQDN.
    pub enum WebsiteStatus {
        Unknown => "0-Unknown-Test",
        NonWebsite => "3-Live Non-Website Server",
        DefaultServer => "4-Live Default Webserver",
        Broken => "4-Live Broken Website",
        CustomSplash => "4-Live Custom Parked Website",
        Valid => "5-Live Valid Website",
        DomainPointer => "6-Live Domain WWW Pointer",
        Decommissioned => "9-Decommissioned",
        NotApplicable => "NA",
    }
}

choice_enum! {
    pub enum RedirectHealth {
        Good => "Good",
        Bad => "Bad",
        Unknown => "Unknown",
    }
}

choice_enum! {
    pub enum HostingArch {
        Hybrid => "Hybrid",
        OnPremise => "On-Premise",
        Saas => "SaaS",
        NotApplicable => "NA",
    }
}

choice_enum! {
    pub enum HostingEnv {
        Demonstration => "Demonstration",
        Development => "Development",
        Production => "Production",
        Qa => "QA",
        Staging => "Staging",
        Test => "Test",
        Training => "Training",
        BusinessContinuity => "BC-DR",
        NotApplicable => "NA",
    }
}

choice_enum! {
    /// The two kinds of inventory asset the pipeline reconciles.
    pub enum AssetKind {
        Domain => "domain",
        Fqdn => "fqdn",
    }
}

/// Registrar and DNS metadata captured for a root domain. Every field is free
/// text copied from the enrichment source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrarInfo {
    pub registrar: Option<String>,
    pub registrar_iana_id: Option<u32>,
    pub registrant_org: Option<String>,
    pub nameservers: Vec<String>,
    pub mail_servers: Vec<String>,
    pub whois_servers: Vec<String>,
    pub soa_nameservers: Vec<String>,
    pub soa_email: Option<String>,
    pub domain_statuses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    pub status: LifecycleStatus,
    pub confidence: AssetConfidence,
    pub ownership: OwnershipType,
    pub registrar: RegistrarInfo,
    pub date_expiry: Option<NaiveDate>,
    pub date_first_registered: Option<NaiveDate>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    /// Consecutive reconciliation passes in which the name did not resolve.
    pub unreachable_passes: u32,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fqdn {
    pub name: String,
    /// Parent root domain; unknown until the domain itself is discovered.
    pub domain: Option<String>,
    pub status: LifecycleStatus,
    pub ops_status: OpsStatus,
    pub website_status: WebsiteStatus,
    pub redirect_health: RedirectHealth,
    pub confidence: AssetConfidence,
    pub hosting_arch: HostingArch,
    pub hosting_env: HostingEnv,
    pub public_ip: Option<String>,
    pub a_record_ips: Vec<String>,
    pub cnames: Vec<String>,
    pub certificate_hash: Option<String>,
    pub tls_version: Option<String>,
    pub response_code: Option<u16>,
    pub redirect_url: Option<String>,
    pub software: Vec<String>,
    pub is_insecure: bool,
    pub is_risky: bool,
    pub is_compliance_required: bool,
    pub unreachable_passes: u32,
    pub last_recon_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted TLS certificate, keyed by `observed.hash_sha1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub observed: CertificateFacts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Certificate {
    pub fn hash_sha1(&self) -> &str {
        &self.observed.hash_sha1
    }

    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.observed.date_expiration < at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDomain {
    pub name: String,
    #[serde(default)]
    pub confidence: Option<AssetConfidence>,
    #[serde(default)]
    pub ownership: Option<OwnershipType>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFqdn {
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub confidence: Option<AssetConfidence>,
    #[serde(default)]
    pub hosting_arch: Option<HostingArch>,
    #[serde(default)]
    pub hosting_env: Option<HostingEnv>,
    #[serde(default)]
    pub software: Vec<String>,
    #[serde(default)]
    pub is_risky: bool,
    #[serde(default)]
    pub is_compliance_required: bool,
}

/// Identity of one asset across the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    pub kind: AssetKind,
    pub name: String,
}

impl AssetKey {
    pub fn domain(name: impl Into<String>) -> Self {
        Self {
            kind: AssetKind::Domain,
            name: name.into(),
        }
    }

    pub fn fqdn(name: impl Into<String>) -> Self {
        Self {
            kind: AssetKind::Fqdn,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for AssetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// The status-bearing state of an asset as the derivation engine sees it.
///
/// Domains carry only a lifecycle status, so the FQDN-specific axes are
/// `None` for them and stay `None` through derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFacts {
    pub status: LifecycleStatus,
    pub ops_status: Option<OpsStatus>,
    pub website_status: Option<WebsiteStatus>,
    pub redirect_health: Option<RedirectHealth>,
    pub is_insecure: bool,
    pub unreachable_passes: u32,
}

impl AssetFacts {
    pub fn for_domain(domain: &Domain) -> Self {
        Self {
            status: domain.status,
            ops_status: None,
            website_status: None,
            redirect_health: None,
            is_insecure: false,
            unreachable_passes: domain.unreachable_passes,
        }
    }

    pub fn for_fqdn(fqdn: &Fqdn) -> Self {
        Self {
            status: fqdn.status,
            ops_status: Some(fqdn.ops_status),
            website_status: Some(fqdn.website_status),
            redirect_health: Some(fqdn.redirect_health),
            is_insecure: fqdn.is_insecure,
            unreachable_passes: fqdn.unreachable_passes,
        }
    }
}

/// An asset selected for reconciliation together with its current state.
#[derive(Debug, Clone)]
pub struct AssetCandidate {
    pub key: AssetKey,
    pub facts: AssetFacts,
    pub last_scanned_at: Option<DateTime<Utc>>,
}

/// A pending write for one asset: freshly fetched facts, the scan timestamp,
/// and the new status set when derivation changed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetPatch {
    pub key: AssetKey,
    pub scanned_at: DateTime<Utc>,
    pub status: Option<AssetFacts>,
    pub facts: crate::facts::RawFacts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choice_labels_round_trip() {
        for status in [
            OpsStatus::Unknown,
            OpsStatus::Whois,
            OpsStatus::Dns,
            OpsStatus::DnsHostDown,
            OpsStatus::Parked,
            OpsStatus::Redirect,
            OpsStatus::Active,
            OpsStatus::NotApplicable,
        ] {
            let parsed: OpsStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(OwnershipType::CompanyOwned.as_str(), "Company-Owned");
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = "Retired".parse::<LifecycleStatus>().unwrap_err();
        assert!(err.contains("LifecycleStatus"));
    }

    #[test]
    fn serde_uses_stored_labels() {
        let json = serde_json::to_string(&WebsiteStatus::Valid).unwrap();
        assert_eq!(json, "\"5-Live Valid Website\"");
        let back: HostingEnv = serde_json::from_str("\"BC-DR\"").unwrap();
        assert_eq!(back, HostingEnv::BusinessContinuity);
    }

    #[test]
    fn asset_key_display() {
        assert_eq!(AssetKey::fqdn("www.example.com").to_string(), "fqdn:www.example.com");
    }

    #[test]
    fn asset_keys_order_domains_first() {
        let mut keys = std::collections::BTreeSet::new();
        keys.insert(AssetKey::fqdn("a.example.com"));
        keys.insert(AssetKey::domain("z.com"));
        keys.insert(AssetKey::domain("b.com"));
        let ordered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(ordered, ["domain:b.com", "domain:z.com", "fqdn:a.example.com"]);
    }
}
