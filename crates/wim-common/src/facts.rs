use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Raw technical facts an enrichment source reports for one asset name.
///
/// Every field is optional: `None` (or an empty list) means the source could
/// not determine the value, and the stored value is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFacts {
    // Registration (WHOIS)
    pub registrar: Option<String>,
    pub registrar_iana_id: Option<u32>,
    pub registrant_org: Option<String>,
    pub domain_statuses: Vec<String>,
    pub whois_servers: Vec<String>,
    pub date_first_registered: Option<NaiveDate>,
    pub date_expiry: Option<NaiveDate>,

    // DNS
    pub nameservers: Vec<String>,
    pub mail_servers: Vec<String>,
    pub soa_nameservers: Vec<String>,
    pub soa_email: Option<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub cnames: Vec<String>,

    // TLS
    pub certificate: Option<CertificateFacts>,
    pub tls_version: Option<String>,

    // HTTP
    pub http_response_code: Option<u16>,
    pub redirect_url: Option<String>,
    /// Whether the redirect target answered with a success status.
    pub redirect_target_ok: Option<bool>,
}

impl RawFacts {
    /// True when the name resolved to at least one address or nameserver.
    ///
    /// # Examples
    ///
    /// ```
    /// use wim_common::facts::RawFacts;
    ///
    /// let mut facts = RawFacts::default();
    /// assert!(!facts.resolves());
    /// facts.nameservers.push("ns1.example.net".into());
    /// assert!(facts.resolves());
    /// ```
    pub fn resolves(&self) -> bool {
        !self.ip_addresses.is_empty() || !self.nameservers.is_empty()
    }

    pub fn has_registration(&self) -> bool {
        self.registrar.is_some()
            || self.date_expiry.is_some()
            || self.date_first_registered.is_some()
    }
}

/// A TLS leaf certificate as observed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateFacts {
    pub hash_sha1: String,
    pub hash_sha256: Option<String>,
    pub subject_dn: String,
    pub subject_cn: Option<String>,
    pub subject_org: Option<String>,
    pub san: Vec<String>,
    pub issuer_dn: String,
    pub issuer_cn: Option<String>,
    pub issuer_org: Option<String>,
    pub date_issued: Option<DateTime<Utc>>,
    pub date_expiration: DateTime<Utc>,
    pub signing_algorithm: Option<String>,
    pub key_type: Option<String>,
    pub key_bitlength: Option<u32>,
    pub is_wildcard: bool,
    pub is_self_signed: bool,
}
