//! Live enrichment source: DNS through hickory, the TLS leaf through
//! tokio-rustls and the front page through reqwest.
//!
//! WHOIS is not queried, so registration facts always come back empty and
//! the stored registration data is kept.

pub mod dns;
pub mod http;
pub mod tls;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use std::time::Duration;
use tokio_rustls::TlsConnector;
use wim_common::facts::RawFacts;
use wim_reconcile::{EnrichmentSource, FetchError};

use crate::config::ProbeConfig;

pub struct ProbeSource {
    resolver: TokioResolver,
    connector: TlsConnector,
    http: http::HttpProbe,
    port: u16,
    timeout: Duration,
}

impl ProbeSource {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let resolver = TokioResolver::builder_tokio()
            .context("Failed to create DNS resolver")?
            .build();
        let http = http::HttpProbe::new(&config.user_agent, timeout)
            .context("Failed to build HTTP client")?;
        Ok(Self {
            resolver,
            connector: tls::connector()?,
            http,
            port: config.port,
            timeout,
        })
    }
}

#[async_trait]
impl EnrichmentSource for ProbeSource {
    fn name(&self) -> &str {
        "probe"
    }

    async fn fetch(&self, asset_name: &str) -> Result<RawFacts, FetchError> {
        let records = dns::lookup_all(&self.resolver, asset_name, self.timeout).await;
        if records.inconclusive() {
            return Err(FetchError::transient(
                asset_name,
                format!("all {} DNS lookups failed", records.errors),
            ));
        }

        let mut facts = RawFacts {
            nameservers: records.nameservers,
            mail_servers: records.mail_servers,
            soa_nameservers: records.soa_nameservers,
            soa_email: records.soa_email,
            ip_addresses: records.ip_addresses,
            ..Default::default()
        };
        if facts.ip_addresses.is_empty() {
            return Ok(facts);
        }

        for ip in &facts.ip_addresses {
            match tls::observe(&self.connector, asset_name, *ip, self.port, self.timeout).await {
                Ok(observed) => {
                    facts.certificate = Some(observed.certificate);
                    facts.tls_version = observed.tls_version;
                    break;
                }
                Err(e) => {
                    tracing::debug!(asset = asset_name, ip = %ip, error = %e, "No TLS certificate");
                }
            }
        }

        let web = self.http.observe(asset_name).await;
        facts.http_response_code = web.response_code;
        facts.redirect_url = web.redirect_url;
        facts.redirect_target_ok = web.redirect_target_ok;

        tracing::debug!(
            asset = asset_name,
            ips = facts.ip_addresses.len(),
            certificate = facts.certificate.is_some(),
            http_status = ?facts.http_response_code,
            "Probe finished"
        );
        Ok(facts)
    }
}
