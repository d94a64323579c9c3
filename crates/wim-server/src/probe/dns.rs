use hickory_resolver::{ResolveError, TokioResolver};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::timeout;

/// Records gathered for one name. `errors` counts lookups that failed for a
/// reason other than "no such record".
#[derive(Debug, Default)]
pub struct DnsRecords {
    pub ip_addresses: Vec<IpAddr>,
    pub nameservers: Vec<String>,
    pub mail_servers: Vec<String>,
    pub soa_nameservers: Vec<String>,
    pub soa_email: Option<String>,
    pub answered: usize,
    pub errors: usize,
}

impl DnsRecords {
    /// Every lookup hit a resolver or network error: the name's state is
    /// unknown rather than "does not resolve".
    pub fn inconclusive(&self) -> bool {
        self.answered == 0 && self.errors > 0
    }

    fn record<T>(&mut self, name: &str, kind: &str, result: LookupResult<T>) -> Option<T> {
        match result {
            Ok(Ok(answer)) => {
                self.answered += 1;
                Some(answer)
            }
            Ok(Err(e)) if is_missing(&e) => {
                self.answered += 1;
                None
            }
            Ok(Err(e)) => {
                tracing::debug!(name, kind, error = %e, "DNS lookup failed");
                self.errors += 1;
                None
            }
            Err(_) => {
                tracing::debug!(name, kind, "DNS lookup timed out");
                self.errors += 1;
                None
            }
        }
    }
}

type LookupResult<T> = Result<Result<T, ResolveError>, tokio::time::error::Elapsed>;

fn is_missing(e: &ResolveError) -> bool {
    e.is_no_records_found() || e.is_nx_domain()
}

/// Lower-cased DNS name without the root dot.
pub(crate) fn display_name(name: impl ToString) -> String {
    name.to_string().trim_end_matches('.').to_ascii_lowercase()
}

pub async fn lookup_all(resolver: &TokioResolver, name: &str, limit: Duration) -> DnsRecords {
    let mut records = DnsRecords::default();

    let v4 = timeout(limit, resolver.ipv4_lookup(name)).await;
    if let Some(answer) = records.record(name, "A", v4) {
        records
            .ip_addresses
            .extend(answer.iter().map(|a| IpAddr::V4(a.0)));
    }

    let v6 = timeout(limit, resolver.ipv6_lookup(name)).await;
    if let Some(answer) = records.record(name, "AAAA", v6) {
        records
            .ip_addresses
            .extend(answer.iter().map(|a| IpAddr::V6(a.0)));
    }

    let ns = timeout(limit, resolver.ns_lookup(name)).await;
    if let Some(answer) = records.record(name, "NS", ns) {
        records.nameservers = answer.iter().map(|ns| display_name(&ns.0)).collect();
        records.nameservers.sort();
    }

    let mx = timeout(limit, resolver.mx_lookup(name)).await;
    if let Some(answer) = records.record(name, "MX", mx) {
        let mut exchanges: Vec<(u16, String)> = answer
            .iter()
            .map(|mx| (mx.preference(), display_name(mx.exchange())))
            .collect();
        exchanges.sort();
        records.mail_servers = exchanges.into_iter().map(|(_, host)| host).collect();
    }

    let soa = timeout(limit, resolver.soa_lookup(name)).await;
    if let Some(answer) = records.record(name, "SOA", soa) {
        if let Some(soa) = answer.iter().next() {
            records.soa_nameservers = vec![display_name(soa.mname())];
            records.soa_email = Some(soa_rname_to_email(&display_name(soa.rname())));
        }
    }

    records
}

/// `hostmaster.example.com` -> `hostmaster@example.com`. A `\.` in the
/// local part is a literal dot, not the label separator.
fn soa_rname_to_email(rname: &str) -> String {
    let mut escaped = false;
    let split = rname.char_indices().find_map(|(i, c)| match c {
        _ if escaped => {
            escaped = false;
            None
        }
        '\\' => {
            escaped = true;
            None
        }
        '.' => Some(i),
        _ => None,
    });
    match split {
        Some(i) => format!("{}@{}", rname[..i].replace('\\', ""), &rname[i + 1..]),
        None => rname.replace('\\', ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soa_rname_becomes_mailbox() {
        assert_eq!(soa_rname_to_email("hostmaster.example.com"), "hostmaster@example.com");
        assert_eq!(soa_rname_to_email("root"), "root");
    }

    #[test]
    fn escaped_dot_stays_in_the_mailbox() {
        assert_eq!(
            soa_rname_to_email("john\\.doe.example.com"),
            "john.doe@example.com"
        );
    }

    #[test]
    fn names_drop_root_dot() {
        assert_eq!(display_name("NS1.Example.NET."), "ns1.example.net");
    }

    #[test]
    fn all_errors_is_inconclusive() {
        let records = DnsRecords {
            errors: 5,
            ..Default::default()
        };
        assert!(records.inconclusive());
        assert!(!DnsRecords::default().inconclusive());
    }
}
