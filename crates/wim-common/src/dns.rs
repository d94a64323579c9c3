use regex::Regex;
use std::sync::LazyLock;

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

static DNS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Za-z_-]+|\*)(\.[0-9A-Za-z_-]+)*\.?$").expect("static DNS pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DnsNameError {
    #[error("DNS name is empty")]
    Empty,

    #[error("DNS name '{0}' exceeds {MAX_NAME_LEN} characters")]
    TooLong(String),

    #[error("label '{label}' in '{name}' exceeds {MAX_LABEL_LEN} characters")]
    LabelTooLong { name: String, label: String },

    #[error(
        "'{0}': only alphanumeric characters, asterisks, hyphens, periods, and underscores are allowed in DNS names"
    )]
    InvalidCharacters(String),
}

/// Validates a DNS name and returns its canonical form (lowercase, no
/// trailing dot).
///
/// # Examples
///
/// ```
/// use wim_common::dns::normalize_dns_name;
///
/// assert_eq!(normalize_dns_name("WWW.Example.COM.").unwrap(), "www.example.com");
/// assert!(normalize_dns_name("bad name.com").is_err());
/// ```
pub fn normalize_dns_name(name: &str) -> Result<String, DnsNameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DnsNameError::Empty);
    }
    if !DNS_NAME.is_match(trimmed) {
        return Err(DnsNameError::InvalidCharacters(trimmed.to_string()));
    }

    let canonical = trimmed.trim_end_matches('.').to_ascii_lowercase();
    if canonical.len() > MAX_NAME_LEN {
        return Err(DnsNameError::TooLong(canonical));
    }
    if let Some(label) = canonical.split('.').find(|l| l.len() > MAX_LABEL_LEN) {
        return Err(DnsNameError::LabelTooLong {
            name: canonical.clone(),
            label: label.to_string(),
        });
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_wildcards_and_underscores() {
        assert_eq!(normalize_dns_name("*.example.com").unwrap(), "*.example.com");
        assert_eq!(
            normalize_dns_name("_dmarc.example.com").unwrap(),
            "_dmarc.example.com"
        );
    }

    #[test]
    fn rejects_empty_and_spaces() {
        assert_eq!(normalize_dns_name("  "), Err(DnsNameError::Empty));
        assert!(matches!(
            normalize_dns_name("exa mple.com"),
            Err(DnsNameError::InvalidCharacters(_))
        ));
        assert!(normalize_dns_name("example..com").is_err());
    }

    #[test]
    fn rejects_oversized_labels() {
        let name = format!("{}.com", "a".repeat(64));
        assert!(matches!(
            normalize_dns_name(&name),
            Err(DnsNameError::LabelTooLong { .. })
        ));
    }
}
