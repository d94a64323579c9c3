use async_trait::async_trait;
use std::time::Duration;
use wim_common::facts::RawFacts;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network-level failure worth retrying (connection reset, SERVFAIL, ...).
    #[error("transient failure fetching {name}: {reason}")]
    Transient { name: String, reason: String },

    /// The source rejected the name outright; retrying cannot help.
    #[error("permanent failure fetching {name}: {reason}")]
    Permanent { name: String, reason: String },

    #[error("fetching {name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },
}

impl FetchError {
    pub fn transient(name: &str, reason: impl ToString) -> Self {
        FetchError::Transient {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn permanent(name: &str, reason: impl ToString) -> Self {
        FetchError::Permanent {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Permanent { .. })
    }
}

/// External collaborator that reports technical facts for an asset name.
///
/// A successful fetch may still be mostly empty: a name that does not
/// resolve yields `RawFacts` with no addresses and no nameservers, which the
/// derivation engine treats as an unreachable pass. `Err` is reserved for
/// failures to ask at all.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn fetch(&self, asset_name: &str) -> Result<RawFacts, FetchError>;
}
