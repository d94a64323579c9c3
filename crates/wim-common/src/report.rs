use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AssetKey;

/// Where in the per-asset pipeline an asset dropped out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The enrichment source kept failing after all retry attempts.
    Fetch,
    /// Fetched facts were contradictory; the asset was skipped.
    Validation,
    /// The chunk holding the asset's patch could not be committed.
    Commit,
    /// The run was cancelled before the asset was fetched.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFailure {
    pub key: AssetKey,
    pub stage: FailureStage,
    pub reason: String,
}

/// Outcome of one reconciliation run. Every candidate that did not update is
/// named in `failed` or `skipped`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub since: Option<DateTime<Utc>>,
    pub candidates: usize,
    pub processed: usize,
    pub succeeded: usize,
    /// Subset of `succeeded` whose status set did not change.
    pub unchanged: usize,
    pub failed: Vec<AssetFailure>,
    pub skipped: Vec<AssetFailure>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(run_id: String, started_at: DateTime<Utc>, since: Option<DateTime<Utc>>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            since,
            candidates: 0,
            processed: 0,
            succeeded: 0,
            unchanged: 0,
            failed: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn is_failed(&self, key: &AssetKey) -> bool {
        self.failed.iter().any(|f| &f.key == key)
    }
}

/// Identity of a certificate removed by the reclamation job, captured before
/// the row is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimedCertificate {
    pub hash_sha1: String,
    pub subject_cn: Option<String>,
    pub date_expiration: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReclaimReport {
    pub cutoff: DateTime<Utc>,
    pub dry_run: bool,
    pub deleted_count: usize,
    pub deleted: Vec<ReclaimedCertificate>,
}
