//! SQLite persistence for the web inventory.
//!
//! [`store::InventoryStore`] owns a single database file holding domains,
//! FQDNs, certificates and the run/reclamation history. The reconciliation
//! pipeline only sees it through the [`AssetStore`] trait so that tests can
//! substitute an in-memory recorder.

pub mod error;
mod schema;
pub mod store;


use chrono::{DateTime, Utc};
use wim_common::report::{ReclaimedCertificate, RunReport};
use wim_common::types::{AssetCandidate, AssetKind, AssetPatch};

pub use error::{Result, StorageError};
pub use store::InventoryStore;

/// Whether the reclamation pass deletes rows or only reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimMode {
    Delete,
    DryRun,
}

/// Persistence boundary used by the reconciliation and reclamation jobs.
///
/// Implementations must be `Send + Sync`: a single store is shared between
/// the orchestrator, the upsert engine and the reclamation job.
pub trait AssetStore: Send + Sync {
    /// Lists every asset of `kind` that is due for reconciliation: never
    /// scanned, or last scanned strictly before `since`. With `since = None`
    /// every asset is returned.
    fn list_candidates(
        &self,
        kind: AssetKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<AssetCandidate>>;

    /// Applies all patches in one transaction. Either every patch lands or
    /// none does; a patch naming an asset that no longer exists fails the
    /// whole batch.
    fn commit_patches(&self, patches: &[AssetPatch]) -> Result<()>;

    /// Removes expired certificates that no FQDN references.
    ///
    /// Candidates are selected and deleted inside one transaction. The
    /// selected identities are handed to `before_delete` before any row is
    /// removed, so callers can log them. In [`ReclaimMode::DryRun`] the
    /// transaction is rolled back after the callback.
    fn reclaim_certificates(
        &self,
        cutoff: DateTime<Utc>,
        mode: ReclaimMode,
        before_delete: &mut dyn FnMut(&[ReclaimedCertificate]),
    ) -> Result<Vec<ReclaimedCertificate>>;

    /// Persists the outcome of a reconciliation run.
    fn record_run(&self, report: &RunReport) -> Result<()>;
}
