use chrono::{DateTime, Utc};
use std::sync::Arc;
use wim_common::report::{ReclaimReport, ReclaimedCertificate};
use wim_storage::{AssetStore, ReclaimMode, StorageError};

/// Deletes certificates that expired before a cutoff and that no FQDN
/// references any more.
pub struct CertificateReclamationJob {
    store: Arc<dyn AssetStore>,
}

impl CertificateReclamationJob {
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self { store }
    }

    /// The candidate set is materialized once and every identifier is logged
    /// before the delete runs, so the report always names exactly the rows
    /// that were removed.
    pub fn run(&self, cutoff: DateTime<Utc>, dry_run: bool) -> Result<ReclaimReport, StorageError> {
        let mode = if dry_run {
            ReclaimMode::DryRun
        } else {
            ReclaimMode::Delete
        };
        tracing::info!(cutoff = %cutoff, dry_run, "Certificate reclamation started");

        let mut log_candidates = |certs: &[ReclaimedCertificate]| {
            for cert in certs {
                tracing::info!(
                    hash_sha1 = %cert.hash_sha1,
                    subject_cn = cert.subject_cn.as_deref().unwrap_or("-"),
                    expired_at = %cert.date_expiration,
                    dry_run,
                    "Reclaiming unreferenced expired certificate"
                );
            }
        };
        let deleted = self
            .store
            .reclaim_certificates(cutoff, mode, &mut log_candidates)?;

        tracing::info!(
            cutoff = %cutoff,
            dry_run,
            count = deleted.len(),
            "Certificate reclamation finished"
        );
        Ok(ReclaimReport {
            cutoff,
            dry_run,
            deleted_count: if dry_run { 0 } else { deleted.len() },
            deleted,
        })
    }
}
