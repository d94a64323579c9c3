use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use wim_common::report::{ReclaimedCertificate, RunReport};
use wim_common::types::{AssetCandidate, AssetKind, AssetPatch};

use crate::error::{Result, StorageError};
use crate::schema::{CERTIFICATES_SCHEMA, DOMAINS_SCHEMA, FQDNS_SCHEMA, HISTORY_SCHEMA};
use crate::{AssetStore, ReclaimMode};

pub mod certificate;
pub mod domain;
pub mod fqdn;
pub mod run;

pub const DEFAULT_DATABASE_FILE: &str = "wim.db";
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Inventory database (`wim.db`): domains, FQDNs, certificates and job
/// history behind a single serialized connection.
pub struct InventoryStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl InventoryStore {
    /// Opens `<data_dir>/wim.db` with the default busy timeout, creating the
    /// directory when missing.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Self::open(&data_dir.join(DEFAULT_DATABASE_FILE), DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens (or creates) the database at `db_path`.
    ///
    /// `busy_timeout` bounds how long a write waits on a lock held by another
    /// connection; a chunk commit that exceeds it fails instead of hanging.
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(DOMAINS_SCHEMA)?;
        conn.execute_batch(CERTIFICATES_SCHEMA)?;
        conn.execute_batch(FQDNS_SCHEMA)?;
        conn.execute_batch(HISTORY_SCHEMA)?;

        tracing::info!(path = %db_path.display(), "Initialized inventory store");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// A panic while holding the lock cannot leave a half-applied write
    /// behind (open transactions roll back on drop), so a poisoned mutex is
    /// still safe to reuse.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AssetStore for InventoryStore {
    fn list_candidates(
        &self,
        kind: AssetKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<AssetCandidate>> {
        let conn = self.conn();
        match kind {
            AssetKind::Domain => domain::due_candidates(&conn, since),
            AssetKind::Fqdn => fqdn::due_candidates(&conn, since),
        }
    }

    fn commit_patches(&self, patches: &[AssetPatch]) -> Result<()> {
        if patches.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = Utc::now();
        for patch in patches {
            match patch.key.kind {
                AssetKind::Domain => domain::apply_patch(&tx, patch, now)?,
                AssetKind::Fqdn => fqdn::apply_patch(&tx, patch, now)?,
            }
        }
        tx.commit()?;
        tracing::debug!(count = patches.len(), "Committed asset patches");
        Ok(())
    }

    fn reclaim_certificates(
        &self,
        cutoff: DateTime<Utc>,
        mode: ReclaimMode,
        before_delete: &mut dyn FnMut(&[ReclaimedCertificate]),
    ) -> Result<Vec<ReclaimedCertificate>> {
        let mut conn = self.conn();
        certificate::reclaim_expired(&mut conn, cutoff, mode, before_delete)
    }

    fn record_run(&self, report: &RunReport) -> Result<()> {
        let conn = self.conn();
        run::insert_run(&conn, report)
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn join_list(items: &[String]) -> String {
    items.join(",")
}

/// `None` for an empty list, so `COALESCE` keeps the stored value.
pub(crate) fn join_fetched(items: &[String]) -> Option<String> {
    (!items.is_empty()).then(|| join_list(items))
}

pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub(crate) fn parse_label<T: FromStr>(column: &'static str, value: String) -> Result<T> {
    value
        .parse()
        .map_err(|_| StorageError::CorruptValue { column, value })
}

pub(crate) fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

pub(crate) fn parse_date(column: &'static str, value: Option<String>) -> Result<Option<NaiveDate>> {
    match value {
        None => Ok(None),
        Some(text) => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| StorageError::CorruptValue {
                column,
                value: text,
            }),
    }
}
