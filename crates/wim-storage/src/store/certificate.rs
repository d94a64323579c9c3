use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use wim_common::facts::CertificateFacts;
use wim_common::report::ReclaimedCertificate;
use wim_common::types::Certificate;

use super::{from_millis, to_millis, InventoryStore};
use crate::error::{Result, StorageError};
use crate::ReclaimMode;

const CERTIFICATE_COLUMNS: &str = "hash_sha1, hash_sha256, subject_dn, subject_cn, subject_org,
    san, issuer_dn, issuer_cn, issuer_org, date_issued, date_expiration, signing_algorithm,
    key_type, key_bitlength, is_wildcard, is_self_signed, created_at, updated_at";

const UNREFERENCED_EXPIRED: &str = "c.date_expiration < ?1
    AND NOT EXISTS (SELECT 1 FROM fqdns f WHERE f.certificate_hash = c.hash_sha1)";

impl InventoryStore {
    pub fn upsert_certificate(&self, cert: &CertificateFacts) -> Result<()> {
        let conn = self.conn();
        upsert(&conn, cert, Utc::now())
    }

    pub fn get_certificate(&self, hash_sha1: &str) -> Result<Option<Certificate>> {
        let conn = self.conn();
        let sql = format!("SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE hash_sha1 = ?1");
        let row = conn
            .query_row(&sql, params![hash_sha1], |row| Ok(row_to_certificate(row)))
            .optional()?;
        row.transpose()
    }

    pub fn count_certificates(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM certificates", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Audit trail of reclaimed certificates, most recent first.
    pub fn list_reclaimed(&self, limit: usize) -> Result<Vec<ReclaimedCertificate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT hash_sha1, subject_cn, date_expiration FROM reclaimed_certificates
             ORDER BY reclaimed_at DESC, hash_sha1 LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ReclaimedCertificate {
                hash_sha1: row.get(0)?,
                subject_cn: row.get(1)?,
                date_expiration: from_millis(row.get(2)?),
            })
        })?;
        let mut reclaimed = Vec::new();
        for row in rows {
            reclaimed.push(row?);
        }
        Ok(reclaimed)
    }
}

/// Inserts a certificate keyed by its SHA-1 hash. The content of a hash
/// never changes, so an existing row only has its `updated_at` touched.
pub(crate) fn upsert(conn: &Connection, cert: &CertificateFacts, now: DateTime<Utc>) -> Result<()> {
    let san_json = serde_json::to_string(&cert.san)?;
    let now = to_millis(now);
    let mut stmt = conn.prepare_cached(
        "INSERT INTO certificates
         (hash_sha1, hash_sha256, subject_dn, subject_cn, subject_org, san, issuer_dn, issuer_cn,
          issuer_org, date_issued, date_expiration, signing_algorithm, key_type, key_bitlength,
          is_wildcard, is_self_signed, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)
         ON CONFLICT(hash_sha1) DO UPDATE SET updated_at = excluded.updated_at",
    )?;
    stmt.execute(params![
        cert.hash_sha1,
        cert.hash_sha256,
        cert.subject_dn,
        cert.subject_cn,
        cert.subject_org,
        san_json,
        cert.issuer_dn,
        cert.issuer_cn,
        cert.issuer_org,
        cert.date_issued.map(to_millis),
        to_millis(cert.date_expiration),
        cert.signing_algorithm,
        cert.key_type,
        cert.key_bitlength,
        cert.is_wildcard,
        cert.is_self_signed,
        now,
    ])?;
    Ok(())
}

/// Selects, reports and deletes unreferenced expired certificates under one
/// immediate transaction, so no FQDN can start referencing a candidate
/// between selection and deletion.
pub(crate) fn reclaim_expired(
    conn: &mut Connection,
    cutoff: DateTime<Utc>,
    mode: ReclaimMode,
    before_delete: &mut dyn FnMut(&[ReclaimedCertificate]),
) -> Result<Vec<ReclaimedCertificate>> {
    let cutoff_ms = to_millis(cutoff);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let candidates = {
        let sql = format!(
            "SELECT c.hash_sha1, c.subject_cn, c.date_expiration FROM certificates c
             WHERE {UNREFERENCED_EXPIRED}
             ORDER BY c.date_expiration, c.hash_sha1"
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(params![cutoff_ms], |row| {
            Ok(ReclaimedCertificate {
                hash_sha1: row.get(0)?,
                subject_cn: row.get(1)?,
                date_expiration: from_millis(row.get(2)?),
            })
        })?;
        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?);
        }
        candidates
    };

    before_delete(&candidates);

    if mode == ReclaimMode::DryRun || candidates.is_empty() {
        tx.rollback()?;
        return Ok(candidates);
    }

    // The materialized set is staged in a temp table so a single DELETE can
    // target exactly it, however many candidates there are.
    tx.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS reclaim_batch (hash_sha1 TEXT PRIMARY KEY);
         DELETE FROM reclaim_batch;",
    )?;
    let now = to_millis(Utc::now());
    {
        let mut stage = tx.prepare("INSERT INTO reclaim_batch (hash_sha1) VALUES (?1)")?;
        let mut audit = tx.prepare(
            "INSERT INTO reclaimed_certificates (hash_sha1, subject_cn, date_expiration, cutoff, reclaimed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for cert in &candidates {
            stage.execute(params![cert.hash_sha1])?;
            audit.execute(params![
                cert.hash_sha1,
                cert.subject_cn,
                to_millis(cert.date_expiration),
                cutoff_ms,
                now,
            ])?;
        }
    }

    let delete_sql = format!(
        "DELETE FROM certificates AS c
         WHERE c.hash_sha1 IN (SELECT hash_sha1 FROM reclaim_batch) AND {UNREFERENCED_EXPIRED}"
    );
    let deleted = tx.execute(&delete_sql, params![cutoff_ms])?;
    tx.execute("DELETE FROM reclaim_batch", [])?;

    if deleted != candidates.len() {
        tx.rollback()?;
        return Err(StorageError::ReclaimMismatch {
            expected: candidates.len(),
            deleted,
        });
    }
    tx.commit()?;
    Ok(candidates)
}

fn row_to_certificate(row: &rusqlite::Row) -> Result<Certificate> {
    let san_json: String = row.get(5)?;
    let issued: Option<i64> = row.get(9)?;
    let expiration: i64 = row.get(10)?;
    let created: i64 = row.get(16)?;
    let updated: i64 = row.get(17)?;
    Ok(Certificate {
        observed: CertificateFacts {
            hash_sha1: row.get(0)?,
            hash_sha256: row.get(1)?,
            subject_dn: row.get(2)?,
            subject_cn: row.get(3)?,
            subject_org: row.get(4)?,
            san: serde_json::from_str(&san_json)?,
            issuer_dn: row.get(6)?,
            issuer_cn: row.get(7)?,
            issuer_org: row.get(8)?,
            date_issued: issued.map(from_millis),
            date_expiration: from_millis(expiration),
            signing_algorithm: row.get(11)?,
            key_type: row.get(12)?,
            key_bitlength: row.get(13)?,
            is_wildcard: row.get(14)?,
            is_self_signed: row.get(15)?,
        },
        created_at: from_millis(created),
        updated_at: from_millis(updated),
    })
}
