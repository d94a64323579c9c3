use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use wim_common::dns::normalize_dns_name;
use wim_common::types::{
    AssetCandidate, AssetConfidence, AssetFacts, AssetKey, AssetPatch, Fqdn, HostingArch,
    HostingEnv, LifecycleStatus, NewFqdn,
};

use super::{certificate, domain, from_millis, join_fetched, parse_label, split_list, to_millis};
use super::InventoryStore;
use crate::error::{Result, StorageError};

const FQDN_COLUMNS: &str = "name, domain, status, ops_status, website_status, redirect_health,
    confidence, hosting_arch, hosting_env, public_ip, a_record_ips, cnames, certificate_hash,
    tls_version, response_code, redirect_url, is_insecure, is_risky, is_compliance_required,
    unreachable_passes, last_recon_at, created_at, updated_at";

const APPLY_FACTS_SQL: &str = "UPDATE fqdns SET
    public_ip = COALESCE(?2, public_ip),
    a_record_ips = COALESCE(?3, a_record_ips),
    cnames = COALESCE(?4, cnames),
    certificate_hash = COALESCE(?5, certificate_hash),
    tls_version = COALESCE(?6, tls_version),
    response_code = COALESCE(?7, response_code),
    redirect_url = COALESCE(?8, redirect_url),
    last_recon_at = MAX(COALESCE(last_recon_at, 0), ?9),
    updated_at = ?10
 WHERE name = ?1";

const APPLY_STATUS_SQL: &str = "UPDATE fqdns SET
    status = ?2,
    ops_status = COALESCE(?3, ops_status),
    website_status = COALESCE(?4, website_status),
    redirect_health = COALESCE(?5, redirect_health),
    is_insecure = ?6,
    unreachable_passes = ?7
 WHERE name = ?1";

impl InventoryStore {
    /// Registers an FQDN in `New` status.
    ///
    /// The parent domain link is only stored when that domain is already in
    /// the inventory; otherwise the FQDN is kept unattached.
    pub fn insert_fqdn(&self, req: &NewFqdn) -> Result<Fqdn> {
        let name = normalize_dns_name(&req.name)?;
        let parent = req
            .domain
            .as_deref()
            .map(normalize_dns_name)
            .transpose()?;

        let conn = self.conn();
        let found: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM fqdns WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        if found {
            return Err(StorageError::Duplicate {
                entity: "fqdn",
                id: name,
            });
        }

        let parent = match parent {
            Some(d) if domain::exists(&conn, &d)? => Some(d),
            Some(d) => {
                tracing::warn!(fqdn = %name, domain = %d, "Parent domain not in inventory, leaving FQDN unattached");
                None
            }
            None => None,
        };

        let tx = conn.unchecked_transaction()?;
        let now = to_millis(Utc::now());
        tx.execute(
            "INSERT INTO fqdns (name, domain, status, confidence, hosting_arch, hosting_env,
                                is_risky, is_compliance_required, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                name,
                parent,
                LifecycleStatus::New.as_str(),
                req.confidence.unwrap_or(AssetConfidence::Candidate).as_str(),
                req.hosting_arch.unwrap_or(HostingArch::NotApplicable).as_str(),
                req.hosting_env.unwrap_or(HostingEnv::NotApplicable).as_str(),
                req.is_risky,
                req.is_compliance_required,
                now,
                now,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO fqdn_software (fqdn, software) VALUES (?1, ?2)",
            )?;
            for software in &req.software {
                stmt.execute(params![name, software.trim()])?;
            }
        }
        tx.commit()?;
        drop(conn);

        self.get_fqdn(&name)?.ok_or(StorageError::NotFound {
            entity: "fqdn",
            id: name,
        })
    }

    pub fn get_fqdn(&self, name: &str) -> Result<Option<Fqdn>> {
        let conn = self.conn();
        let sql = format!("SELECT {FQDN_COLUMNS} FROM fqdns WHERE name = ?1");
        let fqdn = conn
            .query_row(&sql, params![name], |row| Ok(row_to_fqdn(row)))
            .optional()?
            .transpose()?;
        let Some(mut fqdn) = fqdn else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare_cached("SELECT software FROM fqdn_software WHERE fqdn = ?1 ORDER BY software")?;
        let rows = stmt.query_map(params![name], |row| row.get::<_, String>(0))?;
        for row in rows {
            fqdn.software.push(row?);
        }
        Ok(Some(fqdn))
    }

    /// Points an FQDN at a stored certificate, or clears the link.
    pub fn set_fqdn_certificate(&self, name: &str, hash_sha1: Option<&str>) -> Result<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE fqdns SET certificate_hash = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, hash_sha1, to_millis(Utc::now())],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound {
                entity: "fqdn",
                id: name.to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn due_candidates(
    conn: &Connection,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<AssetCandidate>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, status, ops_status, website_status, redirect_health, is_insecure,
                unreachable_passes, last_recon_at
         FROM fqdns
         WHERE ?1 IS NULL OR last_recon_at IS NULL OR last_recon_at < ?1
         ORDER BY name",
    )?;
    let rows = stmt.query_map(params![since.map(to_millis)], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, bool>(5)?,
            row.get::<_, u32>(6)?,
            row.get::<_, Option<i64>>(7)?,
        ))
    })?;

    let mut candidates = Vec::new();
    for row in rows {
        let (name, status, ops, website, redirect, is_insecure, unreachable_passes, last_recon) =
            row?;
        candidates.push(AssetCandidate {
            key: AssetKey::fqdn(name),
            facts: AssetFacts {
                status: parse_label("status", status)?,
                ops_status: Some(parse_label("ops_status", ops)?),
                website_status: Some(parse_label("website_status", website)?),
                redirect_health: Some(parse_label("redirect_health", redirect)?),
                is_insecure,
                unreachable_passes,
            },
            last_scanned_at: last_recon.map(from_millis),
        });
    }
    Ok(candidates)
}

/// Same contract as the domain variant. An observed certificate is upserted
/// first so the FQDN's reference to it is valid within the transaction.
pub(crate) fn apply_patch(conn: &Connection, patch: &AssetPatch, now: DateTime<Utc>) -> Result<()> {
    let facts = &patch.facts;
    if let Some(cert) = &facts.certificate {
        certificate::upsert(conn, cert, now)?;
    }

    let addresses: Vec<String> = facts.ip_addresses.iter().map(|ip| ip.to_string()).collect();
    let mut stmt = conn.prepare_cached(APPLY_FACTS_SQL)?;
    let updated = stmt.execute(params![
        patch.key.name,
        addresses.first(),
        join_fetched(&addresses),
        join_fetched(&facts.cnames),
        facts.certificate.as_ref().map(|c| c.hash_sha1.as_str()),
        facts.tls_version,
        facts.http_response_code,
        facts.redirect_url,
        to_millis(patch.scanned_at),
        to_millis(now),
    ])?;
    if updated == 0 {
        return Err(StorageError::NotFound {
            entity: "fqdn",
            id: patch.key.name.clone(),
        });
    }

    if let Some(status) = &patch.status {
        conn.prepare_cached(APPLY_STATUS_SQL)?.execute(params![
            patch.key.name,
            status.status.as_str(),
            status.ops_status.map(|s| s.as_str()),
            status.website_status.map(|s| s.as_str()),
            status.redirect_health.map(|s| s.as_str()),
            status.is_insecure,
            status.unreachable_passes,
        ])?;
    }
    Ok(())
}

fn row_to_fqdn(row: &rusqlite::Row) -> Result<Fqdn> {
    let a_record_ips: String = row.get(10)?;
    let cnames: String = row.get(11)?;
    let last_recon: Option<i64> = row.get(20)?;
    let created: i64 = row.get(21)?;
    let updated: i64 = row.get(22)?;
    Ok(Fqdn {
        name: row.get(0)?,
        domain: row.get(1)?,
        status: parse_label("status", row.get(2)?)?,
        ops_status: parse_label("ops_status", row.get(3)?)?,
        website_status: parse_label("website_status", row.get(4)?)?,
        redirect_health: parse_label("redirect_health", row.get(5)?)?,
        confidence: parse_label("confidence", row.get(6)?)?,
        hosting_arch: parse_label("hosting_arch", row.get(7)?)?,
        hosting_env: parse_label("hosting_env", row.get(8)?)?,
        public_ip: row.get(9)?,
        a_record_ips: split_list(&a_record_ips),
        cnames: split_list(&cnames),
        certificate_hash: row.get(12)?,
        tls_version: row.get(13)?,
        response_code: row.get(14)?,
        redirect_url: row.get(15)?,
        is_insecure: row.get(16)?,
        is_risky: row.get(17)?,
        is_compliance_required: row.get(18)?,
        unreachable_passes: row.get(19)?,
        last_recon_at: last_recon.map(from_millis),
        created_at: from_millis(created),
        updated_at: from_millis(updated),
        software: Vec::new(),
    })
}
