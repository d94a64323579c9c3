use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use wim_common::dns::normalize_dns_name;
use wim_common::types::{
    AssetCandidate, AssetConfidence, AssetFacts, AssetKey, AssetPatch, Domain, LifecycleStatus,
    NewDomain, OwnershipType, RegistrarInfo,
};

use super::{
    format_date, from_millis, join_fetched, parse_date, parse_label, split_list, to_millis,
    InventoryStore,
};
use crate::error::{Result, StorageError};

const DOMAIN_COLUMNS: &str = "name, status, confidence, ownership, registrar, registrar_iana_id,
    registrant_org, nameservers, mail_servers, whois_servers, soa_nameservers, soa_email,
    domain_statuses, date_expiry, date_first_registered, last_scanned_at, unreachable_passes,
    notes, created_at, updated_at";

const APPLY_FACTS_SQL: &str = "UPDATE domains SET
    registrar = COALESCE(?2, registrar),
    registrar_iana_id = COALESCE(?3, registrar_iana_id),
    registrant_org = COALESCE(?4, registrant_org),
    nameservers = COALESCE(?5, nameservers),
    mail_servers = COALESCE(?6, mail_servers),
    whois_servers = COALESCE(?7, whois_servers),
    soa_nameservers = COALESCE(?8, soa_nameservers),
    soa_email = COALESCE(?9, soa_email),
    domain_statuses = COALESCE(?10, domain_statuses),
    date_expiry = COALESCE(?11, date_expiry),
    date_first_registered = COALESCE(?12, date_first_registered),
    last_scanned_at = MAX(COALESCE(last_scanned_at, 0), ?13),
    updated_at = ?14
 WHERE name = ?1";

impl InventoryStore {
    /// Registers a root domain in `New` status. The name is validated and
    /// stored in canonical form.
    pub fn insert_domain(&self, req: &NewDomain) -> Result<Domain> {
        let name = normalize_dns_name(&req.name)?;
        let conn = self.conn();
        if exists(&conn, &name)? {
            return Err(StorageError::Duplicate {
                entity: "domain",
                id: name,
            });
        }
        let now = to_millis(Utc::now());
        conn.execute(
            "INSERT INTO domains (name, status, confidence, ownership, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                name,
                LifecycleStatus::New.as_str(),
                req.confidence.unwrap_or(AssetConfidence::Candidate).as_str(),
                req.ownership.unwrap_or(OwnershipType::Unknown).as_str(),
                req.notes.clone().unwrap_or_default(),
                now,
                now,
            ],
        )?;
        drop(conn);
        self.get_domain(&name)?.ok_or(StorageError::NotFound {
            entity: "domain",
            id: name,
        })
    }

    pub fn get_domain(&self, name: &str) -> Result<Option<Domain>> {
        let conn = self.conn();
        let sql = format!("SELECT {DOMAIN_COLUMNS} FROM domains WHERE name = ?1");
        let row = conn
            .query_row(&sql, params![name], |row| Ok(row_to_domain(row)))
            .optional()?;
        row.transpose()
    }

    pub fn list_domains(&self) -> Result<Vec<Domain>> {
        let conn = self.conn();
        let sql = format!("SELECT {DOMAIN_COLUMNS} FROM domains ORDER BY name");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| Ok(row_to_domain(row)))?;
        let mut domains = Vec::new();
        for row in rows {
            domains.push(row??);
        }
        Ok(domains)
    }

    /// Sets the lifecycle status directly, e.g. to archive a domain by hand.
    pub fn set_domain_status(&self, name: &str, status: LifecycleStatus) -> Result<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE domains SET status = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, status.as_str(), to_millis(Utc::now())],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound {
                entity: "domain",
                id: name.to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM domains WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(found)
}

pub(crate) fn due_candidates(
    conn: &Connection,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<AssetCandidate>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, status, unreachable_passes, last_scanned_at FROM domains
         WHERE ?1 IS NULL OR last_scanned_at IS NULL OR last_scanned_at < ?1
         ORDER BY name",
    )?;
    let rows = stmt.query_map(params![since.map(to_millis)], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, u32>(2)?,
            row.get::<_, Option<i64>>(3)?,
        ))
    })?;

    let mut candidates = Vec::new();
    for row in rows {
        let (name, status, unreachable_passes, last_scanned) = row?;
        candidates.push(AssetCandidate {
            key: AssetKey::domain(name),
            facts: AssetFacts {
                status: parse_label("status", status)?,
                ops_status: None,
                website_status: None,
                redirect_health: None,
                is_insecure: false,
                unreachable_passes,
            },
            last_scanned_at: last_scanned.map(from_millis),
        });
    }
    Ok(candidates)
}

/// Writes fetched facts (absent values keep the stored ones) and, when
/// present, the re-derived status. The scan timestamp never moves backwards.
pub(crate) fn apply_patch(conn: &Connection, patch: &AssetPatch, now: DateTime<Utc>) -> Result<()> {
    let facts = &patch.facts;
    let mut stmt = conn.prepare_cached(APPLY_FACTS_SQL)?;
    let updated = stmt.execute(params![
        patch.key.name,
        facts.registrar,
        facts.registrar_iana_id,
        facts.registrant_org,
        join_fetched(&facts.nameservers),
        join_fetched(&facts.mail_servers),
        join_fetched(&facts.whois_servers),
        join_fetched(&facts.soa_nameservers),
        facts.soa_email,
        join_fetched(&facts.domain_statuses),
        format_date(facts.date_expiry),
        format_date(facts.date_first_registered),
        to_millis(patch.scanned_at),
        to_millis(now),
    ])?;
    if updated == 0 {
        return Err(StorageError::NotFound {
            entity: "domain",
            id: patch.key.name.clone(),
        });
    }

    if let Some(status) = &patch.status {
        conn.execute(
            "UPDATE domains SET status = ?2, unreachable_passes = ?3 WHERE name = ?1",
            params![patch.key.name, status.status.as_str(), status.unreachable_passes],
        )?;
    }
    Ok(())
}

fn row_to_domain(row: &rusqlite::Row) -> Result<Domain> {
    let nameservers: String = row.get(7)?;
    let mail_servers: String = row.get(8)?;
    let whois_servers: String = row.get(9)?;
    let soa_nameservers: String = row.get(10)?;
    let domain_statuses: String = row.get(12)?;
    let last_scanned: Option<i64> = row.get(15)?;
    let created: i64 = row.get(18)?;
    let updated: i64 = row.get(19)?;
    Ok(Domain {
        name: row.get(0)?,
        status: parse_label("status", row.get(1)?)?,
        confidence: parse_label("confidence", row.get(2)?)?,
        ownership: parse_label("ownership", row.get(3)?)?,
        registrar: RegistrarInfo {
            registrar: row.get(4)?,
            registrar_iana_id: row.get(5)?,
            registrant_org: row.get(6)?,
            nameservers: split_list(&nameservers),
            mail_servers: split_list(&mail_servers),
            whois_servers: split_list(&whois_servers),
            soa_nameservers: split_list(&soa_nameservers),
            soa_email: row.get(11)?,
            domain_statuses: split_list(&domain_statuses),
        },
        date_expiry: parse_date("date_expiry", row.get(13)?)?,
        date_first_registered: parse_date("date_first_registered", row.get(14)?)?,
        last_scanned_at: last_scanned.map(from_millis),
        unreachable_passes: row.get(16)?,
        notes: row.get(17)?,
        created_at: from_millis(created),
        updated_at: from_millis(updated),
    })
}
