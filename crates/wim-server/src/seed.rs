use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use wim_common::types::{NewDomain, NewFqdn};
use wim_storage::{InventoryStore, StorageError};

/// Initial inventory, loaded from JSON:
///
/// ```json
/// { "domains": [{ "name": "example.com" }],
///   "fqdns": [{ "name": "www.example.com", "domain": "example.com" }] }
/// ```
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub domains: Vec<NewDomain>,
    #[serde(default)]
    pub fqdns: Vec<NewFqdn>,
}

impl SeedFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file '{}'", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse seed file '{}'", path.display()))
    }
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub domains_created: usize,
    pub fqdns_created: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

/// Creates every listed asset. Domains go first so FQDNs can link to them.
/// Names already present or not valid DNS names are counted and skipped;
/// any other storage error aborts the import.
pub fn import(store: &InventoryStore, seed: &SeedFile) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for domain in &seed.domains {
        match store.insert_domain(domain) {
            Ok(_) => summary.domains_created += 1,
            Err(e) => skip_or_fail(&mut summary, "domain", &domain.name, e)?,
        }
    }
    for fqdn in &seed.fqdns {
        match store.insert_fqdn(fqdn) {
            Ok(_) => summary.fqdns_created += 1,
            Err(e) => skip_or_fail(&mut summary, "fqdn", &fqdn.name, e)?,
        }
    }

    tracing::info!(
        domains = summary.domains_created,
        fqdns = summary.fqdns_created,
        duplicates = summary.duplicates,
        invalid = summary.invalid,
        "Seed import finished"
    );
    Ok(summary)
}

fn skip_or_fail(
    summary: &mut SeedSummary,
    entity: &str,
    name: &str,
    err: StorageError,
) -> Result<()> {
    match err {
        StorageError::Duplicate { .. } => {
            tracing::debug!(entity, name, "Already in inventory, skipped");
            summary.duplicates += 1;
            Ok(())
        }
        StorageError::InvalidName(e) => {
            tracing::warn!(entity, name, error = %e, "Invalid name, skipped");
            summary.invalid += 1;
            Ok(())
        }
        other => Err(other).with_context(|| format!("Failed to create {entity} '{name}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, InventoryStore) {
        let dir = TempDir::new().unwrap();
        let store = InventoryStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn imports_domains_before_fqdns() {
        let (_dir, store) = setup();
        let seed: SeedFile = serde_json::from_str(
            r#"{
                "fqdns": [{ "name": "www.example.com", "domain": "example.com" }],
                "domains": [{ "name": "example.com" }]
            }"#,
        )
        .unwrap();

        let summary = import(&store, &seed).unwrap();
        assert_eq!(summary.domains_created, 1);
        assert_eq!(summary.fqdns_created, 1);

        let fqdn = store.get_fqdn("www.example.com").unwrap().unwrap();
        assert_eq!(fqdn.domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn reimport_counts_duplicates_and_invalid_names() {
        let (_dir, store) = setup();
        let seed: SeedFile = serde_json::from_str(
            r#"{ "domains": [{ "name": "example.com" }, { "name": "bad name!" }] }"#,
        )
        .unwrap();

        import(&store, &seed).unwrap();
        let again = import(&store, &seed).unwrap();
        assert_eq!(
            again,
            SeedSummary {
                domains_created: 0,
                fqdns_created: 0,
                duplicates: 1,
                invalid: 1,
            }
        );
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let seed: SeedFile = serde_json::from_str("{}").unwrap();
        assert!(seed.domains.is_empty());
        assert!(seed.fqdns.is_empty());
    }
}
