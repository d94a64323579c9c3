use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wim_common::facts::{CertificateFacts, RawFacts};
use wim_common::types::LifecycleStatus;
use wim_reconcile::{EnrichmentSource, FetchError};
use wim_server::app;
use wim_server::config::ServerConfig;

struct StaticSource;

#[async_trait]
impl EnrichmentSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, _asset_name: &str) -> Result<RawFacts, FetchError> {
        Ok(RawFacts {
            nameservers: vec!["ns1.example.net".into()],
            ip_addresses: vec!["192.0.2.10".parse().unwrap()],
            http_response_code: Some(200),
            ..Default::default()
        })
    }
}

fn setup() -> (TempDir, ServerConfig) {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        data_dir: dir.path().to_string_lossy().into_owned(),
        ..Default::default()
    };
    (dir, config)
}

fn write_seed(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("seed.json");
    std::fs::write(
        &path,
        r#"{
            "domains": [{ "name": "example.com" }],
            "fqdns": [{ "name": "www.example.com", "domain": "example.com" }]
        }"#,
    )
    .unwrap();
    path
}

#[tokio::test]
async fn seeded_inventory_reconciles_and_shows_in_history() {
    let (dir, config) = setup();
    let summary = app::init_domains(&config, &write_seed(&dir)).unwrap();
    assert_eq!(summary.domains_created, 1);
    assert_eq!(summary.fqdns_created, 1);

    let store = app::open_store(&config).unwrap();
    let report = app::reconcile_with(
        store.clone(),
        Arc::new(StaticSource),
        &config,
        &CancellationToken::new(),
        None,
    )
    .await
    .unwrap();
    assert_eq!(report.candidates, 2);
    assert_eq!(report.succeeded, 2);
    assert!(report.failed.is_empty());

    let domain = store.get_domain("example.com").unwrap().unwrap();
    assert_eq!(domain.status, LifecycleStatus::Active);

    let runs = app::history(&config, 5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, report.run_id);
}

#[test]
fn dry_run_reclaim_reports_without_deleting() {
    let (_dir, config) = setup();
    let store = app::open_store(&config).unwrap();
    store
        .upsert_certificate(&CertificateFacts {
            hash_sha1: "aa".repeat(20),
            hash_sha256: None,
            subject_dn: "CN=old.example.com".into(),
            subject_cn: Some("old.example.com".into()),
            subject_org: None,
            san: vec!["old.example.com".into()],
            issuer_dn: "CN=Test CA".into(),
            issuer_cn: Some("Test CA".into()),
            issuer_org: None,
            date_issued: Some(Utc::now() - Duration::days(400)),
            date_expiration: Utc::now() - Duration::days(10),
            signing_algorithm: None,
            key_type: None,
            key_bitlength: None,
            is_wildcard: false,
            is_self_signed: false,
        })
        .unwrap();
    drop(store);

    let report = app::run_reclaim(&config, None, true).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.deleted_count, 0);
    assert_eq!(report.deleted.len(), 1);

    let store = app::open_store(&config).unwrap();
    assert_eq!(store.count_certificates().unwrap(), 1);

    let report = app::run_reclaim(&config, None, false).unwrap();
    assert_eq!(report.deleted_count, 1);
    assert_eq!(store.count_certificates().unwrap(), 0);
}

#[test]
fn missing_seed_file_is_an_error() {
    let (dir, config) = setup();
    let err = app::init_domains(&config, &dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("seed file"));
}
