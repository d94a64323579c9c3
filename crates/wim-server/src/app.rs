use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wim_common::report::{ReclaimReport, RunReport};
use wim_reconcile::{
    CertificateReclamationJob, EnrichmentSource, ReconciliationOrchestrator,
};
use wim_storage::InventoryStore;

use crate::config::ServerConfig;
use crate::probe::ProbeSource;
use crate::scheduler::ReconcileScheduler;
use crate::seed::{self, SeedFile, SeedSummary};

pub fn open_store(config: &ServerConfig) -> Result<Arc<InventoryStore>> {
    let path = config.database_path();
    let store = InventoryStore::open(&path, config.busy_timeout())
        .with_context(|| format!("Failed to open inventory database '{}'", path.display()))?;
    Ok(Arc::new(store))
}

/// Cancels `token` on Ctrl-C so the running job stops fetching and flushes.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, stopping after the current chunk");
            token.cancel();
        }
    });
}

pub async fn run_reconcile(
    config: &ServerConfig,
    since: Option<DateTime<Utc>>,
) -> Result<RunReport> {
    let store = open_store(config)?;
    let source: Arc<dyn EnrichmentSource> = Arc::new(ProbeSource::new(&config.probe)?);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    reconcile_with(store, source, config, &cancel, since).await
}

/// Reconciliation against an explicit store and source.
pub async fn reconcile_with(
    store: Arc<InventoryStore>,
    source: Arc<dyn EnrichmentSource>,
    config: &ServerConfig,
    cancel: &CancellationToken,
    since: Option<DateTime<Utc>>,
) -> Result<RunReport> {
    let orchestrator = ReconciliationOrchestrator::new(store, source, config.reconcile.to_options());
    orchestrator.run(cancel, since).await
}

pub fn run_reclaim(
    config: &ServerConfig,
    cutoff: Option<DateTime<Utc>>,
    dry_run: bool,
) -> Result<ReclaimReport> {
    let store = open_store(config)?;
    let job = CertificateReclamationJob::new(store);
    let report = job
        .run(cutoff.unwrap_or_else(Utc::now), dry_run)
        .context("Certificate reclamation failed")?;
    Ok(report)
}

pub fn init_domains(config: &ServerConfig, seed_path: &Path) -> Result<SeedSummary> {
    let seed = SeedFile::load(seed_path)?;
    let store = open_store(config)?;
    seed::import(&store, &seed)
}

pub fn history(config: &ServerConfig, limit: usize) -> Result<Vec<RunReport>> {
    let store = open_store(config)?;
    store
        .list_runs(limit)
        .context("Failed to read reconciliation history")
}

/// Runs the scheduler until Ctrl-C.
pub async fn run_daemon(config: &ServerConfig) -> Result<()> {
    let store = open_store(config)?;
    let source: Arc<dyn EnrichmentSource> = Arc::new(ProbeSource::new(&config.probe)?);
    let orchestrator = Arc::new(ReconciliationOrchestrator::new(
        store.clone(),
        source,
        config.reconcile.to_options(),
    ));
    let reclaimer = config
        .reclaim
        .enabled
        .then(|| Arc::new(CertificateReclamationJob::new(store)));
    let scheduler = ReconcileScheduler::new(
        orchestrator,
        reclaimer,
        std::time::Duration::from_secs(config.reconcile.interval_secs),
        std::time::Duration::from_secs(config.reclaim.interval_secs),
    );

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    scheduler.run(cancel).await;
    Ok(())
}
