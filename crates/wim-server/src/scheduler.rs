use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use wim_reconcile::{CertificateReclamationJob, ReconciliationOrchestrator};

/// Runs reconciliation and certificate reclamation on fixed intervals.
///
/// Each reconciliation pass only picks up assets not scanned within the last
/// interval. The two jobs share one task, so they never overlap.
pub struct ReconcileScheduler {
    orchestrator: Arc<ReconciliationOrchestrator>,
    reclaimer: Option<Arc<CertificateReclamationJob>>,
    reconcile_every: Duration,
    reclaim_every: Duration,
}

impl ReconcileScheduler {
    pub fn new(
        orchestrator: Arc<ReconciliationOrchestrator>,
        reclaimer: Option<Arc<CertificateReclamationJob>>,
        reconcile_every: Duration,
        reclaim_every: Duration,
    ) -> Self {
        Self {
            orchestrator,
            reclaimer,
            reconcile_every,
            reclaim_every,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            reconcile_secs = self.reconcile_every.as_secs(),
            reclaim_secs = self.reclaim_every.as_secs(),
            reclaim_enabled = self.reclaimer.is_some(),
            "Scheduler started"
        );

        let mut reconcile_tick = interval(self.reconcile_every);
        reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reclaim_tick = interval(self.reclaim_every);
        reclaim_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = reconcile_tick.tick() => self.reconcile_once(&cancel).await,
                _ = reclaim_tick.tick(), if self.reclaimer.is_some() => self.reclaim_once(),
            }
        }
        tracing::info!("Scheduler stopped");
    }

    async fn reconcile_once(&self, cancel: &CancellationToken) {
        let since = chrono::Duration::from_std(self.reconcile_every)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window));
        if let Err(e) = self.orchestrator.run(cancel, since).await {
            tracing::error!(error = %e, "Reconciliation pass failed");
        }
    }

    fn reclaim_once(&self) {
        let Some(reclaimer) = &self.reclaimer else {
            return;
        };
        if let Err(e) = reclaimer.run(Utc::now(), false) {
            tracing::error!(error = %e, "Certificate reclamation failed");
        }
    }
}
