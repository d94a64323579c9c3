use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wim_common::facts::RawFacts;
use wim_common::report::{AssetFailure, FailureStage, RunReport};
use wim_common::types::{AssetCandidate, AssetKey, AssetKind, AssetPatch};
use wim_storage::AssetStore;

use crate::derive::{derive, DerivationPolicy, DEFAULT_UNREACHABLE_THRESHOLD};
use crate::source::{EnrichmentSource, FetchError};
use crate::upsert::{BatchUpsertEngine, FlushOutcome, DEFAULT_CHUNK_SIZE};

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub chunk_size: usize,
    /// Total attempts per asset, including the first one.
    pub fetch_attempts: u32,
    pub retry_backoff: Duration,
    pub fetch_timeout: Duration,
    pub max_concurrent: usize,
    pub unreachable_threshold: u32,
    pub chunk_commit_retries: u32,
    pub include_fqdns: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(30),
            max_concurrent: 8,
            unreachable_threshold: DEFAULT_UNREACHABLE_THRESHOLD,
            chunk_commit_retries: 1,
            include_fqdns: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Idle,
    Enumerating,
    Processing,
    Flushing,
    Done,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Enumerating => "enumerating",
            RunPhase::Processing => "processing",
            RunPhase::Flushing => "flushing",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

enum FetchOutcome {
    Fetched(RawFacts),
    Failed(FetchError),
    Cancelled,
}

/// Drives one reconciliation pass: enumerate due assets, fetch, derive,
/// and write through the chunked upsert engine.
pub struct ReconciliationOrchestrator {
    store: Arc<dyn AssetStore>,
    source: Arc<dyn EnrichmentSource>,
    options: ReconcileOptions,
}

impl ReconciliationOrchestrator {
    pub fn new(
        store: Arc<dyn AssetStore>,
        source: Arc<dyn EnrichmentSource>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            source,
            options,
        }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Runs one pass over every asset not scanned since `since` (all assets
    /// when `None`).
    ///
    /// Per-asset failures end up in the report; only enumeration failures and
    /// an invalid chunk size are returned as errors. Cancelling `cancel`
    /// stops new fetches, but the pending chunk is still flushed.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        since: Option<DateTime<Utc>>,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let run_id = format!(
            "run-{}-{}",
            started_at.format("%Y%m%dT%H%M%S%.3fZ"),
            RUN_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let mut report = RunReport::new(run_id.clone(), started_at, since);
        let mut phase = RunPhase::Idle;
        tracing::debug!(run_id = %run_id, phase = %phase, "Reconciliation run created");

        self.advance(&run_id, &mut phase, RunPhase::Enumerating);
        let candidates = self.enumerate(since)?;
        report.candidates = candidates.len();
        tracing::info!(
            run_id = %run_id,
            candidates = candidates.len(),
            since = ?since,
            source = self.source.name(),
            "Reconciliation run started"
        );

        let mut engine = BatchUpsertEngine::new(self.store.clone(), self.options.chunk_size)?;
        let mut unfetched: BTreeSet<AssetKey> = candidates.iter().map(|c| c.key.clone()).collect();
        let policy = DerivationPolicy {
            unreachable_threshold: self.options.unreachable_threshold,
        };

        self.advance(&run_id, &mut phase, RunPhase::Processing);
        {
            let mut fetched = stream::iter(candidates)
                .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
                .map(|candidate| async move {
                    let outcome = self.fetch_with_retry(&candidate.key.name, cancel).await;
                    (candidate, outcome)
                })
                .buffer_unordered(self.options.max_concurrent.max(1));

            while let Some((candidate, outcome)) = fetched.next().await {
                let AssetCandidate { key, facts, .. } = candidate;
                let raw = match outcome {
                    FetchOutcome::Fetched(raw) => raw,
                    FetchOutcome::Failed(e) => {
                        unfetched.remove(&key);
                        report.processed += 1;
                        tracing::warn!(asset = %key, error = %e, "Fetch failed, asset left unchanged");
                        report.failed.push(failure(key, FailureStage::Fetch, e));
                        continue;
                    }
                    // Stays in `unfetched` and is reported as skipped below.
                    FetchOutcome::Cancelled => continue,
                };
                unfetched.remove(&key);
                report.processed += 1;

                let derived = match derive(&facts, &raw, Utc::now(), &policy) {
                    Ok(derived) => derived,
                    Err(e) => {
                        tracing::warn!(asset = %key, error = %e, "Contradictory facts, asset skipped");
                        report.skipped.push(failure(key, FailureStage::Validation, e));
                        continue;
                    }
                };

                let patch = AssetPatch {
                    key: key.clone(),
                    scanned_at: Utc::now(),
                    status: derived.changed.then_some(derived.facts),
                    facts: raw,
                };
                match engine.enqueue(patch) {
                    Ok(Some(outcome)) => self.settle(&mut engine, outcome, &mut report),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(asset = %key, error = %e, "Patch rejected");
                        report.skipped.push(failure(key, FailureStage::Validation, e));
                    }
                }
            }
        }

        self.advance(&run_id, &mut phase, RunPhase::Flushing);
        let trailing = engine.flush();
        self.settle(&mut engine, trailing, &mut report);

        report.cancelled = cancel.is_cancelled();
        for key in unfetched {
            report.skipped.push(AssetFailure {
                key,
                stage: FailureStage::Cancelled,
                reason: "run cancelled before the asset was fetched".to_string(),
            });
        }
        report.finished_at = Utc::now();
        self.advance(&run_id, &mut phase, RunPhase::Done);

        if let Err(e) = self.store.record_run(&report) {
            tracing::error!(run_id = %run_id, error = %e, "Failed to record run history");
        }
        tracing::info!(
            run_id = %run_id,
            candidates = report.candidates,
            processed = report.processed,
            succeeded = report.succeeded,
            unchanged = report.unchanged,
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            commits = engine.commits(),
            cancelled = report.cancelled,
            "Reconciliation run finished"
        );
        Ok(report)
    }

    fn enumerate(&self, since: Option<DateTime<Utc>>) -> Result<Vec<AssetCandidate>> {
        let mut candidates = self
            .store
            .list_candidates(AssetKind::Domain, since)
            .context("Failed to enumerate domains")?;
        if self.options.include_fqdns {
            let fqdns = self
                .store
                .list_candidates(AssetKind::Fqdn, since)
                .context("Failed to enumerate FQDNs")?;
            candidates.extend(fqdns);
        }
        Ok(candidates)
    }

    fn advance(&self, run_id: &str, phase: &mut RunPhase, next: RunPhase) {
        tracing::debug!(run_id = %run_id, from = %phase, to = %next, "Reconciliation phase");
        *phase = next;
    }

    /// Books a chunk outcome into the report, retrying a failed chunk up to
    /// `chunk_commit_retries` times first.
    fn settle<S: AssetStore + ?Sized>(
        &self,
        engine: &mut BatchUpsertEngine<S>,
        mut outcome: FlushOutcome,
        report: &mut RunReport,
    ) {
        let mut retries = 0;
        while !outcome.failed.is_empty() && retries < self.options.chunk_commit_retries {
            retries += 1;
            tracing::info!(size = outcome.failed.len(), attempt = retries, "Retrying failed chunk");
            let retried = engine.commit_chunk(std::mem::take(&mut outcome.failed));
            outcome.succeeded.extend(retried.succeeded);
            outcome.failed = retried.failed;
            outcome.error = retried.error;
        }

        report.unchanged += outcome
            .succeeded
            .iter()
            .filter(|p| p.status.is_none())
            .count();
        report.succeeded += outcome.succeeded.len();

        if outcome.failed.is_empty() {
            return;
        }
        let reason = outcome
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "chunk commit failed".to_string());
        tracing::error!(size = outcome.failed.len(), error = %reason, "Chunk could not be committed");
        for patch in outcome.failed {
            report.failed.push(AssetFailure {
                key: patch.key,
                stage: FailureStage::Commit,
                reason: reason.clone(),
            });
        }
    }

    async fn fetch_with_retry(&self, name: &str, cancel: &CancellationToken) -> FetchOutcome {
        let attempts = self.options.fetch_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return FetchOutcome::Cancelled;
            }
            let result =
                match tokio::time::timeout(self.options.fetch_timeout, self.source.fetch(name)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        name: name.to_string(),
                        after: self.options.fetch_timeout,
                    }),
                };
            match result {
                Ok(raw) => return FetchOutcome::Fetched(raw),
                Err(e) if !e.is_retryable() => return FetchOutcome::Failed(e),
                Err(e) => {
                    tracing::debug!(asset = name, attempt, error = %e, "Fetch attempt failed");
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                let backoff = self.options.retry_backoff * attempt;
                tokio::select! {
                    _ = cancel.cancelled() => return FetchOutcome::Cancelled,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
        match last_error {
            Some(e) => FetchOutcome::Failed(e),
            None => FetchOutcome::Cancelled,
        }
    }
}

fn failure(key: AssetKey, stage: FailureStage, reason: impl std::fmt::Display) -> AssetFailure {
    AssetFailure {
        key,
        stage,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upsert::tests::RecordingStore;

    #[tokio::test]
    async fn run_with_no_candidates_reports_nothing() {
        struct Silent;

        #[async_trait::async_trait]
        impl EnrichmentSource for Silent {
            fn name(&self) -> &str {
                "silent"
            }

            async fn fetch(&self, _asset_name: &str) -> Result<RawFacts, FetchError> {
                Ok(RawFacts::default())
            }
        }

        let store = Arc::new(RecordingStore::default());
        let orchestrator =
            ReconciliationOrchestrator::new(store.clone(), Arc::new(Silent), ReconcileOptions::default());
        let report = orchestrator.run(&CancellationToken::new(), None).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert_eq!(report.processed, 0);
        assert!(report.failed.is_empty());
        assert!(store.chunks.lock().unwrap().is_empty());
    }

    struct Resolving;

    #[async_trait::async_trait]
    impl EnrichmentSource for Resolving {
        fn name(&self) -> &str {
            "resolving"
        }

        async fn fetch(&self, _asset_name: &str) -> Result<RawFacts, FetchError> {
            Ok(RawFacts {
                nameservers: vec!["ns1.example.net".into()],
                ..Default::default()
            })
        }
    }

    fn store_with_domains(names: &[&str], failing_commits: usize) -> Arc<RecordingStore> {
        let domains = names
            .iter()
            .map(|name| AssetCandidate {
                key: AssetKey::domain(*name),
                facts: wim_common::types::AssetFacts {
                    status: wim_common::types::LifecycleStatus::New,
                    ops_status: None,
                    website_status: None,
                    redirect_health: None,
                    is_insecure: false,
                    unreachable_passes: 0,
                },
                last_scanned_at: None,
            })
            .collect();
        Arc::new(RecordingStore {
            domains,
            fail_next: std::sync::Mutex::new(failing_commits),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn failed_chunk_succeeds_on_retry() {
        let store = store_with_domains(&["a.com", "b.com", "c.com"], 1);
        let options = ReconcileOptions {
            chunk_size: 10,
            chunk_commit_retries: 1,
            ..Default::default()
        };
        let orchestrator = ReconciliationOrchestrator::new(store.clone(), Arc::new(Resolving), options);
        let report = orchestrator.run(&CancellationToken::new(), None).await.unwrap();

        assert_eq!(report.succeeded, 3);
        assert!(report.failed.is_empty());
        let chunks = store.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 3);
    }

    #[tokio::test]
    async fn exhausted_commit_retries_fail_every_member() {
        let store = store_with_domains(&["a.com", "b.com", "c.com"], 2);
        let options = ReconcileOptions {
            chunk_size: 10,
            chunk_commit_retries: 1,
            ..Default::default()
        };
        let orchestrator = ReconciliationOrchestrator::new(store.clone(), Arc::new(Resolving), options);
        let report = orchestrator.run(&CancellationToken::new(), None).await.unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed.len(), 3);
        assert!(report.failed.iter().all(|f| f.stage == FailureStage::Commit));
        for name in ["a.com", "b.com", "c.com"] {
            assert!(report.is_failed(&AssetKey::domain(name)));
        }
        assert!(store.chunks.lock().unwrap().is_empty());
    }

    #[test]
    fn phases_display_lowercase() {
        assert_eq!(RunPhase::Flushing.to_string(), "flushing");
    }
}
