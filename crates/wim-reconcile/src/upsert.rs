use std::collections::HashSet;
use std::sync::Arc;
use wim_common::types::{AssetKey, AssetPatch};
use wim_storage::{AssetStore, StorageError};

pub const DEFAULT_CHUNK_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum UpsertError {
    #[error("chunk size must be at least 1")]
    ZeroChunkSize,

    #[error("asset {0} was already enqueued by this engine")]
    Duplicate(AssetKey),
}

/// Result of committing one chunk. On failure every patch of the chunk is
/// handed back in `failed` and nothing from it was written.
#[derive(Debug, Default)]
pub struct FlushOutcome {
    pub succeeded: Vec<AssetPatch>,
    pub failed: Vec<AssetPatch>,
    pub error: Option<StorageError>,
}

impl FlushOutcome {
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }
}

/// Accumulates asset patches and commits them in bounded, atomic chunks.
///
/// Reaching `chunk_size` pending patches flushes synchronously inside
/// `enqueue`, so the buffer never grows past one chunk. The engine never
/// retries a failed chunk itself; the caller decides via [`commit_chunk`].
///
/// [`commit_chunk`]: BatchUpsertEngine::commit_chunk
pub struct BatchUpsertEngine<S: AssetStore + ?Sized> {
    store: Arc<S>,
    chunk_size: usize,
    pending: Vec<AssetPatch>,
    seen: HashSet<AssetKey>,
    commits: usize,
}

impl<S: AssetStore + ?Sized> BatchUpsertEngine<S> {
    pub fn new(store: Arc<S>, chunk_size: usize) -> Result<Self, UpsertError> {
        if chunk_size == 0 {
            return Err(UpsertError::ZeroChunkSize);
        }
        Ok(Self {
            store,
            chunk_size,
            pending: Vec::with_capacity(chunk_size),
            seen: HashSet::new(),
            commits: 0,
        })
    }

    /// Queues a patch. Returns the outcome of the auto-flush when this patch
    /// filled the chunk.
    pub fn enqueue(&mut self, patch: AssetPatch) -> Result<Option<FlushOutcome>, UpsertError> {
        if !self.seen.insert(patch.key.clone()) {
            return Err(UpsertError::Duplicate(patch.key));
        }
        self.pending.push(patch);
        if self.pending.len() >= self.chunk_size {
            return Ok(Some(self.flush()));
        }
        Ok(None)
    }

    /// Commits whatever is pending, including a trailing partial chunk.
    pub fn flush(&mut self) -> FlushOutcome {
        if self.pending.is_empty() {
            return FlushOutcome::default();
        }
        let chunk = std::mem::replace(&mut self.pending, Vec::with_capacity(self.chunk_size));
        self.commit(chunk)
    }

    /// Commits a previously failed chunk again.
    pub fn commit_chunk(&mut self, chunk: Vec<AssetPatch>) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        let mut rest = chunk;
        while !rest.is_empty() {
            let tail = rest.split_off(rest.len().min(self.chunk_size));
            let part = self.commit(rest);
            outcome.succeeded.extend(part.succeeded);
            outcome.failed.extend(part.failed);
            if part.error.is_some() {
                outcome.error = part.error;
            }
            rest = tail;
        }
        outcome
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of write transactions issued so far.
    pub fn commits(&self) -> usize {
        self.commits
    }

    fn commit(&mut self, chunk: Vec<AssetPatch>) -> FlushOutcome {
        self.commits += 1;
        match self.store.commit_patches(&chunk) {
            Ok(()) => {
                tracing::debug!(size = chunk.len(), "Committed chunk");
                FlushOutcome {
                    succeeded: chunk,
                    ..Default::default()
                }
            }
            Err(e) => {
                tracing::warn!(size = chunk.len(), error = %e, "Chunk commit failed");
                FlushOutcome {
                    failed: chunk,
                    error: Some(e),
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use wim_common::facts::RawFacts;
    use wim_common::report::{ReclaimedCertificate, RunReport};
    use wim_common::types::{AssetCandidate, AssetKind};
    use wim_storage::ReclaimMode;

    /// Records every committed chunk; fails the next `fail_next` commits.
    /// `domains` are handed out as candidates of kind `Domain`.
    #[derive(Default)]
    pub(crate) struct RecordingStore {
        pub chunks: Mutex<Vec<Vec<AssetKey>>>,
        pub fail_next: Mutex<usize>,
        pub domains: Vec<AssetCandidate>,
    }

    impl AssetStore for RecordingStore {
        fn list_candidates(
            &self,
            kind: AssetKind,
            _since: Option<DateTime<Utc>>,
        ) -> wim_storage::Result<Vec<AssetCandidate>> {
            match kind {
                AssetKind::Domain => Ok(self.domains.clone()),
                AssetKind::Fqdn => Ok(Vec::new()),
            }
        }

        fn commit_patches(&self, patches: &[AssetPatch]) -> wim_storage::Result<()> {
            let mut fail_next = self.fail_next.lock().unwrap();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(StorageError::NotFound {
                    entity: "domain",
                    id: "simulated".into(),
                });
            }
            self.chunks
                .lock()
                .unwrap()
                .push(patches.iter().map(|p| p.key.clone()).collect());
            Ok(())
        }

        fn reclaim_certificates(
            &self,
            _cutoff: DateTime<Utc>,
            _mode: ReclaimMode,
            _before_delete: &mut dyn FnMut(&[ReclaimedCertificate]),
        ) -> wim_storage::Result<Vec<ReclaimedCertificate>> {
            Ok(Vec::new())
        }

        fn record_run(&self, _report: &RunReport) -> wim_storage::Result<()> {
            Ok(())
        }
    }

    fn patch(i: usize) -> AssetPatch {
        AssetPatch {
            key: AssetKey::domain(format!("d{i}.example.com")),
            scanned_at: Utc::now(),
            status: None,
            facts: RawFacts::default(),
        }
    }

    #[test]
    fn chunks_are_bounded_and_trailing_chunk_is_flushed() {
        let store = Arc::new(RecordingStore::default());
        let mut engine = BatchUpsertEngine::new(store.clone(), 100).unwrap();

        let mut auto_flushes = 0;
        for i in 0..250 {
            if engine.enqueue(patch(i)).unwrap().is_some() {
                auto_flushes += 1;
            }
        }
        assert_eq!(auto_flushes, 2);
        assert_eq!(engine.pending_len(), 50);

        let outcome = engine.flush();
        assert_eq!(outcome.succeeded.len(), 50);

        let sizes: Vec<usize> = store.chunks.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(engine.commits(), 3);
        assert!(engine.flush().is_empty());
    }

    #[test]
    fn failed_chunk_is_returned_not_retried() {
        let store = Arc::new(RecordingStore::default());
        *store.fail_next.lock().unwrap() = 1;
        let mut engine = BatchUpsertEngine::new(store.clone(), 2).unwrap();

        engine.enqueue(patch(0)).unwrap();
        let outcome = engine.enqueue(patch(1)).unwrap().unwrap();
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.error.is_some());
        assert!(store.chunks.lock().unwrap().is_empty());

        let retried = engine.commit_chunk(outcome.failed);
        assert_eq!(retried.succeeded.len(), 2);
        assert!(retried.error.is_none());
        assert_eq!(engine.commits(), 2);
    }

    #[test]
    fn same_asset_is_rejected_twice() {
        let store = Arc::new(RecordingStore::default());
        let mut engine = BatchUpsertEngine::new(store, 10).unwrap();
        engine.enqueue(patch(7)).unwrap();
        assert!(matches!(
            engine.enqueue(patch(7)),
            Err(UpsertError::Duplicate(_))
        ));
        assert_eq!(engine.pending_len(), 1);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let store = Arc::new(RecordingStore::default());
        assert!(matches!(
            BatchUpsertEngine::new(store, 0),
            Err(UpsertError::ZeroChunkSize)
        ));
    }
}
