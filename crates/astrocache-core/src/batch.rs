//! Bulk property lookups with periodic checkpoints.
//!
//! Objects are processed sequentially in the order given. The store is saved
//! every `checkpoint_every` objects and at each batch boundary, so an
//! interrupted run loses at most the work since the last checkpoint.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use astrocache_domain::{
    normalize_object_name, table_keys, PropertyRecord, SupplementalCatalog, Table,
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::{BatchConfig, Config};
use crate::lookup::{LookupOutcome, RemoteLookupClient};
use crate::progress::{deliver, BatchProgress, ProgressSink};
use crate::ratelimit::RateLimiter;
use crate::retry::{QuerySummary, RetryPolicy, RetryingQueryExecutor};
use crate::store::PropertyStore;

/// Counts for one coordinator run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub requested: usize,
    pub missing: usize,
    pub found: usize,
    pub not_found: usize,
    pub failed: usize,
    pub supplemental: usize,
    pub checkpoints: usize,
    pub queries: QuerySummary,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requested, {} already known; {} found, {} not found, {} failed, {} from the built-in catalog; {} checkpoints. {}",
            self.requested,
            self.requested - self.missing,
            self.found,
            self.not_found,
            self.failed,
            self.supplemental,
            self.checkpoints,
            self.queries
        )
    }
}

enum Resolution {
    Found,
    NotFound,
    Failed,
    Supplemental,
}

pub struct BatchQueryCoordinator {
    executor: RetryingQueryExecutor,
    supplemental: SupplementalCatalog,
    batch: BatchConfig,
    progress: Option<Box<dyn ProgressSink>>,
    attempted: HashSet<String>,
    last_checkpoint: Option<OffsetDateTime>,
}

impl BatchQueryCoordinator {
    pub fn new(
        executor: RetryingQueryExecutor,
        supplemental: SupplementalCatalog,
        batch: BatchConfig,
    ) -> Self {
        Self {
            executor,
            supplemental,
            batch,
            progress: None,
            attempted: HashSet::new(),
            last_checkpoint: None,
        }
    }

    /// Coordinator over `client` with the configured limiter, retry policy and batching.
    ///
    /// # Errors
    /// Returns an error if the configured query rate is unusable.
    pub fn from_config(config: &Config, client: Box<dyn RemoteLookupClient>) -> Result<Self> {
        let limiter = RateLimiter::new(config.network().queries_per_second)?;
        let executor = RetryingQueryExecutor::new(
            client,
            Arc::new(limiter),
            RetryPolicy::from_network(config.network()),
        );
        Ok(Self::new(
            executor,
            SupplementalCatalog::builtin(),
            *config.batch(),
        ))
    }

    #[must_use]
    pub fn with_progress(mut self, sink: Box<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// When the store was last saved by this coordinator.
    #[must_use]
    pub fn last_checkpoint(&self) -> Option<OffsetDateTime> {
        self.last_checkpoint
    }

    #[must_use]
    pub fn query_summary(&self) -> QuerySummary {
        self.executor.summary()
    }

    /// Look up every name in `names` that `store` does not already know.
    ///
    /// Names are normalized and used as store keys. Records older than the
    /// configured staleness are refreshed. Lookup failures become placeholder
    /// records and never abort the run.
    ///
    /// # Errors
    /// Propagates checkpoint failures, including a refused destructive write.
    pub fn run<S: AsRef<str>>(
        &mut self,
        names: &[S],
        store: &mut PropertyStore,
    ) -> Result<BatchSummary> {
        let now = OffsetDateTime::now_utc();
        let max_age =
            time::Duration::try_from(self.batch.staleness).unwrap_or(time::Duration::MAX);

        let mut seen = HashSet::new();
        let requested: Vec<String> = names
            .iter()
            .map(|name| normalize_object_name(name.as_ref()))
            .filter(|name| !name.is_empty() && seen.insert(name.clone()))
            .collect();
        let missing: Vec<String> = requested
            .iter()
            .filter(|name| !self.attempted.contains(*name))
            .filter(|name| {
                store
                    .get(name)
                    .map_or(true, |record| record.is_stale(now, max_age))
            })
            .cloned()
            .collect();

        let mut summary = BatchSummary {
            requested: requested.len(),
            missing: missing.len(),
            found: 0,
            not_found: 0,
            failed: 0,
            supplemental: 0,
            checkpoints: 0,
            queries: self.executor.summary(),
        };
        if missing.is_empty() {
            debug!(requested = requested.len(), "every requested object is already known");
            return Ok(summary);
        }

        let batch_size = self.batch.batch_size(missing.len());
        let checkpoint_every = self.batch.checkpoint_every.max(1);
        info!(
            requested = requested.len(),
            missing = missing.len(),
            batch_size,
            "starting batch lookups"
        );

        let total = missing.len();
        let mut processed = 0;
        for (batch_index, chunk) in missing.chunks(batch_size).enumerate() {
            debug!(batch = batch_index + 1, size = chunk.len(), "processing batch");
            let mut saved_at = None;
            for name in chunk {
                let resolution = self.resolve(name, store);
                processed += 1;
                let label = match resolution {
                    Resolution::Found => {
                        summary.found += 1;
                        "found"
                    }
                    Resolution::NotFound => {
                        summary.not_found += 1;
                        "not found"
                    }
                    Resolution::Failed => {
                        summary.failed += 1;
                        "failed"
                    }
                    Resolution::Supplemental => {
                        summary.supplemental += 1;
                        "built-in catalog"
                    }
                };
                self.report(processed, total, format!("{name}: {label}"));
                if processed % checkpoint_every == 0 {
                    self.checkpoint(store)?;
                    summary.checkpoints += 1;
                    saved_at = Some(processed);
                }
            }
            if saved_at != Some(processed) {
                self.checkpoint(store)?;
                summary.checkpoints += 1;
            }
        }

        summary.queries = self.executor.summary();
        info!(%summary, "batch lookups finished");
        Ok(summary)
    }

    /// [`run`](Self::run) over the object keys of every row in a catalog table.
    ///
    /// # Errors
    /// See [`run`](Self::run).
    pub fn run_dataset(
        &mut self,
        table: &Table,
        store: &mut PropertyStore,
    ) -> Result<BatchSummary> {
        let keys = table_keys(table);
        if keys.len() < table.len() {
            warn!(
                rows = table.len(),
                keyed = keys.len(),
                "rows without identifiers or position skipped"
            );
        }
        self.run(&keys, store)
    }

    fn resolve(&mut self, name: &str, store: &mut PropertyStore) -> Resolution {
        let now = OffsetDateTime::now_utc();
        self.attempted.insert(name.to_string());
        if let Some(record) = self.supplemental.lookup(name, now) {
            self.executor.record_cached();
            store.merge([(name.to_string(), record)]);
            return Resolution::Supplemental;
        }
        match self.executor.query(name) {
            Ok(LookupOutcome::Found(mut record)) => {
                record.fetched_at.get_or_insert(now);
                store.merge([(name.to_string(), record)]);
                Resolution::Found
            }
            Ok(LookupOutcome::NotFound) => {
                mark_attempted(store, name, now);
                Resolution::NotFound
            }
            Err(failure) => {
                warn!(object = name, error = %failure, "recording placeholder for failed lookup");
                mark_attempted(store, name, now);
                Resolution::Failed
            }
        }
    }

    fn report(&mut self, current: usize, total: usize, message: String) {
        if let Some(sink) = self.progress.as_deref_mut() {
            deliver(
                sink,
                &BatchProgress {
                    current,
                    total,
                    message,
                },
            );
        }
    }

    fn checkpoint(&mut self, store: &PropertyStore) -> Result<()> {
        store.save()?;
        self.last_checkpoint = Some(OffsetDateTime::now_utc());
        debug!(records = store.len(), path = %store.path().display(), "checkpoint saved");
        Ok(())
    }
}

/// Insert a placeholder for a new key, or refresh the fetch time of an existing one.
fn mark_attempted(store: &mut PropertyStore, key: &str, at: OffsetDateTime) {
    if !store.insert_placeholder(key, at) {
        store.merge([(
            key.to_string(),
            PropertyRecord {
                fetched_at: Some(at),
                ..PropertyRecord::default()
            },
        )]);
    }
}
