//! Per-dataset catalog cache.
//!
//! One data file and one `_metadata` sidecar per `(catalog, mode)`:
//! `<root>/<catalog>_data_<mode>.json` and `<root>/<catalog>_data_<mode>_metadata.json`.
//! Each request is classified against the sidecar and answered by filtering,
//! extending, or regenerating the data file. Callers must not drive two
//! managers against the same dataset concurrently.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use astrocache_domain::{
    classify, CacheMetadata, CacheValidity, Catalog, DatasetRequest, FetchConstraint,
    InvalidReason, QueryMode, Table, PARALLAX_COLUMNS,
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::{Config, CoverageConfig};
use crate::fsutil::{read_json, write_temp_json};

/// Fetches catalog rows matching one constraint from the remote service.
pub trait RemoteCatalogFetcher: Send + Sync {
    fn fetch_range(&self, catalog: Catalog, constraint: &FetchConstraint) -> Result<Table>;
}

impl<T: RemoteCatalogFetcher + ?Sized> RemoteCatalogFetcher for Box<T> {
    fn fetch_range(&self, catalog: Catalog, constraint: &FetchConstraint) -> Result<Table> {
        (**self).fetch_range(catalog, constraint)
    }
}

impl<T: RemoteCatalogFetcher + ?Sized> RemoteCatalogFetcher for std::sync::Arc<T> {
    fn fetch_range(&self, catalog: Catalog, constraint: &FetchConstraint) -> Result<Table> {
        (**self).fetch_range(catalog, constraint)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("[AC400] fetching {catalog} rows ({constraint}) failed")]
    Fetch {
        catalog: Catalog,
        constraint: FetchConstraint,
        #[source]
        source: anyhow::Error,
    },
    #[error("[AC401] {catalog} {mode} dataset needs a remote fetch but network access is disabled")]
    Offline { catalog: Catalog, mode: QueryMode },
    #[error("[AC402] staged dataset for {} did not round-trip", path.display())]
    VerificationFailed { path: PathBuf },
}

/// How a dataset request was answered.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheStatus {
    /// Served from a file large enough to be treated as a superset, without classification.
    Comprehensive,
    Exact,
    Subset { cached_limit: f64 },
    Expand { cached_limit: f64 },
    Invalid(InvalidReason),
    Missing,
}

impl From<CacheValidity> for CacheStatus {
    fn from(validity: CacheValidity) -> Self {
        match validity {
            CacheValidity::Exact => CacheStatus::Exact,
            CacheValidity::Subset { cached_limit } => CacheStatus::Subset { cached_limit },
            CacheValidity::Expand { cached_limit } => CacheStatus::Expand { cached_limit },
            CacheValidity::Invalid(reason) => CacheStatus::Invalid(reason),
            CacheValidity::Missing => CacheStatus::Missing,
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::Comprehensive => write!(f, "comprehensive cache hit"),
            CacheStatus::Exact => write!(f, "cache hit"),
            CacheStatus::Subset { cached_limit } => {
                write!(f, "subset of cached limit {cached_limit}")
            }
            CacheStatus::Expand { cached_limit } => {
                write!(f, "expanded from cached limit {cached_limit}")
            }
            CacheStatus::Invalid(reason) => write!(f, "regenerated ({reason})"),
            CacheStatus::Missing => write!(f, "cache miss"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetOutcome {
    pub request: DatasetRequest,
    pub status: CacheStatus,
    pub table: Table,
    /// Rows received from the remote service while answering this request.
    pub fetched_rows: usize,
}

impl fmt::Display for DatasetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = match self.request.mode {
            QueryMode::Distance => format!("<= {} ly", self.request.limit),
            QueryMode::Magnitude => format!("<= {} mag", self.request.limit),
        };
        write!(
            f,
            "{} {} {bound}: {}, {} rows ({} fetched)",
            self.request.catalog,
            self.request.mode,
            self.status,
            self.table.len(),
            self.fetched_rows
        )
    }
}

pub struct CatalogCacheManager {
    root: PathBuf,
    coverage: CoverageConfig,
    online: bool,
    fetcher: Box<dyn RemoteCatalogFetcher>,
}

impl CatalogCacheManager {
    pub fn new(
        root: impl Into<PathBuf>,
        coverage: CoverageConfig,
        fetcher: Box<dyn RemoteCatalogFetcher>,
    ) -> Self {
        Self {
            root: root.into(),
            coverage,
            online: true,
            fetcher,
        }
    }

    pub fn from_config(config: &Config, fetcher: Box<dyn RemoteCatalogFetcher>) -> Self {
        Self::new(config.cache().root.clone(), config.coverage().clone(), fetcher)
            .with_online(config.network().online)
    }

    #[must_use]
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    #[must_use]
    pub fn data_path(&self, catalog: Catalog, mode: QueryMode) -> PathBuf {
        self.root.join(format!("{catalog}_data_{mode}.json"))
    }

    #[must_use]
    pub fn metadata_path(&self, catalog: Catalog, mode: QueryMode) -> PathBuf {
        self.root.join(format!("{catalog}_data_{mode}_metadata.json"))
    }

    /// Classify `request` against what is on disk.
    ///
    /// A data file without a readable sidecar is `Invalid`; no data file is `Missing`.
    #[must_use]
    pub fn classify(&self, request: &DatasetRequest) -> CacheValidity {
        if !self.data_path(request.catalog, request.mode).exists() {
            return CacheValidity::Missing;
        }
        let meta_path = self.metadata_path(request.catalog, request.mode);
        if !meta_path.exists() {
            return CacheValidity::Invalid(InvalidReason::MetadataMissing);
        }
        match read_json::<CacheMetadata>(&meta_path) {
            Ok(meta) => classify(request, Some(&meta)),
            Err(err) => CacheValidity::Invalid(InvalidReason::MetadataUnreadable(format!("{err:#}"))),
        }
    }

    /// Answer `request` from the cache, fetching from the remote service only what is missing.
    ///
    /// # Errors
    /// Returns [`CatalogError::Fetch`] when a needed remote fetch fails,
    /// [`CatalogError::Offline`] when one is needed while offline, and I/O errors
    /// from persisting a refreshed dataset.
    pub fn load_dataset(&self, request: &DatasetRequest) -> Result<DatasetOutcome> {
        if let Some(outcome) = self.comprehensive(request) {
            return Ok(outcome);
        }

        let validity = self.classify(request);
        info!(
            catalog = %request.catalog,
            mode = %request.mode,
            limit = request.limit,
            validity = validity.label(),
            "classified dataset cache"
        );
        let status = CacheStatus::from(validity.clone());
        match validity {
            CacheValidity::Exact | CacheValidity::Subset { .. } => match self.read_data(request) {
                Ok(table) => Ok(DatasetOutcome {
                    request: *request,
                    status,
                    table: filter_to_request(&table, request),
                    fetched_rows: 0,
                }),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "cached dataset unreadable; regenerating");
                    self.regenerate(request, status_for_unreadable(&err))
                }
            },
            CacheValidity::Expand { cached_limit } => match self.read_data(request) {
                Ok(existing) => self.expand(request, existing, cached_limit, status),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "cached dataset unreadable; regenerating");
                    self.regenerate(request, status_for_unreadable(&err))
                }
            },
            CacheValidity::Invalid(_) | CacheValidity::Missing => self.regenerate(request, status),
        }
    }

    fn comprehensive(&self, request: &DatasetRequest) -> Option<DatasetOutcome> {
        let coverage = self.coverage.get(request.catalog)?;
        if !coverage.covers(request.mode, request.limit) {
            return None;
        }
        let path = self.data_path(request.catalog, request.mode);
        let size = fs::metadata(&path).ok()?.len();
        if size < coverage.min_file_bytes {
            return None;
        }
        match self.read_data(request) {
            Ok(table) => {
                info!(
                    path = %path.display(),
                    bytes = size,
                    limit = request.limit,
                    "serving request from comprehensive dataset"
                );
                Some(DatasetOutcome {
                    request: *request,
                    status: CacheStatus::Comprehensive,
                    table: filter_to_request(&table, request),
                    fetched_rows: 0,
                })
            }
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "comprehensive dataset unreadable");
                None
            }
        }
    }

    fn expand(
        &self,
        request: &DatasetRequest,
        mut existing: Table,
        cached_limit: f64,
        status: CacheStatus,
    ) -> Result<DatasetOutcome> {
        let constraint = FetchConstraint::delta(request.mode, cached_limit, request.limit);
        let mut delta = self.fetch(request, &constraint)?;
        let fetched_rows = delta.len();
        // distances must exist on both sides before the union pads missing columns
        existing.derive_distances();
        delta.derive_distances();
        let merged = existing.merge_dedup(&delta, request.catalog.identifier_columns());
        debug!(
            existing = existing.len(),
            fetched = fetched_rows,
            merged = merged.len(),
            "merged delta into cached dataset"
        );
        self.persist(request, &merged)?;
        Ok(DatasetOutcome {
            request: *request,
            status,
            table: merged,
            fetched_rows,
        })
    }

    fn regenerate(&self, request: &DatasetRequest, status: CacheStatus) -> Result<DatasetOutcome> {
        let constraint = FetchConstraint::full(request.mode, request.limit);
        let mut table = self.fetch(request, &constraint)?;
        let fetched_rows = table.len();
        table.derive_distances();
        self.persist(request, &table)?;
        Ok(DatasetOutcome {
            request: *request,
            status,
            table,
            fetched_rows,
        })
    }

    fn fetch(&self, request: &DatasetRequest, constraint: &FetchConstraint) -> Result<Table> {
        if !self.online {
            return Err(CatalogError::Offline {
                catalog: request.catalog,
                mode: request.mode,
            }
            .into());
        }
        info!(
            catalog = %request.catalog,
            remote = request.catalog.remote_id(),
            %constraint,
            "fetching catalog rows"
        );
        let table = self
            .fetcher
            .fetch_range(request.catalog, constraint)
            .and_then(|table| {
                table.check_shape().context("remote rows are malformed")?;
                Ok(table)
            })
            .map_err(|source| CatalogError::Fetch {
                catalog: request.catalog,
                constraint: *constraint,
                source,
            })?;
        Ok(apply_min_parallax(table, request))
    }

    fn read_data(&self, request: &DatasetRequest) -> Result<Table> {
        let path = self.data_path(request.catalog, request.mode);
        let table: Table = read_json(&path)?;
        table
            .check_shape()
            .with_context(|| format!("malformed dataset {}", path.display()))?;
        Ok(table)
    }

    /// Write data and sidecar for `request`.
    ///
    /// The old sidecar is removed before the data file is replaced and the new
    /// sidecar lands last, so an interrupted write leaves data without metadata.
    fn persist(&self, request: &DatasetRequest, table: &Table) -> Result<()> {
        let data_path = self.data_path(request.catalog, request.mode);
        let meta_path = self.metadata_path(request.catalog, request.mode);
        let metadata = CacheMetadata::describe(request, table, OffsetDateTime::now_utc());

        let staged_data = write_temp_json(&data_path, table)?;
        let staged_meta = write_temp_json(&meta_path, &metadata)?;
        let check_data: Table = read_json(staged_data.path())?;
        if check_data.columns() != table.columns() || check_data.len() != table.len() {
            return Err(CatalogError::VerificationFailed { path: data_path }.into());
        }
        let check_meta: CacheMetadata = read_json(staged_meta.path())?;
        if check_meta != metadata {
            return Err(CatalogError::VerificationFailed { path: meta_path }.into());
        }

        remove_if_present(&meta_path)?;
        staged_data
            .persist(&data_path)
            .with_context(|| format!("replacing {}", data_path.display()))?;
        staged_meta
            .persist(&meta_path)
            .with_context(|| format!("replacing {}", meta_path.display()))?;
        info!(
            path = %data_path.display(),
            rows = table.len(),
            limit = metadata.limit_value,
            "dataset cache written"
        );
        Ok(())
    }
}

fn status_for_unreadable(err: &anyhow::Error) -> CacheStatus {
    CacheStatus::Invalid(InvalidReason::MetadataUnreadable(format!(
        "dataset unreadable: {err:#}"
    )))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
    }
}

fn apply_min_parallax(table: Table, request: &DatasetRequest) -> Table {
    let Some(min_mas) = request.min_parallax_mas else {
        return table;
    };
    match table.first_present(PARALLAX_COLUMNS) {
        Some(column) => table.filter_at_least(column, min_mas),
        None => {
            warn!("dataset has no parallax column; minimum parallax not applied");
            table
        }
    }
}

/// Rows of `table` within the request's limit on the governing column.
fn filter_to_request(table: &Table, request: &DatasetRequest) -> Table {
    let mut table = apply_min_parallax(table.clone(), request);
    if request.mode == QueryMode::Distance {
        table.derive_distances();
    }
    match table.first_present(request.mode.governing_columns()) {
        Some(column) => table.filter_at_most(column, request.limit),
        None => {
            warn!(mode = %request.mode, "dataset has no governing column; returning unfiltered rows");
            table
        }
    }
}
