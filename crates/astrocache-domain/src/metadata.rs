use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::catalog::{Catalog, QueryMode};
use crate::table::Table;

/// Format tag written into every metadata sidecar. Any other value classifies as invalid.
pub const CACHE_FORMAT_VERSION: &str = "2";

/// A request for one dataset: catalog, query mode and limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetRequest {
    pub catalog: Catalog,
    pub mode: QueryMode,
    /// Light years in distance mode, apparent magnitude in magnitude mode.
    pub limit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_parallax_mas: Option<f64>,
}

impl DatasetRequest {
    #[must_use]
    pub fn new(catalog: Catalog, mode: QueryMode, limit: f64) -> Self {
        Self {
            catalog,
            mode,
            limit,
            min_parallax_mas: None,
        }
    }

    #[must_use]
    pub fn with_min_parallax(mut self, min_parallax_mas: f64) -> Self {
        self.min_parallax_mas = Some(min_parallax_mas);
        self
    }
}

/// Sidecar describing how a dataset file was produced.
///
/// `limit_value` is the bound used for the query; `data_min`/`data_max` are the
/// observed range of the governing column and may be tighter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub catalog: Catalog,
    pub mode: QueryMode,
    pub limit_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_parallax_mas: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub query_date: OffsetDateTime,
    pub entry_count: usize,
    pub data_min: Option<f64>,
    pub data_max: Option<f64>,
    pub format_version: String,
}

impl CacheMetadata {
    /// Describe `table` as the result of `request`, observed at `now`.
    #[must_use]
    pub fn describe(request: &DatasetRequest, table: &Table, now: OffsetDateTime) -> Self {
        let range = table
            .first_present(request.mode.governing_columns())
            .and_then(|column| table.observed_range(column));
        Self {
            catalog: request.catalog,
            mode: request.mode,
            limit_value: request.limit,
            min_parallax_mas: request.min_parallax_mas,
            query_date: now,
            entry_count: table.len(),
            data_min: range.map(|(lo, _)| lo),
            data_max: range.map(|(_, hi)| hi),
            format_version: CACHE_FORMAT_VERSION.to_string(),
        }
    }
}
