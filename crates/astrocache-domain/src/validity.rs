//! Classification of a dataset request against the stored metadata.
//!
//! The classification is recomputed on every request and never persisted.
//! Both modes compare limits the same way: a larger stored limit (farther
//! distance, fainter magnitude) is a superset of a smaller requested one.

use std::fmt;

use crate::catalog::{Catalog, QueryMode};
use crate::metadata::{CacheMetadata, DatasetRequest, CACHE_FORMAT_VERSION};

const LIMIT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum InvalidReason {
    MetadataMissing,
    MetadataUnreadable(String),
    CatalogMismatch { cached: Catalog, requested: Catalog },
    ModeMismatch { cached: QueryMode, requested: QueryMode },
    FormatVersion { found: String },
    ParallaxConstraint {
        cached: Option<f64>,
        requested: Option<f64>,
    },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::MetadataMissing => write!(f, "metadata sidecar missing"),
            InvalidReason::MetadataUnreadable(err) => write!(f, "metadata unreadable: {err}"),
            InvalidReason::CatalogMismatch { cached, requested } => {
                write!(f, "cached catalog {cached} does not match {requested}")
            }
            InvalidReason::ModeMismatch { cached, requested } => {
                write!(f, "cached mode {cached} does not match {requested}")
            }
            InvalidReason::FormatVersion { found } => write!(
                f,
                "format version {found} (expected {CACHE_FORMAT_VERSION})"
            ),
            InvalidReason::ParallaxConstraint { cached, requested } => write!(
                f,
                "minimum parallax {cached:?} does not match {requested:?}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheValidity {
    /// Stored limit equals the requested one.
    Exact,
    /// Stored data covers more than requested; filter only.
    Subset { cached_limit: f64 },
    /// Stored data covers less than requested; fetch the delta.
    Expand { cached_limit: f64 },
    Invalid(InvalidReason),
    Missing,
}

impl CacheValidity {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            CacheValidity::Exact => "exact",
            CacheValidity::Subset { .. } => "subset",
            CacheValidity::Expand { .. } => "expand",
            CacheValidity::Invalid(_) => "invalid",
            CacheValidity::Missing => "missing",
        }
    }
}

/// Classify `request` against `metadata` (`None` when no cache exists).
#[must_use]
pub fn classify(request: &DatasetRequest, metadata: Option<&CacheMetadata>) -> CacheValidity {
    let Some(meta) = metadata else {
        return CacheValidity::Missing;
    };
    if meta.format_version != CACHE_FORMAT_VERSION {
        return CacheValidity::Invalid(InvalidReason::FormatVersion {
            found: meta.format_version.clone(),
        });
    }
    if meta.catalog != request.catalog {
        return CacheValidity::Invalid(InvalidReason::CatalogMismatch {
            cached: meta.catalog,
            requested: request.catalog,
        });
    }
    if meta.mode != request.mode {
        return CacheValidity::Invalid(InvalidReason::ModeMismatch {
            cached: meta.mode,
            requested: request.mode,
        });
    }
    if !same_limit(meta.min_parallax_mas, request.min_parallax_mas) {
        return CacheValidity::Invalid(InvalidReason::ParallaxConstraint {
            cached: meta.min_parallax_mas,
            requested: request.min_parallax_mas,
        });
    }
    compare_limits(meta.limit_value, request.limit)
}

fn compare_limits(stored: f64, requested: f64) -> CacheValidity {
    if (stored - requested).abs() <= LIMIT_EPSILON {
        CacheValidity::Exact
    } else if stored > requested {
        CacheValidity::Subset {
            cached_limit: stored,
        }
    } else {
        CacheValidity::Expand {
            cached_limit: stored,
        }
    }
}

fn same_limit(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => (a - b).abs() <= LIMIT_EPSILON,
        _ => false,
    }
}
