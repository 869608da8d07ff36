#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

mod batch;
mod catalog_cache;
mod config;
mod fsutil;
mod lookup;
mod progress;
mod ratelimit;
mod retry;
mod simbad;
mod store;

pub use astrocache_domain as domain;

pub use crate::batch::{BatchQueryCoordinator, BatchSummary};
pub use crate::catalog_cache::{
    CacheStatus, CatalogCacheManager, CatalogError, DatasetOutcome, RemoteCatalogFetcher,
};
pub use crate::config::{
    BatchConfig, CacheConfig, ComprehensiveCoverage, Config, CoverageConfig, NetworkConfig,
    StoreGuard,
};
pub use crate::lookup::{LookupError, LookupOutcome, RemoteLookupClient};
pub use crate::progress::{BatchProgress, ChannelProgress, ProgressSink, TracingProgress};
pub use crate::ratelimit::{RateLimiter, RateLimiterStats, Sleeper, ThreadSleeper, Throttle};
pub use crate::retry::{QueryFailure, QuerySummary, RetryPolicy, RetryingQueryExecutor};
pub use crate::simbad::SimbadClient;
pub use crate::store::{
    load_records, save_records, PropertyStore, Records, StoreError, STORE_FORMAT_VERSION,
};
