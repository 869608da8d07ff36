//! Settings assembled from the process environment.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use astrocache_domain::{Catalog, QueryMode};
use dirs_next::home_dir;
use tracing::warn;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

pub(crate) const DEFAULT_SIMBAD_ENDPOINT: &str = "https://simbad.cds.unistra.fr/simbad/sim-tap/sync";

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.var(key)?;
        match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = raw, "ignoring malformed setting");
                None
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) cache: CacheConfig,
    pub(crate) network: NetworkConfig,
    pub(crate) batch: BatchConfig,
    pub(crate) coverage: CoverageConfig,
    pub(crate) guard: StoreGuard,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if the cache root cannot be resolved.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let network_defaults = NetworkConfig::default();
        let batch_defaults = BatchConfig::default();
        Ok(Self {
            cache: CacheConfig {
                root: resolve_cache_root(snapshot)?,
            },
            network: NetworkConfig {
                online: match snapshot.var("ASTROCACHE_ONLINE") {
                    Some(value) => {
                        let lowered = value.to_ascii_lowercase();
                        !matches!(lowered.as_str(), "0" | "false" | "no" | "off" | "")
                    }
                    None => true,
                },
                queries_per_second: snapshot
                    .parsed::<f64>("ASTROCACHE_QPS")
                    .filter(|qps| qps.is_finite() && *qps > 0.0)
                    .unwrap_or(network_defaults.queries_per_second),
                max_retries: snapshot
                    .parsed("ASTROCACHE_MAX_RETRIES")
                    .unwrap_or(network_defaults.max_retries),
                base_delay: snapshot
                    .parsed("ASTROCACHE_RETRY_BASE_MS")
                    .map_or(network_defaults.base_delay, Duration::from_millis),
                timeout: snapshot
                    .parsed("ASTROCACHE_TIMEOUT_SECS")
                    .map_or(network_defaults.timeout, Duration::from_secs),
                endpoint: snapshot
                    .var("ASTROCACHE_SIMBAD_URL")
                    .map_or(network_defaults.endpoint, ToOwned::to_owned),
            },
            batch: BatchConfig {
                checkpoint_every: snapshot
                    .parsed::<usize>("ASTROCACHE_CHECKPOINT_EVERY")
                    .filter(|every| *every > 0)
                    .unwrap_or(batch_defaults.checkpoint_every),
                max_batch: snapshot
                    .parsed::<usize>("ASTROCACHE_MAX_BATCH")
                    .map_or(batch_defaults.max_batch, |max| max.max(batch_defaults.min_batch)),
                staleness: snapshot
                    .parsed::<u64>("ASTROCACHE_STALE_DAYS")
                    .map_or(batch_defaults.staleness, |days| {
                        match days.checked_mul(SECONDS_PER_DAY) {
                            Some(secs) => Duration::from_secs(secs),
                            None => {
                                warn!(days, "ASTROCACHE_STALE_DAYS out of range; using default");
                                batch_defaults.staleness
                            }
                        }
                    }),
                ..batch_defaults
            },
            coverage: CoverageConfig::from_snapshot(snapshot),
            guard: StoreGuard::default(),
        })
    }

    #[must_use]
    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    #[must_use]
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    #[must_use]
    pub fn batch(&self) -> &BatchConfig {
        &self.batch
    }

    #[must_use]
    pub fn coverage(&self) -> &CoverageConfig {
        &self.coverage
    }

    #[must_use]
    pub fn guard(&self) -> StoreGuard {
        self.guard
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub root: PathBuf,
}

impl CacheConfig {
    /// Property store file for one query mode.
    #[must_use]
    pub fn property_store_path(&self, mode: QueryMode) -> PathBuf {
        self.root.join(format!("star_properties_{mode}.json"))
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub online: bool,
    pub queries_per_second: f64,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
    pub endpoint: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            online: true,
            queries_per_second: 5.0,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
            endpoint: DEFAULT_SIMBAD_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub checkpoint_every: usize,
    pub min_batch: usize,
    pub max_batch: usize,
    pub staleness: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 10,
            min_batch: 10,
            max_batch: 200,
            staleness: Duration::from_secs(30 * SECONDS_PER_DAY),
        }
    }
}

impl BatchConfig {
    /// Batch size for `missing` outstanding lookups: a tenth of the work, clamped.
    #[must_use]
    pub fn batch_size(&self, missing: usize) -> usize {
        let floor = self.min_batch.max(1);
        (missing / 10).clamp(floor, self.max_batch.max(floor))
    }
}

/// Destructive-write guard thresholds for the property store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreGuard {
    /// Guard only applies when the existing store holds more records than this.
    pub min_existing: usize,
    /// Refuse writes that keep less than this fraction of the existing records.
    pub min_ratio: f64,
}

impl Default for StoreGuard {
    fn default() -> Self {
        Self {
            min_existing: 100,
            min_ratio: 0.1,
        }
    }
}

impl StoreGuard {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            min_existing: usize::MAX,
            min_ratio: 0.0,
        }
    }

    #[must_use]
    pub fn refuses(&self, existing: usize, incoming: usize) -> bool {
        #[allow(clippy::cast_precision_loss)]
        let floor = existing as f64 * self.min_ratio;
        #[allow(clippy::cast_precision_loss)]
        let incoming = incoming as f64;
        existing > self.min_existing && incoming < floor
    }
}

/// Size and limit ranges under which a dataset file is assumed to be a superset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComprehensiveCoverage {
    pub min_file_bytes: u64,
    pub max_distance_ly: f64,
    pub max_magnitude: f64,
}

impl ComprehensiveCoverage {
    #[must_use]
    pub fn covers(&self, mode: QueryMode, limit: f64) -> bool {
        match mode {
            QueryMode::Distance => limit > 0.0 && limit <= self.max_distance_ly,
            QueryMode::Magnitude => limit <= self.max_magnitude,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoverageConfig {
    entries: HashMap<Catalog, ComprehensiveCoverage>,
}

impl CoverageConfig {
    /// Thresholds matching full-sky downloads of each catalog.
    #[must_use]
    pub fn standard() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            Catalog::Hipparcos,
            ComprehensiveCoverage {
                min_file_bytes: 20 * 1024 * 1024,
                max_distance_ly: 100.0,
                max_magnitude: 9.0,
            },
        );
        entries.insert(
            Catalog::Gaia,
            ComprehensiveCoverage {
                min_file_bytes: 200 * 1024 * 1024,
                max_distance_ly: 100.0,
                max_magnitude: 9.0,
            },
        );
        Self { entries }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, catalog: Catalog, coverage: ComprehensiveCoverage) -> Self {
        self.entries.insert(catalog, coverage);
        self
    }

    #[must_use]
    pub fn get(&self, catalog: Catalog) -> Option<&ComprehensiveCoverage> {
        self.entries.get(&catalog)
    }

    fn from_snapshot(snapshot: &EnvSnapshot) -> Self {
        let mut config = Self::standard();
        for catalog in Catalog::ALL {
            let key = format!(
                "ASTROCACHE_COMPREHENSIVE_{}_BYTES",
                catalog.as_ref().to_ascii_uppercase()
            );
            match snapshot.parsed::<u64>(&key) {
                Some(0) => {
                    config.entries.remove(&catalog);
                }
                Some(bytes) => {
                    if let Some(entry) = config.entries.get_mut(&catalog) {
                        entry.min_file_bytes = bytes;
                    }
                }
                None => {}
            }
        }
        config
    }
}

fn resolve_cache_root(snapshot: &EnvSnapshot) -> Result<PathBuf> {
    if let Some(override_path) = snapshot.var("ASTROCACHE_CACHE_PATH") {
        let path = PathBuf::from(override_path);
        if path.is_absolute() {
            return Ok(path);
        }
        return Ok(env::current_dir()?.join(path));
    }
    if let Some(xdg) = snapshot.var("XDG_CACHE_HOME") {
        return Ok(PathBuf::from(xdg).join("astrocache"));
    }
    let home = home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(home.join(".cache").join("astrocache"))
}
