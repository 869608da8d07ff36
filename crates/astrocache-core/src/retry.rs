//! Rate-limited, retrying wrapper around a [`RemoteLookupClient`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::NetworkConfig;
use crate::lookup::{LookupError, LookupOutcome, RemoteLookupClient};
use crate::ratelimit::{RateLimiterStats, Sleeper, ThreadSleeper, Throttle};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per object, including the first.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_network(network: &NetworkConfig) -> Self {
        Self {
            max_retries: network.max_retries,
            base_delay: network.base_delay,
        }
    }

    /// `base_delay * 2^attempt`, saturating.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("[AC102] lookup for '{name}' failed after {attempts} attempts: {source}")]
pub struct QueryFailure {
    pub name: String,
    pub attempts: u32,
    #[source]
    pub source: LookupError,
}

#[derive(Debug, Default)]
struct Counters {
    successful: AtomicU64,
    failed: AtomicU64,
    cached: AtomicU64,
    retries: AtomicU64,
}

/// Counters and limiter figures for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySummary {
    pub successful: u64,
    pub failed: u64,
    pub cached: u64,
    pub retries: u64,
    pub limiter: RateLimiterStats,
    pub failed_objects: Vec<String>,
}

impl QuerySummary {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.successful + self.failed + self.cached
    }
}

impl fmt::Display for QuerySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} queried, {} cached, {} failed ({} retries); {:.2} q/s achieved of {:.2} target, {:.1}s waiting",
            self.successful,
            self.cached,
            self.failed,
            self.retries,
            self.limiter.achieved_rate,
            self.limiter.target_rate,
            self.limiter.total_wait.as_secs_f64()
        )?;
        if !self.failed_objects.is_empty() {
            write!(f, "; failed: {}", self.failed_objects.join(", "))?;
        }
        Ok(())
    }
}

pub struct RetryingQueryExecutor {
    client: Box<dyn RemoteLookupClient>,
    throttle: Arc<dyn Throttle>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    counters: Counters,
    failures: Mutex<Vec<String>>,
}

impl RetryingQueryExecutor {
    pub fn new(
        client: Box<dyn RemoteLookupClient>,
        throttle: Arc<dyn Throttle>,
        policy: RetryPolicy,
    ) -> Self {
        Self::with_sleeper(client, throttle, policy, Arc::new(ThreadSleeper))
    }

    pub fn with_sleeper(
        client: Box<dyn RemoteLookupClient>,
        throttle: Arc<dyn Throttle>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            client,
            throttle,
            policy,
            sleeper,
            counters: Counters::default(),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Look up `name`, waiting on the limiter before every attempt.
    ///
    /// An empty answer returns `NotFound` immediately. Transport and protocol
    /// errors are retried with exponential backoff; the last one is returned
    /// once the policy's attempts are exhausted.
    pub fn query(&self, name: &str) -> Result<LookupOutcome, QueryFailure> {
        let attempts = self.policy.attempts();
        let mut attempt = 0;
        loop {
            let waited = self.throttle.acquire();
            debug!(object = name, attempt, ?waited, "lookup attempt");
            match self.client.lookup(name) {
                Ok(outcome) => {
                    self.counters.successful.fetch_add(1, Ordering::Relaxed);
                    if !outcome.is_found() {
                        debug!(object = name, "lookup returned no rows");
                    }
                    return Ok(outcome);
                }
                Err(err) if attempt + 1 < attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(object = name, attempt, %err, ?delay, "lookup failed; retrying");
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    self.sleeper.sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    warn!(object = name, attempts, %err, "lookup failed; giving up");
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.failures
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .push(name.to_string());
                    return Err(QueryFailure {
                        name: name.to_string(),
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }

    /// Count an object answered without a remote call.
    pub fn record_cached(&self) {
        self.counters.cached.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn summary(&self) -> QuerySummary {
        QuerySummary {
            successful: self.counters.successful.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cached: self.counters.cached.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            limiter: self.throttle.stats(),
            failed_objects: self
                .failures
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone(),
        }
    }
}
