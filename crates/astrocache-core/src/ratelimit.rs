//! Token-bucket limiter for outbound lookups.
//!
//! Capacity and refill rate both follow the configured queries per second.
//! The bucket itself is a `governor` GCRA limiter; this wrapper blocks until
//! a token is available and keeps the statistics the session summary reports.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use governor::clock::{Clock, DefaultClock, Reference};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;

type DirectLimiter<C> =
    governor::RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Blocks the calling thread. Injected so tests can drive a simulated clock.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterStats {
    pub consumed: u64,
    pub total_wait: Duration,
    /// Tokens consumed per second of wall-clock time since the limiter was created.
    pub achieved_rate: f64,
    pub target_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    consumed: u64,
    total_wait: Duration,
}

pub struct RateLimiter<C: Clock = DefaultClock> {
    limiter: DirectLimiter<C>,
    clock: C,
    started: C::Instant,
    sleeper: Arc<dyn Sleeper>,
    target_rate: f64,
    capacity: u32,
    counters: Mutex<Counters>,
}

impl RateLimiter<DefaultClock> {
    /// Limiter on the system clock that sleeps the current thread.
    ///
    /// # Errors
    /// Returns an error unless `queries_per_second` is finite and positive.
    pub fn new(queries_per_second: f64) -> Result<Self> {
        Self::with_clock(queries_per_second, DefaultClock::default(), Arc::new(ThreadSleeper))
    }
}

impl<C: Clock> RateLimiter<C> {
    /// # Errors
    /// Returns an error unless `queries_per_second` is finite and positive.
    pub fn with_clock(queries_per_second: f64, clock: C, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        if !queries_per_second.is_finite() || queries_per_second <= 0.0 {
            return Err(anyhow!(
                "queries_per_second must be positive (got {queries_per_second})"
            ));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let capacity = queries_per_second.ceil().min(f64::from(u32::MAX)) as u32;
        let burst = NonZeroU32::new(capacity.max(1)).unwrap_or(NonZeroU32::MIN);
        let period = Duration::from_secs_f64(1.0 / queries_per_second);
        let quota = Quota::with_period(period)
            .ok_or_else(|| anyhow!("refill period for {queries_per_second} qps is zero"))?
            .allow_burst(burst);
        let limiter = governor::RateLimiter::direct_with_clock(quota, &clock);
        let started = clock.now();
        Ok(Self {
            limiter,
            clock,
            started,
            sleeper,
            target_rate: queries_per_second,
            capacity: burst.get(),
            counters: Mutex::new(Counters::default()),
        })
    }

    /// Block until a token is available, consume it, and return the time spent waiting.
    pub fn acquire(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            match self.limiter.check() {
                Ok(()) => break,
                Err(not_until) => {
                    let wait = not_until.wait_time_from(self.clock.now());
                    // guard against a zero wait spinning on coarse clocks
                    let wait = wait.max(Duration::from_micros(50));
                    self.sleeper.sleep(wait);
                    waited += wait;
                }
            }
        }
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        counters.consumed += 1;
        counters.total_wait += waited;
        waited
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let elapsed = Duration::from(self.clock.now().duration_since(self.started));
        #[allow(clippy::cast_precision_loss)]
        let achieved_rate = if elapsed.is_zero() {
            0.0
        } else {
            counters.consumed as f64 / elapsed.as_secs_f64()
        };
        RateLimiterStats {
            consumed: counters.consumed,
            total_wait: counters.total_wait,
            achieved_rate,
            target_rate: self.target_rate,
        }
    }
}

/// Source of outbound permits, object-safe over the limiter's clock.
pub trait Throttle: Send + Sync {
    fn acquire(&self) -> Duration;
    fn stats(&self) -> RateLimiterStats;
}

impl<C> Throttle for RateLimiter<C>
where
    C: Clock + Send + Sync,
    C::Instant: Send + Sync,
{
    fn acquire(&self) -> Duration {
        RateLimiter::acquire(self)
    }

    fn stats(&self) -> RateLimiterStats {
        RateLimiter::stats(self)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::simulated;
    use super::*;

    #[test]
    fn rejects_non_positive_rates() {
        assert!(RateLimiter::new(0.0).is_err());
        assert!(RateLimiter::new(-1.0).is_err());
        assert!(RateLimiter::new(f64::NAN).is_err());
    }

    #[test]
    fn burst_is_absorbed_without_waiting() {
        let (limiter, sleeper) = simulated(5.0);
        assert_eq!(limiter.capacity(), 5);
        for _ in 0..5 {
            assert_eq!(limiter.acquire(), Duration::ZERO);
        }
        assert_eq!(sleeper.total(), Duration::ZERO);
        assert!(limiter.acquire() > Duration::ZERO);
    }

    #[test]
    fn sustained_calls_respect_the_target_rate() {
        let rate = 10.0;
        let calls = 200u32;
        let (limiter, sleeper) = simulated(rate);
        for _ in 0..calls {
            limiter.acquire();
        }
        let burst = f64::from(limiter.capacity());
        let minimum = (f64::from(calls) - burst) / rate;
        let elapsed = sleeper.total().as_secs_f64();
        assert!(elapsed + 1e-6 >= minimum, "elapsed {elapsed} < {minimum}");

        let stats = limiter.stats();
        assert_eq!(stats.consumed, u64::from(calls));
        assert_eq!(stats.total_wait, sleeper.total());
        assert!(
            stats.achieved_rate <= rate * 1.1,
            "achieved {} exceeds {rate}",
            stats.achieved_rate
        );
        assert!((stats.target_rate - rate).abs() < f64::EPSILON);
    }

    #[test]
    fn idle_time_refills_up_to_capacity_only() {
        let (limiter, sleeper) = simulated(2.0);
        for _ in 0..2 {
            limiter.acquire();
        }
        // a long idle period must not bank more than the burst capacity
        sleeper.clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.acquire(), Duration::ZERO);
        assert_eq!(limiter.acquire(), Duration::ZERO);
        assert!(limiter.acquire() > Duration::ZERO);
    }
}
