use std::hash::Hash;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

/// Default number of scan requests a single client may make per period.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 10;

/// Length of one rate limiting period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// State of one client's bucket after a successful [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Requests allowed per period
    pub limit: u32,
    /// Requests left in the current period
    pub remaining: u32,
    /// Time until the bucket is refilled
    pub reset_after: Duration,
}

/// Returned when a client has used up its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limit of {limit} requests exceeded, retry in {}s", .retry_after.as_secs())]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// A keyed token bucket rate limiter
///
/// Every key owns a bucket of `requests_per_period` tokens. Once a full
/// period has elapsed since the bucket was last refilled it is topped up to
/// capacity again, which makes this a fixed window per key. Checks never
/// wait: a request either takes a token or is told how long to back off.
#[derive(Debug)]
pub struct RateLimiter<K = IpAddr>
where
    K: Eq + Hash,
{
    /// Maximum number of requests allowed in a time period
    capacity: u32,
    /// Time period for token replenishment
    period: Duration,
    buckets: DashMap<K, Bucket>,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates a new rate limiter
    ///
    /// # Arguments
    ///
    /// * `requests_per_period` - Maximum number of requests a key may make in the given period
    /// * `period` - Window after which a key's bucket is refilled
    pub fn new(requests_per_period: u32, period: Duration) -> Self {
        Self {
            capacity: requests_per_period,
            period,
            buckets: DashMap::new(),
        }
    }

    /// Requests allowed per period
    pub fn limit(&self) -> u32 {
        self.capacity
    }

    /// Tries to take a token for `key`
    ///
    /// # Returns
    /// * `Ok(RateLimitStatus)` - The request may proceed
    /// * `Err(RateLimitExceeded)` - The bucket is empty until `retry_after` has passed
    pub fn check(&self, key: &K) -> Result<RateLimitStatus, RateLimitExceeded> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &K, now: Instant) -> Result<RateLimitStatus, RateLimitExceeded> {
        let mut bucket = self.buckets.entry(key.clone()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        // Calculate how many whole periods passed since the last refill
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if !self.period.is_zero() && elapsed >= self.period {
            let periods = elapsed.as_nanos() / self.period.as_nanos();
            let remainder = elapsed.as_nanos() % self.period.as_nanos();

            bucket.tokens = self.capacity;
            bucket.last_refill = now - Duration::from_nanos(remainder as u64);
            debug!(periods = periods as u64, "refilled rate limit bucket");
        }

        let since_refill = now.saturating_duration_since(bucket.last_refill);
        let reset_after = self.period.saturating_sub(since_refill);

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            Ok(RateLimitStatus {
                limit: self.capacity,
                remaining: bucket.tokens,
                reset_after,
            })
        } else {
            Err(RateLimitExceeded {
                limit: self.capacity,
                retry_after: reset_after,
            })
        }
    }

    /// Drops buckets whose period has run out
    ///
    /// Such a bucket would be refilled to capacity on its next check, so
    /// removing it changes nothing for the client while bounding memory
    /// when many distinct addresses pass through.
    ///
    /// # Returns
    /// * `usize` - Number of buckets removed
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < self.period);
        let removed = before.saturating_sub(self.buckets.len());

        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "pruned idle rate limit buckets");
        }
        removed
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

/// Helper function to create the per-client scan limiter
///
/// `requests_per_minute` is the configured budget per client address;
/// [`DEFAULT_REQUESTS_PER_MINUTE`] matches what the scanner host can sustain.
pub fn create_scan_request_limiter(requests_per_minute: u32) -> RateLimiter<IpAddr> {
    RateLimiter::new(requests_per_minute, DEFAULT_PERIOD)
}
