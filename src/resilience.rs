// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience utilities: retry backoff and rate limiting.
//!
//! - [`RetryConfig`]: exponential backoff between failed reconciliation passes
//! - [`RateLimiter`]: token bucket throttling reconciliation lookups
//! - [`sleep_or_shutdown`]: backoff delay that ends early on shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use anon_replication_engine::resilience::{RateLimiter, RateLimitConfig, RetryConfig};
//!
//! let retry = RetryConfig::daemon();
//! tokio::time::sleep(retry.delay_for_attempt(3)).await;
//!
//! let limiter = RateLimiter::new(RateLimitConfig::per_second(200));
//! limiter.acquire().await; // Waits if over limit
//! # }
//! ```

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::watch;

/// Backoff schedule for retrying after failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    /// Set to `usize::MAX` for infinite retries (daemon mode).
    pub max_attempts: usize,

    /// Initial delay before first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::daemon()
    }
}

impl RetryConfig {
    /// Infinite retry for the long-running actors (never give up).
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay
    /// -------  -----
    /// 1        1s
    /// 2        2s
    /// 3        4s
    /// ...
    /// 7+       60s (cap)
    /// ```
    pub fn daemon() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }

    /// Fast schedule for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::from_secs_f64(delay_secs)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

/// Sleep for `delay` unless shutdown is signaled first.
///
/// Returns `true` if the caller should stop.
pub async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if *shutdown_rx.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown_rx.borrow(),
        changed = shutdown_rx.changed() => {
            // A dropped sender means nobody can ever signal again: stop.
            changed.is_err() || *shutdown_rx.borrow()
        }
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Token bucket configuration: `refill_rate` tokens per second, at most
/// `burst_size` accumulated.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens that can be accumulated (burst capacity).
    pub burst_size: u32,

    /// Tokens added per second (sustained rate).
    pub refill_rate: u32,
}

impl RateLimitConfig {
    /// Sustained `rate` per second with a burst of one tenth of it (at least 1).
    pub fn per_second(rate: u32) -> Self {
        Self {
            burst_size: (rate / 10).max(1),
            refill_rate: rate,
        }
    }
}

/// Token bucket rate limiter.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
    config: RateLimitConfig,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("config", &self.config).finish()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: GovLimiter::direct(quota),
            config,
        }
    }

    /// Acquire a permit, waiting until one is available.
    ///
    /// This method is cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Try to acquire a permit without waiting.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_config_never_gives_up() {
        let config = RetryConfig::daemon();
        assert_eq!(config.max_attempts, usize::MAX);
        assert!(config.should_retry(1_000_000));
        assert_eq!(config.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(16));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
        assert!(!config.should_retry(10));
    }

    #[test]
    fn test_delay_for_huge_attempt_is_capped() {
        let config = RetryConfig::daemon();
        assert_eq!(config.delay_for_attempt(usize::MAX), config.max_delay);
    }

    #[tokio::test]
    async fn test_sleep_or_shutdown_elapses() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!sleep_or_shutdown(Duration::from_millis(5), &mut rx).await);
    }

    #[tokio::test]
    async fn test_sleep_or_shutdown_interrupted() {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let start = std::time::Instant::now();
            let stop = sleep_or_shutdown(Duration::from_secs(30), &mut rx).await;
            (stop, start.elapsed())
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();

        let (stop, elapsed) = handle.await.unwrap();
        assert!(stop);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_or_shutdown_already_signaled() {
        let (_tx, mut rx) = watch::channel(true);
        assert!(sleep_or_shutdown(Duration::from_secs(30), &mut rx).await);
    }

    #[test]
    fn test_per_second_burst() {
        assert_eq!(RateLimitConfig::per_second(200).burst_size, 20);
        assert_eq!(RateLimitConfig::per_second(5).burst_size, 1);
    }

    #[test]
    fn test_rate_limiter_try_acquire_burst() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst_size: 5,
            refill_rate: 1,
        });

        for _ in 0..5 {
            assert!(limiter.try_acquire(), "should acquire within burst");
        }
        assert!(!limiter.try_acquire(), "should fail after burst exhausted");
    }

    #[tokio::test]
    async fn test_rate_limiter_acquire_refills() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst_size: 1,
            refill_rate: 1000,
        });

        limiter.acquire().await;

        let start = std::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100), "should refill quickly");
    }
}
