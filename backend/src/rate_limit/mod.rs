//! Fixed-window request limiting.
//!
//! Counters live in a capacity-bounded LRU cache: a flood of distinct keys
//! evicts the least recently seen ones instead of growing without limit.

mod middleware;

pub use middleware::{auth_limit, role_limit, standard_limit};

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

use crate::config::{RateLimitConfig, RoleTierConfig, WindowConfig};

/// Longest window a policy accepts; larger configured values are clamped.
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// One limiter configuration: `max` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Namespace prefixed to every key checked under this policy.
    pub scope: &'static str,
    pub window: Duration,
    pub max: u32,
    pub message: &'static str,
}

impl RateLimitPolicy {
    pub fn new(scope: &'static str, window_secs: u64, max: u32, message: &'static str) -> Self {
        Self {
            scope,
            window: Duration::seconds(window_secs.min(MAX_WINDOW_SECS) as i64),
            max,
            message,
        }
    }

    pub fn standard(config: &WindowConfig) -> Self {
        Self::new(
            "standard",
            config.window_secs,
            config.max,
            "Too many requests from this IP, please try again later.",
        )
    }

    pub fn auth(config: &WindowConfig) -> Self {
        Self::new(
            "auth",
            config.window_secs,
            config.max,
            "Too many authentication attempts, please try again later.",
        )
    }

    /// Limit for an authenticated role, or for anonymous callers when `role` is `None`.
    pub fn for_role(tiers: &RoleTierConfig, role: Option<&str>) -> Self {
        let (scope, max) = match role {
            None => ("anonymous", tiers.anonymous),
            Some("admin") => ("user", tiers.admin),
            Some("premium") => ("user", tiers.premium),
            Some(_) => ("user", tiers.user),
        };
        Self::new(
            scope,
            tiers.window_secs,
            max,
            "Too many requests, please try again later.",
        )
    }

    pub fn key(&self, subject: &str) -> String {
        format!("{}:{}", self.scope, subject)
    }
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until the window resets, at least 1.
    pub retry_after: u64,
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Shared per-key counters for every policy.
pub struct FixedWindowLimiter {
    windows: Mutex<LruCache<String, WindowCounter>>,
}

impl FixedWindowLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            windows: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, WindowCounter>> {
        // Counters stay usable if a holder panicked mid-update.
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count a request against `key`.
    pub fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        self.check_at(key, policy, Utc::now())
    }

    pub fn check_at(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let mut windows = self.lock();

        let mut counter = match windows.pop(key) {
            Some(counter) if counter.reset_at > now => counter,
            _ => WindowCounter {
                count: 0,
                reset_at: now
                    .checked_add_signed(policy.window)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        };
        counter.count = counter.count.saturating_add(1);

        let millis_left = (counter.reset_at - now).num_milliseconds().max(0);
        let decision = RateLimitDecision {
            allowed: counter.count <= policy.max,
            limit: policy.max,
            remaining: policy.max.saturating_sub(counter.count),
            reset_at: counter.reset_at,
            retry_after: ((millis_left + 999) / 1000).max(1) as u64,
        };

        if let Some((evicted, _)) = windows.push(key.to_string(), counter) {
            tracing::debug!("Rate limit store full, evicted '{}'", evicted);
        }

        decision
    }

    /// Drop every window that has ended. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.lock();
        let expired: Vec<String> = windows
            .iter()
            .filter(|(_, counter)| counter.reset_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            windows.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodically sweep expired windows.
pub fn spawn_sweeper(
    limiter: Arc<FixedWindowLimiter>,
    interval: StdDuration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep();
            if removed > 0 {
                tracing::debug!(
                    "Swept {} expired rate limit windows, {} remain",
                    removed,
                    limiter.len()
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: u32) -> RateLimitPolicy {
        RateLimitPolicy::new("test", 60, max, "slow down")
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_huge_window_is_clamped() {
        let policy = RateLimitPolicy::new("test", u64::MAX, 1, "slow down");
        assert_eq!(policy.window, Duration::seconds(MAX_WINDOW_SECS as i64));

        let limiter = FixedWindowLimiter::new(4);
        let decision = limiter.check_at("k", &policy, t0());
        assert!(decision.allowed);
        assert_eq!(decision.reset_at, t0() + Duration::days(365));
    }

    #[test]
    fn test_window_end_saturates_at_max_time() {
        let policy = RateLimitPolicy::new("test", MAX_WINDOW_SECS, 1, "slow down");
        let limiter = FixedWindowLimiter::new(4);
        let decision = limiter.check_at("k", &policy, DateTime::<Utc>::MAX_UTC);
        assert_eq!(decision.reset_at, DateTime::<Utc>::MAX_UTC);
        assert!(decision.allowed);
    }

    #[test]
    fn test_nth_allowed_next_rejected() {
        let limiter = FixedWindowLimiter::new(100);
        let policy = policy(3);

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check_at("test:1.2.3.4", &policy, t0());
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let rejected = limiter.check_at("test:1.2.3.4", &policy, t0());
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.limit, 3);
        assert_eq!(rejected.retry_after, 60);
    }

    #[test]
    fn test_window_resets() {
        let limiter = FixedWindowLimiter::new(100);
        let policy = policy(1);

        assert!(limiter.check_at("k", &policy, t0()).allowed);
        assert!(!limiter.check_at("k", &policy, t0() + Duration::seconds(59)).allowed);

        let after = limiter.check_at("k", &policy, t0() + Duration::seconds(60));
        assert!(after.allowed);
        assert_eq!(after.reset_at, t0() + Duration::seconds(120));
    }

    #[test]
    fn test_reset_time_fixed_within_window() {
        let limiter = FixedWindowLimiter::new(100);
        let policy = policy(10);

        let first = limiter.check_at("k", &policy, t0());
        let later = limiter.check_at("k", &policy, t0() + Duration::seconds(45));
        assert_eq!(first.reset_at, later.reset_at);
        assert_eq!(later.retry_after, 15);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = FixedWindowLimiter::new(100);
        let policy = policy(1);

        assert!(limiter.check_at("a", &policy, t0()).allowed);
        assert!(limiter.check_at("b", &policy, t0()).allowed);
        assert!(!limiter.check_at("a", &policy, t0()).allowed);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let limiter = FixedWindowLimiter::new(2);
        let policy = policy(1);

        limiter.check_at("a", &policy, t0());
        limiter.check_at("b", &policy, t0());
        limiter.check_at("c", &policy, t0());
        assert_eq!(limiter.len(), 2);

        // "a" was evicted, so it starts a fresh window.
        assert!(limiter.check_at("a", &policy, t0()).allowed);
        assert!(!limiter.check_at("c", &policy, t0()).allowed);
    }

    #[test]
    fn test_sweep_removes_expired_only() {
        let limiter = FixedWindowLimiter::new(100);
        limiter.check_at("short", &RateLimitPolicy::new("s", 10, 5, ""), t0());
        limiter.check_at("long", &RateLimitPolicy::new("l", 600, 5, ""), t0());

        assert_eq!(limiter.sweep_at(t0() + Duration::seconds(5)), 0);
        assert_eq!(limiter.sweep_at(t0() + Duration::seconds(10)), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_role_policies() {
        let tiers = RoleTierConfig::default();
        assert_eq!(RateLimitPolicy::for_role(&tiers, Some("admin")).max, 1000);
        assert_eq!(RateLimitPolicy::for_role(&tiers, Some("premium")).max, 500);
        assert_eq!(RateLimitPolicy::for_role(&tiers, Some("coach")).max, 100);

        let anonymous = RateLimitPolicy::for_role(&tiers, None);
        assert_eq!(anonymous.max, 50);
        assert_eq!(anonymous.key("10.0.0.1"), "anonymous:10.0.0.1");
    }

    #[test]
    fn test_zero_capacity_still_tracks_one_key() {
        let limiter = FixedWindowLimiter::new(0);
        assert!(limiter.check_at("k", &policy(1), t0()).allowed);
        assert!(!limiter.check_at("k", &policy(1), t0()).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_interval() {
        let limiter = Arc::new(FixedWindowLimiter::new(10));
        limiter.check_at("old", &policy(1), t0());

        let handle = spawn_sweeper(limiter.clone(), StdDuration::from_secs(300));
        tokio::time::sleep(StdDuration::from_secs(301)).await;
        tokio::task::yield_now().await;

        assert!(limiter.is_empty());
        handle.abort();
    }
}
