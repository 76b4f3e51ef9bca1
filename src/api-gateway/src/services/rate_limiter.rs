//! Fixed-window rate limiting
//!
//! Counters are keyed by `(policy id, client key)`. A window starts on the first
//! request after the previous one elapsed and is wall-clock based: it never resets
//! early and never refills gradually.
//!
//! Counters live in this process only. Several gateway instances behind a load
//! balancer each keep their own counters, so the effective limit is multiplied by
//! the instance count unless a shared [`CounterStore`] is plugged in.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::services::registry::RateLimitRule;

/// A throttling policy with a stable identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub id: String,
    pub window: Duration,
    pub max: u32,
}

impl RateLimitPolicy {
    pub fn new(id: impl Into<String>, window: Duration, max: u32) -> Self {
        Self {
            id: id.into(),
            window,
            max,
        }
    }

    pub fn from_rule(id: impl Into<String>, rule: &RateLimitRule) -> Self {
        Self::new(id, rule.window(), rule.max)
    }
}

/// Counter state for one `(policy, client)` pair
#[derive(Debug, Clone, Copy)]
pub struct RateWindowCounter {
    pub window_start: Instant,
    pub count: u32,
}

/// Outcome of one check-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window elapses
    pub reset_after: Duration,
}

impl RateLimitDecision {
    /// Seconds until the window resets, rounded up
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Storage backend for window counters. `hit` must be atomic with respect to
/// concurrent calls for the same key.
pub trait CounterStore: Send + Sync {
    fn hit(&self, policy: &RateLimitPolicy, client_key: &str, now: Instant) -> RateWindowCounter;

    /// Drop counters whose window has elapsed; returns how many were removed.
    fn purge_expired(&self, now: Instant) -> usize;

    fn len(&self) -> usize;
}

/// Process-local counter store
#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<(String, String), (RateWindowCounter, Duration)>,
}

impl CounterStore for InMemoryCounterStore {
    fn hit(&self, policy: &RateLimitPolicy, client_key: &str, now: Instant) -> RateWindowCounter {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self
            .counters
            .entry((policy.id.clone(), client_key.to_string()))
            .or_insert_with(|| {
                (
                    RateWindowCounter {
                        window_start: now,
                        count: 0,
                    },
                    policy.window,
                )
            });

        let (counter, window) = entry.value_mut();
        *window = policy.window;
        if now.saturating_duration_since(counter.window_start) >= policy.window {
            counter.window_start = now;
            counter.count = 0;
        }
        counter.count = counter.count.saturating_add(1);

        *counter
    }

    fn purge_expired(&self, now: Instant) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, (counter, window)| {
            now.saturating_duration_since(counter.window_start) < *window
        });
        before.saturating_sub(self.counters.len())
    }

    fn len(&self) -> usize {
        self.counters.len()
    }
}

/// Rate limiting service shared by the global throttle and route throttles
#[derive(Clone)]
pub struct RateLimiterService {
    store: Arc<dyn CounterStore>,
}

impl RateLimiterService {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCounterStore::default()))
    }

    /// Count one request for `client_key` under `policy`.
    pub fn check(&self, policy: &RateLimitPolicy, client_key: &str) -> RateLimitDecision {
        self.check_at(policy, client_key, Instant::now())
    }

    pub fn check_at(
        &self,
        policy: &RateLimitPolicy,
        client_key: &str,
        now: Instant,
    ) -> RateLimitDecision {
        let counter = self.store.hit(policy, client_key, now);
        let elapsed = now.saturating_duration_since(counter.window_start);

        let decision = RateLimitDecision {
            allowed: counter.count <= policy.max,
            limit: policy.max,
            remaining: policy.max.saturating_sub(counter.count),
            reset_after: policy.window.saturating_sub(elapsed),
        };

        debug!(
            policy = %policy.id,
            key = %client_key,
            count = counter.count,
            allowed = decision.allowed,
            "Rate limit check completed"
        );

        decision
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(Instant::now())
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

impl Default for RateLimiterService {
    fn default() -> Self {
        Self::in_memory()
    }
}
