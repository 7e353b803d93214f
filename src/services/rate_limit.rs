//! Per-group request rate limiting.
//!
//! Each group admits tasks in submission order, runs at most
//! `max_concurrent` of them at once, and spaces consecutive starts by at
//! least `min_spacing`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::models::RateLimitConfig;

/// Limits for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_concurrent: usize,
    pub min_spacing: Duration,
}

impl RateLimit {
    pub fn new(max_concurrent: usize, min_spacing: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            min_spacing,
        }
    }
}

/// Concurrency and spacing limiter for one group.
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    slots: Arc<Semaphore>,
    // Held for the whole admission decision, so waiters are served FIFO and
    // start times are assigned one at a time.
    next_start: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            slots: Arc::new(Semaphore::new(limit.max_concurrent)),
            next_start: Mutex::new(None),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Run `task` once admitted, returning its output.
    ///
    /// The slot is released when the task finishes, whatever it returned.
    pub async fn schedule<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = {
            let mut next_start = self.next_start.lock().await;
            // The semaphore is never closed.
            let permit = Arc::clone(&self.slots)
                .acquire_owned()
                .await
                .ok();

            if let Some(at) = *next_start {
                tokio::time::sleep_until(at).await;
            }
            *next_start = Some(Instant::now() + self.limit.min_spacing);
            permit
        };

        task().await
    }
}

/// All limiters, one per group, created on first use.
#[derive(Debug)]
pub struct RateLimiters {
    default: RateLimit,
    overrides: HashMap<String, RateLimit>,
    groups: std::sync::Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiters {
    pub fn new(default: RateLimit) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            groups: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Build from the `[rate_limit]` config section.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let default = RateLimit::new(
            config.max_concurrent,
            Duration::from_millis(config.min_spacing_ms),
        );
        let overrides = config
            .groups
            .iter()
            .map(|(name, group)| {
                let limit = RateLimit::new(
                    group.max_concurrent.unwrap_or(default.max_concurrent),
                    group
                        .min_spacing_ms
                        .map(Duration::from_millis)
                        .unwrap_or(default.min_spacing),
                );
                (name.clone(), limit)
            })
            .collect();

        Self {
            default,
            overrides,
            groups: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The limiter for `group`. Every caller naming the same group shares
    /// one instance.
    pub fn get(&self, group: &str) -> Arc<RateLimiter> {
        let mut groups = self
            .groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let limiter = groups.entry(group.to_string()).or_insert_with(|| {
            let limit = self.overrides.get(group).copied().unwrap_or(self.default);
            log::debug!(
                "Rate limiter for group '{}': {} concurrent, {:?} spacing",
                group,
                limit.max_concurrent,
                limit.min_spacing
            );
            Arc::new(RateLimiter::new(limit))
        });
        Arc::clone(limiter)
    }
}
