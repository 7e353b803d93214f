//! Per-checker cycle counters.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::CycleOutcome;
use crate::registry::Registry;

#[derive(Debug, Default)]
pub struct CheckerStats {
    cycles: AtomicU64,
    unchanged: AtomicU64,
    changed: AtomicU64,
    fetch_failures: AtomicU64,
    extract_failures: AtomicU64,
    store_failures: AtomicU64,
    notify_failures: AtomicU64,
    skipped_triggers: AtomicU64,
    // Unix millis, 0 = never
    last_run: AtomicI64,
}

impl CheckerStats {
    pub fn record(&self, outcome: &CycleOutcome, finished_at: DateTime<Utc>) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.last_run
            .store(finished_at.timestamp_millis(), Ordering::Relaxed);

        match outcome {
            CycleOutcome::Unchanged => {
                self.unchanged.fetch_add(1, Ordering::Relaxed);
            }
            CycleOutcome::Changed { store, notify, .. } => {
                self.changed.fetch_add(1, Ordering::Relaxed);
                if store.is_err() {
                    self.store_failures.fetch_add(1, Ordering::Relaxed);
                }
                if notify.is_err() {
                    self.notify_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
            CycleOutcome::Failed(failure) => {
                let counter = match failure.kind() {
                    FailureKind::Fetch => &self.fetch_failures,
                    FailureKind::Extract => &self.extract_failures,
                    FailureKind::Store => &self.store_failures,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_skip(&self) {
        self.skipped_triggers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last_run = match self.last_run.load(Ordering::Relaxed) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis),
        };
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            changed: self.changed.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            extract_failures: self.extract_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            notify_failures: self.notify_failures.load(Ordering::Relaxed),
            skipped_triggers: self.skipped_triggers.load(Ordering::Relaxed),
            last_run,
        }
    }
}

/// Which step ended a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Fetch,
    Extract,
    Store,
}

/// Point-in-time copy of one checker's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub unchanged: u64,
    /// Includes baselines
    pub changed: u64,
    pub fetch_failures: u64,
    pub extract_failures: u64,
    pub store_failures: u64,
    pub notify_failures: u64,
    pub skipped_triggers: u64,
    pub last_run: Option<DateTime<Utc>>,
}

/// Counters for every checker in the registry.
#[derive(Debug, Default)]
pub struct CycleStats {
    checkers: BTreeMap<String, Arc<CheckerStats>>,
}

impl CycleStats {
    pub fn new(registry: &Registry) -> Self {
        Self {
            checkers: registry
                .iter()
                .map(|c| (c.name.clone(), Arc::new(CheckerStats::default())))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CheckerStats>> {
        self.checkers.get(name)
    }

    pub fn snapshot(&self) -> BTreeMap<String, StatsSnapshot> {
        self.checkers
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect()
    }
}
