// src/pipeline/scheduler.rs

//! Cadence-driven triggering of check cycles.
//!
//! All checkers share one timer: a priority queue ordered by next fire
//! time. Each checker has an in-flight flag; a trigger that finds the flag
//! set is dropped and counted instead of queued.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::CheckerDefinition;
use crate::pipeline::{CheckCycle, CycleOutcome};
use crate::registry::Registry;

/// Result of asking for a cycle.
#[derive(Debug)]
pub enum Trigger {
    Started(JoinHandle<CycleOutcome>),
    /// A cycle for this checker was already running.
    Skipped,
}

pub struct Scheduler {
    registry: Arc<Registry>,
    cycle: Arc<CheckCycle>,
    // Indexed like the registry.
    in_flight: Vec<Arc<AtomicBool>>,
}

/// Clears the in-flight flag when the cycle task ends, even by panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(registry: Arc<Registry>, cycle: Arc<CheckCycle>) -> Self {
        let in_flight = registry
            .iter()
            .map(|_| Arc::new(AtomicBool::new(false)))
            .collect();
        Self {
            registry,
            cycle,
            in_flight,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cycle(&self) -> &Arc<CheckCycle> {
        &self.cycle
    }

    /// Start a cycle for `name`, enabled or not. `None` if no such checker.
    pub fn trigger(&self, name: &str) -> Option<Trigger> {
        self.registry.position(name).map(|index| self.trigger_at(index))
    }

    /// Start a cycle for every enabled checker.
    pub fn trigger_all(&self) -> Vec<(String, Trigger)> {
        self.registry
            .iter()
            .enumerate()
            .filter(|(_, checker)| checker.schedule.enabled)
            .map(|(index, checker)| (checker.name.clone(), self.trigger_at(index)))
            .collect()
    }

    fn trigger_at(&self, index: usize) -> Trigger {
        let (Some(checker), Some(flag)) = (self.registry.by_index(index), self.in_flight.get(index))
        else {
            return Trigger::Skipped;
        };

        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("[{}] Previous cycle still running, skipping", checker.name);
            if let Some(stats) = self.cycle.stats().get(&checker.name) {
                stats.record_skip();
            }
            return Trigger::Skipped;
        }

        let guard = InFlight(Arc::clone(flag));
        let checker = Arc::clone(checker);
        let cycle = Arc::clone(&self.cycle);
        Trigger::Started(tokio::spawn(async move {
            let _guard = guard;
            cycle.run(&checker).await
        }))
    }

    /// Number of cycles currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .iter()
            .filter(|flag| flag.load(Ordering::Acquire))
            .count()
    }

    /// Fire enabled checkers on their cadence until `shutdown` flips to
    /// `true`. Cycles already running when it returns are left to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut queue: BinaryHeap<Reverse<(DateTime<Utc>, usize)>> = BinaryHeap::new();
        let now = Utc::now();
        for (index, checker) in self.registry.iter().enumerate() {
            if !checker.schedule.enabled {
                log::info!("[{}] Disabled, manual runs only", checker.name);
                continue;
            }
            schedule_next(&mut queue, checker, index, now);
        }
        log::info!(
            "Scheduler started with {} active checker(s)",
            queue.len()
        );

        while !*shutdown.borrow() {
            let wait = match queue.peek() {
                Some(Reverse((at, _))) => (*at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                None => Duration::MAX,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait.min(Duration::from_secs(24 * 60 * 60))) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let now = Utc::now();
            while let Some(Reverse((at, index))) = queue.peek().copied() {
                if at > now {
                    break;
                }
                queue.pop();
                let Some(checker) = self.registry.by_index(index) else {
                    continue;
                };
                log::debug!("[{}] Tick", checker.name);
                if let Trigger::Started(handle) = self.trigger_at(index) {
                    tokio::spawn(join_cycle(checker.name.clone(), handle));
                }
                // Missed ticks are not replayed.
                schedule_next(&mut queue, checker, index, now);
            }
        }

        log::info!("Scheduler stopped, {} cycle(s) still running", self.in_flight());
    }

    /// Wait for running cycles to finish, up to `timeout`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

/// Await a started cycle, logging it if the task panicked or was cancelled.
pub async fn join_cycle(name: String, handle: JoinHandle<CycleOutcome>) -> Option<CycleOutcome> {
    match handle.await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            log::error!("[{}] Cycle task failed: {}", name, e);
            None
        }
    }
}

fn schedule_next(
    queue: &mut BinaryHeap<Reverse<(DateTime<Utc>, usize)>>,
    checker: &CheckerDefinition,
    index: usize,
    after: DateTime<Utc>,
) {
    match checker.schedule.cadence.next_after(after) {
        Some(at) => queue.push(Reverse((at, index))),
        None => log::warn!("[{}] Cadence has no future fire times", checker.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::FetchError;
    use crate::pipeline::CycleStats;
    use crate::pipeline::testing::{FakeFetch, FakeNotifier, checker, page};
    use crate::services::{Fetch, FetchRequest, RawResponse};
    use crate::storage::MemoryStore;

    struct PanickingFetch;

    #[async_trait]
    impl Fetch for PanickingFetch {
        async fn fetch(&self, _: &FetchRequest<'_>) -> Result<RawResponse, FetchError> {
            panic!("fetcher bug");
        }
    }

    fn scheduler(definitions: Vec<CheckerDefinition>, fetch: Arc<dyn Fetch>) -> Scheduler {
        let registry = Arc::new(Registry::from_definitions(definitions));
        let cycle = CheckCycle::new(
            fetch,
            Arc::new(MemoryStore::new()),
            Arc::new(FakeNotifier::default()),
            Arc::new(CycleStats::new(&registry)),
        );
        Scheduler::new(registry, Arc::new(cycle))
    }

    #[tokio::test(start_paused = true)]
    async fn busy_checker_drops_triggers() {
        let fetch = Arc::new(FakeFetch::default());
        let a = checker("a");
        fetch.respond(&a.url, Ok(page("v1")));
        fetch.set_delay(Duration::from_secs(5));
        let scheduler = scheduler(vec![a], fetch.clone());

        let Some(Trigger::Started(first)) = scheduler.trigger("a") else {
            panic!("first trigger should start a cycle");
        };
        assert!(matches!(scheduler.trigger("a"), Some(Trigger::Skipped)));
        assert!(matches!(scheduler.trigger("a"), Some(Trigger::Skipped)));
        assert_eq!(scheduler.in_flight(), 1);

        assert!(first.await.unwrap().is_changed());
        assert_eq!(scheduler.in_flight(), 0);
        assert!(matches!(scheduler.trigger("a"), Some(Trigger::Started(_))));

        let stats = scheduler.cycle().stats().snapshot();
        assert_eq!(stats["a"].skipped_triggers, 2);
        assert_eq!(fetch.max_active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_all_skips_disabled_but_named_trigger_runs_them() {
        let fetch = Arc::new(FakeFetch::default());
        let a = checker("a");
        let mut b = checker("b");
        b.schedule.enabled = false;
        fetch.respond(&a.url, Ok(page("v1")));
        fetch.respond(&b.url, Ok(page("w1")));
        let scheduler = scheduler(vec![a, b], fetch.clone());

        let started = scheduler.trigger_all();
        let names: Vec<_> = started.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a"]);

        assert!(matches!(scheduler.trigger("b"), Some(Trigger::Started(_))));
        assert!(scheduler.trigger("nope").is_none());
        assert!(scheduler.drain(Duration::from_secs(1)).await);
        assert_eq!(fetch.calls(), 2);
    }

    #[tokio::test]
    async fn panicked_cycle_is_reported_and_frees_the_checker() {
        let scheduler = scheduler(vec![checker("a")], Arc::new(PanickingFetch));

        let Some(Trigger::Started(handle)) = scheduler.trigger("a") else {
            panic!("trigger should start a cycle");
        };
        assert!(join_cycle("a".into(), handle).await.is_none());
        assert_eq!(scheduler.in_flight(), 0);
        assert!(matches!(scheduler.trigger("a"), Some(Trigger::Started(_))));
    }

    #[tokio::test]
    async fn cadence_loop_keeps_one_cycle_in_flight_and_stops_on_shutdown() {
        let fetch = Arc::new(FakeFetch::default());
        let mut a = checker("a");
        a.schedule.cadence = crate::models::Cadence::parse("* * * * * *", "UTC").unwrap();
        fetch.respond(&a.url, Ok(page("v1")));
        fetch.set_delay(Duration::from_millis(2500));
        let scheduler = Arc::new(scheduler(vec![a], fetch.clone()));

        let (tx, rx) = watch::channel(false);
        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(rx).await })
        };

        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(true).unwrap();
        runner.await.unwrap();

        assert_eq!(fetch.max_active(), 1);
        assert!(fetch.calls() >= 1);
        let stats = scheduler.cycle().stats().snapshot();
        assert!(stats["a"].skipped_triggers >= 1);
        assert!(scheduler.drain(Duration::from_secs(5)).await);
    }
}
