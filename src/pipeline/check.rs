// src/pipeline/check.rs

//! One fetch → extract → compare → persist → notify execution.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{ExtractError, FetchError, NotifyError, StoreError};
use crate::models::{CheckResult, CheckState, CheckerDefinition, ValueError};
use crate::pipeline::stats::{CycleStats, FailureKind};
use crate::services::{Fetch, FetchRequest, Notifier, extractor, format_message};
use crate::storage::StateStore;

/// What a cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Value equal to the stored one; nothing written or sent.
    Unchanged,
    /// Value differed (or no baseline existed); write and notify were both
    /// attempted once, and their results are reported separately.
    Changed {
        baseline: bool,
        store: Result<(), StoreError>,
        notify: Result<(), NotifyError>,
    },
    /// The cycle stopped before comparing; no side effects.
    Failed(CycleFailure),
}

impl CycleOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CycleFailure {
    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    #[error("extract failed: {0}")]
    Extract(ExtractError),

    #[error("store read failed: {0}")]
    Store(StoreError),
}

impl CycleFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch(_) => FailureKind::Fetch,
            Self::Extract(_) => FailureKind::Extract,
            Self::Store(_) => FailureKind::Store,
        }
    }
}

impl From<ValueError> for CycleFailure {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::Fetch(e) => Self::Fetch(e),
            ValueError::Extract(e) => Self::Extract(e),
        }
    }
}

/// Runs check cycles against shared collaborators.
pub struct CheckCycle {
    fetcher: Arc<dyn Fetch>,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<CycleStats>,
}

impl CheckCycle {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
        stats: Arc<CycleStats>,
    ) -> Self {
        Self {
            fetcher,
            store,
            notifier,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<CycleStats> {
        &self.stats
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Fetch the page and extract the value and title, touching nothing else.
    pub async fn observe(&self, checker: &CheckerDefinition) -> CheckResult {
        let url = checker.url.to_string();
        let response = match self.fetcher.fetch(&FetchRequest::from(checker)).await {
            Ok(response) => response,
            Err(e) => {
                return CheckResult {
                    name: checker.name.clone(),
                    url,
                    value: Err(e.into()),
                    title: None,
                };
            }
        };

        let document = extractor::decode(&response.body, response.charset.as_deref());
        let value = document
            .as_ref()
            .map_err(Clone::clone)
            .and_then(|document| checker.selector.extract(document));
        let title = match (&document, &value, &checker.title_selector) {
            (Ok(document), Ok(_), Some(selector)) => match selector.extract(document) {
                Ok(title) if !title.is_empty() => Some(title),
                Ok(_) => None,
                Err(e) => {
                    log::debug!("[{}] No title: {}", checker.name, e);
                    None
                }
            },
            _ => None,
        };

        CheckResult {
            name: checker.name.clone(),
            url,
            value: value.map_err(ValueError::from),
            title,
        }
    }

    /// Run one full cycle for `checker`.
    ///
    /// Never fails: every error is logged, counted and returned in the outcome.
    pub async fn run(&self, checker: &CheckerDefinition) -> CycleOutcome {
        let outcome = self.execute(checker).await;
        if let Some(stats) = self.stats.get(&checker.name) {
            stats.record(&outcome, Utc::now());
        }
        outcome
    }

    async fn execute(&self, checker: &CheckerDefinition) -> CycleOutcome {
        let name = checker.name.as_str();
        let (previous, observed) = tokio::join!(self.store.read(name), self.observe(checker));

        let value = match observed.value {
            Ok(value) => value,
            Err(e) => {
                let failure = CycleFailure::from(e);
                log::warn!("[{}] {}", name, failure);
                return CycleOutcome::Failed(failure);
            }
        };
        let previous = match previous {
            Ok(previous) => previous,
            Err(e) => {
                let failure = CycleFailure::Store(e);
                log::error!("[{}] {}", name, failure);
                return CycleOutcome::Failed(failure);
            }
        };

        if let Some(prev) = &previous {
            if prev.value.as_deref() == Some(value.as_str()) {
                log::debug!("[{}] Unchanged: {}", name, value);
                return CycleOutcome::Unchanged;
            }
        }

        let baseline = previous.is_none();
        if baseline {
            log::info!("[{}] Baseline: {}", name, value);
        } else {
            log::info!(
                "[{}] Changed: {:?} -> {:?}",
                name,
                previous.as_ref().and_then(|p| p.value.as_deref()).unwrap_or_default(),
                value
            );
        }

        // Rewrite over the previous record so foreign fields survive.
        let mut state = previous.unwrap_or_else(|| CheckState::new(name, "", Utc::now()));
        state.name = name.to_string();
        state.value = Some(value.clone());
        state.updated_at = Utc::now();
        state.title = observed.title;
        state.url = Some(observed.url.clone());
        state.source_definition = Some(checker.snapshot());

        let message = format_message(name, state.title.as_deref(), &value, &observed.url);
        let (store, notify) = tokio::join!(
            self.store.write(name, &state),
            self.notifier.notify(&checker.notification_target, &message)
        );

        if let Err(e) = &store {
            log::error!("[{}] Store write failed: {}", name, e);
        }
        match &notify {
            Ok(()) => log::info!("[{}] Notification sent", name),
            Err(e) => log::error!("[{}] Notification failed: {}", name, e),
        }

        CycleOutcome::Changed {
            baseline,
            store,
            notify,
        }
    }
}
