// src/models/checker.rs

//! Validated checker definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::DefinitionSnapshot;
use crate::services::Selector;

/// One watched page: where to fetch, what to extract, when, and who to tell.
///
/// Built by the registry at startup and never mutated afterwards.
#[derive(Clone)]
pub struct CheckerDefinition {
    pub name: String,
    pub url: Url,
    pub selector: Arc<dyn Selector>,
    pub title_selector: Option<Arc<dyn Selector>>,
    /// `0` treats any redirect as a failure
    pub max_redirects: usize,
    pub rate_limit_group: String,
    pub notification_target: NotificationTarget,
    pub schedule: CheckSchedule,
    /// Request headers, already merged over the global ones
    pub headers: BTreeMap<String, String>,
}

impl CheckerDefinition {
    /// Diagnostic copy stored alongside the state.
    pub fn snapshot(&self) -> DefinitionSnapshot {
        DefinitionSnapshot {
            url: self.url.to_string(),
            selector: self.selector.describe(),
            max_redirects: self.max_redirects,
            rate_limit_group: self.rate_limit_group.clone(),
            cron: self.schedule.cadence.expression().to_string(),
            enabled: self.schedule.enabled,
        }
    }
}

impl fmt::Debug for CheckerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckerDefinition")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .field("selector", &self.selector.describe())
            .field("max_redirects", &self.max_redirects)
            .field("rate_limit_group", &self.rate_limit_group)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

/// Telegram destination for a checker's alerts.
#[derive(Clone, PartialEq, Eq)]
pub struct NotificationTarget {
    pub bot_token: String,
    pub chat_id: String,
}

// Keeps the token out of logs.
impl fmt::Debug for NotificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationTarget")
            .field("bot_token", &"***")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// When a checker runs.
#[derive(Debug, Clone)]
pub struct CheckSchedule {
    pub cadence: Cadence,
    pub enabled: bool,
}

/// A cron expression bound to the timezone it is evaluated in.
#[derive(Clone)]
pub struct Cadence {
    expression: String,
    schedule: cron::Schedule,
    timezone: Tz,
}

impl Cadence {
    /// Parse a cron expression (6 or 7 fields, seconds first) and timezone.
    ///
    /// Classic 5-field expressions are accepted and fire at second 0.
    pub fn parse(expression: &str, timezone: &str) -> Result<Self> {
        let expression = expression.trim();
        let normalized = if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.to_string()
        };
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            AppError::config(format!("invalid cron expression '{expression}': {e}"))
        })?;
        let timezone: Tz = timezone
            .parse()
            .map_err(|e| AppError::config(format!("invalid timezone '{timezone}': {e}")))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone);
        self.schedule
            .after(&local)
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

impl fmt::Debug for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cadence({} @ {})", self.expression, self.timezone)
    }
}
