// src/registry.rs

//! The validated, immutable set of checkers.
//!
//! Built once at startup. Any invalid definition aborts the build: the
//! watcher never runs with a partially valid checker set.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    Cadence, CheckSchedule, CheckerConfig, CheckerDefinition, Config, NotificationTarget,
};
use crate::services::extractor;
use crate::utils::get_domain;

/// Checker definitions in configuration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    checkers: Vec<Arc<CheckerDefinition>>,
}

impl Registry {
    /// Validate every `[[checkers]]` entry and resolve its selectors,
    /// cadence, headers and notification target.
    pub fn build(config: &Config) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut checkers = Vec::with_capacity(config.checkers.len());

        for (index, raw) in config.checkers.iter().enumerate() {
            let name = raw.name.trim();
            if name.is_empty() {
                return Err(AppError::config(format!(
                    "checker #{} has an empty name",
                    index + 1
                )));
            }
            if !seen.insert(name.to_string()) {
                return Err(AppError::checker(name, "duplicate name"));
            }
            checkers.push(Arc::new(build_checker(name, raw, config)?));
        }

        if checkers.is_empty() {
            log::warn!("No checkers configured");
        }
        Ok(Self { checkers })
    }

    pub fn from_definitions(checkers: Vec<CheckerDefinition>) -> Self {
        Self {
            checkers: checkers.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CheckerDefinition>> {
        self.checkers.iter()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Arc<CheckerDefinition>> {
        self.checkers.iter().filter(|c| c.schedule.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CheckerDefinition>> {
        self.checkers.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.checkers.iter().position(|c| c.name == name)
    }

    pub fn by_index(&self, index: usize) -> Option<&Arc<CheckerDefinition>> {
        self.checkers.get(index)
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }
}

fn build_checker(name: &str, raw: &CheckerConfig, config: &Config) -> Result<CheckerDefinition> {
    let url = parse_url(name, &raw.url)?;

    let selector = raw
        .selector
        .as_ref()
        .ok_or_else(|| AppError::checker(name, "selector is missing"))?;
    let selector = extractor::compile(selector)
        .map_err(|e| scoped(name, e))?
        .into();
    let title_selector = raw
        .title_selector
        .as_ref()
        .map(extractor::compile)
        .transpose()
        .map_err(|e| scoped(name, e))?
        .map(Into::into);

    let rate_limit_group = match non_empty(raw.rate_limit_group.as_deref()) {
        Some(group) => group.to_string(),
        None => get_domain(&url).ok_or_else(|| AppError::checker(name, "url has no host"))?,
    };

    let cadence = Cadence::parse(
        non_empty(raw.cron.as_deref()).unwrap_or(&config.schedule.cron),
        non_empty(raw.timezone.as_deref()).unwrap_or(&config.schedule.timezone),
    )
    .map_err(|e| scoped(name, e))?;

    let notification_target = NotificationTarget {
        bot_token: non_empty(raw.bot_token.as_deref())
            .or(non_empty(config.notify.bot_token.as_deref()))
            .ok_or_else(|| AppError::checker(name, "no bot_token (set it on the checker or in [notify])"))?
            .to_string(),
        chat_id: non_empty(raw.chat_id.as_deref())
            .or(non_empty(config.notify.chat_id.as_deref()))
            .ok_or_else(|| AppError::checker(name, "no chat_id (set it on the checker or in [notify])"))?
            .to_string(),
    };

    Ok(CheckerDefinition {
        name: name.to_string(),
        url,
        selector,
        title_selector,
        max_redirects: raw.max_redirects,
        rate_limit_group,
        notification_target,
        schedule: CheckSchedule {
            cadence,
            enabled: raw.enabled,
        },
        headers: merge_headers(name, config, &raw.headers)?,
    })
}

fn parse_url(name: &str, raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::checker(name, "url is missing"));
    }
    let url = Url::parse(raw).map_err(|e| AppError::checker(name, format!("bad url '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AppError::checker(
            name,
            format!("url '{raw}' must be an absolute http(s) URL"),
        ));
    }
    Ok(url)
}

/// Global headers, then `Accept-Language`, then the checker's own. Names are
/// compared case-insensitively; later entries win.
fn merge_headers(
    name: &str,
    config: &Config,
    own: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut merged = BTreeMap::new();
    let language = ("accept-language".to_string(), config.http.accept_language.clone());

    let all = config
        .http
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .chain(std::iter::once(language).filter(|(_, v)| !v.trim().is_empty()))
        .chain(own.iter().map(|(k, v)| (k.clone(), v.clone())));

    for (key, value) in all {
        let header = HeaderName::from_bytes(key.trim().as_bytes())
            .map_err(|_| AppError::checker(name, format!("invalid header name '{key}'")))?;
        HeaderValue::from_str(&value)
            .map_err(|_| AppError::checker(name, format!("invalid value for header '{key}'")))?;
        merged.insert(header.as_str().to_string(), value);
    }
    Ok(merged)
}

/// Prefix a config error with the checker it belongs to.
fn scoped(name: &str, err: AppError) -> AppError {
    match err {
        AppError::Config(message) => AppError::checker(name, message),
        other => AppError::checker(name, other),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
