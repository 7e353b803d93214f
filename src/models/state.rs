//! Persisted and per-cycle check data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ExtractError, FetchError};

/// Last known value for one checker, owned by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckState {
    /// Checker name (store key)
    pub name: String,

    /// Last observed value. `Some("")` is a real observation.
    pub value: Option<String>,

    /// When the value last changed
    #[serde(rename = "updatedAt", alias = "updated_at")]
    pub updated_at: DateTime<Utc>,

    /// Label extracted with the title selector, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// URL the value was read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Definition active when the value was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_definition: Option<DefinitionSnapshot>,

    /// Fields written by other tools, preserved on rewrite
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CheckState {
    pub fn new(name: impl Into<String>, value: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            updated_at,
            title: None,
            url: None,
            source_definition: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Diagnostic copy of a checker definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionSnapshot {
    pub url: String,
    pub selector: String,
    pub max_redirects: usize,
    pub rate_limit_group: String,
    pub cron: String,
    pub enabled: bool,
}

/// Outcome of fetching and extracting one checker's value.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub url: String,
    pub value: std::result::Result<String, ValueError>,
    pub title: Option<String>,
}

/// Why a value could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

impl From<ValueError> for AppError {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::Fetch(e) => Self::Fetch(e),
            ValueError::Extract(e) => Self::Extract(e),
        }
    }
}
