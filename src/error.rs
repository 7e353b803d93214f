// src/error.rs

//! Unified error handling for the watcher.
//!
//! `AppError` is what startup and the CLI deal in. The four per-cycle kinds
//! (`FetchError`, `ExtractError`, `StoreError`, `NotifyError`) are separate
//! enums so the check cycle can tell them apart and report them by kind.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a configuration error scoped to one checker.
    pub fn checker(name: &str, message: impl fmt::Display) -> Self {
        Self::Config(format!("checker '{name}': {message}"))
    }
}

/// Failure to obtain a document from the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// A response was received but its status was not accepted. Redirects
    /// beyond the checker's limit surface here with their 3xx status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// No response was received (DNS, connect, TLS, body read, ...).
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// The body exceeded `http.max_body_bytes`.
    #[error("body from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

impl FetchError {
    /// The HTTP status, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Map a reqwest error onto the fetch taxonomy.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                url: url.to_string(),
            };
        }
        match err.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                url: url.to_string(),
            },
            None => Self::Transport {
                url: url.to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Failure to pull a value out of a fetched document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The selector matched nothing in the document.
    #[error("selector '{selector}' matched nothing")]
    NoMatch { selector: String },

    /// The document could not be read as text.
    #[error("document could not be parsed: {0}")]
    Unparseable(String),
}

/// Failure of a state store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored state is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Remote backend rejected or failed the request.
    #[error("store backend unavailable: {0}")]
    Backend(String),
}

/// Failure to deliver a notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_exposes_status_only_when_received() {
        let status = FetchError::Status {
            status: 301,
            url: "https://example.com".into(),
        };
        let timeout = FetchError::Timeout {
            url: "https://example.com".into(),
        };
        assert_eq!(status.status(), Some(301));
        assert_eq!(timeout.status(), None);
    }

    #[test]
    fn checker_error_names_the_checker() {
        let err = AppError::checker("switch", "url is empty");
        assert_eq!(
            err.to_string(),
            "Configuration error: checker 'switch': url is empty"
        );
    }
}
