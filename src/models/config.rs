//! Application configuration structures.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP request settings shared by every checker
    #[serde(default)]
    pub http: HttpConfig,

    /// Default rate limit and per-group overrides
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Default cadence for checkers that do not set their own
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// State store backend selection
    #[serde(default)]
    pub store: StoreConfig,

    /// Default notification target
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Status endpoint
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Checker definitions, in registry order
    #[serde(default)]
    pub checkers: Vec<CheckerConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate global configuration values for basic sanity.
    ///
    /// Checker definitions are validated when the registry is built.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::config("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::config("http.timeout_secs must be > 0"));
        }
        if self.http.max_body_bytes == 0 {
            return Err(AppError::config("http.max_body_bytes must be > 0"));
        }
        if self.rate_limit.max_concurrent == 0 {
            return Err(AppError::config("rate_limit.max_concurrent must be > 0"));
        }
        for (group, limit) in &self.rate_limit.groups {
            if limit.max_concurrent == Some(0) {
                return Err(AppError::config(format!(
                    "rate_limit.groups.{group}.max_concurrent must be > 0"
                )));
            }
        }
        if self.schedule.cron.trim().is_empty() {
            return Err(AppError::config("schedule.cron is empty"));
        }
        if self.server.port == 0 {
            return Err(AppError::config("server.port must be > 0"));
        }
        Ok(())
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Accept-Language header for HTTP requests
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Extra headers sent with every request
    #[serde(default = "defaults::headers")]
    pub headers: BTreeMap<String, String>,

    /// Largest response body read before the fetch fails
    #[serde(default = "defaults::max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::timeout(),
            headers: defaults::headers(),
            max_body_bytes: defaults::max_body_bytes(),
        }
    }
}

/// Rate limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum in-flight requests per group
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum milliseconds between consecutive request starts per group
    #[serde(default = "defaults::min_spacing")]
    pub min_spacing_ms: u64,

    /// Per-group overrides, keyed by group name
    #[serde(default)]
    pub groups: BTreeMap<String, GroupLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
            min_spacing_ms: defaults::min_spacing(),
            groups: BTreeMap::new(),
        }
    }
}

/// Override for one rate-limit group. Unset fields fall back to the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupLimit {
    pub max_concurrent: Option<usize>,
    pub min_spacing_ms: Option<u64>,
}

/// Default cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression with a seconds field
    #[serde(default = "defaults::cron")]
    pub cron: String,

    /// IANA timezone the cron expression is evaluated in
    #[serde(default = "defaults::timezone")]
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: defaults::cron(),
            timezone: defaults::timezone(),
        }
    }
}

/// Which state store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile, starts empty on each launch
    #[default]
    Memory,
    /// One JSON file per checker in a local directory
    File,
    /// One JSON object per checker in an S3 bucket
    S3,
}

impl std::str::FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "s3" => Ok(Self::S3),
            other => Err(AppError::config(format!("unknown store backend '{other}'"))),
        }
    }
}

/// State store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory for the file backend
    #[serde(default = "defaults::store_dir")]
    pub dir: String,

    /// Bucket for the S3 backend
    #[serde(default = "defaults::bucket")]
    pub bucket: String,

    /// Key prefix for the S3 backend
    #[serde(default = "defaults::prefix")]
    pub prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            dir: defaults::store_dir(),
            bucket: defaults::bucket(),
            prefix: defaults::prefix(),
        }
    }
}

/// Telegram notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Default bot token, used by checkers without their own
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Default chat id, used by checkers without their own
    #[serde(default)]
    pub chat_id: Option<String>,

    /// Bot API base URL
    #[serde(default = "defaults::telegram_api")]
    pub api_base: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: defaults::telegram_api(),
        }
    }
}

/// Status endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::bind")]
    pub bind: String,

    #[serde(default = "defaults::port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::bind(),
            port: defaults::port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

/// Raw checker definition as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub url: String,

    /// Rule selecting the watched value
    pub selector: Option<SelectorConfig>,

    /// Optional rule selecting a human label for notifications
    #[serde(default)]
    pub title_selector: Option<SelectorConfig>,

    /// Redirects to follow before the response counts as a failure
    #[serde(default = "defaults::max_redirects")]
    pub max_redirects: usize,

    /// Rate-limit group; defaults to the URL host
    #[serde(default)]
    pub rate_limit_group: Option<String>,

    /// Cron expression; defaults to `schedule.cron`
    #[serde(default)]
    pub cron: Option<String>,

    /// Timezone; defaults to `schedule.timezone`
    #[serde(default)]
    pub timezone: Option<String>,

    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub bot_token: Option<String>,

    #[serde(default)]
    pub chat_id: Option<String>,

    /// Extra request headers for this checker only
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Selector as written in the config file.
///
/// A bare string is a CSS selector; a table picks the kind explicitly:
///
/// ```toml
/// selector = "#availability span"
/// selector = { css = "meta[itemprop=price]", attr = "content" }
/// selector = { regex = "Price: ([0-9.,]+)" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorConfig {
    Css(String),
    Rule(SelectorRule),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,

    /// Attribute to read from the first match instead of its text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

mod defaults {
    use std::collections::BTreeMap;

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.3 Safari/605.1.15".into()
    }
    pub fn accept_language() -> String {
        "it-it".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn headers() -> BTreeMap<String, String> {
        BTreeMap::from([(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        )])
    }
    pub fn max_body_bytes() -> usize {
        10 * 1024 * 1024
    }

    // Rate limit defaults
    pub fn max_concurrent() -> usize {
        1
    }
    pub fn min_spacing() -> u64 {
        333
    }

    // Schedule defaults
    pub fn cron() -> String {
        "*/10 * * * * *".into()
    }
    pub fn timezone() -> String {
        "Europe/Rome".into()
    }

    // Store defaults
    pub fn store_dir() -> String {
        "state".into()
    }
    pub fn bucket() -> String {
        "pagewatch".into()
    }
    pub fn prefix() -> String {
        "checks".into()
    }

    pub fn telegram_api() -> String {
        "https://api.telegram.org".into()
    }

    // Server defaults
    pub fn bind() -> String {
        "0.0.0.0".into()
    }
    pub fn port() -> u16 {
        3000
    }

    pub fn log_level() -> String {
        "info".into()
    }

    // Checker defaults
    pub fn max_redirects() -> usize {
        10
    }
    pub fn enabled() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.http.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.rate_limit.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limit.groups.insert(
            "amazon".into(),
            GroupLimit {
                max_concurrent: Some(0),
                min_spacing_ms: None,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_checkers_and_selector_forms() {
        let config = Config::from_toml(
            r##"
            [rate_limit.groups.amazon]
            min_spacing_ms = 1000

            [[checkers]]
            name = "switch"
            url = "https://www.amazon.it/dp/B08KJF2D25"
            selector = "#availability span"
            title_selector = { css = "#productTitle" }
            rate_limit_group = "amazon"
            max_redirects = 0

            [[checkers]]
            name = "price"
            url = "https://shop.example.com/item"
            selector = { regex = "Price: ([0-9.,]+)" }
            enabled = false
            "##,
        )
        .unwrap();

        assert_eq!(config.checkers.len(), 2);
        let switch = &config.checkers[0];
        assert_eq!(
            switch.selector,
            Some(SelectorConfig::Css("#availability span".into()))
        );
        assert_eq!(switch.max_redirects, 0);
        assert!(switch.enabled);

        let price = &config.checkers[1];
        assert_eq!(price.max_redirects, 10);
        assert!(!price.enabled);
        assert!(matches!(
            &price.selector,
            Some(SelectorConfig::Rule(SelectorRule { regex: Some(_), .. }))
        ));
        assert_eq!(
            config.rate_limit.groups["amazon"].min_spacing_ms,
            Some(1000)
        );
    }

    #[test]
    fn store_backend_from_str() {
        assert_eq!("S3".parse::<StoreBackend>().unwrap(), StoreBackend::S3);
        assert_eq!("file".parse::<StoreBackend>().unwrap(), StoreBackend::File);
        assert!("redis".parse::<StoreBackend>().is_err());
    }
}
