// src/config.rs

//! Configuration loading.
//!
//! The TOML file is read once, environment overrides are applied on top,
//! and the result is validated. Nothing reads the environment afterwards.

use std::path::Path;
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::models::{Config, StoreBackend};

/// Read when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Load configuration, apply environment overrides and validate.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
/// read if present and built-in defaults are used otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) if !path.exists() => {
            return Err(AppError::config(format!(
                "config file {} not found",
                path.display()
            )));
        }
        Some(path) => Config::load(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Override config values from environment-style variables.
///
/// `lookup` returns the variable's value, if set. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(cron) = var("CHECK_CRON_PATTERN") {
        config.schedule.cron = cron;
    }
    if let Some(tz) = var("TZ") {
        config.schedule.timezone = tz;
    }
    if let Some(backend) = var("STORE_BACKEND") {
        config.store.backend = StoreBackend::from_str(&backend)?;
    }
    if let Some(dir) = var("STORE_DIR") {
        config.store.dir = dir;
    }
    if let Some(bucket) = var("S3_BUCKET") {
        config.store.bucket = bucket;
    }
    if let Some(prefix) = var("S3_PREFIX") {
        config.store.prefix = prefix;
    }
    if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
        config.notify.bot_token = Some(token);
    }
    if let Some(chat) = var("TELEGRAM_CHAT_ID") {
        config.notify.chat_id = Some(chat);
    }
    if let Some(language) = var("ACCEPT_LANGUAGE") {
        config.http.accept_language = language;
    }

    if let Some(port) = var("PORT") {
        config.server.port = parse_var("PORT", &port)?;
    }
    if let Some(timeout) = var("HTTP_TIMEOUT_SECS") {
        config.http.timeout_secs = parse_var("HTTP_TIMEOUT_SECS", &timeout)?;
    }
    if let Some(concurrent) = var("MAX_CONCURRENT") {
        config.rate_limit.max_concurrent = parse_var("MAX_CONCURRENT", &concurrent)?;
    }
    if let Some(spacing) = var("MIN_SPACING_MS") {
        config.rate_limit.min_spacing_ms = parse_var("MIN_SPACING_MS", &spacing)?;
    }

    Ok(())
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::config(format!("{key}='{value}' is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("CHECK_CRON_PATTERN", "*/30 * * * * *"),
                ("TZ", "UTC"),
                ("STORE_BACKEND", "file"),
                ("STORE_DIR", "/var/lib/pagewatch"),
                ("TELEGRAM_BOT_TOKEN", "123:abc"),
                ("TELEGRAM_CHAT_ID", "42"),
                ("PORT", "8080"),
                ("MIN_SPACING_MS", "1000"),
            ]),
        )
        .unwrap();

        assert_eq!(config.schedule.cron, "*/30 * * * * *");
        assert_eq!(config.schedule.timezone, "UTC");
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.store.dir, "/var/lib/pagewatch");
        assert_eq!(config.notify.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(config.notify.chat_id.as_deref(), Some("42"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limit.min_spacing_ms, 1000);
    }

    #[test]
    fn empty_values_are_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, env(&[("TZ", ""), ("PORT", " ")])).unwrap();
        assert_eq!(config.schedule.timezone, "Europe/Rome");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn malformed_numbers_are_config_errors() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, env(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err =
            apply_env_overrides(&mut config, env(&[("STORE_BACKEND", "redis")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn load_reads_file_and_validates() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r##"
            [http]
            timeout_secs = 5

            [[checkers]]
            name = "switch"
            url = "https://www.amazon.it/dp/B08KJF2D25"
            selector = "#availability span"
            "##,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.checkers.len(), 1);

        std::fs::write(&path, "[http]\ntimeout_secs = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());

        std::fs::write(&path, "[http\n").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(AppError::Toml(_))));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nope.toml");

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains("nope.toml"));
    }
}
