//! Service layer for the watcher.
//!
//! This module contains the collaborators a check cycle drives:
//! - Rate limiting per group (`RateLimiter`, `RateLimiters`)
//! - Page fetching (`Fetch`, `HttpFetcher`)
//! - Value extraction (`Selector`, `CssSelector`, `RegexSelector`)
//! - Change notification (`Notifier`, `TelegramNotifier`)

pub mod extractor;
mod fetcher;
mod notifier;
mod rate_limit;

pub use extractor::{CssSelector, RegexSelector, Selector};
pub use fetcher::{Fetch, FetchRequest, HttpFetcher, RawResponse};
pub use notifier::{Notifier, TelegramNotifier, format_message};
pub use rate_limit::{RateLimit, RateLimiter, RateLimiters};
