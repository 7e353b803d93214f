// src/models/mod.rs

//! Domain models for the watcher.
//!
//! Raw configuration structures, validated checker definitions, and the
//! state that flows through a check cycle.

mod checker;
mod config;
mod state;

// Re-export all public types
pub use checker::{Cadence, CheckSchedule, CheckerDefinition, NotificationTarget};
pub use config::{
    CheckerConfig, Config, GroupLimit, HttpConfig, LoggingConfig, NotifyConfig, RateLimitConfig,
    ScheduleConfig, SelectorConfig, SelectorRule, ServerConfig, StoreBackend, StoreConfig,
};
pub use state::{CheckResult, CheckState, DefinitionSnapshot, ValueError};
