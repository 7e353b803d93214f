// src/lib.rs

//! pagewatch: polls web pages on a schedule, extracts a value from each,
//! and sends a Telegram message when it changes.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;
