// src/server.rs

//! HTTP status endpoint.
//!
//! - `GET /`: stored state per checker, in registry order (`null` if absent)
//! - `GET /health`
//! - `GET /stats`: cycle counters per checker
//! - `POST /check`: run every enabled checker now
//! - `POST /check/:name`: run one checker now, enabled or not

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{CheckState, ServerConfig};
use crate::pipeline::{Scheduler, StatsSnapshot, Trigger};

pub type SharedState = Arc<Scheduler>;

/// Build the router over a running scheduler.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_states))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/check", post(check_all))
        .route("/check/:name", post(check_one))
        .with_state(state)
}

/// Bind the status listener. Fails if the address is taken.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    log::info!("Status endpoint listening on http://{addr}");
    Ok(listener)
}

/// Serve on `listener` until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

/// Read every checker's state. A failed read shows as `null` for that
/// checker only.
pub async fn collect_states(scheduler: &Scheduler) -> Vec<Option<CheckState>> {
    let store = scheduler.cycle().store();
    let reads = scheduler.registry().iter().map(|checker| async move {
        match store.read(&checker.name).await {
            Ok(state) => state,
            Err(e) => {
                log::warn!("[{}] Could not read state: {}", checker.name, e);
                None
            }
        }
    });
    join_all(reads).await
}

async fn list_states(State(state): State<SharedState>) -> Json<Vec<Option<CheckState>>> {
    Json(collect_states(&state).await)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn stats(State(state): State<SharedState>) -> Json<BTreeMap<String, StatsSnapshot>> {
    Json(state.cycle().stats().snapshot())
}

#[derive(Debug, Default, Serialize)]
struct TriggerReport {
    started: Vec<String>,
    skipped: Vec<String>,
}

impl TriggerReport {
    fn add(&mut self, name: String, trigger: &Trigger) {
        match trigger {
            Trigger::Started(_) => self.started.push(name),
            Trigger::Skipped => self.skipped.push(name),
        }
    }
}

async fn check_all(State(state): State<SharedState>) -> (StatusCode, Json<TriggerReport>) {
    let mut report = TriggerReport::default();
    for (name, trigger) in state.trigger_all() {
        report.add(name, &trigger);
    }
    log::info!(
        "Manual check: {} started, {} skipped",
        report.started.len(),
        report.skipped.len()
    );
    (StatusCode::OK, Json(report))
}

async fn check_one(State(state): State<SharedState>, Path(name): Path<String>) -> Response {
    match state.trigger(&name) {
        Some(trigger) => {
            let mut report = TriggerReport::default();
            report.add(name, &trigger);
            (StatusCode::OK, Json(report)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown checker '{name}'") })),
        )
            .into_response(),
    }
}
