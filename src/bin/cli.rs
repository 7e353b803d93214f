//! pagewatch CLI
//!
//! Runs the watcher as a long-lived service, or one-shot for external cron.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pagewatch::{
    config::{DEFAULT_CONFIG_PATH, load_config},
    error::{AppError, Result},
    models::Config,
    pipeline::{CheckCycle, CycleOutcome, CycleStats, Scheduler, Trigger, join_cycle},
    registry::Registry,
    server,
    services::{HttpFetcher, RateLimiters, TelegramNotifier},
    storage::{self, MemoryStore, StateStore},
};
use tokio::sync::watch;

/// pagewatch - page change watcher
#[derive(Parser, Debug)]
#[command(
    name = "pagewatch",
    version,
    about = "Polls web pages and notifies on Telegram when a value changes"
)]
struct Cli {
    /// Path to the configuration file [default: config.toml, if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and status endpoint until Ctrl-C
    Run,

    /// Run one cycle for every enabled checker and exit
    Check {
        /// Only run this checker (enabled or not)
        #[arg(long)]
        name: Option<String>,
    },

    /// Fetch and extract without storing or notifying
    Probe {
        #[arg(long)]
        name: String,
    },

    /// Load the configuration and build every checker
    Validate,

    /// Print stored states as JSON
    Status,
}

/// Initialize logging. `RUST_LOG` wins over both arguments.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Wire the fetcher, store and notifier into a scheduler.
async fn build(config: &Config, store: Arc<dyn StateStore>) -> Result<Arc<Scheduler>> {
    let registry = Arc::new(Registry::build(config)?);
    let limiters = Arc::new(RateLimiters::from_config(&config.rate_limit));
    let fetcher = HttpFetcher::new(config.http.clone(), limiters);
    let notifier = TelegramNotifier::new(
        &config.notify,
        Duration::from_secs(config.http.timeout_secs),
    )?;
    let stats = Arc::new(CycleStats::new(&registry));

    let cycle = CheckCycle::new(Arc::new(fetcher), store, Arc::new(notifier), stats);
    Ok(Arc::new(Scheduler::new(registry, Arc::new(cycle))))
}

fn describe(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Unchanged => "unchanged".to_string(),
        CycleOutcome::Changed {
            baseline,
            store,
            notify,
        } => {
            let mut text = if *baseline { "baseline" } else { "changed" }.to_string();
            if let Err(e) = store {
                text.push_str(&format!(" (store failed: {e})"));
            }
            if let Err(e) = notify {
                text.push_str(&format!(" (notify failed: {e})"));
            }
            text
        }
        CycleOutcome::Failed(failure) => format!("failed: {failure}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging.level);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    if cli.config.is_none() && !Path::new(DEFAULT_CONFIG_PATH).exists() {
        log::warn!("Config file {DEFAULT_CONFIG_PATH} not found, using defaults");
    }

    match cli.command {
        Command::Run => {
            let store = storage::open(&config.store).await?;
            let scheduler = build(&config, store).await?;
            let listener = server::bind(&config.server).await?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let ticker = {
                let scheduler = Arc::clone(&scheduler);
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { scheduler.run(shutdown).await })
            };
            let mut status = tokio::spawn(server::serve(
                listener,
                Arc::clone(&scheduler),
                shutdown_rx,
            ));

            let server_failure = tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    log::info!("Shutting down...");
                    None
                }
                ended = &mut status => {
                    let err = match ended {
                        Ok(Err(e)) => e,
                        Ok(Ok(())) => io::Error::other("status endpoint stopped").into(),
                        Err(e) => io::Error::other(format!("status endpoint task failed: {e}")).into(),
                    };
                    log::error!("{}, shutting down", err);
                    Some(err)
                }
            };
            let _ = shutdown_tx.send(true);

            if let Err(e) = ticker.await {
                log::error!("Scheduler task failed: {}", e);
            }
            if server_failure.is_none() {
                match status.await {
                    Ok(Err(e)) => log::error!("Status endpoint failed: {}", e),
                    Err(e) => log::error!("Status endpoint task failed: {}", e),
                    Ok(Ok(())) => {}
                }
            }

            let grace = Duration::from_secs(config.http.timeout_secs + 5);
            if !scheduler.drain(grace).await {
                log::warn!("{} cycle(s) still running at exit", scheduler.in_flight());
            }
            if let Some(err) = server_failure {
                return Err(err);
            }
        }

        Command::Check { name } => {
            let store = storage::open(&config.store).await?;
            let scheduler = build(&config, store).await?;

            let triggers = match name {
                Some(name) => {
                    let trigger = scheduler
                        .trigger(&name)
                        .ok_or_else(|| AppError::config(format!("unknown checker '{name}'")))?;
                    vec![(name, trigger)]
                }
                None => scheduler.trigger_all(),
            };

            for (name, trigger) in triggers {
                let line = match trigger {
                    Trigger::Started(handle) => match join_cycle(name.clone(), handle).await {
                        Some(outcome) => describe(&outcome),
                        None => "task failed".to_string(),
                    },
                    Trigger::Skipped => "skipped".to_string(),
                };
                println!("{name}: {line}");
            }

            let stats = scheduler.cycle().stats().snapshot();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Command::Probe { name } => {
            let scheduler = build(&config, Arc::new(MemoryStore::new())).await?;
            let checker = scheduler
                .registry()
                .get(&name)
                .ok_or_else(|| AppError::config(format!("unknown checker '{name}'")))?;

            let result = scheduler.cycle().observe(checker).await;
            match result.value {
                Ok(value) => {
                    println!("url:   {}", result.url);
                    if let Some(title) = result.title {
                        println!("title: {title}");
                    }
                    println!("value: {value:?}");
                }
                Err(e) => {
                    log::error!("[{}] {}", name, e);
                    return Err(AppError::from(e));
                }
            }
        }

        Command::Validate => {
            log::info!("Validating {}...", config_path.display());
            let registry = Registry::build(&config)?;
            log::info!(
                "✓ Config OK: {} checker(s), {} enabled",
                registry.len(),
                registry.enabled().count()
            );
            for checker in registry.iter() {
                log::info!(
                    "  {} -> {} [{}] group '{}'",
                    checker.name,
                    checker.url,
                    checker.schedule.cadence.expression(),
                    checker.rate_limit_group
                );
            }
        }

        Command::Status => {
            let store = storage::open(&config.store).await?;
            let scheduler = build(&config, store).await?;
            let states = server::collect_states(&scheduler).await;
            println!("{}", serde_json::to_string_pretty(&states)?);
        }
    }

    Ok(())
}
