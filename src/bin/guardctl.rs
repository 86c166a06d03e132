use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use upstream_guard::config::loader::load_config;
use upstream_guard::config::GuardConfig;
use upstream_guard::observability::logging::init_logging;
use upstream_guard::rate_limit::BucketState;
use upstream_guard::store::{bucket_key, load_typed, FileStateStore, StateStore, BUCKET_NAMESPACE};
use upstream_guard::windows::{split_revision_range, split_time_window};
use upstream_guard::{CircuitKey, CircuitRegistry, LimiterRegistry, SystemClock};

#[derive(Parser)]
#[command(name = "guardctl")]
#[command(about = "Inspect and override upstream circuit breakers and rate limit buckets", long_about = None)]
struct Cli {
    /// TOML config; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// State file; overrides `store.path` from the config.
    #[arg(short, long)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Circuit breaker state
    Circuit {
        #[command(subcommand)]
        action: CircuitAction,
    },
    /// Shared rate limit buckets
    Bucket {
        #[command(subcommand)]
        action: BucketAction,
    },
    /// Preview how a sync range would be chunked
    Split {
        #[command(subcommand)]
        action: SplitAction,
    },
}

#[derive(Subcommand)]
enum CircuitAction {
    /// List keys with persisted state
    List,
    /// Print the stored snapshot
    Show { key: String },
    /// Force the breaker open
    Open {
        key: String,
        #[arg(short, long, default_value = "operator")]
        reason: String,
    },
    /// Force the breaker closed
    Close {
        key: String,
        #[arg(short, long, default_value = "operator")]
        reason: String,
    },
    /// Clear all state for the key
    Reset { key: String },
}

#[derive(Subcommand)]
enum BucketAction {
    /// Print the stored bucket
    Show { instance: String },
    /// Delete the stored bucket
    Clear { instance: String },
}

#[derive(Subcommand)]
enum SplitAction {
    /// RFC 3339 bounds, chunk in seconds
    Time {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        chunk_secs: i64,
    },
    /// Inclusive revision bounds
    Revisions { start: u64, end: u64, chunk: u64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    init_logging(&config.observability);

    let state_path = cli.state.clone().unwrap_or_else(|| config.store.path.clone().into());

    match cli.command {
        Commands::Circuit { action } => {
            let store: Arc<dyn StateStore> = Arc::new(FileStateStore::open(&state_path).await?);
            let registry = CircuitRegistry::new(store, config.circuit_breaker.clone(), Arc::new(SystemClock));
            match action {
                CircuitAction::List => {
                    let keys: Vec<String> = registry
                        .persisted_keys()
                        .await?
                        .into_iter()
                        .map(|k| k.to_string())
                        .collect();
                    print_json(&keys)?;
                }
                CircuitAction::Show { key } => print_json(&registry.snapshot(&CircuitKey::from_raw(key)).await?)?,
                CircuitAction::Open { key, reason } => {
                    print_json(&registry.force_open(&CircuitKey::from_raw(key), &reason).await?)?
                }
                CircuitAction::Close { key, reason } => {
                    print_json(&registry.force_close(&CircuitKey::from_raw(key), &reason).await?)?
                }
                CircuitAction::Reset { key } => print_json(&registry.reset(&CircuitKey::from_raw(key)).await?)?,
            }
        }
        Commands::Bucket { action } => {
            let store: Arc<dyn StateStore> = Arc::new(FileStateStore::open(&state_path).await?);
            match action {
                BucketAction::Show { instance } => {
                    let bucket = load_typed::<BucketState>(store.as_ref(), BUCKET_NAMESPACE, &bucket_key(&instance))
                        .await?
                        .map(|(state, _)| state);
                    print_json(&bucket)?;
                }
                BucketAction::Clear { instance } => {
                    let registry = LimiterRegistry::new(config.rate_limit.clone(), Some(store), Arc::new(SystemClock));
                    let removed = registry.clear_shared(&instance).await?;
                    print_json(&serde_json::json!({ "instance": instance, "removed": removed }))?;
                }
            }
        }
        Commands::Split { action } => match action {
            SplitAction::Time {
                since,
                until,
                chunk_secs,
            } => print_json(&split_time_window(since, until, Duration::seconds(chunk_secs)))?,
            SplitAction::Revisions { start, end, chunk } => print_json(&split_revision_range(start, end, chunk))?,
        },
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
