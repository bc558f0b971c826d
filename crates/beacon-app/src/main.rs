//! Beacon application binary - composition root.
//!
//! Ties the pipeline crates together into one executable:
//! 1. Load configuration from TOML (with CLI overrides)
//! 2. Open the SQLite store
//! 3. Construct the tracker service (store + bus + uploader)
//! 4. Feed it NDJSON events from stdin until EOF or ctrl-c
//!
//! Producers are external: anything that can write a line of JSON
//! (`{"kind": "click", "data": {"url": "...", "title": "..."}}`) to the
//! process's stdin acts as a capture source. Bearer tokens come from the
//! BEACON_TOKEN environment variable, refreshed on every upload cycle.

mod cli;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use beacon_bus::TabBus;
use beacon_core::{BeaconConfig, EventKind};
use beacon_store::{ActivityStore, Database, RetentionPolicy};
use beacon_sync::{EnvTokenProvider, HttpIngestClient, IngestClient, TokenProvider};
use beacon_tracker::Tracker;

use cli::{CliArgs, Command};

fn open_store(config: &BeaconConfig) -> Result<Arc<ActivityStore>, Box<dyn std::error::Error>> {
    let data_dir = cli::resolve_data_dir(&config.general.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("beacon.db");
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite store opened");
    Ok(Arc::new(ActivityStore::new(
        Arc::new(db),
        RetentionPolicy::new(
            config.tracking.max_activities,
            config.tracking.retention_days,
        ),
    )))
}

/// Parse one NDJSON line and feed it to the tracker.
fn feed_line<C, T>(tracker: &Tracker<C, T>, line: &str)
where
    C: IngestClient + 'static,
    T: TokenProvider + 'static,
{
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    let parsed: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable event line");
            return;
        }
    };

    let Some(kind) = parsed
        .get("kind")
        .and_then(serde_json::Value::as_str)
        .and_then(EventKind::from_name)
    else {
        tracing::warn!("Event line without a known kind");
        return;
    };
    let data = match parsed.get("data") {
        Some(serde_json::Value::Object(map)) => map.clone(),
        None => serde_json::Map::new(),
        Some(_) => {
            tracing::warn!("Event line with non-object data");
            return;
        }
    };

    if kind == EventKind::SearchQuery {
        if let Some(query) = data.get("query").and_then(serde_json::Value::as_str) {
            tracker.record_search_query(query);
        }
    }
    tracker.record(kind, data);
}

async fn run(
    config: BeaconConfig,
    store: Arc<ActivityStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = Tracker::new(
        &config,
        store,
        TabBus::new(),
        HttpIngestClient::new(config.sync.endpoint.clone()),
        EnvTokenProvider::new("BEACON_TOKEN"),
    );
    tracker.start();
    tracing::info!(endpoint = %config.sync.endpoint, "Tracker running; reading events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => feed_line(&tracker, &line),
                Ok(None) => {
                    tracing::info!("Event input closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Event input failed");
                    break;
                }
            },
        }
    }

    tracker.stop().await;
    Ok(())
}

fn print_status(config: &BeaconConfig, store: &ActivityStore) {
    let user = beacon_core::UserId::new(config.general.user_id.clone());
    let enabled = store.is_enabled(&user);
    println!("user:      {}", user.as_str());
    println!("tracking:  {}", if enabled { "enabled" } else { "disabled" });
    match store.counts(&user) {
        Ok(counts) => {
            println!("events:    {} ({} unsynced)", counts.total, counts.unsynced);
        }
        Err(e) => println!("events:    unavailable ({})", e),
    }
    match store.background_state(&user) {
        Ok(Some(state)) => {
            println!("session:   {}", state.session_id.0);
            println!("started:   {}", state.started_at.to_rfc3339());
            match state.last_sync_at {
                Some(at) => println!("last sync: {}", at.to_rfc3339()),
                None => println!("last sync: never"),
            }
        }
        _ => println!("session:   none"),
    }
    match store.search_queries(&user) {
        Ok(log) if !log.is_empty() => println!("queries:   {}", log.len()),
        _ => {}
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Tracing.
    let default_level = args.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!("Starting beacon v{}", env!("CARGO_PKG_VERSION"));

    // Config, with CLI overrides.
    let config_file = args.resolve_config_path();
    let mut config = BeaconConfig::load_or_default(&config_file);
    if let Some(ref data_dir) = args.data_dir {
        config.general.data_dir = data_dir.to_string_lossy().to_string();
    }
    if let Some(ref user) = args.user {
        config.general.user_id = user.clone();
    }
    if let Some(ref level) = args.log_level {
        config.general.log_level = level.clone();
    }

    let store = open_store(&config)?;
    let user = beacon_core::UserId::new(config.general.user_id.clone());

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store).await?,
        Command::Enable => {
            store.set_preference(&user, true)?;
            println!("tracking enabled for {}", user.as_str());
        }
        Command::Disable => {
            store.set_preference(&user, false)?;
            println!("tracking disabled for {}", user.as_str());
        }
        Command::Status => print_status(&config, &store),
    }

    Ok(())
}
