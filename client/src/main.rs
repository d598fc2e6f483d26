//! Outbox - inspect and replay the offline request queue.
//!
//! ```text
//! outbox                          print a summary of the queue
//! outbox --drain                  replay the queue once
//! outbox enqueue METHOD URL [BODY] queue a request
//! outbox watch                    poll the health URL and replay while online
//! ```
//!
//! `watch` runs until Ctrl-C. The health URL is `OUTBOX_HEALTH_URL`, or the
//! API base URL when unset.

use outbox_client::{
    Config, ConnectivityMonitor, DurableQueueStore, FileStorage, HttpExecutor, OfflineStateStore,
    SyncEngine,
};
use outbox_engine::{HttpMethod, SnapshotMetadata};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

enum Command {
    Summary { drain: bool },
    Watch,
    Enqueue {
        method: HttpMethod,
        url: String,
        body: Option<serde_json::Value>,
    },
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    match args.first().map(String::as_str) {
        Some("enqueue") => {
            let method = args
                .get(1)
                .ok_or("missing METHOD")?
                .to_ascii_uppercase();
            let method: HttpMethod = serde_json::from_value(serde_json::Value::String(method))
                .map_err(|_| "unknown METHOD".to_string())?;
            let url = args.get(2).ok_or("missing URL")?.clone();
            let body = match args.get(3) {
                Some(raw) => Some(serde_json::from_str(raw).map_err(|e| format!("BODY: {}", e))?),
                None => None,
            };
            Ok(Command::Enqueue { method, url, body })
        }
        Some("watch") => Ok(Command::Watch),
        _ => Ok(Command::Summary {
            drain: args.iter().any(|arg| arg == "--drain"),
        }),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outbox_client=debug,outbox=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(storage = %config.storage_dir.display(), "Opening queue storage");
    let storage = Arc::new(FileStorage::open(&config.storage_dir).await?);

    let queue = Arc::new(DurableQueueStore::new(storage));
    let engine = Arc::new(
        SyncEngine::new(queue, config.backoff()).with_request_timeout(config.request_timeout()),
    );
    let executor = Arc::new(HttpExecutor::new(
        config.api_base_url.clone(),
        config.request_timeout(),
    )?);

    // Start offline so nothing replays unless --drain or watch is given
    let monitor = ConnectivityMonitor::new_shared(false);
    let store = OfflineStateStore::new(monitor.clone(), engine, executor);
    store.init().await?;

    match command {
        Command::Enqueue { method, url, body } => {
            let mut request = config.new_request(method, url);
            if let Some(body) = body {
                request = request.with_data(body);
            }
            let id = store.enqueue(request).await?;
            println!("{}", id);
        }
        Command::Summary { drain } => {
            let snapshot = outbox_engine::QueueSnapshot::new(store.get_queue().await);
            let metadata = SnapshotMetadata::from(&snapshot);
            println!("{}", serde_json::to_string_pretty(&metadata)?);

            if drain {
                let result = store.sync_queue(None).await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        Command::Watch => {
            let client = reqwest::Client::builder()
                .timeout(config.probe_interval())
                .build()?;
            tracing::info!(
                url = %config.health_url(),
                interval_ms = config.probe_interval_ms,
                pending = store.state().pending_sync,
                "Watching connectivity"
            );
            let url = config.health_url().to_string();
            let probe = monitor.spawn_probe(client, url, config.probe_interval());

            tokio::signal::ctrl_c().await?;
            probe.abort();
            tracing::info!(pending = store.state().pending_sync, "Stopped watching");
        }
    }

    store.dispose();
    Ok(())
}
