use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

mod bus;
mod cli;
mod clients;
mod config;
mod handlers;
mod models;
mod router;
mod worker;

use crate::bus::BusManager;
use crate::cli::print_ingestion_usage;
use crate::clients::{EmbeddingsServiceClient, ObjectStoreClient};
use crate::config::Config;
use crate::handlers::ParserRegistry;
use crate::models::SizeTier;
use crate::router::IngressRouter;
use crate::worker::StorageWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load this crate's .env regardless of current working directory
    let _ = dotenvy::from_filename_override(concat!(env!("CARGO_MANIFEST_DIR"), "/.env"));

    let filter = EnvFilter::from_default_env().add_directive("info".parse().unwrap());
    fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .init();

    let cfg = Config::from_env();

    let args: Vec<String> = std::env::args().collect();
    let role = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match role {
        "router" => run_router(cfg).await,
        "worker" => {
            let tier = args
                .get(2)
                .and_then(|t| SizeTier::parse(t))
                .ok_or_else(|| anyhow::anyhow!("worker requires a tier: small | medium | large"))?;
            run_worker(cfg, tier).await
        }
        "help" | "--help" | "-h" => {
            print_ingestion_usage();
            Ok(())
        }
        other => {
            print_ingestion_usage();
            Err(anyhow::anyhow!("unknown role: {}", other))
        }
    }
}

/// SIGTERM / ctrl-c flip the shutdown flag; loops drain and exit.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {},
                _ = sigterm.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("Shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

async fn run_router(cfg: Config) -> anyhow::Result<()> {
    let bus = BusManager::connect(&cfg).await?;
    bus.ensure_topology().await?;
    let router = IngressRouter::new(bus);
    let shutdown = shutdown_channel();

    // Bus disconnects surface as run() errors; reconnect with backoff.
    let mut attempt: u32 = 0;
    loop {
        match router.run(shutdown.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if *shutdown.borrow() {
                    return Ok(());
                }
                attempt = (attempt + 1).min(6);
                let delay = Duration::from_secs(2u64.pow(attempt));
                tracing::error!(error = %e, retry_in_s = delay.as_secs(), "Router failed; reconnecting");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn run_worker(cfg: Config, tier: SizeTier) -> anyhow::Result<()> {
    let bus = BusManager::connect(&cfg).await?;
    bus.ensure_topology().await?;

    let store = rem_store::RemStore::connect(&cfg.store_config()).await?;
    let resolver = rem_store::EntityResolver::new(store.kv.clone());
    let embeddings = EmbeddingsServiceClient::new(
        cfg.embeddings_service_url.clone(),
        cfg.embedding_model.clone(),
        cfg.http_timeout_ms,
    )?;
    let object_store = ObjectStoreClient::new(&cfg).await?;

    // Fatal configuration check: provider dimension must match the schema.
    let probed = embeddings.probe_dimension().await?;
    if probed != cfg.embedding_dimension {
        anyhow::bail!(
            "embedding provider dimension {} disagrees with configured dimension {}; refusing to start",
            probed,
            cfg.embedding_dimension
        );
    }

    let worker = StorageWorker::new(
        tier,
        bus,
        store,
        resolver,
        embeddings,
        object_store,
        Arc::new(ParserRegistry::with_defaults()),
        cfg,
    );
    let shutdown = shutdown_channel();

    let mut attempt: u32 = 0;
    loop {
        match worker.run(shutdown.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if *shutdown.borrow() {
                    return Ok(());
                }
                attempt = (attempt + 1).min(6);
                let delay = Duration::from_secs(2u64.pow(attempt));
                tracing::error!(
                    tier = tier.as_str(),
                    error = %e,
                    retry_in_s = delay.as_secs(),
                    "Worker failed; reconnecting"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
