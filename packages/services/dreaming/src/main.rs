use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{fmt, EnvFilter};

mod affinity;
mod clients;
mod config;
mod models;
mod moments;

use crate::affinity::AffinityBuilder;
use crate::clients::{EmbeddingsServiceClient, LlmClient};
use crate::config::Config;
use crate::models::{DreamingError, JOB_AFFINITY, JOB_MOMENTS};
use crate::moments::MomentExtractor;

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
    let store = rem_store::RemStore::connect(&cfg.store_config()).await?;
    let llm = LlmClient::new(
        cfg.llm_service_url.clone(),
        cfg.llm_model.clone(),
        cfg.http_timeout_ms,
        cfg.llm_parse_retry_cap,
    )?;
    let embeddings = EmbeddingsServiceClient::new(
        cfg.embeddings_service_url.clone(),
        cfg.embedding_model.clone(),
        cfg.http_timeout_ms,
    )?;

    let extractor = MomentExtractor::new(store.clone(), llm.clone(), embeddings, cfg.clone());
    let affinity = AffinityBuilder::new(store.clone(), llm, cfg.clone());

    // On-demand runs: `dreaming-service moments <tenant>` etc.
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match (args[1].as_str(), args.get(2)) {
            ("moments", Some(tenant)) => {
                let run = extractor.run_for_tenant(tenant).await?;
                tracing::info!(state = run.state.as_str(), moments_created = run.moments_created, "Run finished");
                return Ok(());
            }
            ("affinity", Some(tenant)) => {
                let run = affinity.run_for_tenant(tenant).await?;
                tracing::info!(state = run.state.as_str(), edges_created = run.edges_created, "Run finished");
                return Ok(());
            }
            _ => {
                println!("dreaming-service [moments <tenant_id> | affinity <tenant_id>]");
                println!("With no arguments, runs the cron scheduler over all tenants.");
                return Ok(());
            }
        }
    }

    if !cfg.enable_scheduler {
        tracing::warn!("Scheduler disabled; nothing to do");
        return Ok(());
    }

    let scheduler = JobScheduler::new().await.map_err(wrap_sched)?;
    start_dream_scheduler(&scheduler, &cfg, store, extractor, affinity).await?;
    scheduler.start().await.map_err(wrap_sched)?;
    tracing::info!(
        moments_cron = %cfg.moments_cron,
        affinity_cron = %cfg.affinity_cron,
        "Dreaming scheduler started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    Ok(())
}

fn wrap_sched(e: tokio_cron_scheduler::JobSchedulerError) -> anyhow::Error {
    anyhow::anyhow!(DreamingError::Scheduler(e.to_string()))
}

async fn start_dream_scheduler(
    scheduler: &JobScheduler,
    cfg: &Config,
    store: rem_store::RemStore,
    extractor: MomentExtractor,
    affinity: AffinityBuilder,
) -> anyhow::Result<()> {
    let moments_store = store.clone();
    let moments_job = Job::new_async(cfg.moments_cron.as_str(), move |_uuid, _l| {
        let store = moments_store.clone();
        let extractor = extractor.clone();
        Box::pin(async move {
            if let Err(e) = run_all_tenants(&store, JOB_MOMENTS, |tenant| {
                let extractor = extractor.clone();
                async move { extractor.run_for_tenant(&tenant).await.map(|_| ()) }
            })
            .await
            {
                tracing::error!(error = %e, "Scheduled moment extraction tick failed");
            }
        })
    })
    .map_err(wrap_sched)?;
    scheduler.add(moments_job).await.map_err(wrap_sched)?;

    let affinity_store = store;
    let affinity_job = Job::new_async(cfg.affinity_cron.as_str(), move |_uuid, _l| {
        let store = affinity_store.clone();
        let affinity = affinity.clone();
        Box::pin(async move {
            if let Err(e) = run_all_tenants(&store, JOB_AFFINITY, |tenant| {
                let affinity = affinity.clone();
                async move { affinity.run_for_tenant(&tenant).await.map(|_| ()) }
            })
            .await
            {
                tracing::error!(error = %e, "Scheduled affinity tick failed");
            }
        })
    })
    .map_err(wrap_sched)?;
    scheduler.add(affinity_job).await.map_err(wrap_sched)?;

    Ok(())
}

/// One scheduler tick: walk the tenant registry and run the job for each.
/// A tenant whose run is already in flight or out of retries is skipped;
/// one tenant's failure never blocks the others.
async fn run_all_tenants<F, Fut>(
    store: &rem_store::RemStore,
    job: &'static str,
    run_one: F,
) -> models::Result<()>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = models::Result<()>>,
{
    let tenants = store.list_tenants().await?;
    tracing::debug!(job, tenant_count = tenants.len(), "Dreaming tick");

    for tenant in tenants {
        match store.latest_dream_run(&tenant.tenant_id, job).await {
            Ok(Some(run)) if !run.state.is_terminal() => {
                tracing::debug!(tenant_id = %tenant.tenant_id, job, "Run already in flight; skipping");
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(tenant_id = %tenant.tenant_id, error = %e, "Could not read run ledger");
                continue;
            }
        }

        match run_one(tenant.tenant_id.clone()).await {
            Ok(()) => {}
            Err(DreamingError::RetriesExhausted { tenant_id, job, retries }) => {
                tracing::error!(
                    tenant_id = %tenant_id,
                    job = %job,
                    retries,
                    "Run requires operator action; skipping until the ledger is cleared"
                );
            }
            Err(e) => {
                tracing::error!(tenant_id = %tenant.tenant_id, job, error = %e, "Run failed");
            }
        }
    }
    Ok(())
}
