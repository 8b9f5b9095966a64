use chrono::{Duration, Utc};
use rem_store::{
    source_hash, DreamRun, Embedding, EntityResolver, GraphNodeRef, KvMapping, RemStore, Resource,
    TableKind,
};

use crate::clients::{EmbeddingsServiceClient, LlmClient};
use crate::config::Config;
use crate::models::*;

const SUMMARY_FIELD: &str = "summary";

fn extraction_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "moments": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "summary", "starts_at", "ends_at"],
                    "properties": {
                        "name": { "type": "string" },
                        "summary": { "type": "string" },
                        "moment_type": {
                            "type": "string",
                            "enum": ["conversation", "meeting", "planning", "reflection", "observation", "unknown"]
                        },
                        "starts_at": { "type": "string", "format": "date-time" },
                        "ends_at": { "type": "string", "format": "date-time" },
                        "emotion_tags": { "type": "array", "items": { "type": "string" } },
                        "topic_tags": { "type": "array", "items": { "type": "string" } },
                        "present_persons": { "type": "object" },
                        "speakers": { "type": "array" },
                        "location": { "type": "string" },
                        "background_sounds": { "type": "string" }
                    }
                }
            }
        },
        "required": ["moments"]
    })
}

#[derive(Debug, serde::Deserialize)]
struct ExtractionOutput {
    moments: Vec<MomentDraft>,
}

fn extraction_prompt(resource: &Resource) -> String {
    format!(
        "Segment the following content into temporally bounded moments. \
         The content was authored at {authored}. Return only moments with \
         real temporal structure; an empty list is a valid answer.\n\n\
         Content name: {name}\n\n{content}",
        authored = resource.resource_timestamp.to_rfc3339(),
        name = resource.name,
        content = resource.content,
    )
}

/// Batch job deriving Moments from recently ingested Resources. Idempotent:
/// moment ids are deterministic per (tenant, source resource, index) and all
/// writes are upserts or union-merges.
#[derive(Clone)]
pub struct MomentExtractor {
    store: RemStore,
    resolver: EntityResolver,
    llm: LlmClient,
    embeddings: EmbeddingsServiceClient,
    cfg: Config,
}

impl MomentExtractor {
    pub fn new(
        store: RemStore,
        llm: LlmClient,
        embeddings: EmbeddingsServiceClient,
        cfg: Config,
    ) -> Self {
        let resolver = EntityResolver::new(store.kv.clone());
        Self { store, resolver, llm, embeddings, cfg }
    }

    pub async fn run_for_tenant(&self, tenant_id: &str) -> Result<DreamRun> {
        let prior_retries = self.guard_retries(tenant_id, JOB_MOMENTS).await?;

        let mut run = DreamRun::new(tenant_id, JOB_MOMENTS);
        self.store.save_dream_run(&run).await?;
        run.start();
        self.store.save_dream_run(&run).await?;

        match self.extract(tenant_id).await {
            Ok(0) => {
                run.skip_empty();
                self.store.save_dream_run(&run).await?;
                tracing::info!(tenant_id, "Moment extraction found nothing in the window");
                Ok(run)
            }
            Ok(count) => {
                run.succeed(count as i64, 0);
                self.store.save_dream_run(&run).await?;
                tracing::info!(tenant_id, moments_created = count, "Moment extraction succeeded");
                Ok(run)
            }
            Err(e) => {
                run.fail(&e.to_string(), prior_retries);
                self.store.save_dream_run(&run).await?;
                tracing::error!(tenant_id, error = %e, "Moment extraction failed");
                Err(e)
            }
        }
    }

    /// Refuse to queue more work when the job already burned its retries;
    /// an operator has to look at it first.
    async fn guard_retries(&self, tenant_id: &str, job: &str) -> Result<i32> {
        let latest = self.store.latest_dream_run(tenant_id, job).await?;
        match latest {
            Some(run) if run.state == rem_store::DreamRunState::Failed => {
                if run.retries >= self.cfg.run_retry_cap {
                    return Err(DreamingError::RetriesExhausted {
                        tenant_id: tenant_id.to_string(),
                        job: job.to_string(),
                        retries: run.retries,
                    });
                }
                Ok(run.retries)
            }
            _ => Ok(0),
        }
    }

    async fn extract(&self, tenant_id: &str) -> Result<usize> {
        let cutoff = Utc::now() - Duration::hours(self.cfg.lookback_hours);
        let resources = self
            .store
            .resources_since(tenant_id, cutoff, self.cfg.window_resource_cap)
            .await?;
        if resources.is_empty() {
            return Ok(0);
        }

        let schema = extraction_schema();
        let mut created = 0usize;
        for resource in &resources {
            // Moments are not re-derived from other moments.
            if resource.category == "moment" {
                continue;
            }
            let prompt = extraction_prompt(resource);
            let output: ExtractionOutput = match self.llm.extract(&prompt, &schema).await {
                Ok(o) => o,
                Err(DreamingError::SchemaViolation(e)) => {
                    // Skip this resource; the run carries on.
                    tracing::warn!(
                        tenant_id,
                        resource_id = %resource.id,
                        error = %e,
                        "Extraction output unusable; skipping resource"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            for (index, draft) in output.moments.into_iter().enumerate() {
                if let Err(reason) = draft.check_bounds() {
                    tracing::warn!(
                        tenant_id,
                        resource_id = %resource.id,
                        reason = %reason,
                        "Dropping moment with broken temporal bounds"
                    );
                    continue;
                }
                let moment = draft.into_moment(tenant_id, &resource.uri, resource.id, index);
                self.persist_moment(&moment, resource).await?;
                created += 1;
            }
        }
        Ok(created)
    }

    /// Moment row, summary embedding, graph link back to the source
    /// resource, KV reverse mapping. Same write order as the storage
    /// worker: row before vector before KV.
    async fn persist_moment(&self, moment: &rem_store::Moment, source: &Resource) -> Result<()> {
        self.store.upsert_moment(moment).await?;

        if let Some(summary) = &moment.summary {
            let hash = source_hash(summary);
            let current = self
                .store
                .embedding_is_current(
                    &moment.tenant_id,
                    TableKind::Moments.table_name(),
                    moment.id,
                    SUMMARY_FIELD,
                    &self.cfg.embedding_provider,
                    &hash,
                )
                .await?;
            if !current {
                let vectors = self.embeddings.embed(&[summary.clone()]).await?;
                if let Some(vector) = vectors.into_iter().next() {
                    let embedding = Embedding::new(
                        TableKind::Moments.table_name(),
                        moment.id,
                        SUMMARY_FIELD,
                        vector,
                        &self.cfg.embedding_provider,
                        summary,
                        &moment.tenant_id,
                    );
                    self.store.upsert_embedding(&embedding).await?;
                }
            }
        }

        let moment_node = GraphNodeRef::new(TableKind::Moments.node_label(), &moment.name);
        let source_node = GraphNodeRef::new(TableKind::Resources.node_label(), &source.name);
        self.store
            .graph
            .merge_edge(&moment.tenant_id, &moment_node, &source_node, "derived_from", 1.0)
            .await?;

        self.resolver
            .register(
                &moment.tenant_id,
                &moment.name,
                KvMapping {
                    entity_id: moment.id.to_string(),
                    entity_type: TableKind::Moments.entity_type().to_string(),
                    table_name: TableKind::Moments.table_name().to_string(),
                    blob_key: None,
                    expires_at: None,
                },
            )
            .await?;
        Ok(())
    }
}
