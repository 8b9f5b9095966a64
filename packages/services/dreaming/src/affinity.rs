use chrono::{Duration, Utc};
use rem_store::{cosine_similarity, DreamRun, GraphNodeRef, InlineEdge, RemStore, TableKind};
use uuid::Uuid;

use crate::clients::LlmClient;
use crate::config::Config;
use crate::models::*;

const CONTENT_FIELD: &str = "content";

/// Score all pairs (i < j) and keep those at or above the threshold, up to
/// `pair_cap` scored pairs. The cap bounds work, not matches: once the cap
/// is hit, remaining pairs are never scored and the run reports the
/// truncation.
pub fn semantic_pairs(
    items: &[(Uuid, String, Vec<f32>)],
    threshold: f32,
    pair_cap: usize,
) -> (Vec<(usize, usize, f32)>, bool) {
    let mut hits = Vec::new();
    let mut scored = 0usize;
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if scored >= pair_cap {
                return (hits, true);
            }
            scored += 1;
            let similarity = cosine_similarity(&items[i].2, &items[j].2);
            if similarity >= threshold {
                hits.push((i, j, similarity));
            }
        }
    }
    (hits, false)
}

fn classification_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["related", "rel_type", "weight"],
        "properties": {
            "related": { "type": "boolean" },
            "rel_type": { "type": "string" },
            "weight": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
        }
    })
}

/// Batch job appending affinity edges between Resources in the lookback
/// window. Semantic mode scores stored vectors; LLM mode asks a model to
/// classify a much smaller set of pairs. Both are union-merge writers, so
/// reruns are no-ops.
#[derive(Clone)]
pub struct AffinityBuilder {
    store: RemStore,
    llm: LlmClient,
    cfg: Config,
}

impl AffinityBuilder {
    pub fn new(store: RemStore, llm: LlmClient, cfg: Config) -> Self {
        Self { store, llm, cfg }
    }

    pub async fn run_for_tenant(&self, tenant_id: &str) -> Result<DreamRun> {
        let prior_retries = self.guard_retries(tenant_id).await?;

        let mut run = DreamRun::new(tenant_id, JOB_AFFINITY);
        self.store.save_dream_run(&run).await?;
        run.start();
        self.store.save_dream_run(&run).await?;

        match self.build(tenant_id).await {
            Ok(0) => {
                run.skip_empty();
                self.store.save_dream_run(&run).await?;
                Ok(run)
            }
            Ok(edges) => {
                run.succeed(0, edges as i64);
                self.store.save_dream_run(&run).await?;
                tracing::info!(tenant_id, edges_created = edges, "Affinity pass succeeded");
                Ok(run)
            }
            Err(e) => {
                run.fail(&e.to_string(), prior_retries);
                self.store.save_dream_run(&run).await?;
                tracing::error!(tenant_id, error = %e, "Affinity pass failed");
                Err(e)
            }
        }
    }

    async fn guard_retries(&self, tenant_id: &str) -> Result<i32> {
        let latest = self.store.latest_dream_run(tenant_id, JOB_AFFINITY).await?;
        match latest {
            Some(run) if run.state == rem_store::DreamRunState::Failed => {
                if run.retries >= self.cfg.run_retry_cap {
                    return Err(DreamingError::RetriesExhausted {
                        tenant_id: tenant_id.to_string(),
                        job: JOB_AFFINITY.to_string(),
                        retries: run.retries,
                    });
                }
                Ok(run.retries)
            }
            _ => Ok(0),
        }
    }

    async fn build(&self, tenant_id: &str) -> Result<usize> {
        let cutoff = Utc::now() - Duration::hours(self.cfg.lookback_hours);
        let items = self
            .store
            .embedding_vectors_since(
                tenant_id,
                TableKind::Resources.table_name(),
                CONTENT_FIELD,
                cutoff,
                self.cfg.window_resource_cap,
            )
            .await?;
        if items.len() < 2 {
            return Ok(0);
        }

        tracing::info!(
            tenant_id,
            candidates = items.len(),
            semantic_pair_cap = self.cfg.semantic_pair_cap,
            llm_pair_cap = self.cfg.llm_pair_cap,
            "Starting affinity pass"
        );

        let threshold = self.cfg.affinity_similarity_threshold;
        let cap = self.cfg.semantic_pair_cap;
        let scoring_items = items.clone();
        let (hits, truncated) =
            tokio::task::spawn_blocking(move || semantic_pairs(&scoring_items, threshold, cap))
                .await
                .map_err(|e| DreamingError::Llm(format!("scoring task: {}", e)))?;
        if truncated {
            tracing::warn!(tenant_id, pair_cap = cap, "Pair cap hit; window only partially scored");
        }

        let mut edges = 0usize;
        for (i, j, similarity) in &hits {
            edges += self
                .write_edge_pair(tenant_id, &items[*i], &items[*j], "see_also", *similarity)
                .await?;
        }

        if self.cfg.enable_llm_affinity {
            edges += self.llm_pass(tenant_id, &items, &hits).await?;
        }
        Ok(edges)
    }

    /// LLM mode runs over the top unclassified pairs only; model calls are
    /// the expensive part, so the cap here is deliberately tight.
    async fn llm_pass(
        &self,
        tenant_id: &str,
        items: &[(Uuid, String, Vec<f32>)],
        semantic_hits: &[(usize, usize, f32)],
    ) -> Result<usize> {
        let schema = classification_schema();
        let mut edges = 0usize;
        for (i, j, _) in semantic_hits.iter().take(self.cfg.llm_pair_cap) {
            let prompt = format!(
                "Two documents from the same tenant:\nA: {}\nB: {}\n\
                 Classify their relationship. related=false if the overlap is incidental.",
                items[*i].1, items[*j].1
            );
            let verdict: AffinityVerdict = match self.llm.extract(&prompt, &schema).await {
                Ok(v) => v,
                Err(DreamingError::SchemaViolation(e)) => {
                    tracing::warn!(tenant_id, error = %e, "Unusable affinity verdict; skipping pair");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !verdict.related {
                continue;
            }
            edges += self
                .write_edge_pair(tenant_id, &items[*i], &items[*j], &verdict.rel_type, verdict.weight)
                .await?;
        }
        Ok(edges)
    }

    /// Append the bidirectional InlineEdge pair onto both rows and mirror
    /// it in the graph. Returns the number of edges actually added (reruns
    /// add zero).
    async fn write_edge_pair(
        &self,
        tenant_id: &str,
        a: &(Uuid, String, Vec<f32>),
        b: &(Uuid, String, Vec<f32>),
        rel_type: &str,
        weight: f32,
    ) -> Result<usize> {
        let table = TableKind::Resources.table_name();
        let forward = InlineEdge::new(b.1.clone(), rel_type, weight).with_entity_type("resource");
        let backward = InlineEdge::new(a.1.clone(), rel_type, weight).with_entity_type("resource");

        let mut added = 0;
        added += self.store.append_graph_paths(tenant_id, table, a.0, vec![forward]).await?;
        added += self.store.append_graph_paths(tenant_id, table, b.0, vec![backward]).await?;

        let node_a = GraphNodeRef::new(TableKind::Resources.node_label(), &a.1);
        let node_b = GraphNodeRef::new(TableKind::Resources.node_label(), &b.1);
        self.store
            .graph
            .merge_edge(tenant_id, &node_a, &node_b, rel_type, weight as f64)
            .await?;
        self.store
            .graph
            .merge_edge(tenant_id, &node_b, &node_a, rel_type, weight as f64)
            .await?;

        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, vector: Vec<f32>) -> (Uuid, String, Vec<f32>) {
        (Uuid::new_v4(), name.to_string(), vector)
    }

    #[test]
    fn pairs_above_threshold_are_kept() {
        let items = vec![
            item("a", vec![1.0, 0.0]),
            item("b", vec![1.0, 0.0]),
            item("c", vec![0.0, 1.0]),
        ];
        let (hits, truncated) = semantic_pairs(&items, 0.9, 100);
        assert!(!truncated);
        assert_eq!(hits.len(), 1);
        assert_eq!((hits[0].0, hits[0].1), (0, 1));
        assert!(hits[0].2 > 0.99);
    }

    #[test]
    fn pair_cap_truncates_scoring() {
        let items: Vec<_> = (0..10).map(|i| item(&format!("r{}", i), vec![1.0, 0.0])).collect();
        // 45 possible pairs, cap at 5
        let (hits, truncated) = semantic_pairs(&items, 0.5, 5);
        assert!(truncated);
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn two_items_minimum() {
        let items = vec![item("solo", vec![1.0])];
        let (hits, truncated) = semantic_pairs(&items, 0.1, 100);
        assert!(hits.is_empty());
        assert!(!truncated);
    }
}
