use rem_store::{EntityResolver, RemStore};
use std::time::Instant;

use crate::embeddings::EmbeddingsClient;
use crate::error::Result;
use crate::ops;
use crate::plan::QueryPlan;

/// Dispatches typed query plans against the REM store. One executor per
/// process; cheap to clone and share.
#[derive(Clone)]
pub struct QueryExecutor {
    store: RemStore,
    resolver: EntityResolver,
    embeddings: EmbeddingsClient,
}

impl QueryExecutor {
    pub fn new(store: RemStore, embeddings: EmbeddingsClient) -> Self {
        let resolver = EntityResolver::new(store.kv.clone());
        Self { store, resolver, embeddings }
    }

    /// Run one plan to completion. Callers get rows or exactly one typed
    /// error; the tenant predicate is enforced below this layer on every
    /// path.
    pub async fn execute(&self, plan: &QueryPlan) -> Result<Vec<serde_json::Value>> {
        plan.validate()?;

        let started = Instant::now();
        let result = match plan {
            QueryPlan::Sql(p) => ops::sql::run(&self.store, p).await,
            QueryPlan::Lookup(p) => ops::lookup::run(&self.store, &self.resolver, p).await,
            QueryPlan::Search(p) => ops::search::run(&self.store, &self.embeddings, p).await,
            QueryPlan::Traverse(p) => ops::traverse::run(&self.store, &self.resolver, p).await,
            QueryPlan::Fuzzy(p) => ops::fuzzy::run(&self.store, &self.resolver, p).await,
        };

        let took_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(rows) => {
                tracing::info!(
                    query_type = plan.type_name(),
                    tenant_id = %plan.tenant_id(),
                    row_count = rows.len(),
                    took_ms,
                    "Query executed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    query_type = plan.type_name(),
                    tenant_id = %plan.tenant_id(),
                    kind = e.kind(),
                    retryable = e.retryable(),
                    took_ms,
                    error = %e,
                    "Query failed"
                );
            }
        }
        result
    }
}
