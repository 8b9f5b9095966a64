use rem_store::RemStore;

use crate::error::Result;
use crate::plan::SqlPlan;

/// Plain relational dispatch. The store layer appends the tenant predicate
/// to whatever filters the caller brought; rows come back annotated with
/// `_table_name`.
pub async fn run(store: &RemStore, plan: &SqlPlan) -> Result<Vec<serde_json::Value>> {
    let rows = store
        .select(
            &plan.tenant_id,
            &plan.table,
            &plan.filters,
            &plan.order,
            plan.limit,
        )
        .await?;
    Ok(rows)
}
