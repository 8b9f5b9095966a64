use rem_store::{EntityResolver, RemStore};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::Result;
use crate::ops::lookup::hydrate;
use crate::plan::TraversePlan;

/// Bounded BFS over the tenant subgraph: one frontier expansion per depth
/// level, visited-set dedup in process, edge order preserved as the
/// backend streams it. Depth 0 returns the start node alone. Orphan nodes
/// (no backing row) come back as stubs.
pub async fn run(
    store: &RemStore,
    resolver: &EntityResolver,
    plan: &TraversePlan,
) -> Result<Vec<serde_json::Value>> {
    let depth = plan.effective_depth();

    let Some((start_key, start_row)) = resolve_start(store, resolver, plan).await? else {
        return Ok(Vec::new());
    };

    let mut nodes = Vec::new();
    nodes.push(serde_json::json!({
        "key": start_key,
        "depth": 0,
        "row": start_row,
        "orphan": is_orphan(&start_row),
    }));

    let mut visited: HashSet<String> = HashSet::from([start_key.clone()]);
    let mut frontier = vec![start_key];

    for level in 1..=depth {
        let edges = store
            .graph
            .neighbors(&plan.tenant_id, &frontier, plan.rel_type.as_deref())
            .await?;
        let mut next = Vec::new();

        for edge in edges {
            if !visited.insert(edge.dst_key.clone()) {
                continue;
            }
            next.push(edge.dst_key.clone());

            let row = hydrate_by_key(store, resolver, &plan.tenant_id, &edge.dst_key).await?;
            nodes.push(serde_json::json!({
                "key": edge.dst_key,
                "depth": level,
                "rel_type": edge.rel_type,
                "weight": edge.weight,
                "from": edge.src_key,
                "labels": edge.dst_labels,
                "row": row,
                "orphan": is_orphan(&row),
            }));
        }

        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    Ok(nodes)
}

fn is_orphan(row: &Option<serde_json::Value>) -> bool {
    row.is_none()
}

/// The start is either an explicit entity id (anything that parses as a
/// UUID) or a LOOKUP key. Either way the graph key is the row's name.
async fn resolve_start(
    store: &RemStore,
    resolver: &EntityResolver,
    plan: &TraversePlan,
) -> Result<Option<(String, Option<serde_json::Value>)>> {
    if plan.start.parse::<Uuid>().is_ok() {
        for table in ["resources", "moments"] {
            if let Some(row) = store.select_by_id(&plan.tenant_id, table, &plan.start).await? {
                let key = row
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or(&plan.start)
                    .to_string();
                return Ok(Some((key, Some(row))));
            }
        }
        return Ok(None);
    }

    // A LOOKUP key is the node key itself; the row may or may not exist
    // (an orphan start is still a valid walk origin).
    let row = hydrate_by_key(store, resolver, &plan.tenant_id, &plan.start).await?;
    Ok(Some((plan.start.clone(), row)))
}

async fn hydrate_by_key(
    store: &RemStore,
    resolver: &EntityResolver,
    tenant_id: &str,
    key: &str,
) -> Result<Option<serde_json::Value>> {
    let mappings = resolver.resolve(tenant_id, key).await?;
    for mapping in mappings {
        if let Some(row) = hydrate(store, tenant_id, &mapping).await? {
            return Ok(Some(row));
        }
    }
    Ok(None)
}
