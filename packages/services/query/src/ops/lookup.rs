use rem_store::{EntityResolver, KvMapping, RemStore};

use crate::error::Result;
use crate::plan::LookupPlan;

/// KV-only name resolution. The scan prefix `{tenant}/{key}/` is the whole
/// isolation story; there is deliberately no SQL fallback by name, so a
/// miss here is a miss, full stop.
pub async fn run(
    store: &RemStore,
    resolver: &EntityResolver,
    plan: &LookupPlan,
) -> Result<Vec<serde_json::Value>> {
    let mappings = resolver.resolve(&plan.tenant_id, &plan.key).await?;

    let mut rows = Vec::new();
    for mapping in mappings {
        if let Some(table) = &plan.table {
            if table != &mapping.table_name {
                continue;
            }
        }
        match hydrate(store, &plan.tenant_id, &mapping).await {
            Ok(Some(mut row)) => {
                if let Some(fields) = &plan.fields {
                    project(&mut row, fields);
                }
                rows.push(row);
            }
            Ok(None) => {
                // Report the resolved subset; the dangling mapping is a log
                // line, not a silent hole in the response.
                tracing::warn!(
                    tenant_id = %plan.tenant_id,
                    key = %plan.key,
                    entity_id = %mapping.entity_id,
                    table = %mapping.table_name,
                    "KV mapping points at a missing row"
                );
            }
            Err(e) => {
                tracing::warn!(
                    tenant_id = %plan.tenant_id,
                    key = %plan.key,
                    entity_id = %mapping.entity_id,
                    error = %e,
                    "Failed to hydrate mapping"
                );
            }
        }
    }
    Ok(rows)
}

/// Fetch the row behind one mapping and stamp the resolved entity_type on
/// it. Shared with FUZZY and TRAVERSE, which resolve through the same path.
pub(crate) async fn hydrate(
    store: &RemStore,
    tenant_id: &str,
    mapping: &KvMapping,
) -> Result<Option<serde_json::Value>> {
    let row = store
        .select_by_id(tenant_id, &mapping.table_name, &mapping.entity_id)
        .await?;
    Ok(row.map(|mut row| {
        if let Some(obj) = row.as_object_mut() {
            obj.insert(
                "_entity_type".to_string(),
                serde_json::Value::String(mapping.entity_type.clone()),
            );
        }
        row
    }))
}

/// Keep only the requested fields; annotations (leading underscore) always
/// survive projection.
fn project(row: &mut serde_json::Value, fields: &[String]) {
    if let Some(obj) = row.as_object_mut() {
        obj.retain(|k, _| k.starts_with('_') || fields.iter().any(|f| f == k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_keeps_annotations() {
        let mut row = serde_json::json!({
            "id": "x", "name": "doc.md", "content": "...",
            "_table_name": "resources", "_entity_type": "resource"
        });
        project(&mut row, &["name".to_string()]);
        let obj = row.as_object().unwrap();
        assert!(obj.contains_key("name"));
        assert!(obj.contains_key("_table_name"));
        assert!(obj.contains_key("_entity_type"));
        assert!(!obj.contains_key("content"));
        assert!(!obj.contains_key("id"));
    }
}
