use rem_store::{Metric, RemStore};

use crate::embeddings::EmbeddingsClient;
use crate::error::{QueryError, Result};
use crate::plan::SearchPlan;

/// Similarity on the annotated rows. Cosine is the plain `1 - distance`;
/// the other metrics get a monotone equivalent so the threshold still
/// means "bigger is closer".
pub fn similarity_for(metric: Metric, distance: f64) -> f64 {
    match metric {
        Metric::Cosine => 1.0 - distance,
        Metric::L2 => 1.0 / (1.0 + distance),
        // pgvector returns the negated inner product as its distance
        Metric::InnerProduct => -distance,
    }
}

pub async fn run(
    store: &RemStore,
    embeddings: &EmbeddingsClient,
    plan: &SearchPlan,
) -> Result<Vec<serde_json::Value>> {
    let vector = embeddings.embed_query(&plan.query).await?;
    if vector.len() != store.dimension() {
        // Misconfigured provider, not bad input: surface it loudly.
        return Err(QueryError::DimensionMismatch(format!(
            "query embedding has {} dimensions, schema expects {}",
            vector.len(),
            store.dimension()
        )));
    }

    let hits = store
        .vector_search(
            &plan.tenant_id,
            &plan.table,
            &plan.field,
            &vector,
            plan.metric,
            plan.limit,
        )
        .await?;

    let mut rows = Vec::with_capacity(hits.len());
    for hit in hits {
        let similarity = similarity_for(plan.metric, hit.distance);
        if let Some(threshold) = plan.threshold {
            if similarity < threshold {
                continue;
            }
        }
        let mut row = hit.row;
        if let Some(obj) = row.as_object_mut() {
            obj.insert("_similarity".to_string(), serde_json::json!(similarity));
            obj.insert("_distance".to_string(), serde_json::json!(hit.distance));
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_is_one_minus_distance() {
        assert_eq!(similarity_for(Metric::Cosine, 0.0), 1.0);
        assert!((similarity_for(Metric::Cosine, 0.25) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn l2_similarity_shrinks_with_distance() {
        assert_eq!(similarity_for(Metric::L2, 0.0), 1.0);
        assert!(similarity_for(Metric::L2, 1.0) < similarity_for(Metric::L2, 0.5));
    }

    #[test]
    fn inner_product_similarity_undoes_negation() {
        assert_eq!(similarity_for(Metric::InnerProduct, -0.8), 0.8);
    }
}
