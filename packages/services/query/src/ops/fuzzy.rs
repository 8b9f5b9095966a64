use rem_store::{EntityResolver, RemStore};
use std::collections::HashSet;

use crate::error::{QueryError, Result};
use crate::ops::lookup::hydrate;
use crate::plan::FuzzyPlan;
use crate::trigram;

/// (term, key, score) triples surviving the threshold, top-k per term,
/// scored against the tenant's graph keys. Pure so it can run on the
/// blocking pool and in tests.
pub fn score_terms(
    terms: &[String],
    keys: &[String],
    threshold: f64,
    per_term_cap: usize,
) -> Vec<(String, String, f64)> {
    let mut out = Vec::new();
    for term in terms {
        let mut matches: Vec<(f64, &String)> = keys
            .iter()
            .map(|key| (trigram::similarity(term, key), key))
            .filter(|(score, _)| *score >= threshold)
            .collect();
        matches.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        out.extend(
            matches
                .into_iter()
                .take(per_term_cap)
                .map(|(score, key)| (term.clone(), key.clone(), score)),
        );
    }
    out
}

pub async fn run(
    store: &RemStore,
    resolver: &EntityResolver,
    plan: &FuzzyPlan,
) -> Result<Vec<serde_json::Value>> {
    let keys = store.graph.list_keys(&plan.tenant_id).await?;
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    // Trigram scoring over the whole key set is CPU-bound.
    let terms = plan.terms.clone();
    let threshold = plan.threshold;
    let cap = plan.per_term_cap;
    let scored = tokio::task::spawn_blocking(move || score_terms(&terms, &keys, threshold, cap))
        .await
        .map_err(|e| QueryError::Internal(format!("trigram task: {}", e)))?;

    // Dedupe across terms, first term wins, order preserved.
    let mut seen: HashSet<String> = HashSet::new();
    let mut rows = Vec::new();
    for (term, key, score) in scored {
        if !seen.insert(key.clone()) {
            continue;
        }
        let mappings = resolver.resolve(&plan.tenant_id, &key).await?;
        for mapping in mappings {
            match hydrate(store, &plan.tenant_id, &mapping).await {
                Ok(Some(mut row)) => {
                    if let Some(obj) = row.as_object_mut() {
                        obj.insert("_similarity".to_string(), serde_json::json!(score));
                        obj.insert("_matched_term".to_string(), serde_json::json!(term));
                    }
                    rows.push(row);
                }
                Ok(None) => {
                    tracing::debug!(key = %key, "Fuzzy match has no backing row; skipping");
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to hydrate fuzzy match");
                }
            }
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn threshold_one_keeps_only_exact_matches() {
        let scored = score_terms(
            &["alice".to_string()],
            &keys(&["alice", "alicia", "bob"]),
            1.0,
            5,
        );
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].1, "alice");
    }

    #[test]
    fn per_term_cap_bounds_results() {
        let scored = score_terms(
            &["doc".to_string()],
            &keys(&["doc.md", "doc.txt", "doc.csv", "doc.xml", "doc.jsonl", "docs"]),
            0.1,
            2,
        );
        assert_eq!(scored.len(), 2);
    }

    #[test]
    fn results_are_ranked_by_score() {
        let scored = score_terms(
            &["alice".to_string()],
            &keys(&["bob-alice", "alice", "malice"]),
            0.1,
            5,
        );
        assert_eq!(scored[0].1, "alice");
        assert!(scored[0].2 >= scored[1].2);
    }

    #[test]
    fn nothing_above_threshold_is_empty() {
        let scored = score_terms(&["zzz".to_string()], &keys(&["alice", "bob"]), 0.5, 5);
        assert!(scored.is_empty());
    }
}
