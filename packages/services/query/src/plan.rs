use rem_store::{Filter, Metric, OrderBy};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

pub const DEFAULT_TRAVERSE_DEPTH: usize = 2;
pub const MAX_TRAVERSE_DEPTH: usize = 4;
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.5;
pub const DEFAULT_FUZZY_PER_TERM_CAP: usize = 5;
pub const DEFAULT_SEARCH_LIMIT: i64 = 10;

fn default_depth() -> usize {
    DEFAULT_TRAVERSE_DEPTH
}
fn default_fuzzy_threshold() -> f64 {
    DEFAULT_FUZZY_THRESHOLD
}
fn default_per_term_cap() -> usize {
    DEFAULT_FUZZY_PER_TERM_CAP
}
fn default_search_limit() -> i64 {
    DEFAULT_SEARCH_LIMIT
}
fn default_metric() -> Metric {
    Metric::Cosine
}
fn default_embed_field() -> String {
    "content".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlPlan {
    pub tenant_id: String,
    pub table: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupPlan {
    pub tenant_id: String,
    /// Human-readable name; resolved through the KV reverse mapping only,
    /// never by scanning entity rows.
    pub key: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPlan {
    pub tenant_id: String,
    pub table: String,
    #[serde(default = "default_embed_field")]
    pub field: String,
    pub query: String,
    #[serde(default = "default_metric")]
    pub metric: Metric,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversePlan {
    pub tenant_id: String,
    /// A LOOKUP key, or an entity id (anything that parses as a UUID).
    pub start: String,
    #[serde(default)]
    pub rel_type: Option<String>,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

impl TraversePlan {
    /// Depth is capped, not rejected: a depth-9 request walks 4 levels.
    pub fn effective_depth(&self) -> usize {
        self.depth.min(MAX_TRAVERSE_DEPTH)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzyPlan {
    pub tenant_id: String,
    pub terms: Vec<String>,
    #[serde(default = "default_fuzzy_threshold")]
    pub threshold: f64,
    #[serde(default = "default_per_term_cap")]
    pub per_term_cap: usize,
}

/// The typed query plan. A tagged union so dispatch is exhaustive, and
/// every variant's parameter struct carries tenant_id: there is no way to
/// build a plan without one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryPlan {
    Sql(SqlPlan),
    Lookup(LookupPlan),
    Search(SearchPlan),
    Traverse(TraversePlan),
    Fuzzy(FuzzyPlan),
}

impl QueryPlan {
    pub fn tenant_id(&self) -> &str {
        match self {
            QueryPlan::Sql(p) => &p.tenant_id,
            QueryPlan::Lookup(p) => &p.tenant_id,
            QueryPlan::Search(p) => &p.tenant_id,
            QueryPlan::Traverse(p) => &p.tenant_id,
            QueryPlan::Fuzzy(p) => &p.tenant_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            QueryPlan::Sql(_) => "sql",
            QueryPlan::Lookup(_) => "lookup",
            QueryPlan::Search(_) => "search",
            QueryPlan::Traverse(_) => "traverse",
            QueryPlan::Fuzzy(_) => "fuzzy",
        }
    }

    /// Structural checks that do not need a store connection.
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id().is_empty() {
            return Err(QueryError::InvalidPlan("tenant_id must not be empty".into()));
        }
        match self {
            QueryPlan::Lookup(p) if p.key.is_empty() => {
                Err(QueryError::InvalidPlan("lookup key must not be empty".into()))
            }
            QueryPlan::Search(p) if p.query.trim().is_empty() => {
                Err(QueryError::InvalidPlan("search query must not be empty".into()))
            }
            QueryPlan::Fuzzy(p) if p.terms.is_empty() => {
                Err(QueryError::InvalidPlan("fuzzy plan needs at least one term".into()))
            }
            QueryPlan::Traverse(p) if p.start.is_empty() => {
                Err(QueryError::InvalidPlan("traverse start must not be empty".into()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_deserialize_with_defaults() {
        let plan: QueryPlan = serde_json::from_value(serde_json::json!({
            "type": "traverse",
            "tenant_id": "tenant-a",
            "start": "alice"
        }))
        .unwrap();
        match plan {
            QueryPlan::Traverse(p) => {
                assert_eq!(p.depth, 2);
                assert!(p.rel_type.is_none());
            }
            other => panic!("wrong variant: {:?}", other),
        }

        let plan: QueryPlan = serde_json::from_value(serde_json::json!({
            "type": "fuzzy",
            "tenant_id": "tenant-a",
            "terms": ["alce"]
        }))
        .unwrap();
        match plan {
            QueryPlan::Fuzzy(p) => {
                assert_eq!(p.threshold, 0.5);
                assert_eq!(p.per_term_cap, 5);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn tenant_is_structurally_required() {
        let missing = serde_json::json!({ "type": "lookup", "key": "doc.md" });
        assert!(serde_json::from_value::<QueryPlan>(missing).is_err());
    }

    #[test]
    fn empty_tenant_fails_validation() {
        let plan = QueryPlan::Lookup(LookupPlan {
            tenant_id: String::new(),
            key: "doc.md".into(),
            table: None,
            fields: None,
        });
        assert!(plan.validate().is_err());
    }

    #[test]
    fn depth_is_capped_not_rejected() {
        let plan = TraversePlan {
            tenant_id: "tenant-a".into(),
            start: "alice".into(),
            rel_type: None,
            depth: 9,
        };
        assert_eq!(plan.effective_depth(), MAX_TRAVERSE_DEPTH);
    }

    #[test]
    fn search_defaults_to_cosine() {
        let plan: QueryPlan = serde_json::from_value(serde_json::json!({
            "type": "search",
            "tenant_id": "tenant-a",
            "table": "resources",
            "query": "neural networks"
        }))
        .unwrap();
        match plan {
            QueryPlan::Search(p) => {
                assert_eq!(p.metric, rem_store::Metric::Cosine);
                assert_eq!(p.limit, 10);
                assert_eq!(p.field, "content");
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }
}
