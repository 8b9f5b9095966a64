use query_service::{QueryError, QueryPlan};
use rem_store::{Filter, FilterOp};

#[test]
fn sql_plan_round_trips_with_structured_filters() {
    let raw = serde_json::json!({
        "type": "sql",
        "tenant_id": "tenant-a",
        "table": "resources",
        "filters": [
            { "field": "category", "op": "eq", "value": "text" },
            { "field": "resource_timestamp", "op": "gte", "value": "2025-06-01T00:00:00Z" }
        ],
        "order": [ { "field": "resource_timestamp", "descending": true } ],
        "limit": 25
    });
    let plan: QueryPlan = serde_json::from_value(raw).expect("decode");
    match &plan {
        QueryPlan::Sql(p) => {
            assert_eq!(p.table, "resources");
            assert_eq!(p.filters.len(), 2);
            assert_eq!(p.filters[0].op, FilterOp::Eq);
            assert!(p.order[0].descending);
            assert_eq!(p.limit, Some(25));
        }
        other => panic!("wrong variant: {:?}", other),
    }

    let encoded = serde_json::to_value(&plan).expect("encode");
    assert_eq!(encoded["type"], "sql");
    assert_eq!(encoded["tenant_id"], "tenant-a");
}

#[test]
fn every_variant_carries_its_tenant() {
    let plans = vec![
        serde_json::json!({ "type": "sql", "tenant_id": "t", "table": "resources" }),
        serde_json::json!({ "type": "lookup", "tenant_id": "t", "key": "doc.md" }),
        serde_json::json!({ "type": "search", "tenant_id": "t", "table": "resources", "query": "q" }),
        serde_json::json!({ "type": "traverse", "tenant_id": "t", "start": "alice" }),
        serde_json::json!({ "type": "fuzzy", "tenant_id": "t", "terms": ["a"] }),
    ];
    for raw in plans {
        let plan: QueryPlan = serde_json::from_value(raw).expect("decode");
        assert_eq!(plan.tenant_id(), "t");
        assert!(plan.validate().is_ok());
    }
}

#[test]
fn unknown_plan_type_is_rejected() {
    let raw = serde_json::json!({ "type": "scan_everything", "tenant_id": "t" });
    assert!(serde_json::from_value::<QueryPlan>(raw).is_err());
}

#[test]
fn validation_failures_are_invalid_plan_errors() {
    let plan: QueryPlan = serde_json::from_value(serde_json::json!({
        "type": "search",
        "tenant_id": "t",
        "table": "resources",
        "query": "   "
    }))
    .unwrap();
    match plan.validate() {
        Err(QueryError::InvalidPlan(msg)) => assert!(msg.contains("query")),
        other => panic!("expected InvalidPlan, got {:?}", other),
    }
}

#[test]
fn filter_helper_builds_eq() {
    let f = Filter::eq("name", "doc.md");
    assert_eq!(f.field, "name");
    assert_eq!(f.op, FilterOp::Eq);
    assert_eq!(f.value, serde_json::json!("doc.md"));
}
