use neo4rs::{query, Graph};

use crate::error::{Result, StoreError};

/// Address of a graph node: (label, business key). Nodes additionally carry
/// a tenant_id property which every statement here binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNodeRef {
    pub label: String,
    pub key: String,
}

impl GraphNodeRef {
    pub fn new(label: &str, key: &str) -> Self {
        Self { label: sanitize_label(label), key: key.to_string() }
    }
}

/// One edge discovered during a frontier expansion.
#[derive(Debug, Clone)]
pub struct NeighborEdge {
    pub src_key: String,
    pub rel_type: String,
    pub weight: f64,
    pub dst_key: String,
    pub dst_labels: Vec<String>,
}

/// Labels and relationship types are spliced into cypher text (they cannot
/// be parameterized), so both are restricted to identifier characters.
pub fn sanitize_label(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if cleaned.is_empty() || !cleaned.chars().next().unwrap().is_ascii_alphabetic() {
        "Entity".to_string()
    } else {
        cleaned
    }
}

pub fn sanitize_rel_type(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        "related_to".to_string()
    } else {
        cleaned
    }
}

#[derive(Clone)]
pub struct GraphStore {
    graph: Graph,
}

impl GraphStore {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password).await?;
        Ok(Self { graph })
    }

    fn ensure_tenant(tenant_id: &str) -> Result<()> {
        if tenant_id.is_empty() {
            return Err(StoreError::EmptyTenant);
        }
        Ok(())
    }

    /// Idempotent node creation. Orphan destinations become plain nodes
    /// with no backing row; TRAVERSE later surfaces them as stubs.
    pub async fn merge_node(&self, tenant_id: &str, node: &GraphNodeRef) -> Result<()> {
        Self::ensure_tenant(tenant_id)?;
        let cypher = format!(
            "MERGE (n:{} {{key: $key, tenant_id: $tenant}})",
            node.label
        );
        self.graph
            .run(query(&cypher).param("key", node.key.as_str()).param("tenant", tenant_id))
            .await?;
        Ok(())
    }

    /// MERGE both endpoints and the edge so concurrent writers converge on
    /// one edge; the weight is refreshed on every call.
    pub async fn merge_edge(
        &self,
        tenant_id: &str,
        src: &GraphNodeRef,
        dst: &GraphNodeRef,
        rel_type: &str,
        weight: f64,
    ) -> Result<()> {
        Self::ensure_tenant(tenant_id)?;
        let rel = sanitize_rel_type(rel_type);
        let cypher = format!(
            "MERGE (a:{src_label} {{key: $src, tenant_id: $tenant}}) \
             MERGE (b:{dst_label} {{key: $dst, tenant_id: $tenant}}) \
             MERGE (a)-[r:{rel}]->(b) \
             SET r.weight = $weight",
            src_label = src.label,
            dst_label = dst.label,
            rel = rel,
        );
        self.graph
            .run(
                query(&cypher)
                    .param("src", src.key.as_str())
                    .param("dst", dst.key.as_str())
                    .param("tenant", tenant_id)
                    .param("weight", weight),
            )
            .await?;
        Ok(())
    }

    /// Expand one BFS frontier: outbound edges from any of `keys`, staying
    /// inside the tenant subgraph, optionally restricted to one rel type.
    pub async fn neighbors(
        &self,
        tenant_id: &str,
        keys: &[String],
        rel_filter: Option<&str>,
    ) -> Result<Vec<NeighborEdge>> {
        Self::ensure_tenant(tenant_id)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut cypher = String::from(
            "MATCH (n {tenant_id: $tenant})-[r]->(m {tenant_id: $tenant}) \
             WHERE n.key IN $keys",
        );
        if rel_filter.is_some() {
            cypher.push_str(" AND type(r) = $rel");
        }
        cypher.push_str(
            " RETURN n.key AS src_key, type(r) AS rel_type, \
             coalesce(r.weight, 0.0) AS weight, m.key AS dst_key, labels(m) AS dst_labels",
        );

        let mut q = query(&cypher)
            .param("tenant", tenant_id)
            .param("keys", keys.to_vec());
        if let Some(rel) = rel_filter {
            q = q.param("rel", sanitize_rel_type(rel));
        }

        let mut stream = self.graph.execute(q).await?;
        let mut edges = Vec::new();
        while let Some(row) = stream.next().await? {
            edges.push(NeighborEdge {
                src_key: get_field(&row, "src_key")?,
                rel_type: get_field(&row, "rel_type")?,
                weight: get_field(&row, "weight")?,
                dst_key: get_field(&row, "dst_key")?,
                dst_labels: get_field(&row, "dst_labels")?,
            });
        }
        Ok(edges)
    }

    /// Every distinct node key in the tenant subgraph; the FUZZY candidate
    /// universe.
    pub async fn list_keys(&self, tenant_id: &str) -> Result<Vec<String>> {
        Self::ensure_tenant(tenant_id)?;
        let mut stream = self
            .graph
            .execute(
                query(
                    "MATCH (n {tenant_id: $tenant}) WHERE n.key IS NOT NULL \
                     RETURN DISTINCT n.key AS key ORDER BY key",
                )
                .param("tenant", tenant_id),
            )
            .await?;
        let mut keys = Vec::new();
        while let Some(row) = stream.next().await? {
            keys.push(get_field(&row, "key")?);
        }
        Ok(keys)
    }

    /// Labels of the node with this key, if it exists in the tenant
    /// subgraph.
    pub async fn node_labels(&self, tenant_id: &str, key: &str) -> Result<Option<Vec<String>>> {
        Self::ensure_tenant(tenant_id)?;
        let mut stream = self
            .graph
            .execute(
                query(
                    "MATCH (n {tenant_id: $tenant, key: $key}) \
                     RETURN labels(n) AS labels LIMIT 1",
                )
                .param("tenant", tenant_id)
                .param("key", key),
            )
            .await?;
        match stream.next().await? {
            Some(row) => Ok(Some(get_field(&row, "labels")?)),
            None => Ok(None),
        }
    }
}

fn get_field<T: serde::de::DeserializeOwned>(row: &neo4rs::Row, name: &str) -> Result<T> {
    row.get::<T>(name)
        .map_err(|e| StoreError::GraphDecode(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(sanitize_label("Resource"), "Resource");
        assert_eq!(sanitize_label("person-or-org"), "personororg");
        assert_eq!(sanitize_label("123abc"), "Entity");
        assert_eq!(sanitize_label(""), "Entity");
    }

    #[test]
    fn rel_types_are_sanitized() {
        assert_eq!(sanitize_rel_type("see_also"), "see_also");
        assert_eq!(sanitize_rel_type("works with"), "works_with");
        assert_eq!(sanitize_rel_type("!!!"), "related_to");
    }
}
