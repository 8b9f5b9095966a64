use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::Embedding;
use crate::store::sql::row_to_json;
use crate::store::{RemStore, TableKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cosine,
    L2,
    InnerProduct,
}

impl Metric {
    pub fn operator(&self) -> &'static str {
        match self {
            Metric::Cosine => "<=>",
            Metric::L2 => "<->",
            Metric::InnerProduct => "<#>",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Metric::Cosine),
            "l2" => Some(Metric::L2),
            "inner_product" => Some(Metric::InnerProduct),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub row: serde_json::Value,
    pub distance: f64,
}

impl RemStore {
    /// ANN search joining the main table with its embedding table. Both
    /// sides carry the tenant predicate; ties resolve by ascending id.
    pub async fn vector_search(
        &self,
        tenant_id: &str,
        table: &str,
        field: &str,
        query_vector: &[f32],
        metric: Metric,
        limit: i64,
    ) -> Result<Vec<VectorHit>> {
        Self::ensure_tenant(tenant_id)?;
        let kind = TableKind::parse(table)?;
        let embed_table = kind
            .embedding_table()
            .ok_or_else(|| StoreError::UnknownTable(format!("{} has no embeddings", table)))?;
        if query_vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }

        let sql = format!(
            "SELECT m.*, (e.embedding {op} $1) AS distance \
             FROM {main} m \
             JOIN {embed} e ON e.entity_id = m.id AND e.tenant_id = m.tenant_id \
             WHERE m.tenant_id = $2 AND e.field_name = $3 \
             ORDER BY distance ASC, m.id ASC \
             LIMIT $4",
            op = metric.operator(),
            main = kind.table_name(),
            embed = embed_table,
        );

        let rows = sqlx::query(&sql)
            .bind(Vector::from(query_vector.to_vec()))
            .bind(tenant_id)
            .bind(field)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let distance: f64 = row.try_get("distance")?;
            hits.push(VectorHit { row: row_to_json(kind, row)?, distance });
        }
        Ok(hits)
    }

    pub async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
        Self::ensure_tenant(&embedding.tenant_id)?;
        let kind = TableKind::parse(&embedding.entity_table)?;
        let embed_table = kind.embedding_table().ok_or_else(|| {
            StoreError::UnknownTable(format!("{} has no embeddings", embedding.entity_table))
        })?;
        if embedding.vector.len() != self.dimension || embedding.dimension != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.vector.len(),
            });
        }

        let sql = format!(
            "INSERT INTO {embed} \
               (entity_id, field_name, embedding, dimension, provider, source_hash, tenant_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (entity_id, field_name, provider) DO UPDATE SET \
               embedding = EXCLUDED.embedding, \
               dimension = EXCLUDED.dimension, \
               source_hash = EXCLUDED.source_hash, \
               created_at = EXCLUDED.created_at",
            embed = embed_table,
        );

        sqlx::query(&sql)
            .bind(embedding.entity_id)
            .bind(&embedding.field_name)
            .bind(Vector::from(embedding.vector.clone()))
            .bind(embedding.dimension as i32)
            .bind(&embedding.provider)
            .bind(&embedding.source_hash)
            .bind(&embedding.tenant_id)
            .bind(embedding.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// True when a vector already exists for this slot with an unchanged
    /// source hash, in which case regeneration is skipped.
    pub async fn embedding_is_current(
        &self,
        tenant_id: &str,
        table: &str,
        entity_id: Uuid,
        field: &str,
        provider: &str,
        source_hash: &str,
    ) -> Result<bool> {
        Self::ensure_tenant(tenant_id)?;
        let kind = TableKind::parse(table)?;
        let embed_table = kind
            .embedding_table()
            .ok_or_else(|| StoreError::UnknownTable(format!("{} has no embeddings", table)))?;
        let sql = format!(
            "SELECT 1 FROM {embed} \
             WHERE entity_id = $1 AND field_name = $2 AND provider = $3 \
               AND source_hash = $4 AND tenant_id = $5",
            embed = embed_table,
        );
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .bind(field)
            .bind(provider)
            .bind(source_hash)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Vectors plus owning-row names for a time window, used by the
    /// affinity pass to score pairs without re-embedding anything.
    pub async fn embedding_vectors_since(
        &self,
        tenant_id: &str,
        table: &str,
        field: &str,
        cutoff: chrono::DateTime<chrono::Utc>,
        limit: i64,
    ) -> Result<Vec<(Uuid, String, Vec<f32>)>> {
        Self::ensure_tenant(tenant_id)?;
        let kind = TableKind::parse(table)?;
        let embed_table = kind
            .embedding_table()
            .ok_or_else(|| StoreError::UnknownTable(format!("{} has no embeddings", table)))?;
        let sql = format!(
            "SELECT m.id, m.name, e.embedding \
             FROM {main} m \
             JOIN {embed} e ON e.entity_id = m.id AND e.tenant_id = m.tenant_id \
             WHERE m.tenant_id = $1 AND e.field_name = $2 AND m.resource_timestamp >= $3 \
             ORDER BY m.resource_timestamp ASC \
             LIMIT $4",
            main = kind.table_name(),
            embed = embed_table,
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(field)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.try_get("id")?;
            let name: String = row.try_get("name")?;
            let vector: Vector = row.try_get("embedding")?;
            out.push((id, name, vector.to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_operators() {
        assert_eq!(Metric::Cosine.operator(), "<=>");
        assert_eq!(Metric::L2.operator(), "<->");
        assert_eq!(Metric::InnerProduct.operator(), "<#>");
    }

    #[test]
    fn metric_parse_rejects_unknown() {
        assert_eq!(Metric::parse("cosine"), Some(Metric::Cosine));
        assert_eq!(Metric::parse("manhattan"), None);
    }
}
