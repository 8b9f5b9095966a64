use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::{merge_graph_paths, InlineEdge, Moment, MomentType, Resource, Tenant};
use crate::store::{RemStore, TableKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
}

impl FilterOp {
    fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Like => "LIKE",
            FilterOp::In => "= ANY",
        }
    }
}

/// One structured predicate. Field names are validated against the target
/// table's column list before any SQL is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<serde_json::Value>) -> Self {
        Self { field: field.to_string(), op: FilterOp::Eq, value: value.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

fn check_column(kind: TableKind, field: &str) -> Result<()> {
    if kind.columns().contains(&field) {
        Ok(())
    } else {
        Err(StoreError::ColumnNotAllowed {
            table: kind.table_name().to_string(),
            column: field.to_string(),
        })
    }
}

/// Bind a JSON-typed filter value with the column's SQL type. String values
/// aimed at timestamp or uuid columns are coerced so Postgres sees the
/// native type instead of TEXT.
fn push_value(
    qb: &mut QueryBuilder<'_, Postgres>,
    kind: TableKind,
    field: &str,
    value: &serde_json::Value,
) -> Result<()> {
    match value {
        serde_json::Value::String(s) => {
            if kind.timestamp_columns().contains(&field) {
                let ts: DateTime<Utc> = s.parse().map_err(|_| StoreError::ColumnNotAllowed {
                    table: kind.table_name().to_string(),
                    column: format!("{} (unparseable timestamp)", field),
                })?;
                qb.push_bind(ts);
            } else if kind.uuid_columns().contains(&field) {
                let id: Uuid = s.parse().map_err(|_| StoreError::ColumnNotAllowed {
                    table: kind.table_name().to_string(),
                    column: format!("{} (unparseable uuid)", field),
                })?;
                qb.push_bind(id);
            } else {
                qb.push_bind(s.clone());
            }
        }
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                qb.push_bind(i);
            } else {
                qb.push_bind(n.as_f64().unwrap_or(0.0));
            }
        }
        serde_json::Value::Bool(b) => {
            qb.push_bind(*b);
        }
        other => {
            qb.push_bind(other.clone());
        }
    }
    Ok(())
}

impl RemStore {
    /// Parameterized SELECT. The `tenant_id = $n` predicate is appended by
    /// this layer on every path; callers cannot disable it.
    pub async fn select(
        &self,
        tenant_id: &str,
        table: &str,
        filters: &[Filter],
        order: &[OrderBy],
        limit: Option<i64>,
    ) -> Result<Vec<serde_json::Value>> {
        Self::ensure_tenant(tenant_id)?;
        let kind = TableKind::parse(table)?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM ");
        qb.push(kind.table_name());
        qb.push(" WHERE tenant_id = ");
        qb.push_bind(tenant_id.to_string());

        for f in filters {
            check_column(kind, &f.field)?;
            qb.push(" AND ");
            qb.push(f.field.as_str());
            match f.op {
                FilterOp::In => {
                    let items: Vec<String> = f
                        .value
                        .as_array()
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                                .collect()
                        })
                        .unwrap_or_default();
                    qb.push(" = ANY(");
                    qb.push_bind(items);
                    qb.push(")");
                }
                op => {
                    qb.push(" ");
                    qb.push(op.sql());
                    qb.push(" ");
                    push_value(&mut qb, kind, &f.field, &f.value)?;
                }
            }
        }

        if !order.is_empty() {
            qb.push(" ORDER BY ");
            for (i, o) in order.iter().enumerate() {
                check_column(kind, &o.field)?;
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(o.field.as_str());
                qb.push(if o.descending { " DESC" } else { " ASC" });
            }
        }

        if let Some(n) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(n);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(|row| row_to_json(kind, row)).collect()
    }

    /// Fetch one row by primary id, annotated like `select` results.
    pub async fn select_by_id(
        &self,
        tenant_id: &str,
        table: &str,
        id: &str,
    ) -> Result<Option<serde_json::Value>> {
        Self::ensure_tenant(tenant_id)?;
        let kind = TableKind::parse(table)?;
        let row = match kind {
            TableKind::Tenants => {
                // The tenants registry keys by tenant_id; a tenant can only
                // ever see its own row.
                if id != tenant_id {
                    return Ok(None);
                }
                sqlx::query("SELECT * FROM tenants WHERE tenant_id = $1")
                    .bind(tenant_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            _ => {
                let uuid: Uuid = match id.parse() {
                    Ok(u) => u,
                    Err(_) => return Ok(None),
                };
                let sql = format!(
                    "SELECT * FROM {} WHERE id = $1 AND tenant_id = $2",
                    kind.table_name()
                );
                sqlx::query(&sql)
                    .bind(uuid)
                    .bind(tenant_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        row.map(|r| row_to_json(kind, &r)).transpose()
    }

    pub async fn upsert_resource(&self, resource: &Resource) -> Result<()> {
        Self::ensure_tenant(&resource.tenant_id)?;
        sqlx::query(
            r#"
            INSERT INTO resources
              (id, tenant_id, name, category, content, summary, uri,
               resource_timestamp, metadata, graph_paths, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
              name = EXCLUDED.name,
              category = EXCLUDED.category,
              content = EXCLUDED.content,
              summary = EXCLUDED.summary,
              uri = EXCLUDED.uri,
              resource_timestamp = EXCLUDED.resource_timestamp,
              metadata = EXCLUDED.metadata,
              graph_paths = EXCLUDED.graph_paths,
              updated_at = EXCLUDED.updated_at
            WHERE resources.tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(resource.id)
        .bind(&resource.tenant_id)
        .bind(&resource.name)
        .bind(&resource.category)
        .bind(&resource.content)
        .bind(&resource.summary)
        .bind(&resource.uri)
        .bind(resource.resource_timestamp)
        .bind(serde_json::to_value(&resource.metadata)?)
        .bind(serde_json::to_value(&resource.graph_paths)?)
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_moment(&self, moment: &Moment) -> Result<()> {
        Self::ensure_tenant(&moment.tenant_id)?;
        moment.validate()?;
        sqlx::query(
            r#"
            INSERT INTO moments
              (id, tenant_id, name, category, content, summary, uri,
               resource_timestamp, resource_ends_timestamp, moment_type,
               emotion_tags, topic_tags, present_persons, speakers,
               location, background_sounds, metadata, graph_paths,
               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (id) DO UPDATE SET
              name = EXCLUDED.name,
              category = EXCLUDED.category,
              content = EXCLUDED.content,
              summary = EXCLUDED.summary,
              resource_timestamp = EXCLUDED.resource_timestamp,
              resource_ends_timestamp = EXCLUDED.resource_ends_timestamp,
              moment_type = EXCLUDED.moment_type,
              emotion_tags = EXCLUDED.emotion_tags,
              topic_tags = EXCLUDED.topic_tags,
              present_persons = EXCLUDED.present_persons,
              speakers = EXCLUDED.speakers,
              location = EXCLUDED.location,
              background_sounds = EXCLUDED.background_sounds,
              metadata = EXCLUDED.metadata,
              graph_paths = EXCLUDED.graph_paths,
              updated_at = EXCLUDED.updated_at
            WHERE moments.tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(moment.id)
        .bind(&moment.tenant_id)
        .bind(&moment.name)
        .bind(&moment.category)
        .bind(&moment.content)
        .bind(&moment.summary)
        .bind(&moment.uri)
        .bind(moment.resource_timestamp)
        .bind(moment.resource_ends_timestamp)
        .bind(moment.moment_type.as_str())
        .bind(serde_json::to_value(&moment.emotion_tags)?)
        .bind(serde_json::to_value(&moment.topic_tags)?)
        .bind(serde_json::to_value(&moment.present_persons)?)
        .bind(serde_json::to_value(&moment.speakers)?)
        .bind(&moment.location)
        .bind(&moment.background_sounds)
        .bind(serde_json::to_value(&moment.metadata)?)
        .bind(serde_json::to_value(&moment.graph_paths)?)
        .bind(moment.created_at)
        .bind(moment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_tenant(&self, tenant: &Tenant) -> Result<()> {
        Self::ensure_tenant(&tenant.tenant_id)?;
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, email, public_key, metadata)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id) DO UPDATE SET
              email = EXCLUDED.email,
              public_key = EXCLUDED.public_key,
              metadata = EXCLUDED.metadata
            "#,
        )
        .bind(&tenant.tenant_id)
        .bind(&tenant.email)
        .bind(&tenant.public_key)
        .bind(serde_json::to_value(&tenant.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Union-merge edges into a row's graph_paths under a row lock. Existing
    /// (dest, rel_type) pairs are untouched, so reruns are no-ops. Returns
    /// the number of edges actually added.
    pub async fn append_graph_paths(
        &self,
        tenant_id: &str,
        table: &str,
        id: Uuid,
        edges: Vec<InlineEdge>,
    ) -> Result<usize> {
        Self::ensure_tenant(tenant_id)?;
        let kind = TableKind::parse(table)?;
        if kind == TableKind::Tenants {
            return Err(StoreError::UnknownTable("tenants have no graph_paths".into()));
        }

        let mut tx = self.pool.begin().await?;
        let select_sql = format!(
            "SELECT graph_paths FROM {} WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
            kind.table_name()
        );
        let row = sqlx::query(&select_sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                table: kind.table_name().to_string(),
                id: id.to_string(),
            })?;

        let mut paths: Vec<InlineEdge> =
            serde_json::from_value(row.try_get::<serde_json::Value, _>("graph_paths")?)?;
        let added = merge_graph_paths(&mut paths, edges);
        if added > 0 {
            let update_sql = format!(
                "UPDATE {} SET graph_paths = $1, updated_at = now() WHERE id = $2 AND tenant_id = $3",
                kind.table_name()
            );
            sqlx::query(&update_sql)
                .bind(serde_json::to_value(&paths)?)
                .bind(id)
                .bind(tenant_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(added)
    }

    /// Typed convenience for the dreaming lookback window.
    pub async fn resources_since(
        &self,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Resource>> {
        Self::ensure_tenant(tenant_id)?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM resources
            WHERE tenant_id = $1 AND resource_timestamp >= $2
            ORDER BY resource_timestamp ASC
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(resource_from_row).collect()
    }
}

pub(crate) fn resource_from_row(row: &PgRow) -> Result<Resource> {
    Ok(Resource {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        uri: row.try_get("uri")?,
        resource_timestamp: row.try_get("resource_timestamp")?,
        metadata: serde_json::from_value(row.try_get::<serde_json::Value, _>("metadata")?)?,
        graph_paths: serde_json::from_value(row.try_get::<serde_json::Value, _>("graph_paths")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn moment_from_row(row: &PgRow) -> Result<Moment> {
    Ok(Moment {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        uri: row.try_get("uri")?,
        resource_timestamp: row.try_get("resource_timestamp")?,
        resource_ends_timestamp: row.try_get("resource_ends_timestamp")?,
        moment_type: MomentType::parse(&row.try_get::<String, _>("moment_type")?),
        emotion_tags: serde_json::from_value(row.try_get::<serde_json::Value, _>("emotion_tags")?)?,
        topic_tags: serde_json::from_value(row.try_get::<serde_json::Value, _>("topic_tags")?)?,
        present_persons: serde_json::from_value(
            row.try_get::<serde_json::Value, _>("present_persons")?,
        )?,
        speakers: serde_json::from_value(row.try_get::<serde_json::Value, _>("speakers")?)?,
        location: row.try_get("location")?,
        background_sounds: row.try_get("background_sounds")?,
        metadata: serde_json::from_value(row.try_get::<serde_json::Value, _>("metadata")?)?,
        graph_paths: serde_json::from_value(row.try_get::<serde_json::Value, _>("graph_paths")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn tenant_from_row(row: &PgRow) -> Result<Tenant> {
    Ok(Tenant {
        tenant_id: row.try_get("tenant_id")?,
        email: row.try_get("email")?,
        public_key: row.try_get("public_key")?,
        metadata: serde_json::from_value(row.try_get::<serde_json::Value, _>("metadata")?)?,
    })
}

/// Decode a row into JSON with the `_table_name` annotation query callers
/// rely on to tell result sets apart.
pub(crate) fn row_to_json(kind: TableKind, row: &PgRow) -> Result<serde_json::Value> {
    let mut value = match kind {
        TableKind::Resources => serde_json::to_value(resource_from_row(row)?)?,
        TableKind::Moments => serde_json::to_value(moment_from_row(row)?)?,
        TableKind::Tenants => serde_json::to_value(tenant_from_row(row)?)?,
    };
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "_table_name".to_string(),
            serde_json::Value::String(kind.table_name().to_string()),
        );
    }
    Ok(value)
}
