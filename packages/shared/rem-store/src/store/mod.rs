pub mod graph;
pub mod kv;
pub mod runs;
pub mod sql;
pub mod vector;

pub use graph::{GraphNodeRef, GraphStore, NeighborEdge};
pub use kv::KvStore;
pub use sql::{Filter, FilterOp, OrderBy};
pub use vector::{Metric, VectorHit};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{Result, StoreError};

/// The vector column width baked into the migrations. A configured provider
/// dimension that disagrees with this is a fatal startup error, not a
/// runtime surprise.
pub const SCHEMA_EMBEDDING_DIMENSION: usize = 768;

/// Tables the access layer is willing to touch. Everything else is an
/// UnknownTable error; there is no raw-SQL escape hatch for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Resources,
    Moments,
    Tenants,
}

impl TableKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "resources" => Ok(TableKind::Resources),
            "moments" => Ok(TableKind::Moments),
            "tenants" => Ok(TableKind::Tenants),
            other => Err(StoreError::UnknownTable(other.to_string())),
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            TableKind::Resources => "resources",
            TableKind::Moments => "moments",
            TableKind::Tenants => "tenants",
        }
    }

    pub fn embedding_table(&self) -> Option<&'static str> {
        match self {
            TableKind::Resources => Some("resources_embeddings"),
            TableKind::Moments => Some("moments_embeddings"),
            TableKind::Tenants => None,
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            TableKind::Resources => "resource",
            TableKind::Moments => "moment",
            TableKind::Tenants => "tenant",
        }
    }

    pub fn node_label(&self) -> &'static str {
        match self {
            TableKind::Resources => "Resource",
            TableKind::Moments => "Moment",
            TableKind::Tenants => "Tenant",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            TableKind::Resources => &[
                "id",
                "tenant_id",
                "name",
                "category",
                "content",
                "summary",
                "uri",
                "resource_timestamp",
                "metadata",
                "graph_paths",
                "created_at",
                "updated_at",
            ],
            TableKind::Moments => &[
                "id",
                "tenant_id",
                "name",
                "category",
                "content",
                "summary",
                "uri",
                "resource_timestamp",
                "resource_ends_timestamp",
                "moment_type",
                "emotion_tags",
                "topic_tags",
                "present_persons",
                "speakers",
                "location",
                "background_sounds",
                "metadata",
                "graph_paths",
                "created_at",
                "updated_at",
            ],
            TableKind::Tenants => &["tenant_id", "email", "public_key", "metadata", "created_at"],
        }
    }

    pub fn timestamp_columns(&self) -> &'static [&'static str] {
        match self {
            TableKind::Resources => &["resource_timestamp", "created_at", "updated_at"],
            TableKind::Moments => &[
                "resource_timestamp",
                "resource_ends_timestamp",
                "created_at",
                "updated_at",
            ],
            TableKind::Tenants => &["created_at"],
        }
    }

    pub fn uuid_columns(&self) -> &'static [&'static str] {
        match self {
            TableKind::Tenants => &[],
            _ => &["id"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub graph_uri: String,
    pub graph_user: String,
    pub graph_password: String,
    pub redis_url: String,
    pub embedding_dimension: usize,
    pub max_connections: u32,
}

/// Handle over the three backends the REM model spans: Postgres rows and
/// vectors, the bolt graph, and the Redis KV namespace. Cheap to clone.
#[derive(Clone)]
pub struct RemStore {
    pub(crate) pool: PgPool,
    pub graph: GraphStore,
    pub kv: KvStore,
    pub(crate) dimension: usize,
}

impl RemStore {
    pub async fn connect(cfg: &StoreConfig) -> Result<Self> {
        if cfg.embedding_dimension != SCHEMA_EMBEDDING_DIMENSION {
            return Err(StoreError::DimensionMismatch {
                expected: SCHEMA_EMBEDDING_DIMENSION,
                actual: cfg.embedding_dimension,
            });
        }

        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect(&cfg.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let graph = GraphStore::connect(&cfg.graph_uri, &cfg.graph_user, &cfg.graph_password).await?;
        let kv = KvStore::connect(&cfg.redis_url).await?;

        tracing::info!(
            embedding_dimension = cfg.embedding_dimension,
            "REM store connected"
        );

        Ok(Self {
            pool,
            graph,
            kv,
            dimension: cfg.embedding_dimension,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub(crate) fn ensure_tenant(tenant_id: &str) -> Result<()> {
        if tenant_id.is_empty() {
            return Err(StoreError::EmptyTenant);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_parse_roundtrip() {
        assert_eq!(TableKind::parse("resources").unwrap(), TableKind::Resources);
        assert_eq!(TableKind::parse("moments").unwrap(), TableKind::Moments);
        assert!(TableKind::parse("users; DROP TABLE resources").is_err());
    }

    #[test]
    fn embedding_tables_pair_with_main_tables() {
        assert_eq!(
            TableKind::Resources.embedding_table(),
            Some("resources_embeddings")
        );
        assert_eq!(TableKind::Tenants.embedding_table(), None);
    }
}
