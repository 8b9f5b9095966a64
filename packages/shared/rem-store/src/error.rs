use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tenant_id must not be empty")]
    EmptyTenant,

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("column not allowed: {table}.{column}")]
    ColumnNotAllowed { table: String, column: String },

    #[error("embedding dimension mismatch: got {actual}, schema expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid moment: {0}")]
    InvalidMoment(String),

    #[error("kv revision conflict on {0}")]
    KvConflict(String),

    #[error("entity not found: {table}/{id}")]
    NotFound { table: String, id: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("graph error: {0}")]
    Graph(#[from] neo4rs::Error),

    #[error("graph decode error: {0}")]
    GraphDecode(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
