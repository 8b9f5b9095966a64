use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("embedding dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("embedding service rate limited")]
    RateLimited,

    #[error("store error: {0}")]
    Store(#[from] rem_store::StoreError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, QueryError>;

impl QueryError {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::InvalidPlan(_) => "invalid_plan",
            QueryError::DimensionMismatch(_) => "dimension_mismatch",
            QueryError::Embedding(_) => "embedding",
            QueryError::RateLimited => "rate_limited",
            QueryError::Store(_) => "store",
            QueryError::Http(_) => "http",
            QueryError::Serialization(_) => "serialization",
            QueryError::Internal(_) => "internal",
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            QueryError::RateLimited | QueryError::Http(_) => true,
            QueryError::Store(rem_store::StoreError::Database(_)) => true,
            QueryError::Store(rem_store::StoreError::Redis(_)) => true,
            QueryError::Store(rem_store::StoreError::Graph(_)) => true,
            _ => false,
        }
    }

    /// Wire shape handed to callers: one typed error, never partial results.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.retryable(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_taxonomy() {
        assert!(QueryError::RateLimited.retryable());
        assert!(!QueryError::InvalidPlan("x".into()).retryable());
        assert!(!QueryError::DimensionMismatch("x".into()).retryable());
    }

    #[test]
    fn body_carries_kind_and_flag() {
        let body = QueryError::RateLimited.body();
        assert_eq!(body.kind, "rate_limited");
        assert!(body.retryable);
    }
}
