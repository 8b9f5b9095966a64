pub mod embeddings;
pub mod error;
pub mod executor;
pub mod ops;
pub mod plan;
pub mod trigram;

pub use embeddings::EmbeddingsClient;
pub use error::{ErrorBody, QueryError, Result};
pub use executor::QueryExecutor;
pub use plan::{
    FuzzyPlan, LookupPlan, QueryPlan, SearchPlan, SqlPlan, TraversePlan,
    DEFAULT_FUZZY_PER_TERM_CAP, DEFAULT_FUZZY_THRESHOLD, DEFAULT_SEARCH_LIMIT,
    DEFAULT_TRAVERSE_DEPTH, MAX_TRAVERSE_DEPTH,
};
