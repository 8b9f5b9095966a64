pub mod error;
pub mod models;
pub mod resolver;
pub mod store;

pub use error::{Result, StoreError};
pub use models::*;
pub use resolver::{name_prefix, reverse_key, DeviceAuthStatus, EntityResolver};
pub use store::{
    Filter, FilterOp, GraphNodeRef, GraphStore, KvStore, Metric, NeighborEdge, OrderBy, RemStore,
    StoreConfig, TableKind, VectorHit, SCHEMA_EMBEDDING_DIMENSION,
};
