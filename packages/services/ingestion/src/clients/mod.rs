pub mod embeddings;
pub mod object_store;

pub use embeddings::EmbeddingsServiceClient;
pub use object_store::ObjectStoreClient;
