pub mod embeddings;
pub mod llm;

pub use embeddings::EmbeddingsServiceClient;
pub use llm::LlmClient;
