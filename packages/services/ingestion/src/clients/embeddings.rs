use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::models::{IngestionError, Result};

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
    #[serde(default)]
    dimension: Option<usize>,
}

/// Client for the embedding service's single capability:
/// embed(texts, model) -> vectors. HTTP 429 maps to a retryable
/// rate-limit signal; everything else non-2xx is fatal for the task.
#[derive(Clone)]
pub struct EmbeddingsServiceClient {
    client: Client,
    base_url: String,
    model: String,
}

impl EmbeddingsServiceClient {
    pub fn new(base_url: String, model: String, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| IngestionError::Configuration(format!("http client: {}", e)))?;
        Ok(Self { client, base_url, model })
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "texts": texts,
            "model": self.model,
        });
        let url = format!("{}/embed", self.base_url.trim_end_matches('/'));
        let response = self.client.post(&url).json(&body).send().await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(IngestionError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(IngestionError::Embeddings(format!(
                "status={} body={}",
                status, text
            )));
        }

        let parsed: EmbedResponse = response.json().await?;
        if parsed.vectors.len() != texts.len() {
            return Err(IngestionError::Embeddings(format!(
                "asked for {} vectors, got {}",
                texts.len(),
                parsed.vectors.len()
            )));
        }
        tracing::debug!(
            text_count = texts.len(),
            dimension = parsed.dimension.or_else(|| parsed.vectors.first().map(|v| v.len())),
            "Generated embeddings"
        );
        Ok(parsed.vectors)
    }

    /// One throwaway embed at startup to learn the provider's dimension.
    /// A disagreement with the schema dimension refuses to start.
    pub async fn probe_dimension(&self) -> Result<usize> {
        let vectors = self.embed(&["dimension probe".to_string()]).await?;
        vectors
            .first()
            .map(|v| v.len())
            .ok_or_else(|| IngestionError::Embeddings("probe returned no vector".into()))
    }
}
