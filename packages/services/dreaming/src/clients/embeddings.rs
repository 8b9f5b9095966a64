use reqwest::Client;
use serde::Deserialize;

use crate::models::{DreamingError, Result};

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

/// Embedding client for moment summaries. Dreaming runs on a schedule, so
/// a rate-limit here is just a failed run that retries later; no special
/// cooldown plumbing.
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
            .map_err(|e| DreamingError::Embeddings(format!("http client: {}", e)))?;
        Ok(Self { client, base_url, model })
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embed", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({ "texts": texts, "model": self.model });
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(DreamingError::Embeddings(format!("status={}", response.status())));
        }
        let parsed: EmbedResponse = response.json().await?;
        if parsed.vectors.len() != texts.len() {
            return Err(DreamingError::Embeddings(format!(
                "asked for {} vectors, got {}",
                texts.len(),
                parsed.vectors.len()
            )));
        }
        Ok(parsed.vectors)
    }
}
