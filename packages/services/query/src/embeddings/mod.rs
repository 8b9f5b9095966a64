use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{QueryError, Result};

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

/// Lightweight client for the embedding service, used to vectorize SEARCH
/// query text. The ingestion side has its own copy of this concern.
#[derive(Clone)]
pub struct EmbeddingsClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl EmbeddingsClient {
    pub fn new(base_url: String, model: String, timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| QueryError::Embedding(format!("http client: {}", e)))?;
        Ok(Self { http, base_url, model })
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embed", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({ "texts": [text], "model": self.model });

        let started = std::time::Instant::now();
        let response = self.http.post(&url).json(&body).send().await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(QueryError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(QueryError::Embedding(format!("status={}", response.status())));
        }

        let parsed: EmbedResponse = response.json().await?;
        let vector = parsed
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::Embedding("empty embed response".into()))?;

        tracing::debug!(
            dimension = vector.len(),
            took_ms = started.elapsed().as_millis() as u64,
            "Built query embedding"
        );
        Ok(vector)
    }
}
