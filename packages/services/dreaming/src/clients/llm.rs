use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{DreamingError, Result};

/// Client for the language-model service used in structured extraction.
/// Prompts declare their output schema; the client enforces conformance by
/// deserializing into the expected type and retries a bounded number of
/// times on parse failure before giving up on the input.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    parse_retry_cap: u32,
}

impl LlmClient {
    pub fn new(base_url: String, model: String, timeout_ms: u64, parse_retry_cap: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| DreamingError::Llm(format!("http client: {}", e)))?;
        Ok(Self { client, base_url, model, parse_retry_cap })
    }

    async fn generate(&self, prompt: &str, schema: &Value) -> Result<Value> {
        let url = format!("{}/generate", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "output_schema": schema,
        });
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DreamingError::Llm(format!("status={} body={}", status, text)));
        }
        let envelope: Value = response.json().await?;
        envelope
            .get("output")
            .cloned()
            .ok_or_else(|| DreamingError::Llm("response missing output field".into()))
    }

    /// Structured extraction with schema retry. Each retry restates the
    /// parse error to the model so it can correct itself.
    pub async fn extract<T: DeserializeOwned>(&self, prompt: &str, schema: &Value) -> Result<T> {
        let mut last_error = String::new();
        for attempt in 0..=self.parse_retry_cap {
            let effective_prompt = if attempt == 0 {
                prompt.to_string()
            } else {
                format!(
                    "{}\n\nYour previous output did not match the schema ({}). \
                     Reply with valid JSON matching the schema exactly.",
                    prompt, last_error
                )
            };
            let output = self.generate(&effective_prompt, schema).await?;
            match serde_json::from_value::<T>(output) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(attempt, error = %last_error, "Model output failed schema check");
                }
            }
        }
        Err(DreamingError::SchemaViolation(last_error))
    }
}
