//! Embedding client for the OpenAI embeddings API.
//!
//! Batches texts per request and retries transient failures (HTTP 429,
//! 5xx, network errors) with exponential backoff: 1s, 2s, 4s, 8s, 16s,
//! 32s (capped at 2^5). Other client errors fail immediately. The API key
//! is the session's generation credential, passed in explicitly.

use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed all texts, issuing one API call per `batch_size` texts.
    /// Returns one vector per input text, in input order.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.api_base);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let vectors = parse_embeddings_response(&json)?;
                        self.check_dims(&vectors)?;
                        return Ok(vectors);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let message =
                        format!("embeddings API error {}: {}", status, body_text.trim());

                    // Rate limited or server error: retry. Other 4xx: fail now.
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::Embedding(message));
                        continue;
                    }
                    return Err(Error::Embedding(message));
                }
                Err(e) => {
                    last_err = Some(Error::Http(e));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Embedding("embedding failed after retries".to_string())))
    }

    fn check_dims(&self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(vector) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(Error::Embedding(format!(
                "model returned {} dims, expected {}",
                vector.len(),
                self.dims
            )));
        }
        Ok(())
    }
}

/// Extract `data[].embedding` arrays, reordered by the `index` field so
/// output order matches input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Embedding("invalid response: missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());

    for item in data {
        let index = item.get("index").and_then(|i| i.as_u64()).unwrap_or(indexed.len() as u64);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::Embedding("invalid response: missing embedding".to_string()))?;
        let vector: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}
