//! Qdrant REST client: collection lifecycle, batched upsert, and
//! similarity search.
//!
//! Collections are created with overwrite semantics: any prior collection
//! at the same name is dropped before the new one is created. Collection
//! names are keyed by repository reference and session id, so sessions
//! never share remote state.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use crate::config::VectorStoreConfig;
use crate::error::{Error, Result};
use crate::github::RepoRef;
use crate::models::{Chunk, ScoredChunk};

/// Derive the collection name for one session's view of one repository.
///
/// Same session + repository always yields the same name; any other
/// combination yields a different one.
pub fn collection_name(prefix: &str, repo: &RepoRef, session_id: Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo.to_string().as_bytes());
    hasher.update(session_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", prefix, &digest[..12])
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Serialize)]
struct OptimizersConfig {
    indexing_threshold: usize,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    optimizers_config: Option<OptimizersConfig>,
}

#[derive(Serialize)]
struct PointPayload<'a> {
    path: &'a str,
    chunk_index: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct Point<'a> {
    id: Uuid,
    vector: &'a [f32],
    payload: PointPayload<'a>,
}

#[derive(Serialize)]
struct UpsertPoints<'a> {
    points: Vec<Point<'a>>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: Option<HitPayload>,
}

#[derive(Deserialize)]
struct HitPayload {
    #[serde(default)]
    path: String,
    #[serde(default)]
    chunk_index: i64,
    #[serde(default)]
    text: String,
}

#[derive(Clone)]
pub struct VectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    indexed_search: bool,
    upsert_batch: usize,
}

impl VectorStore {
    pub fn new(config: &VectorStoreConfig, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            indexed_search: config.indexed_search,
            upsert_batch: config.upsert_batch.max(1),
        })
    }

    /// Drop any existing collection at `name`, then create a fresh one
    /// sized for `dims`-dimensional cosine vectors. With `indexed_search`
    /// on, the indexing threshold is zeroed so the server builds its index
    /// immediately.
    pub async fn recreate_collection(&self, name: &str, dims: usize) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, name);

        let response = self.request(reqwest::Method::DELETE, &url).send().await?;
        // 404 just means there was nothing to overwrite.
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(error_from(response).await);
        }

        let body = CreateCollection {
            vectors: VectorParams {
                size: dims,
                distance: "Cosine",
            },
            optimizers_config: self
                .indexed_search
                .then_some(OptimizersConfig {
                    indexing_threshold: 0,
                }),
        };

        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        tracing::info!(collection = name, dims, "created vector store collection");
        Ok(())
    }

    /// Upsert chunks with their vectors, in batches. `chunks` and
    /// `vectors` must be parallel slices.
    pub async fn upsert_chunks(
        &self,
        name: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(Error::VectorStore {
                status: 0,
                message: format!(
                    "{} chunks but {} vectors to upsert",
                    chunks.len(),
                    vectors.len()
                ),
            });
        }

        let url = format!("{}/collections/{}/points?wait=true", self.base_url, name);
        let paired: Vec<(&Chunk, &Vec<f32>)> = chunks.iter().zip(vectors.iter()).collect();

        for batch in paired.chunks(self.upsert_batch) {
            let body = UpsertPoints {
                points: batch
                    .iter()
                    .map(|(chunk, vector)| Point {
                        id: Uuid::new_v4(),
                        vector: vector.as_slice(),
                        payload: PointPayload {
                            path: &chunk.path,
                            chunk_index: chunk.chunk_index,
                            text: &chunk.text,
                        },
                    })
                    .collect(),
            };

            let response = self
                .request(reqwest::Method::PUT, &url)
                .json(&body)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(error_from(response).await);
            }
        }

        tracing::info!(collection = name, points = chunks.len(), "upserted embeddings");
        Ok(())
    }

    /// Nearest-neighbor search over a collection, payloads included.
    pub async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let url = format!("{}/collections/{}/points/search", self.base_url, name);
        let body = SearchRequest {
            vector,
            limit,
            with_payload: true,
        };

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed
            .result
            .into_iter()
            .filter_map(|hit| {
                hit.payload.map(|payload| ScoredChunk {
                    path: payload.path,
                    chunk_index: payload.chunk_index,
                    text: payload.text,
                    score: hit.score,
                })
            })
            .collect())
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if !self.api_key.is_empty() {
            builder = builder.header("api-key", &self.api_key);
        }
        builder
    }
}

async fn error_from(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Error::VectorStore {
        status,
        message: message.trim().to_string(),
    }
}
