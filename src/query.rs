//! Vector-store upload pipeline and the question-answering engine.
//!
//! [`build_query_engine`] chunks the session's documents, embeds the
//! chunks, and uploads them into a fresh per-session collection.
//! [`QueryEngine::answer`] embeds one question, retrieves the most similar
//! chunks, and synthesizes an answer with a chat-completion call. Engines
//! keep no conversation history: every question is answered independently.

use std::fmt::Write as _;
use std::time::Duration;
use uuid::Uuid;

use crate::chunk::chunk_documents;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::github::RepoRef;
use crate::models::{Document, ScoredChunk};
use crate::session::Credentials;
use crate::vector_store::{collection_name, VectorStore};

const SYSTEM_PROMPT: &str = "You are a code assistant answering questions about one GitHub \
repository. Each user message includes source file excerpts retrieved from that repository. \
Answer ONLY from the provided excerpts. If they do not contain the answer, say what was found \
and what is missing. Reference file paths when relevant.";

/// Chunk, embed, and upload the documents, then return an engine bound to
/// the resulting collection. Runs once per session.
pub async fn build_query_engine(
    config: &Config,
    credentials: &Credentials,
    repo: &RepoRef,
    session_id: Uuid,
    documents: &[Document],
) -> Result<QueryEngine> {
    let embeddings = EmbeddingClient::new(&config.embedding, &credentials.openai_api_key)?;
    let store = VectorStore::new(&config.vector_store, &credentials.vector_store_key)?;
    let collection = collection_name(&config.vector_store.collection_prefix, repo, session_id);

    let chunks = chunk_documents(documents, config.chunking.max_tokens);
    tracing::info!(
        repo = %repo,
        documents = documents.len(),
        chunks = chunks.len(),
        collection = %collection,
        "uploading to vector store"
    );

    store.recreate_collection(&collection, embeddings.dims()).await?;

    if !chunks.is_empty() {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embeddings.embed_all(&texts).await?;
        store.upsert_chunks(&collection, &chunks, &vectors).await?;
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.generation.timeout_secs))
        .build()?;

    Ok(QueryEngine {
        client,
        embeddings,
        store,
        collection,
        generation_api_base: config.generation.api_base.trim_end_matches('/').to_string(),
        generation_key: credentials.openai_api_key.clone(),
        model: config.generation.model.clone(),
        context_chunks: config.generation.context_chunks,
    })
}

/// Answers questions over one session's uploaded collection.
#[derive(Clone)]
pub struct QueryEngine {
    client: reqwest::Client,
    embeddings: EmbeddingClient,
    store: VectorStore,
    collection: String,
    generation_api_base: String,
    generation_key: String,
    model: String,
    context_chunks: usize,
}

impl QueryEngine {
    /// Retrieve context for `question` and synthesize an answer.
    pub async fn answer(&self, question: &str) -> Result<String> {
        let query_vector = self.embeddings.embed_query(question).await?;
        let hits = self
            .store
            .search(&self.collection, &query_vector, self.context_chunks)
            .await?;

        tracing::debug!(collection = %self.collection, hits = hits.len(), "retrieved context");

        let context = build_context_block(&hits);
        self.complete(&context, question).await
    }

    async fn complete(&self, context: &str, question: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.generation_api_base);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": format!("{context}---\nQuestion: {question}")},
            ],
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.generation_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Generation {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        let json: serde_json::Value = response.json().await?;
        json.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(|content| content.trim().to_string())
            .ok_or_else(|| Error::Generation {
                status: status.as_u16(),
                message: "malformed chat completion response".to_string(),
            })
    }
}

fn build_context_block(hits: &[ScoredChunk]) -> String {
    if hits.is_empty() {
        return "(No relevant content was retrieved for this question.)\n".to_string();
    }

    let mut block = String::from("Source files from the repository:\n\n");
    for hit in hits {
        let _ = write!(
            block,
            "--- {} (chunk {}) ---\n{}\n\n",
            hit.path, hit.chunk_index, hit.text
        );
    }
    block
}

/// Greedy word wrap at `width` columns, joining lines with `\n`.
///
/// Whitespace runs (including existing newlines) collapse to single
/// spaces; words longer than the width are left intact on their own line.
pub fn fill(text: &str, width: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut line_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if line_len == 0 {
            out.push_str(word);
            line_len = word_len;
        } else if line_len + 1 + word_len <= width {
            out.push(' ');
            out.push_str(word);
            line_len += 1 + word_len;
        } else {
            out.push('\n');
            out.push_str(word);
            line_len = word_len;
        }
    }

    out
}
