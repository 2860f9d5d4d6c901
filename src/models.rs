//! Core data types shared by the loading, uploading, and query stages.

use serde::Serialize;

/// A source file fetched from the repository.
///
/// Owned by the session once loaded; read by the uploader.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path within the repository (e.g. `src/main.py`).
    pub path: String,
    /// Git blob SHA.
    pub sha: String,
    /// Blob size in bytes, as reported by the tree listing.
    pub size: u64,
    /// Decoded file content.
    pub content: String,
}

impl Document {
    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta {
            path: self.path.clone(),
            sha: self.sha.clone(),
            size: self.size,
        }
    }
}

/// Metadata view of a [`Document`], returned to the UI after loading.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentMeta {
    pub path: String,
    pub sha: String,
    pub size: u64,
}

/// A slice of a document's content, the unit of embedding and retrieval.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Path of the document this chunk came from.
    pub path: String,
    /// Position within the document, contiguous from 0.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of the chunk text.
    pub hash: String,
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub path: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f32,
}
