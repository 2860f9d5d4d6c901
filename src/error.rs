//! Stage-scoped error type.
//!
//! Every stage of the workflow (credential gate, URL parsing, repository
//! loading, embedding, vector-store upload, answer generation) reports
//! failures through its own variant, so the UI can show a scoped message
//! instead of a raw upstream failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A credential was blank or absent. Carries the credential's display
    /// name so the UI reports exactly which one is missing.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    /// The repository URL did not match `https://github.com/<owner>/<repo>`.
    #[error("Invalid GitHub URL. Please try again.")]
    InvalidRepoUrl,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("session not found")]
    SessionNotFound,

    /// A gated step was requested before its prerequisite state existed.
    #[error("{needed} required before this step")]
    NotReady { needed: &'static str },

    /// A session field that cannot be changed was submitted again.
    #[error("{what} already set for this session; start a new session to change it")]
    AlreadySet { what: &'static str },

    #[error("GitHub API error {status}: {message}")]
    Github { status: u16, message: String },

    #[error("failed to decode blob content for {path}: {source}")]
    BlobDecode {
        path: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector store error {status}: {message}")]
    VectorStore { status: u16, message: String },

    #[error("generation error {status}: {message}")]
    Generation { status: u16, message: String },

    /// Transport-level failure talking to an external service.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
