//! Per-session state: credentials, repository binding, cached documents,
//! and the query engine.
//!
//! The workflow is strictly gated: each step requires the state its
//! predecessors produced, and no field can be changed once set; the user
//! starts a new session instead. Expensive results (documents, engine)
//! are written back only if still absent, so repeat interactions reuse
//! the cache.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::github::RepoRef;
use crate::models::{Document, DocumentMeta};
use crate::query::QueryEngine;

pub const GITHUB_TOKEN: &str = "GitHub token";
pub const VECTOR_STORE_KEY: &str = "vector store API key";
pub const OPENAI_API_KEY: &str = "OpenAI API key";

/// The three secrets collected by the credential gate. Held only in the
/// session entry; never serialized back to clients, never logged.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub github_token: String,
    pub vector_store_key: String,
    pub openai_api_key: String,
}

impl Credentials {
    /// Reject blank credentials, naming exactly which one is missing.
    /// Checked in form order; the first missing one is reported.
    pub fn validate(&self) -> Result<()> {
        if self.github_token.trim().is_empty() {
            return Err(Error::MissingCredential(GITHUB_TOKEN));
        }
        if self.vector_store_key.trim().is_empty() {
            return Err(Error::MissingCredential(VECTOR_STORE_KEY));
        }
        if self.openai_api_key.trim().is_empty() {
            return Err(Error::MissingCredential(OPENAI_API_KEY));
        }
        Ok(())
    }
}

/// Where a session stands in the linear workflow, derived from which
/// fields are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingCredentials,
    AwaitingRepository,
    LoadingDocuments,
    UploadingVectorStore,
    AwaitingQuestion,
}

struct Session {
    created_at: DateTime<Utc>,
    credentials: Option<Credentials>,
    repo: Option<RepoRef>,
    documents: Option<Vec<Document>>,
    engine: Option<QueryEngine>,
}

impl Session {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            credentials: None,
            repo: None,
            documents: None,
            engine: None,
        }
    }

    fn phase(&self) -> SessionPhase {
        if self.credentials.is_none() {
            SessionPhase::AwaitingCredentials
        } else if self.repo.is_none() {
            SessionPhase::AwaitingRepository
        } else if self.documents.is_none() {
            SessionPhase::LoadingDocuments
        } else if self.engine.is_none() {
            SessionPhase::UploadingVectorStore
        } else {
            SessionPhase::AwaitingQuestion
        }
    }
}

/// Snapshot of a session for the UI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub repository: Option<String>,
    pub documents: Option<Vec<DocumentMeta>>,
}

/// Process-wide session map. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.write().await.insert(id, Session::new());
        id
    }

    /// Remove the session and all its state.
    pub async fn end(&self, id: Uuid) -> Result<()> {
        self.inner
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::SessionNotFound)
    }

    pub async fn view(&self, id: Uuid) -> Result<SessionView> {
        let sessions = self.inner.read().await;
        let session = sessions.get(&id).ok_or(Error::SessionNotFound)?;
        Ok(SessionView {
            id,
            created_at: session.created_at,
            phase: session.phase(),
            repository: session.repo.as_ref().map(|repo| repo.to_string()),
            documents: session
                .documents
                .as_ref()
                .map(|docs| docs.iter().map(Document::meta).collect()),
        })
    }

    /// Credential gate. Validates the submitted values and stores them;
    /// a session that already holds credentials rejects the change.
    pub async fn set_credentials(&self, id: Uuid, credentials: Credentials) -> Result<()> {
        credentials.validate()?;
        let mut sessions = self.inner.write().await;
        let session = sessions.get_mut(&id).ok_or(Error::SessionNotFound)?;
        if session.credentials.is_some() {
            return Err(Error::AlreadySet {
                what: "credentials",
            });
        }
        session.credentials = Some(credentials);
        Ok(())
    }

    pub async fn credentials(&self, id: Uuid) -> Result<Credentials> {
        let sessions = self.inner.read().await;
        let session = sessions.get(&id).ok_or(Error::SessionNotFound)?;
        session.credentials.clone().ok_or(Error::NotReady {
            needed: "credentials",
        })
    }

    /// Bind the session to a repository. Re-submitting the same reference
    /// is a no-op; a different one is rejected.
    pub async fn bind_repository(&self, id: Uuid, repo: RepoRef) -> Result<()> {
        let mut sessions = self.inner.write().await;
        let session = sessions.get_mut(&id).ok_or(Error::SessionNotFound)?;
        if session.credentials.is_none() {
            return Err(Error::NotReady {
                needed: "credentials",
            });
        }
        match &session.repo {
            None => {
                session.repo = Some(repo);
                Ok(())
            }
            Some(existing) if *existing == repo => Ok(()),
            Some(_) => Err(Error::AlreadySet { what: "repository" }),
        }
    }

    pub async fn repository(&self, id: Uuid) -> Result<RepoRef> {
        let sessions = self.inner.read().await;
        let session = sessions.get(&id).ok_or(Error::SessionNotFound)?;
        session.repo.clone().ok_or(Error::NotReady {
            needed: "repository URL",
        })
    }

    pub async fn cached_documents(&self, id: Uuid) -> Result<Option<Vec<Document>>> {
        let sessions = self.inner.read().await;
        let session = sessions.get(&id).ok_or(Error::SessionNotFound)?;
        Ok(session.documents.clone())
    }

    /// Cache loaded documents. If a concurrent interaction already stored
    /// a set, the first one wins and this call is a no-op.
    pub async fn store_documents(&self, id: Uuid, documents: Vec<Document>) -> Result<()> {
        let mut sessions = self.inner.write().await;
        let session = sessions.get_mut(&id).ok_or(Error::SessionNotFound)?;
        if session.documents.is_none() {
            session.documents = Some(documents);
        }
        Ok(())
    }

    pub async fn engine(&self, id: Uuid) -> Result<Option<QueryEngine>> {
        let sessions = self.inner.read().await;
        let session = sessions.get(&id).ok_or(Error::SessionNotFound)?;
        Ok(session.engine.clone())
    }

    /// Cache the built engine; first writer wins, like documents.
    pub async fn store_engine(&self, id: Uuid, engine: QueryEngine) -> Result<()> {
        let mut sessions = self.inner.write().await;
        let session = sessions.get_mut(&id).ok_or(Error::SessionNotFound)?;
        if session.engine.is_none() {
            session.engine = Some(engine);
        }
        Ok(())
    }
}
