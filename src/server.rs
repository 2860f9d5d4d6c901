//! HTTP server and JSON API for the session UI.
//!
//! Serves the single-page UI at `/` and a session-scoped API under
//! `/api/sessions`. The workflow is strictly linear and gated by session
//! state: credentials, then a repository URL, then questions. Loading and
//! uploading happen inside the repository step and are cached per session,
//! so repeating the step never re-invokes the loader or the uploader.
//!
//! # Error contract
//!
//! All error responses use the body
//!
//! ```json
//! { "error": { "code": "invalid_url", "message": "Invalid GitHub URL. Please try again." } }
//! ```
//!
//! Gate and validation failures map to 400, unknown sessions to 404,
//! rejected re-submissions to 409, and upstream service failures to 502.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Error;
use crate::github::{RepoLoader, RepoRef};
use crate::models::DocumentMeta;
use crate::query::{build_query_engine, fill};
use crate::session::{Credentials, SessionPhase, SessionStore, SessionView};

const FAREWELL: &str = "Exiting, thanks for chatting!";

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            sessions: SessionStore::new(),
        }
    }
}

/// Bind the configured address and serve until terminated.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind = config.server.bind.clone();
    let state = AppState::new(config);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("repochat listening on http://{}", bind);
    serve(listener, state).await
}

/// Serve on an already-bound listener. Split out so tests can bind an
/// ephemeral port first.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(serve_index))
        .route("/health", get(handle_health))
        .route("/api/sessions", post(handle_create_session))
        .route("/api/sessions/{id}", get(handle_get_session))
        .route("/api/sessions/{id}", delete(handle_end_session))
        .route("/api/sessions/{id}/credentials", post(handle_credentials))
        .route("/api/sessions/{id}/repository", post(handle_repository))
        .route("/api/sessions/{id}/ask", post(handle_ask))
        .layer(cors)
        .with_state(state)
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::MissingCredential(_) => (StatusCode::BAD_REQUEST, "missing_credential"),
            Error::InvalidRepoUrl => (StatusCode::BAD_REQUEST, "invalid_url"),
            Error::NotReady { .. } => (StatusCode::BAD_REQUEST, "not_ready"),
            Error::AlreadySet { .. } => (StatusCode::CONFLICT, "already_set"),
            Error::SessionNotFound => (StatusCode::NOT_FOUND, "not_found"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            Error::Github { .. } | Error::BlobDecode { .. } => {
                (StatusCode::BAD_GATEWAY, "github_error")
            }
            Error::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_error"),
            Error::VectorStore { .. } => (StatusCode::BAD_GATEWAY, "vector_store_error"),
            Error::Generation { .. } => (StatusCode::BAD_GATEWAY, "generation_error"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "upstream_unreachable"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /api/sessions ============

#[derive(Serialize)]
struct CreateSessionResponse {
    id: Uuid,
    phase: SessionPhase,
}

async fn handle_create_session(State(state): State<AppState>) -> Json<CreateSessionResponse> {
    let id = state.sessions.create().await;
    tracing::info!(session = %id, "session created");
    Json(CreateSessionResponse {
        id,
        phase: SessionPhase::AwaitingCredentials,
    })
}

// ============ GET /api/sessions/{id} ============

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.sessions.view(id).await?))
}

// ============ DELETE /api/sessions/{id} ============

async fn handle_end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.sessions.end(id).await?;
    tracing::info!(session = %id, "session ended");
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /api/sessions/{id}/credentials ============

#[derive(Deserialize)]
struct CredentialsRequest {
    #[serde(default)]
    github_token: String,
    #[serde(default)]
    vector_store_key: String,
    #[serde(default)]
    openai_api_key: String,
}

#[derive(Serialize)]
struct PhaseResponse {
    phase: SessionPhase,
}

async fn handle_credentials(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<PhaseResponse>, AppError> {
    let credentials = Credentials {
        github_token: req.github_token,
        vector_store_key: req.vector_store_key,
        openai_api_key: req.openai_api_key,
    };
    state.sessions.set_credentials(id, credentials).await?;
    let view = state.sessions.view(id).await?;
    Ok(Json(PhaseResponse { phase: view.phase }))
}

// ============ POST /api/sessions/{id}/repository ============

#[derive(Deserialize)]
struct RepositoryRequest {
    #[serde(default)]
    url: String,
}

#[derive(Serialize)]
struct RepositoryResponse {
    repository: String,
    document_count: usize,
    documents: Vec<DocumentMeta>,
    loaded_from_cache: bool,
    message: &'static str,
    phase: SessionPhase,
}

/// Parse and validate the URL, load documents (once per session), then
/// chunk/embed/upload and build the query engine (once per session).
async fn handle_repository(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RepositoryRequest>,
) -> Result<Json<RepositoryResponse>, AppError> {
    let repo = RepoRef::from_url(req.url.trim())?;
    let credentials = state.sessions.credentials(id).await?;
    state.sessions.bind_repository(id, repo.clone()).await?;

    let mut loaded_from_cache = true;
    if state.sessions.cached_documents(id).await?.is_none() {
        loaded_from_cache = false;
        tracing::info!(session = %id, repo = %repo, "loading repository");
        let loader = RepoLoader::new(&state.config.github, &credentials.github_token)?;
        let documents = loader.load(&repo).await?;
        state.sessions.store_documents(id, documents).await?;
    }

    let documents = state
        .sessions
        .cached_documents(id)
        .await?
        .ok_or(Error::NotReady {
            needed: "loaded documents",
        })?;

    let mut message = "Repository already loaded for this session.";
    if state.sessions.engine(id).await?.is_none() {
        let engine =
            build_query_engine(state.config.as_ref(), &credentials, &repo, id, &documents)
                .await?;
        state.sessions.store_engine(id, engine).await?;
        message = "Documents uploaded successfully!";
    }

    let view = state.sessions.view(id).await?;
    Ok(Json(RepositoryResponse {
        repository: repo.to_string(),
        document_count: documents.len(),
        documents: documents.iter().map(|doc| doc.meta()).collect(),
        loaded_from_cache,
        message,
        phase: view.phase,
    }))
}

// ============ POST /api/sessions/{id}/ask ============

#[derive(Deserialize)]
struct AskRequest {
    #[serde(default)]
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    question: String,
    answer: String,
    farewell: bool,
}

/// Answer one question. Each call issues an independent query; nothing is
/// cached between questions.
async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let engine = state
        .sessions
        .engine(id)
        .await?
        .ok_or(Error::NotReady {
            needed: "a loaded repository",
        })?;

    if question.eq_ignore_ascii_case("exit") {
        return Ok(Json(AskResponse {
            question,
            answer: FAREWELL.to_string(),
            farewell: true,
        }));
    }

    let raw = engine.answer(&question).await?;
    let answer = format!(
        "Answer: {}",
        fill(&raw, state.config.generation.answer_width)
    );

    Ok(Json(AskResponse {
        question,
        answer,
        farewell: false,
    }))
}
