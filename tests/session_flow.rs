//! End-to-end session flow against a spawned server with mocked
//! GitHub, OpenAI, and Qdrant upstreams.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use repochat::config::Config;
use repochat::server::{serve, AppState};

const DIMS: usize = 3;

fn test_config(github: &MockServer, openai: &MockServer, qdrant: &MockServer) -> Config {
    let mut config = Config::default();
    config.github.api_base = github.uri();
    config.embedding.api_base = openai.uri();
    config.embedding.dims = DIMS;
    config.generation.api_base = openai.uri();
    config.vector_store.url = qdrant.uri();
    config
}

async fn spawn_app(config: Config) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, AppState::new(config)));
    format!("http://{}", addr)
}

/// Returns one embedding per input text, so batch size never matters.
struct EmbeddingsResponder;

impl Respond for EmbeddingsResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let count = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
        let data: Vec<Value> = (0..count)
            .map(|i| json!({"index": i, "embedding": [0.1, 0.2, 0.3]}))
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({"data": data}))
    }
}

async fn mount_blob(github: &MockServer, sha: &str, content: &str) {
    // GitHub wraps base64 blob bodies with line breaks; reproduce that.
    let encoded = BASE64.encode(content.as_bytes());
    let (head, tail) = encoded.split_at(encoded.len() / 2);
    let wrapped = format!("{}\n{}\n", head, tail);

    Mock::given(method("GET"))
        .and(path(format!("/repos/openai/gym/git/blobs/{}", sha)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": sha,
            "content": wrapped,
            "encoding": "base64",
        })))
        .mount(github)
        .await;
}

/// Tree listing with two matching blobs, one filtered binary, and a
/// directory entry. `tree_calls` pins how often the loader may fetch it.
async fn mount_github(github: &MockServer, tree_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/repos/openai/gym/git/trees/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "root",
            "tree": [
                {"path": "src", "type": "tree", "sha": "sha-dir"},
                {"path": "src/agent.py", "type": "blob", "sha": "sha-agent", "size": 24},
                {"path": "README.md", "type": "blob", "sha": "sha-readme", "size": 25},
                {"path": "assets/logo.png", "type": "blob", "sha": "sha-logo", "size": 10},
            ],
            "truncated": false,
        })))
        .expect(tree_calls)
        .named("tree listing")
        .mount(github)
        .await;

    mount_blob(github, "sha-readme", "Gym is a toolkit for RL.\n").await;
    mount_blob(github, "sha-agent", "def act():\n    return 0\n").await;
}

async fn mount_openai(openai: &MockServer, answer: &str, chat_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(EmbeddingsResponder)
        .mount(openai)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": answer}}],
        })))
        .expect(chat_calls)
        .named("chat completions")
        .mount(openai)
        .await;
}

async fn mount_qdrant(qdrant: &MockServer, hits: Value) {
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/collections/repochat-[0-9a-f]{12}$"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"status": {"error": "collection not found"}})),
        )
        .mount(qdrant)
        .await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/collections/repochat-[0-9a-f]{12}$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
        .mount(qdrant)
        .await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/collections/repochat-[0-9a-f]{12}/points$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"status": "acknowledged"}})))
        .mount(qdrant)
        .await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/collections/repochat-[0-9a-f]{12}/points/search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": hits})))
        .mount(qdrant)
        .await;
}

fn default_hits() -> Value {
    json!([
        {"id": "p1", "score": 0.91, "payload": {"path": "README.md", "chunk_index": 0, "text": "Gym is a toolkit for RL."}},
        {"id": "p2", "score": 0.52, "payload": {"path": "src/agent.py", "chunk_index": 0, "text": "def act():\n    return 0"}},
    ])
}

async fn create_ready_session(client: &reqwest::Client, base: &str) -> String {
    let session: Value = client
        .post(format!("{base}/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = session["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{base}/api/sessions/{id}/credentials"))
        .json(&json!({
            "github_token": "ghp_test",
            "vector_store_key": "qd_test",
            "openai_api_key": "sk_test",
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let resp = client
        .post(format!("{base}/api/sessions/{id}/repository"))
        .json(&json!({"url": "https://github.com/openai/gym"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "repository step failed");

    id
}

#[tokio::test]
async fn test_full_session_flow() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    let qdrant = MockServer::start().await;

    // The tree may be listed once per session; asking twice issues two
    // independent chat completions.
    mount_github(&github, 1).await;
    mount_openai(
        &openai,
        "This repository provides a reinforcement learning toolkit built around the Gym API.",
        2,
    )
    .await;
    mount_qdrant(&qdrant, default_hits()).await;

    let base = spawn_app(test_config(&github, &openai, &qdrant)).await;
    let client = reqwest::Client::new();

    let session: Value = client
        .post(format!("{base}/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = session["id"].as_str().unwrap();
    assert_eq!(session["phase"], "awaiting_credentials");

    // Credential gate
    let resp = client
        .post(format!("{base}/api/sessions/{id}/credentials"))
        .json(&json!({
            "github_token": "ghp_test",
            "vector_store_key": "qd_test",
            "openai_api_key": "sk_test",
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["phase"], "awaiting_repository");

    // Load + upload
    let resp = client
        .post(format!("{base}/api/sessions/{id}/repository"))
        .json(&json!({"url": "https://github.com/openai/gym"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["repository"], "openai/gym");
    assert_eq!(body["message"], "Documents uploaded successfully!");
    assert_eq!(body["document_count"], 2);
    assert_eq!(body["loaded_from_cache"], false);
    assert_eq!(body["phase"], "awaiting_question");
    // Sorted by path; the .png and the tree entry are filtered out.
    assert_eq!(body["documents"][0]["path"], "README.md");
    assert_eq!(body["documents"][1]["path"], "src/agent.py");

    // Repeating the step serves the cache: the tree mock's expect(1)
    // verifies the loader is not re-invoked.
    let resp = client
        .post(format!("{base}/api/sessions/{id}/repository"))
        .json(&json!({"url": "https://github.com/openai/gym"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["loaded_from_cache"], true);
    assert_eq!(body["message"], "Repository already loaded for this session.");

    // Asking the same question twice issues two independent queries
    // (chat mock expects exactly 2 calls).
    for _ in 0..2 {
        let resp = client
            .post(format!("{base}/api/sessions/{id}/ask"))
            .json(&json!({"question": "What does this repo do?"}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["farewell"], false);
        let answer = body["answer"].as_str().unwrap();
        assert!(answer.starts_with("Answer: "));
        assert!(answer.contains("reinforcement learning toolkit"));
    }

    // Session view reflects the cached state.
    let view: Value = client
        .get(format!("{base}/api/sessions/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["phase"], "awaiting_question");
    assert_eq!(view["repository"], "openai/gym");
    assert_eq!(view["documents"].as_array().unwrap().len(), 2);

    // Ending the session removes it.
    let resp = client
        .delete(format!("{base}/api/sessions/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);
    let resp = client
        .get(format!("{base}/api/sessions/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn test_long_answers_are_wrapped() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    let qdrant = MockServer::start().await;

    let long_answer = "The repository implements a reinforcement learning toolkit. ".repeat(6);
    mount_github(&github, 1).await;
    mount_openai(&openai, long_answer.trim(), 1).await;
    mount_qdrant(&qdrant, default_hits()).await;

    let base = spawn_app(test_config(&github, &openai, &qdrant)).await;
    let client = reqwest::Client::new();
    let id = create_ready_session(&client, &base).await;

    let resp = client
        .post(format!("{base}/api/sessions/{id}/ask"))
        .json(&json!({"question": "Summarize the repo"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let answer = body["answer"].as_str().unwrap();
    assert!(answer.starts_with("Answer: "));
    // Wrapped at 100 columns: every line after the prefixed first one
    // stays under the width.
    let lines: Vec<&str> = answer.lines().collect();
    assert!(lines.len() > 1, "long answer should wrap onto multiple lines");
    for line in &lines[1..] {
        assert!(line.chars().count() <= 100);
    }
}

#[tokio::test]
async fn test_exit_skips_the_query_engine() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    let qdrant = MockServer::start().await;

    mount_github(&github, 1).await;
    // expect(0): the farewell path must never reach chat completions.
    mount_openai(&openai, "unused", 0).await;
    mount_qdrant(&qdrant, default_hits()).await;

    let base = spawn_app(test_config(&github, &openai, &qdrant)).await;
    let client = reqwest::Client::new();
    let id = create_ready_session(&client, &base).await;

    for question in ["exit", "Exit", "EXIT"] {
        let resp = client
            .post(format!("{base}/api/sessions/{id}/ask"))
            .json(&json!({"question": question}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["farewell"], true);
        assert_eq!(body["answer"], "Exiting, thanks for chatting!");
    }
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    let qdrant = MockServer::start().await;

    let base = spawn_app(test_config(&github, &openai, &qdrant)).await;
    let client = reqwest::Client::new();

    let session: Value = client
        .post(format!("{base}/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = session["id"].as_str().unwrap();

    client
        .post(format!("{base}/api/sessions/{id}/credentials"))
        .json(&json!({
            "github_token": "ghp_test",
            "vector_store_key": "qd_test",
            "openai_api_key": "sk_test",
        }))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{base}/api/sessions/{id}/repository"))
        .json(&json!({"url": "ftp://github.com/openai/gym"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_url");
    assert_eq!(
        body["error"]["message"],
        "Invalid GitHub URL. Please try again."
    );
}

#[tokio::test]
async fn test_missing_credential_is_named() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    let qdrant = MockServer::start().await;

    let base = spawn_app(test_config(&github, &openai, &qdrant)).await;
    let client = reqwest::Client::new();

    let session: Value = client
        .post(format!("{base}/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = session["id"].as_str().unwrap();

    let resp = client
        .post(format!("{base}/api/sessions/{id}/credentials"))
        .json(&json!({
            "github_token": "",
            "vector_store_key": "qd_test",
            "openai_api_key": "sk_test",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "missing_credential");
    assert_eq!(body["error"]["message"], "missing credential: GitHub token");

    // The gate rejected the submission, so the session is still waiting.
    let view: Value = client
        .get(format!("{base}/api/sessions/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["phase"], "awaiting_credentials");
}

#[tokio::test]
async fn test_ask_is_gated_on_the_engine() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    let qdrant = MockServer::start().await;

    let base = spawn_app(test_config(&github, &openai, &qdrant)).await;
    let client = reqwest::Client::new();

    let session: Value = client
        .post(format!("{base}/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = session["id"].as_str().unwrap();

    let resp = client
        .post(format!("{base}/api/sessions/{id}/ask"))
        .json(&json!({"question": "anything"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_ready");
}

#[tokio::test]
async fn test_github_failure_surfaces_scoped_error() {
    let github = MockServer::start().await;
    let openai = MockServer::start().await;
    let qdrant = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/openai/gym/git/trees/main"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})),
        )
        .mount(&github)
        .await;

    let base = spawn_app(test_config(&github, &openai, &qdrant)).await;
    let client = reqwest::Client::new();

    let session: Value = client
        .post(format!("{base}/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = session["id"].as_str().unwrap();

    client
        .post(format!("{base}/api/sessions/{id}/credentials"))
        .json(&json!({
            "github_token": "ghp_test",
            "vector_store_key": "qd_test",
            "openai_api_key": "sk_test",
        }))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{base}/api/sessions/{id}/repository"))
        .json(&json!({"url": "https://github.com/openai/gym"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "github_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("404"));
}
