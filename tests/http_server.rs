//! End-to-end tests for the HTTP surface.
//!
//! Each test serves the real router on an ephemeral port and talks to it
//! with reqwest. Search and inference are either stubbed in-process or
//! mocked over HTTP with wiremock.

use anyhow::Result;
use async_trait::async_trait;
use chatbot::chat::ChatService;
use chatbot::config::load_config;
use chatbot::context::{ContextSource, SearchContext, StaticContext, MISSING_CONTEXT};
use chatbot::models::SearchHit;
use chatbot::pipeline::{Pipeline, PipelineHandle, PipelineInput, PipelineLoader, Task};
use chatbot::search::WebSearch;
use chatbot::server::{router, AppState};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ─── Stubs ──────────────────────────────────────────────────────────

struct StubSearch(Vec<SearchHit>);

#[async_trait]
impl WebSearch for StubSearch {
    async fn text(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        Ok(self.0.iter().take(max_results).cloned().collect())
    }
}

struct DownSearch;

#[async_trait]
impl WebSearch for DownSearch {
    async fn text(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
        anyhow::bail!("connection error")
    }
}

/// Pipeline replying with a fixed raw value and recording its inputs.
struct StubPipeline {
    task: Task,
    output: Value,
    seen: Mutex<Vec<PipelineInput>>,
}

#[async_trait]
impl Pipeline for StubPipeline {
    fn task(&self) -> Task {
        self.task
    }
    fn model_name(&self) -> &str {
        "stub"
    }
    async fn run(&self, input: &PipelineInput) -> Result<Value> {
        self.seen.lock().unwrap().push(input.clone());
        Ok(self.output.clone())
    }
}

struct StubLoader {
    pipeline: Arc<StubPipeline>,
    loads: AtomicUsize,
}

#[async_trait]
impl PipelineLoader for StubLoader {
    async fn load(&self, _task: Task, _model: &str) -> Result<Arc<dyn Pipeline>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(self.pipeline.clone())
    }
}

struct Harness {
    base: String,
    pipeline: Arc<StubPipeline>,
    loader: Arc<StubLoader>,
    client: reqwest::Client,
}

async fn serve(chat: ChatService) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(Arc::new(chat)));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn start(context: ContextSource, task: Task, output: Value) -> Harness {
    let pipeline = Arc::new(StubPipeline {
        task,
        output,
        seen: Mutex::new(Vec::new()),
    });
    let loader = Arc::new(StubLoader {
        pipeline: pipeline.clone(),
        loads: AtomicUsize::new(0),
    });
    let handle = PipelineHandle::new(task, "stub-model", loader.clone());
    let base = serve(ChatService::new(context, handle)).await;

    Harness {
        base,
        pipeline,
        loader,
        client: reqwest::Client::new(),
    }
}

impl Harness {
    async fn chat(&self, text: &str) -> Value {
        let resp = self
            .client
            .post(format!("{}/chat", self.base))
            .json(&json!({ "text": text }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }
}

fn search_context(search: impl WebSearch + 'static) -> ContextSource {
    ContextSource::Search(SearchContext::new(Arc::new(search), "UFC", 3))
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_root_is_liveness() {
    let h = start(search_context(StubSearch(vec![])), Task::Summarization, Value::Null).await;
    let body: Value = h
        .client
        .get(format!("{}/", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_search_summary_reply() {
    let h = start(
        search_context(StubSearch(vec![SearchHit::with_body(
            "Jon Jones is widely considered the UFC GOAT",
        )])),
        Task::Summarization,
        json!([{ "summary_text": "Jon Jones is widely considered the UFC GOAT" }]),
    )
    .await;

    let body = h.chat("Who is the UFC GOAT?").await;
    assert!(body["reply"].as_str().unwrap().contains("Jon Jones"));
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_search_failure_is_flagged_reply() {
    let h = start(search_context(DownSearch), Task::Summarization, Value::Null).await;

    let body = h.chat("Who is the UFC GOAT?").await;
    assert_eq!(body["error"], json!(true));
    let reply = body["reply"].as_str().unwrap();
    assert!(reply.starts_with("Error: "));
    assert!(reply.contains("connection error"));
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_results_is_flagged_reply() {
    let h = start(
        search_context(StubSearch(vec![SearchHit::default()])),
        Task::Summarization,
        Value::Null,
    )
    .await;

    let body = h.chat("anything").await;
    assert_eq!(
        body,
        json!({ "reply": "Error: No search results found", "error": true })
    );
    assert!(h.pipeline.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_static_file_answer() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("context.txt");
    std::fs::write(&file, "Jon Jones is widely considered the GOAT").unwrap();

    let h = start(
        ContextSource::Static(StaticContext::load(&file)),
        Task::QuestionAnswering,
        json!({ "answer": "Jon Jones is widely considered the GOAT", "score": 0.98, "start": 0, "end": 39 }),
    )
    .await;

    let body = h.chat("Who is the GOAT?").await;
    assert_eq!(
        body,
        json!({ "reply": "Jon Jones is widely considered the GOAT" })
    );
}

#[tokio::test]
async fn test_static_missing_file_uses_placeholder() {
    let tmp = TempDir::new().unwrap();
    let h = start(
        ContextSource::Static(StaticContext::load(&tmp.path().join("absent.txt"))),
        Task::QuestionAnswering,
        json!({ "answer": "missing context", "score": 0.1 }),
    )
    .await;

    let body = h.chat("Who is the GOAT?").await;
    assert!(body.get("error").is_none());
    assert_eq!(
        h.pipeline.seen.lock().unwrap().clone(),
        vec![PipelineInput::answer("Who is the GOAT?", MISSING_CONTEXT)]
    );
}

#[tokio::test]
async fn test_concurrent_requests_build_pipeline_once() {
    let h = Arc::new(
        start(
            ContextSource::Static(StaticContext::new("ctx")),
            Task::QuestionAnswering,
            json!({ "answer": "same", "score": 0.5 }),
        )
        .await,
    );

    let mut tasks = Vec::new();
    for i in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move { h.chat(&format!("q{}", i)).await }));
    }
    for t in tasks {
        assert_eq!(t.await.unwrap(), json!({ "reply": "same" }));
    }
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_health_reports_pipeline_state() {
    let h = start(
        ContextSource::Static(StaticContext::new("ctx")),
        Task::QuestionAnswering,
        json!({ "answer": "a" }),
    )
    .await;
    let url = format!("{}/health", h.base);

    let before: Value = h.client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(before["mode"], "static");
    assert_eq!(before["model"], "stub-model");
    assert_eq!(before["pipeline_loaded"], json!(false));

    h.chat("q").await;
    let after: Value = h.client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(after["pipeline_loaded"], json!(true));
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let h = start(
        ContextSource::Static(StaticContext::new("ctx")),
        Task::QuestionAnswering,
        Value::Null,
    )
    .await;

    let resp = h
        .client
        .post(format!("{}/chat", h.base))
        .json(&json!({ "question": "no text field" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 0);
}

/// Full stack from config: DuckDuckGo and hosted inference both mocked.
#[tokio::test]
async fn test_configured_stack_against_mocked_backends() {
    let backend = MockServer::start().await;

    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("chatbot.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"[search]
base_url = "{uri}"

[pipeline]
model = "facebook/bart-large-cnn"
endpoint = "{uri}/models"
hub_url = "{uri}"
"#,
            uri = backend.uri()
        ),
    )
    .unwrap();
    let config = load_config(&config_path).unwrap();
    // MODEL_NAME from the environment takes precedence; mock whichever wins.
    let model = config.chat_model().unwrap();

    Mock::given(method("GET"))
        .and(path("/html/"))
        .and(query_param("q", "UFC Who is the GOAT?"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<div class="result"><a class="result__a" href="https://example.com">Jon Jones</a>
               <a class="result__snippet">Jon Jones is widely considered the UFC GOAT</a></div>"#,
        ))
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/models/{}", model)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "pipeline_tag": "summarization" })),
        )
        .expect(1)
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/models/{}", model)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "summary_text": "Jon Jones is the UFC GOAT." }])),
        )
        .mount(&backend)
        .await;

    let base = serve(ChatService::start(&config).await.unwrap()).await;
    let client = reqwest::Client::new();
    for _ in 0..2 {
        let body: Value = client
            .post(format!("{}/chat", base))
            .json(&json!({ "text": "Who is the GOAT?" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({ "reply": "Jon Jones is the UFC GOAT." }));
    }
}
