//! HTTP chat server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a question (`{"text": …}` → `{"reply": …}`) |
//! | `GET`  | `/` | Liveness (`{"status": "ok"}`) |
//! | `GET`  | `/health` | Status, version, mode, model, and whether the pipeline is loaded |
//!
//! # Error Contract
//!
//! `POST /chat` answers `200` for every failure the service knows about,
//! with the failure carried in the body:
//!
//! ```json
//! { "reply": "Error: No search results found", "error": true }
//! ```
//!
//! Only a body that does not deserialize as `{"text": string}` is rejected
//! by the JSON extractor with a 4xx.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chat::ChatService;
use crate::config::Config;
use crate::models::{ChatRequest, Reply};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(chat: Arc<ChatService>) -> Self {
        Self { chat }
    }
}

/// Builds the application router. Used by [`run_server`] and by tests that
/// serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
///
/// In static mode the pipeline is built before the listener opens.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let chat = ChatService::start(config).await?;
    let app = router(AppState::new(Arc::new(chat)));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        mode = config.chat.mode.as_str(),
        "chat server listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ GET / ============

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

async fn handle_root() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// The crate version from `Cargo.toml`.
    version: &'static str,
    /// Active context strategy, `"search"` or `"static"`.
    mode: &'static str,
    model: String,
    pipeline_loaded: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        mode: state.chat.context().name(),
        model: state.chat.pipeline().model().to_string(),
        pipeline_loaded: state.chat.pipeline().is_loaded(),
    })
}

// ============ POST /chat ============

/// Handler for `POST /chat`. Never fails once the body has parsed.
async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Json<Reply> {
    Json(state.chat.reply(&request.text).await)
}
