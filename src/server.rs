//! HTTP query API.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `POST` | `/api/chat` | bearer | `{answer, sources}` in one response |
//! | `POST` | `/api/stream` | bearer | `text/event-stream`: `delta`* then `sources`, or a trailing `error` |
//! | `GET`  | `/health` | none | Health check (crate version and served docs versions) |
//!
//! The bearer check runs as route middleware, before the body is parsed
//! and before any embedding or retrieval work.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `upstream_error` (502), `internal` (500).

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::auth::TokenGate;
use crate::chat::{ChatEngine, ChatEvent, ChatRequest, ChatResponse};
use crate::config::{Config, ServerConfig};
use crate::db;
use crate::embedding::{create_embedder, EmbeddingClient};
use crate::generation::create_generator;
use crate::error::{AuthError, ChatError, EmbeddingError};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub gate: Arc<TokenGate>,
}

/// Build the router with CORS from `server.cors_origins`.
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let api = Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/stream", post(handle_stream))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .merge(api)
        .route("/health", get(handle_health))
        .layer(cors_layer(&server.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(list))
}

/// Open the store, wire up providers, and serve until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = db::open_store(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    let embeddings = Arc::new(EmbeddingClient::new(embedder, &config.embedding));
    let generator = create_generator(&config.generation)?;
    let engine = Arc::new(ChatEngine::new(config, store, embeddings, generator)?);

    let gate = TokenGate::new(config.server.token_allow_list());
    if gate.is_empty() {
        tracing::warn!("no bearer tokens configured; every /api request will be rejected");
    }
    let state = AppState {
        engine,
        gate: Arc::new(gate),
    };
    let app = build_router(state, &config.server);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("docs-expert listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
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
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

impl From<AuthError> for AppError {
    fn from(_: AuthError) -> Self {
        app_error(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid API token")
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Auth(e) => e.into(),
            ChatError::Validation(e) => app_error(StatusCode::BAD_REQUEST, "bad_request", e.to_string()),
            ChatError::NotFound => app_error(
                StatusCode::NOT_FOUND,
                "not_found",
                "No relevant documentation found",
            ),
            ChatError::Embedding(EmbeddingError::Disabled) => app_error(
                StatusCode::BAD_REQUEST,
                "embeddings_disabled",
                "embedding provider is disabled",
            ),
            ChatError::Embedding(e) => {
                app_error(StatusCode::BAD_GATEWAY, "upstream_error", e.to_string())
            }
            ChatError::Generation(e) => {
                app_error(StatusCode::BAD_GATEWAY, "upstream_error", e.to_string())
            }
            ChatError::Store(e) => {
                tracing::error!(error = %e, "store failure");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
            }
        }
    }
}

// ============ Auth middleware ============

async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = state.gate.check(header) {
        tracing::debug!(reason = %e, path = %request.uri().path(), "rejected request");
        return Err(e.into());
    }
    Ok(next.run(request).await)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    /// Documentation versions this server answers for.
    docs_versions: Vec<String>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        docs_versions: state.engine.versions().iter().map(|v| v.to_string()).collect(),
    })
}

// ============ POST /api/chat ============

async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = body.map_err(|e| app_error(StatusCode::BAD_REQUEST, "bad_request", e.body_text()))?;
    let response = state.engine.chat(&request).await?;
    Ok(Json(response))
}

// ============ POST /api/stream ============

async fn handle_stream(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(request) = body.map_err(|e| app_error(StatusCode::BAD_REQUEST, "bad_request", e.body_text()))?;
    let events = state.engine.stream_chat(&request).await?;
    let sse = events.map(|event| Ok::<_, Infallible>(to_sse_event(event)));
    Ok(Sse::new(sse).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: ChatEvent) -> Event {
    match event {
        ChatEvent::Delta(text) => Event::default().event("delta").data(text.replace('\r', "")),
        ChatEvent::Sources(sources) => Event::default()
            .event("sources")
            .json_data(&sources)
            .unwrap_or_else(|_| Event::default().event("sources").data("[]")),
        ChatEvent::Error(e) => Event::default()
            .event("error")
            .json_data(serde_json::json!({ "message": e.to_string() }))
            .unwrap_or_else(|_| Event::default().event("error").data("generation failed")),
    }
}
