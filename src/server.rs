//! Chat API HTTP server.
//!
//! Relays questions from the web chat UI to the [`ChatRelay`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Question → SQL → rows → reply |
//! | `POST` | `/hello` | Connectivity check, always `{"reply": "hello"}` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Requests that cannot be answered at all get a JSON error body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500). Model and query
//! failures are not errors; they come back as a `200` with a `note`.
//!
//! # CORS
//!
//! Only the origins in `[server].allowed_origins` may call the API from a
//! browser (by default the Vite dev server on port 5173).

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::chat::{AskError, AskRequest, AskResponse, ChatRelay};
use crate::config::Config;
use crate::db;
use crate::llm;
use crate::migrate;

#[derive(Clone)]
pub struct AppState {
    relay: Arc<ChatRelay>,
}

impl AppState {
    pub fn new(relay: ChatRelay) -> Self {
        Self {
            relay: Arc::new(relay),
        }
    }
}

/// Starts the chat API server on `[server].bind`. Runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::create_all(&pool).await?;
    let model = llm::create_model(&config.llm)?;
    match &model {
        Some(m) => tracing::info!(model = m.model_name(), "LLM enabled"),
        None => tracing::info!("LLM disabled; /ask answers with the offline reply"),
    }

    let state = AppState::new(ChatRelay::new(pool, model, config.llm.clone()));
    let app = router(state, &config.server.allowed_origins)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("Chat API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the route table with CORS restricted to `allowed_origins`.
pub fn router(state: AppState, allowed_origins: &[String]) -> anyhow::Result<Router> {
    let origins = allowed_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|_| anyhow::anyhow!("invalid server.allowed_origins entry: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(Router::new()
        .route("/ask", post(handle_ask))
        .route("/hello", post(handle_hello))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state))
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

/// Error type that converts into the JSON error contract.
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<AskError> for AppError {
    fn from(e: AskError) -> Self {
        match e {
            AskError::BadRequest(msg) => bad_request(msg),
            AskError::Internal(err) => {
                tracing::error!(error = %err, "ask failed");
                internal(format!("{:#}", err))
            }
        }
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_hello() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "reply": "hello" }))
}

async fn handle_ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;
    tracing::info!(
        session = req.session_id.as_deref().unwrap_or("-"),
        attachments = req.attachments.len(),
        "ask"
    );
    let resp = state.relay.ask(req).await?;
    Ok(Json(resp))
}
