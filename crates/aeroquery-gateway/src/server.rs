//! Gateway server: `POST /chat`, `POST /chat/stream` (SSE), `GET
//! /sessions/{id}`, `DELETE /sessions/{id}`, `GET /health` (§6), wired to the
//! Agent Pipeline (§4.9).

use crate::auth::ResolvedAuth;
use aeroquery_agent::pipeline::{AgentPipeline, AgentPipelineConfig, ChatRequest, LocationSource};
use aeroquery_agent::session::{SessionKey, SessionManager, SessionManagerConfig};
use aeroquery_core::{Cache, CostLimits, CostTracker, GatewayConfig, HealthMonitor, InMemoryCache};
use aeroquery_llm::{CloudWithToolsProvider, CloudWithoutToolsProvider, LocalProvider, MockProvider, Provider};
use aeroquery_tools::create_default_registry;
use async_stream::stream;
use axum::{
    extract::{Multipart, Path as AxumPath, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Config beyond the bare `GatewayConfig` bind/auth settings: the pieces the
/// teacher's `ExtendedConfig` folds in (API key, model, cost caps) that have
/// no home in the wire-level `GatewayConfig` type.
pub struct ExtendedConfig {
    pub gateway: GatewayConfig,
    pub backend: String,
    pub anthropic_api_key: Option<String>,
    pub model: String,
    pub cost_limits: CostLimits,
    pub session_config: SessionManagerConfig,
    pub tool_max_retries: usize,
}

impl Default for ExtendedConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            backend: "mock".to_string(),
            anthropic_api_key: None,
            model: "mock-deterministic".to_string(),
            cost_limits: CostLimits::default(),
            session_config: SessionManagerConfig::default(),
            tool_max_retries: AgentPipelineConfig::default().tool_max_retries,
        }
    }
}

struct GatewayState {
    auth: ResolvedAuth,
    pipeline: AgentPipeline,
    sessions: Arc<SessionManager>,
    health: Arc<HealthMonitor>,
}

/// Resolves the LLM backend from `AEROQUERY_BACKEND` ∈ {anthropic-tools,
/// anthropic-no-tools, local, mock}, defaulting to `mock` so the gateway is
/// runnable with no credentials configured (§4.8).
fn build_provider(config: &ExtendedConfig) -> anyhow::Result<Arc<dyn Provider>> {
    match config.backend.as_str() {
        "anthropic-tools" => {
            let key = config
                .anthropic_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("AEROQUERY_ANTHROPIC_API_KEY not set"))?;
            Ok(Arc::new(CloudWithToolsProvider::new(key)))
        }
        "anthropic-no-tools" => {
            let key = config
                .anthropic_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("AEROQUERY_ANTHROPIC_API_KEY not set"))?;
            Ok(Arc::new(CloudWithoutToolsProvider::new(key)))
        }
        "local" => Ok(Arc::new(LocalProvider::new(vec![config.model.clone()]))),
        "mock" => Ok(Arc::new(MockProvider::new())),
        other => anyhow::bail!("unknown AEROQUERY_BACKEND: {other}"),
    }
}

pub async fn start_gateway(config: ExtendedConfig) -> anyhow::Result<()> {
    let env_token = std::env::var("AEROQUERY_GATEWAY_TOKEN").ok();
    let auth = ResolvedAuth::from_config(&config.gateway.auth, env_token);

    let tool_registry = Arc::new(create_default_registry());
    info!(tools = tool_registry.list().len(), "tool registry built");

    let provider = build_provider(&config)?;
    let sessions = Arc::new(SessionManager::new(config.session_config));
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
    let cost_tracker = Arc::new(CostTracker::new(config.cost_limits));
    let health = Arc::new(HealthMonitor::new(vec![]));

    let pipeline_config = AgentPipelineConfig {
        model: config.model.clone(),
        tool_max_retries: config.tool_max_retries,
        ..AgentPipelineConfig::default()
    };
    let pipeline = AgentPipeline::new(
        sessions.clone(),
        tool_registry,
        cache,
        cost_tracker,
        health.clone(),
        provider,
        pipeline_config,
    );

    let state = Arc::new(GatewayState { auth, pipeline, sessions, health });

    spawn_session_sweeper(state.sessions.clone());

    let app = Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/upload", post(chat_handler_multipart))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/sessions/:id", get(get_session_handler))
        .route("/sessions/:id", delete(delete_session_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state.clone());

    let bind_addr: SocketAddr =
        format!("{}:{}", config.gateway.bind.to_addr(), config.gateway.port).parse().expect("invalid bind address");

    info!("aeroquery gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  listening on: {bind_addr}");
    info!("  backend: {}", config.backend);
    info!("  model: {}", config.model);
    info!("  auth mode: {:?}", state.auth.mode);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Idle-TTL/LRU eviction (§4.6) on a fixed cadence, independent of any
/// per-request path.
fn spawn_session_sweeper(sessions: Arc<SessionManager>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            sessions.sweep().await;
        }
    });
}

fn check_auth(state: &GatewayState, token: Option<&str>) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    state.auth.verify_token(token).map_err(|err| {
        (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": err.user_message(), "code": err.code() })))
    })
}

#[derive(Debug, Deserialize)]
struct LocationDataWire {
    source: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    ip_address: Option<String>,
}

impl LocationDataWire {
    fn into_location_source(self) -> Option<LocationSource> {
        match self.source.as_str() {
            "gps" => Some(LocationSource::Gps { latitude: self.latitude?, longitude: self.longitude? }),
            "ip" => Some(LocationSource::Ip { ip_address: self.ip_address? }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
    session_id: String,
    style: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    max_tokens: Option<u32>,
    location_data: Option<LocationDataWire>,
}

fn build_chat_request(body: ChatBody) -> Result<ChatRequest, (StatusCode, Json<serde_json::Value>)> {
    if !aeroquery_core::is_valid_session_id(&body.session_id) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "session_id must match [A-Za-z0-9_-]{4,100}" })),
        ));
    }
    if body.message.len() > 500 * 1024 {
        return Err((StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "message exceeds 500KB" }))));
    }
    let mut request = ChatRequest::new(SessionKey::new(body.session_id), body.message);
    request.style = body.style;
    request.temperature = body.temperature;
    request.top_p = body.top_p;
    request.top_k = body.top_k;
    request.max_tokens = body.max_tokens;
    request.location_data = body.location_data.and_then(LocationDataWire::into_location_source);
    Ok(request)
}

async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<ChatBody>,
) -> impl IntoResponse {
    if let Err(resp) = check_auth(&state, bearer_token(&headers).as_deref()) {
        return resp.into_response();
    }
    let request = match build_chat_request(body) {
        Ok(r) => r,
        Err(resp) => return resp.into_response(),
    };
    let started = Instant::now();
    let response = state.pipeline.handle_turn(request).await;
    state.health.record_response_time("/chat", started.elapsed().as_millis() as u64);
    Json(response).into_response()
}

/// Multipart variant accepting `file` uploads alongside the chat fields (§6:
/// "optional multipart `file` uploads"). Files are attached to the session
/// before the turn runs so the pipeline's document-context step (§4.9 step
/// 11) can see them.
async fn chat_handler_multipart(State(state): State<Arc<GatewayState>>, mut multipart: Multipart) -> impl IntoResponse {
    let mut message = None;
    let mut session_id = None;
    let mut style = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name().unwrap_or_default() {
            "message" => message = field.text().await.ok(),
            "session_id" => session_id = field.text().await.ok(),
            "style" => style = field.text().await.ok(),
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                if let Ok(bytes) = field.bytes().await {
                    if let Some(sid) = session_id.clone() {
                        let doc = document_from_upload(filename, &bytes);
                        state.sessions.add_document(&SessionKey::new(sid), doc).await;
                    }
                }
            }
            _ => {}
        }
    }

    let (Some(message), Some(session_id)) = (message, session_id) else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "message and session_id are required" })))
            .into_response();
    };
    let mut request = ChatRequest::new(SessionKey::new(session_id), message);
    request.style = style;
    let response = state.pipeline.handle_turn(request).await;
    Json(response).into_response()
}

fn document_from_upload(filename: String, bytes: &[u8]) -> aeroquery_core::UploadedDocument {
    let file_type = if filename.ends_with(".csv") {
        aeroquery_core::DocumentType::Csv
    } else if filename.ends_with(".xlsx") {
        aeroquery_core::DocumentType::Xlsx
    } else {
        aeroquery_core::DocumentType::Pdf
    };
    let preview_len = 2000.min(bytes.len());
    let preview = String::from_utf8_lossy(&bytes[..preview_len]).to_string();
    aeroquery_core::UploadedDocument {
        filename,
        file_type,
        content_preview: preview,
        full_length: bytes.len(),
        truncated: bytes.len() > preview_len,
        metadata: Default::default(),
        uploaded_at: chrono::Utc::now(),
    }
}

/// SSE variant: `thought*` → `response` → `done`, or `error` → `done` on
/// failure (§6). The pipeline runs as a single call with no intermediate
/// "thought" events to forward, so this emits zero `thought` events and
/// exactly one `response` event before `done` — the documented cardinality
/// allows zero thoughts.
async fn chat_stream_handler(
    State(state): State<Arc<GatewayState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<ChatBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let auth_err = check_auth(&state, bearer_token(&headers).as_deref()).err();
    let request = auth_err.is_none().then(|| build_chat_request(body)).transpose();

    let stream = stream! {
        if let Some((_, Json(value))) = auth_err {
            yield Ok(json_event("error", value));
            yield Ok(Event::default().event("done").data(""));
            return;
        }
        let request = match request {
            Ok(Some(r)) => r,
            Ok(None) | Err(_) => {
                yield Ok(json_event("error", serde_json::json!({ "error": "invalid request" })));
                yield Ok(Event::default().event("done").data(""));
                return;
            }
        };
        let response = state.pipeline.handle_turn(request).await;
        let value = serde_json::to_value(&response)
            .unwrap_or_else(|err| serde_json::json!({ "error": err.to_string() }));
        let event_name = if value.get("error").is_some() { "error" } else { "response" };
        yield Ok(json_event(event_name, value));
        yield Ok(Event::default().event("done").data(""));
    };
    Sse::new(stream)
}

/// Builds an SSE event whose data is a JSON value, falling back to a plain
/// text event if the value somehow can't be framed (it always can for the
/// `serde_json::Value`s produced above).
fn json_event(name: &'static str, value: serde_json::Value) -> Event {
    Event::default().event(name).json_data(&value).unwrap_or_else(|_| Event::default().event(name).data(value.to_string()))
}

async fn get_session_handler(
    State(state): State<Arc<GatewayState>>,
    headers: axum::http::HeaderMap,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    if let Err(resp) = check_auth(&state, bearer_token(&headers).as_deref()) {
        return resp.into_response();
    }
    if !aeroquery_core::is_valid_session_id(&id) {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "invalid session id" }))).into_response();
    }
    match state.sessions.snapshot(&SessionKey::new(id)).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "session not found" }))).into_response(),
    }
}

async fn delete_session_handler(
    State(state): State<Arc<GatewayState>>,
    headers: axum::http::HeaderMap,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    if let Err(resp) = check_auth(&state, bearer_token(&headers).as_deref()) {
        return resp.into_response();
    }
    state.sessions.purge(&SessionKey::new(id));
    StatusCode::NO_CONTENT.into_response()
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let report = state.health.check_health(true);
    Json(serde_json::json!({
        "status": report.status,
        "uptime_secs": report.uptime_secs,
        "components": report.components,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.list().len(),
    }))
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").map(|t| t.to_string()))
}
