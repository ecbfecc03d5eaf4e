use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use immo_core::coordinator::{
    Coordinator, CreateContent, DEFAULT_SECTIONS, EventStream, StreamEvent,
    validate_sections_count,
};
use immo_core::jobs::{JobHandle, JobQueue, TaskSubmitter, logged};
use immo_core::{ContentView, GenerationError, SceneView, SectionView};

/// Final SSE payload, sent after the last event of every stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DEFAULT_PAGE_SIZE: i64 = 20;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        let status = match &err {
            GenerationError::Validation(_) => StatusCode::BAD_REQUEST,
            GenerationError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GenerationError::NotFound(_) => StatusCode::NOT_FOUND,
            GenerationError::PreconditionFailed(_) => StatusCode::CONFLICT,
            GenerationError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            GenerationError::TransientProvider(_) => StatusCode::SERVICE_UNAVAILABLE,
            GenerationError::Provider(_) | GenerationError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(kind = err.kind(), error = %err, "request failed");
        }
        Self {
            status,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

// ---------------------------------------------------------------------------
// State and wire types
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    coordinator: Coordinator,
    jobs: Arc<dyn TaskSubmitter>,
}

impl AppState {
    pub fn new(coordinator: Coordinator, jobs: Arc<dyn TaskSubmitter>) -> Self {
        Self { coordinator, jobs }
    }

    fn submit<T, F>(&self, label: String, operation: F) -> JobHandle
    where
        F: Future<Output = immo_core::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.jobs.submit(label.clone(), logged(label, operation))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateContentBody {
    pub description: String,
    pub sections_count: Option<i32>,
    pub style: Option<String>,
    #[serde(default = "default_auto_process")]
    pub auto_process: bool,
}

fn default_auto_process() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct SectionsBody {
    pub count: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    #[serde(flatten)]
    pub content: ContentView,
    /// Background pipeline job, when one was started.
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub job_id: Uuid,
    pub job: String,
}

impl From<JobHandle> for AcceptedResponse {
    fn from(handle: JobHandle) -> Self {
        Self {
            job_id: handle.id,
            job: handle.label,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/content", post(create_content).get(list_contents))
        .route("/api/content/{id}", get(get_content).delete(delete_content))
        .route("/api/content/{id}/outline", post(submit_outline))
        .route("/api/content/{id}/outline/stream", get(stream_outline))
        .route(
            "/api/content/{id}/sections",
            post(submit_sections).get(list_sections),
        )
        .route("/api/content/{id}/sections/{n}", get(get_section))
        .route(
            "/api/content/{id}/sections/{n}/scenes",
            post(submit_scenes).get(list_scenes),
        )
        .route("/api/content/{id}/sections/{n}/scenes/{m}", get(get_scene))
        .route(
            "/api/content/{id}/sections/{n}/scenes/{m}/prose",
            post(submit_prose),
        )
        .route(
            "/api/content/{id}/sections/{n}/scenes/{m}/prose/stream",
            get(stream_prose),
        )
        .route("/api/content/{id}/finalize", post(finalize_content))
        .layer(cors)
        .with_state(state)
}

/// Any origin when none are configured, otherwise exactly the given ones.
pub fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    if allowed_origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }
    let origins = allowed_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin: {o}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(
    coordinator: Coordinator,
    allowed_origins: &[String],
    bind: &str,
    port: u16,
) -> Result<()> {
    let queue = JobQueue::new();
    let state = AppState::new(coordinator, Arc::new(queue.clone()));
    let app = build_router(state, cors_layer(allowed_origins)?);

    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {bind}:{port}"))?;
    tracing::info!("immo serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.shutdown().await;
    tracing::info!("immo serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "model": state.coordinator.model(),
    }))
}

async fn create_content(
    State(state): State<AppState>,
    Json(body): Json<CreateContentBody>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    let mut request = CreateContent::new(body.description)
        .with_sections_count(body.sections_count.unwrap_or(DEFAULT_SECTIONS));
    if let Some(style) = body.style {
        request = request.with_style(style);
    }
    let content = state.coordinator.create(request).await?;

    let job_id = body.auto_process.then(|| {
        let coordinator = state.coordinator.clone();
        let id = content.id;
        state
            .submit(format!("process content {id}"), async move {
                coordinator.process_content(id).await
            })
            .id
    });

    Ok((StatusCode::CREATED, Json(CreatedResponse { content, job_id })))
}

async fn list_contents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ContentView>>> {
    let views = state
        .coordinator
        .list_contents(
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(views))
}

async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ContentView>> {
    Ok(Json(state.coordinator.get_content(id).await?))
}

async fn delete_content(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.coordinator.delete_content(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_outline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    state.coordinator.get_content(id).await?;
    let coordinator = state.coordinator.clone();
    let handle = state.submit(format!("outline {id}"), async move {
        coordinator.generate_outline(id).await
    });
    Ok((StatusCode::ACCEPTED, Json(handle.into())))
}

async fn stream_outline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let events = state.coordinator.stream_outline(id).await?;
    Ok(sse_response(events))
}

async fn submit_sections(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<SectionsBody>>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    let count = body.and_then(|Json(b)| b.count);
    if let Some(count) = count {
        validate_sections_count(count)?;
    }
    state.coordinator.get_content(id).await?;
    let coordinator = state.coordinator.clone();
    let handle = state.submit(format!("sections {id}"), async move {
        coordinator.generate_sections(id, count).await
    });
    Ok((StatusCode::ACCEPTED, Json(handle.into())))
}

async fn list_sections(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<SectionView>>> {
    Ok(Json(state.coordinator.list_sections(id).await?))
}

async fn get_section(
    State(state): State<AppState>,
    Path((id, n)): Path<(Uuid, i32)>,
) -> ApiResult<Json<SectionView>> {
    Ok(Json(state.coordinator.get_section(id, n).await?))
}

async fn submit_scenes(
    State(state): State<AppState>,
    Path((id, n)): Path<(Uuid, i32)>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    state.coordinator.get_section(id, n).await?;
    let coordinator = state.coordinator.clone();
    let handle = state.submit(format!("scenes {id}/{n}"), async move {
        coordinator.generate_scenes_for_section(id, n).await
    });
    Ok((StatusCode::ACCEPTED, Json(handle.into())))
}

async fn list_scenes(
    State(state): State<AppState>,
    Path((id, n)): Path<(Uuid, i32)>,
) -> ApiResult<Json<Vec<SceneView>>> {
    Ok(Json(state.coordinator.list_scenes(id, n).await?))
}

async fn get_scene(
    State(state): State<AppState>,
    Path((id, n, m)): Path<(Uuid, i32, i32)>,
) -> ApiResult<Json<SceneView>> {
    Ok(Json(state.coordinator.get_scene(id, n, m).await?))
}

async fn submit_prose(
    State(state): State<AppState>,
    Path((id, n, m)): Path<(Uuid, i32, i32)>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    state.coordinator.get_scene(id, n, m).await?;
    let coordinator = state.coordinator.clone();
    let handle = state.submit(format!("prose {id}/{n}/{m}"), async move {
        coordinator.generate_prose_for_scene(id, n, m).await
    });
    Ok((StatusCode::ACCEPTED, Json(handle.into())))
}

async fn stream_prose(
    State(state): State<AppState>,
    Path((id, n, m)): Path<(Uuid, i32, i32)>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let events = state.coordinator.stream_prose(id, n, m).await?;
    Ok(sse_response(events))
}

async fn finalize_content(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ContentView>> {
    Ok(Json(state.coordinator.finalize_content(id).await?))
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

/// Deltas as plain `data:` events, the stored record as `event: done`,
/// failures as `event: error`, then the `[DONE]` sentinel.
fn sse_response<T>(events: EventStream<T>) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    let done = stream::once(async { Ok(Event::default().data(DONE_SENTINEL)) });
    let body = events.map(|item| Ok(to_event(item))).chain(done);
    Sse::new(body).keep_alive(KeepAlive::default())
}

fn to_event<T: Serialize>(item: immo_core::Result<StreamEvent<T>>) -> Event {
    match item {
        Ok(StreamEvent::Delta(text)) => Event::default().data(text.replace('\r', "")),
        Ok(StreamEvent::Done(record)) => match Event::default().event("done").json_data(&record) {
            Ok(event) => event,
            Err(e) => error_event(&format!("failed to encode record: {e}")),
        },
        Err(e) => {
            tracing::warn!(kind = e.kind(), error = %e, "generation stream failed");
            error_event(&e.to_string())
        }
    }
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(serde_json::json!({ "error": message }).to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
