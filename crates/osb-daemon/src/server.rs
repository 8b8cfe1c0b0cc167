//! Public HTTP surface (`/v1`).
//!
//! Handlers are thin: validate request shape, call the backend, translate
//! sentinel errors. The same route set is mounted under `/internal/v1` for
//! the worker surface (see `worker.rs`), so every handler works against any
//! [`SandboxBackend`].

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::{future, stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use utoipa::{IntoParams, OpenApi};

use osb_engine::{
    types::{
        CommandDetail, CommandEnvelope, CommandListEnvelope, CreateSandbox,
        CreateSandboxResponse, ExecCommand, FileContent, FileListing, ImageDetail, ImageSummary,
        KillCommand, LifecycleResponse, LogSnapshot, PullImage, PullImageResponse,
        RenewExpiration, SandboxDetail, SandboxSummary, StatsSnapshot, WriteFile,
        WriteFileResponse,
    },
    SandboxBackend,
};

use crate::{
    auth,
    cluster::registry::WorkerRegistry,
    error::{ApiError, ErrorBody},
};

pub struct AppState {
    pub backend: Arc<dyn SandboxBackend>,
    pub api_key: Option<String>,
    pub worker_api_key: Option<String>,
    pub registry: Option<Arc<WorkerRegistry>>,
}

/// Public router: `/v1` with optional bearer authentication (health stays
/// open).
pub fn public_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/v1", api_routes())
        .layer(middleware::from_fn_with_state(state.clone(), public_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The operation routes, shared between the public and worker surfaces.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/sandboxes", get(list_sandboxes).post(create_sandbox))
        .route("/sandboxes/:id", get(get_sandbox).delete(delete_sandbox))
        .route("/sandboxes/:id/start", post(start_sandbox))
        .route("/sandboxes/:id/stop", post(stop_sandbox))
        .route("/sandboxes/:id/restart", post(restart_sandbox))
        .route("/sandboxes/:id/pause", post(pause_sandbox))
        .route("/sandboxes/:id/resume", post(resume_sandbox))
        .route("/sandboxes/:id/renew-expiration", post(renew_expiration))
        .route("/sandboxes/:id/stats", get(sandbox_stats))
        .route("/sandboxes/:id/cmd", get(list_commands).post(exec_command))
        .route("/sandboxes/:id/cmd/:cmd_id", get(get_command))
        .route("/sandboxes/:id/cmd/:cmd_id/kill", post(kill_command))
        .route("/sandboxes/:id/cmd/:cmd_id/logs", get(command_logs))
        .route(
            "/sandboxes/:id/files",
            get(read_file).put(write_file).delete(delete_file),
        )
        .route("/sandboxes/:id/files/list", get(list_files))
        .route("/images", get(list_images))
        .route("/images/pull", post(pull_image))
        .route("/images/:reference", get(get_image).delete(delete_image))
}

async fn public_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let Some(expected) = &state.api_key else {
        return next.run(req).await;
    };
    if req.uri().path() == "/v1/health" {
        return next.run(req).await;
    }
    match auth::require_bearer(req.headers(), expected) {
        Ok(()) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
struct WaitQuery {
    #[serde(default)]
    wait: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
struct StreamQuery {
    #[serde(default)]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
struct PathQuery {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
struct ForceQuery {
    #[serde(default)]
    force: Option<bool>,
}

fn require_path(query: PathQuery) -> Result<String, ApiError> {
    query
        .path
        .filter(|path| !path.is_empty())
        .ok_or_else(|| ApiError::bad_request("path query parameter is required"))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[utoipa::path(
    get,
    path = "/v1/health",
    responses(
        (status = 200, description = "Runtime reachable"),
        (status = 503, description = "Runtime unreachable", body = ErrorBody)
    )
)]
async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.backend.health().await {
        Ok(()) => Json(HealthResponse { status: "ok" }).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse { status: "unhealthy" }),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/sandboxes",
    responses((status = 200, description = "Sandbox summaries", body = [SandboxSummary]))
)]
async fn list_sandboxes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SandboxSummary>>, ApiError> {
    Ok(Json(state.backend.list_sandboxes().await?))
}

#[utoipa::path(
    post,
    path = "/v1/sandboxes",
    request_body = CreateSandbox,
    responses(
        (status = 201, description = "Sandbox created", body = CreateSandboxResponse),
        (status = 400, description = "Invalid request or image absent", body = ErrorBody),
        (status = 409, description = "Name already in use", body = ErrorBody)
    )
)]
async fn create_sandbox(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSandbox>,
) -> Result<(StatusCode, Json<CreateSandboxResponse>), ApiError> {
    let created = state.backend.create_sandbox(body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/v1/sandboxes/{id}",
    params(("id" = String, Path, description = "Sandbox identifier")),
    responses(
        (status = 200, description = "Sandbox detail", body = SandboxDetail),
        (status = 404, description = "Sandbox not found", body = ErrorBody)
    )
)]
async fn get_sandbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SandboxDetail>, ApiError> {
    Ok(Json(state.backend.inspect_sandbox(&id).await?))
}

#[utoipa::path(
    delete,
    path = "/v1/sandboxes/{id}",
    params(("id" = String, Path, description = "Sandbox identifier")),
    responses((status = 204, description = "Removed (idempotent)"))
)]
async fn delete_sandbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.backend.remove_sandbox(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/sandboxes/{id}/start",
    params(("id" = String, Path, description = "Sandbox identifier")),
    responses(
        (status = 200, description = "Started", body = LifecycleResponse),
        (status = 409, description = "Already running", body = ErrorBody)
    )
)]
async fn start_sandbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    Ok(Json(state.backend.start_sandbox(&id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/sandboxes/{id}/stop",
    params(("id" = String, Path, description = "Sandbox identifier")),
    responses(
        (status = 200, description = "Stopped", body = LifecycleResponse),
        (status = 409, description = "Already stopped", body = ErrorBody)
    )
)]
async fn stop_sandbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    Ok(Json(state.backend.stop_sandbox(&id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/sandboxes/{id}/restart",
    params(("id" = String, Path, description = "Sandbox identifier")),
    responses((status = 200, description = "Restarted", body = LifecycleResponse))
)]
async fn restart_sandbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    Ok(Json(state.backend.restart_sandbox(&id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/sandboxes/{id}/pause",
    params(("id" = String, Path, description = "Sandbox identifier")),
    responses(
        (status = 200, description = "Paused", body = LifecycleResponse),
        (status = 409, description = "Invalid transition", body = ErrorBody)
    )
)]
async fn pause_sandbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    Ok(Json(state.backend.pause_sandbox(&id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/sandboxes/{id}/resume",
    params(("id" = String, Path, description = "Sandbox identifier")),
    responses(
        (status = 200, description = "Resumed", body = LifecycleResponse),
        (status = 409, description = "Not paused", body = ErrorBody)
    )
)]
async fn resume_sandbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    Ok(Json(state.backend.resume_sandbox(&id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/sandboxes/{id}/renew-expiration",
    params(("id" = String, Path, description = "Sandbox identifier")),
    request_body = RenewExpiration,
    responses(
        (status = 200, description = "Timer replaced", body = LifecycleResponse),
        (status = 400, description = "Non-positive timeout", body = ErrorBody)
    )
)]
async fn renew_expiration(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RenewExpiration>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    Ok(Json(state.backend.renew_expiration(&id, body.timeout).await?))
}

#[utoipa::path(
    get,
    path = "/v1/sandboxes/{id}/stats",
    params(("id" = String, Path, description = "Sandbox identifier")),
    responses((status = 200, description = "Resource snapshot", body = StatsSnapshot))
)]
async fn sandbox_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatsSnapshot>, ApiError> {
    Ok(Json(state.backend.sandbox_stats(&id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/sandboxes/{id}/cmd",
    params(("id" = String, Path, description = "Sandbox identifier"), WaitQuery),
    request_body = ExecCommand,
    responses(
        (status = 200, description = "Command started (or ND-JSON when wait=true)", body = CommandEnvelope),
        (status = 409, description = "Sandbox not running", body = ErrorBody)
    )
)]
async fn exec_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<WaitQuery>,
    Json(body): Json<ExecCommand>,
) -> Result<Response, ApiError> {
    let detail = state.backend.exec_command(&id, body).await?;
    if query.wait.unwrap_or(false) {
        Ok(command_wait_response(state.backend.clone(), id, detail))
    } else {
        Ok(Json(CommandEnvelope { command: detail }).into_response())
    }
}

#[utoipa::path(
    get,
    path = "/v1/sandboxes/{id}/cmd",
    params(("id" = String, Path, description = "Sandbox identifier")),
    responses((status = 200, description = "Commands ordered by start time", body = CommandListEnvelope))
)]
async fn list_commands(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CommandListEnvelope>, ApiError> {
    let commands = state.backend.list_commands(&id).await?;
    Ok(Json(CommandListEnvelope { commands }))
}

#[utoipa::path(
    get,
    path = "/v1/sandboxes/{id}/cmd/{cmd_id}",
    params(
        ("id" = String, Path, description = "Sandbox identifier"),
        ("cmd_id" = String, Path, description = "Command identifier"),
        WaitQuery
    ),
    responses(
        (status = 200, description = "Command detail (or ND-JSON when wait=true)", body = CommandEnvelope),
        (status = 404, description = "Command not found", body = ErrorBody)
    )
)]
async fn get_command(
    State(state): State<Arc<AppState>>,
    Path((id, cmd_id)): Path<(String, String)>,
    Query(query): Query<WaitQuery>,
) -> Result<Response, ApiError> {
    let detail = state.backend.get_command(&id, &cmd_id).await?;
    if query.wait.unwrap_or(false) {
        Ok(command_wait_response(state.backend.clone(), id, detail))
    } else {
        Ok(Json(CommandEnvelope { command: detail }).into_response())
    }
}

#[utoipa::path(
    post,
    path = "/v1/sandboxes/{id}/cmd/{cmd_id}/kill",
    params(
        ("id" = String, Path, description = "Sandbox identifier"),
        ("cmd_id" = String, Path, description = "Command identifier")
    ),
    request_body = KillCommand,
    responses(
        (status = 200, description = "Signal delivered", body = CommandEnvelope),
        (status = 409, description = "Command already finished", body = ErrorBody)
    )
)]
async fn kill_command(
    State(state): State<Arc<AppState>>,
    Path((id, cmd_id)): Path<(String, String)>,
    Json(body): Json<KillCommand>,
) -> Result<Json<CommandEnvelope>, ApiError> {
    if body.signal <= 0 {
        return Err(ApiError::bad_request("signal must be greater than zero"));
    }
    let command = state.backend.kill_command(&id, &cmd_id, body.signal).await?;
    Ok(Json(CommandEnvelope { command }))
}

#[utoipa::path(
    get,
    path = "/v1/sandboxes/{id}/cmd/{cmd_id}/logs",
    params(
        ("id" = String, Path, description = "Sandbox identifier"),
        ("cmd_id" = String, Path, description = "Command identifier"),
        StreamQuery
    ),
    responses((status = 200, description = "Log snapshot, or ND-JSON frames when stream=true", body = LogSnapshot))
)]
async fn command_logs(
    State(state): State<Arc<AppState>>,
    Path((id, cmd_id)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    if query.stream.unwrap_or(false) {
        let frames = state.backend.stream_command_logs(&id, &cmd_id).await?;
        let lines = frames.map(|frame| ndjson_line(&frame));
        Ok(ndjson_response(lines))
    } else {
        let snapshot = state.backend.command_logs(&id, &cmd_id).await?;
        Ok(Json(snapshot).into_response())
    }
}

#[utoipa::path(
    get,
    path = "/v1/sandboxes/{id}/files",
    params(("id" = String, Path, description = "Sandbox identifier"), PathQuery),
    responses(
        (status = 200, description = "File content", body = FileContent),
        (status = 400, description = "Missing path or read failure", body = ErrorBody)
    )
)]
async fn read_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileContent>, ApiError> {
    let path = require_path(query)?;
    Ok(Json(state.backend.read_file(&id, &path).await?))
}

#[utoipa::path(
    put,
    path = "/v1/sandboxes/{id}/files",
    params(("id" = String, Path, description = "Sandbox identifier"), PathQuery),
    request_body = WriteFile,
    responses((status = 200, description = "File written (parents created)", body = WriteFileResponse))
)]
async fn write_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
    Json(body): Json<WriteFile>,
) -> Result<Json<WriteFileResponse>, ApiError> {
    let path = require_path(query)?;
    Ok(Json(
        state.backend.write_file(&id, &path, &body.content).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/v1/sandboxes/{id}/files",
    params(("id" = String, Path, description = "Sandbox identifier"), PathQuery),
    responses((status = 204, description = "Deleted recursively"))
)]
async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<StatusCode, ApiError> {
    let path = require_path(query)?;
    state.backend.delete_path(&id, &path).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/sandboxes/{id}/files/list",
    params(("id" = String, Path, description = "Sandbox identifier"), PathQuery),
    responses((status = 200, description = "Directory listing", body = FileListing))
)]
async fn list_files(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileListing>, ApiError> {
    let path = require_path(query)?;
    Ok(Json(state.backend.list_dir(&id, &path).await?))
}

#[utoipa::path(
    get,
    path = "/v1/images",
    responses((status = 200, description = "Local images", body = [ImageSummary]))
)]
async fn list_images(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ImageSummary>>, ApiError> {
    Ok(Json(state.backend.list_images().await?))
}

#[utoipa::path(
    get,
    path = "/v1/images/{reference}",
    params(("reference" = String, Path, description = "Image id or reference")),
    responses(
        (status = 200, description = "Image detail", body = ImageDetail),
        (status = 404, description = "Image not found", body = ErrorBody)
    )
)]
async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<ImageDetail>, ApiError> {
    Ok(Json(state.backend.inspect_image(&reference).await?))
}

#[utoipa::path(
    post,
    path = "/v1/images/pull",
    request_body = PullImage,
    responses(
        (status = 200, description = "Image pulled and verified", body = PullImageResponse),
        (status = 400, description = "Missing image reference", body = ErrorBody)
    )
)]
async fn pull_image(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PullImage>,
) -> Result<Json<PullImageResponse>, ApiError> {
    Ok(Json(state.backend.pull_image(&body.image).await?))
}

#[utoipa::path(
    delete,
    path = "/v1/images/{reference}",
    params(("reference" = String, Path, description = "Image id or reference"), ForceQuery),
    responses(
        (status = 204, description = "Image removed"),
        (status = 404, description = "Image not found", body = ErrorBody)
    )
)]
async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .backend
        .remove_image(&reference, query.force.unwrap_or(false))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- streaming helpers ---------------------------------------------------

fn ndjson_line<T: serde::Serialize>(value: &T) -> Bytes {
    let mut buf = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    buf.push(b'\n');
    Bytes::from(buf)
}

/// Wraps a byte-line stream as `application/x-ndjson`; hyper flushes each
/// chunk as it is produced, which the streaming endpoints rely on.
fn ndjson_response<S>(lines: S) -> Response
where
    S: Stream<Item = Bytes> + Send + 'static,
{
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines.map(Ok::<_, Infallible>)),
    )
        .into_response()
}

/// Two-frame ND-JSON stream: the current state immediately, the final state
/// once the completion signal fires.
fn command_wait_response(
    backend: Arc<dyn SandboxBackend>,
    sandbox_id: String,
    initial: CommandDetail,
) -> Response {
    let command_id = initial.id.clone();
    let first = ndjson_line(&CommandEnvelope { command: initial });
    let tail = async move {
        match backend.wait_command(&sandbox_id, &command_id).await {
            Ok(command) => ndjson_line(&CommandEnvelope { command }),
            Err(err) => {
                let api: ApiError = err.into();
                ndjson_line(&ErrorBody {
                    code: api.code,
                    message: api.message,
                })
            }
        }
    };
    let lines = stream::once(future::ready(first)).chain(stream::once(tail));
    ndjson_response(lines)
}

pub mod docs {
    use super::*;

    #[derive(OpenApi)]
    #[openapi(
        info(title = "Open Sandbox API", version = "0.1.0"),
        paths(
            health,
            list_sandboxes,
            create_sandbox,
            get_sandbox,
            delete_sandbox,
            start_sandbox,
            stop_sandbox,
            restart_sandbox,
            pause_sandbox,
            resume_sandbox,
            renew_expiration,
            sandbox_stats,
            exec_command,
            list_commands,
            get_command,
            kill_command,
            command_logs,
            read_file,
            write_file,
            delete_file,
            list_files,
            list_images,
            get_image,
            pull_image,
            delete_image
        ),
        components(schemas(
            CreateSandbox,
            CreateSandboxResponse,
            SandboxSummary,
            SandboxDetail,
            LifecycleResponse,
            ExecCommand,
            KillCommand,
            RenewExpiration,
            CommandDetail,
            CommandEnvelope,
            CommandListEnvelope,
            LogSnapshot,
            osb_engine::types::LogFrame,
            osb_engine::types::LogChannel,
            StatsSnapshot,
            osb_engine::types::MemoryStats,
            ImageSummary,
            ImageDetail,
            PullImage,
            PullImageResponse,
            FileContent,
            WriteFile,
            WriteFileResponse,
            FileListing,
            ErrorBody
        ))
    )]
    pub struct ApiDoc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::Request as HttpRequest;
    use osb_engine::{backend::LogStream, types::LogChannel, types::LogFrame, EngineError};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use tower::Service;

    /// Canned backend: enough behaviour to exercise routing, status codes
    /// and streaming without a container runtime.
    #[derive(Default)]
    struct TestBackend {
        stopped: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl SandboxBackend for TestBackend {
        async fn health(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn create_sandbox(
            &self,
            request: CreateSandbox,
        ) -> Result<CreateSandboxResponse, EngineError> {
            if request.image.trim().is_empty() {
                return Err(EngineError::bad_request("image is required"));
            }
            if request.memory.is_some_and(|m| !(0..=8192).contains(&m)) {
                return Err(EngineError::bad_request("memory must be between 0 and 8192 MB"));
            }
            Ok(CreateSandboxResponse {
                id: "abc123".to_string(),
                name: request.name.unwrap_or_else(|| "brave-curie".to_string()),
                ports: vec![3000],
                url: Some("http://brave-curie.localhost:3000".to_string()),
            })
        }

        async fn list_sandboxes(&self) -> Result<Vec<SandboxSummary>, EngineError> {
            Ok(Vec::new())
        }

        async fn inspect_sandbox(&self, id: &str) -> Result<SandboxDetail, EngineError> {
            if id != "abc123" {
                return Err(EngineError::NotFound);
            }
            Ok(SandboxDetail {
                id: id.to_string(),
                name: "brave-curie".to_string(),
                image: "nextjs-docker:latest".to_string(),
                status: "running".to_string(),
                running: true,
                ports: Default::default(),
                memory_mb: 1024,
                cpus: 1.0,
                started_at: None,
                finished_at: None,
                expires_at: None,
            })
        }

        async fn remove_sandbox(&self, _id: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn start_sandbox(&self, _id: &str) -> Result<LifecycleResponse, EngineError> {
            Ok(LifecycleResponse::status("started"))
        }

        async fn stop_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
            if !self.stopped.lock().insert(id.to_string()) {
                return Err(EngineError::AlreadyStopped);
            }
            Ok(LifecycleResponse::status("stopped"))
        }

        async fn restart_sandbox(&self, _id: &str) -> Result<LifecycleResponse, EngineError> {
            Ok(LifecycleResponse::status("restarted"))
        }

        async fn pause_sandbox(&self, _id: &str) -> Result<LifecycleResponse, EngineError> {
            Ok(LifecycleResponse::status("paused"))
        }

        async fn resume_sandbox(&self, _id: &str) -> Result<LifecycleResponse, EngineError> {
            Err(EngineError::NotPaused)
        }

        async fn renew_expiration(
            &self,
            _id: &str,
            timeout: i64,
        ) -> Result<LifecycleResponse, EngineError> {
            if timeout <= 0 {
                return Err(EngineError::bad_request("timeout must be greater than zero"));
            }
            Ok(LifecycleResponse {
                status: "renewed".to_string(),
                ports: None,
                expires_at: None,
                timeout: Some(timeout),
            })
        }

        async fn sandbox_stats(&self, _id: &str) -> Result<StatsSnapshot, EngineError> {
            Ok(StatsSnapshot {
                cpu_percent: 12.34,
                memory: osb_engine::types::MemoryStats {
                    usage: 1024,
                    limit: 2048,
                    percent: 50.0,
                },
                pids: 3,
            })
        }

        async fn exec_command(
            &self,
            id: &str,
            request: ExecCommand,
        ) -> Result<CommandDetail, EngineError> {
            Ok(CommandDetail {
                id: "cmd_00112233445566778899aabbccddeeff00112233".to_string(),
                sandbox_id: id.to_string(),
                command: request.command,
                args: request.args,
                cwd: request.cwd,
                exit_code: None,
                started_at: 1_000,
                finished_at: None,
            })
        }

        async fn list_commands(&self, _id: &str) -> Result<Vec<CommandDetail>, EngineError> {
            Ok(Vec::new())
        }

        async fn get_command(
            &self,
            id: &str,
            command_id: &str,
        ) -> Result<CommandDetail, EngineError> {
            if !command_id.starts_with("cmd_") {
                return Err(EngineError::CommandNotFound);
            }
            Ok(CommandDetail {
                id: command_id.to_string(),
                sandbox_id: id.to_string(),
                command: "echo".to_string(),
                args: vec!["hello".to_string()],
                cwd: None,
                exit_code: None,
                started_at: 1_000,
                finished_at: None,
            })
        }

        async fn wait_command(
            &self,
            id: &str,
            command_id: &str,
        ) -> Result<CommandDetail, EngineError> {
            Ok(CommandDetail {
                id: command_id.to_string(),
                sandbox_id: id.to_string(),
                command: "echo".to_string(),
                args: vec!["hello".to_string()],
                cwd: None,
                exit_code: Some(0),
                started_at: 1_000,
                finished_at: Some(2_000),
            })
        }

        async fn kill_command(
            &self,
            id: &str,
            command_id: &str,
            _signal: i32,
        ) -> Result<CommandDetail, EngineError> {
            self.wait_command(id, command_id).await
        }

        async fn command_logs(
            &self,
            _id: &str,
            _command_id: &str,
        ) -> Result<LogSnapshot, EngineError> {
            Ok(LogSnapshot {
                stdout: "hello\n".to_string(),
                stderr: String::new(),
            })
        }

        async fn stream_command_logs(
            &self,
            _id: &str,
            _command_id: &str,
        ) -> Result<LogStream, EngineError> {
            let frames = vec![
                LogFrame {
                    channel: LogChannel::Stdout,
                    data: "hel".to_string(),
                },
                LogFrame {
                    channel: LogChannel::Stdout,
                    data: "lo\n".to_string(),
                },
            ];
            Ok(Box::pin(futures::stream::iter(frames)))
        }

        async fn read_file(&self, _id: &str, path: &str) -> Result<FileContent, EngineError> {
            Ok(FileContent {
                path: path.to_string(),
                content: "payload".to_string(),
            })
        }

        async fn write_file(
            &self,
            _id: &str,
            path: &str,
            _content: &str,
        ) -> Result<WriteFileResponse, EngineError> {
            Ok(WriteFileResponse {
                path: path.to_string(),
                status: "written".to_string(),
            })
        }

        async fn delete_path(&self, _id: &str, _path: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn list_dir(&self, _id: &str, path: &str) -> Result<FileListing, EngineError> {
            Ok(FileListing {
                path: path.to_string(),
                output: "total 0\n".to_string(),
            })
        }

        async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
            Ok(Vec::new())
        }

        async fn inspect_image(&self, _reference: &str) -> Result<ImageDetail, EngineError> {
            Err(EngineError::ImageNotFoundById)
        }

        async fn pull_image(&self, reference: &str) -> Result<PullImageResponse, EngineError> {
            Ok(PullImageResponse {
                status: "pulled".to_string(),
                image: reference.to_string(),
            })
        }

        async fn remove_image(&self, _reference: &str, _force: bool) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn router(api_key: Option<&str>) -> Router {
        let state = Arc::new(AppState {
            backend: Arc::new(TestBackend::default()),
            api_key: api_key.map(str::to_string),
            worker_api_key: None,
            registry: None,
        });
        public_router(state)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_open_even_with_api_key() {
        let mut app = router(Some("secret"));
        let response = app
            .call(
                HttpRequest::builder()
                    .uri("/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_bearer_key_is_rejected() {
        let mut app = router(Some("secret"));
        let response = app
            .call(
                HttpRequest::builder()
                    .uri("/v1/sandboxes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn bearer_key_grants_access() {
        let mut app = router(Some("secret"));
        let response = app
            .call(
                HttpRequest::builder()
                    .uri("/v1/sandboxes")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_returns_201_with_url() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/v1/sandboxes")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&json!({"image": "nextjs-docker:latest"})).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["id"], "abc123");
        assert_eq!(body["url"], "http://brave-curie.localhost:3000");
    }

    #[tokio::test]
    async fn create_validation_maps_to_bad_request() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/v1/sandboxes")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&json!({"image": "img", "memory": 10000})).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn second_stop_conflicts_with_exact_message() {
        let mut app = router(None);
        for expected in [StatusCode::OK, StatusCode::CONFLICT] {
            let response = app
                .call(
                    HttpRequest::builder()
                        .method("POST")
                        .uri("/v1/sandboxes/abc123/stop")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
            if expected == StatusCode::CONFLICT {
                let body = body_json(response).await;
                assert_eq!(body["code"], "CONFLICT");
                assert_eq!(body["message"], "sandbox is already stopped");
            }
        }
    }

    #[tokio::test]
    async fn unknown_sandbox_is_404() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .uri("/v1/sandboxes/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn delete_is_204_both_times() {
        let mut app = router(None);
        for _ in 0..2 {
            let response = app
                .call(
                    HttpRequest::builder()
                        .method("DELETE")
                        .uri("/v1/sandboxes/abc123")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
    }

    #[tokio::test]
    async fn exec_without_wait_returns_envelope() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/v1/sandboxes/abc123/cmd")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&json!({"command": "echo", "args": ["hello"]}))
                            .unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["command"]["id"].as_str().unwrap().starts_with("cmd_"));
        assert!(body["command"]["exit_code"].is_null());
    }

    #[tokio::test]
    async fn wait_streams_two_ndjson_lines_ending_with_exit_code() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .uri("/v1/sandboxes/abc123/cmd/cmd_0011?wait=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-ndjson"
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().filter(|line| !line.is_empty()).collect();
        assert!(lines.len() >= 2);
        let last: Value = serde_json::from_str(lines.last().unwrap()).unwrap();
        assert_eq!(last["command"]["exit_code"], 0);
    }

    #[tokio::test]
    async fn log_stream_emits_typed_frames() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .uri("/v1/sandboxes/abc123/cmd/cmd_0011/logs?stream=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let frames: Vec<Value> = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["type"], "stdout");
        let joined: String = frames
            .iter()
            .map(|frame| frame["data"].as_str().unwrap())
            .collect();
        assert_eq!(joined, "hello\n");
    }

    #[tokio::test]
    async fn log_snapshot_contains_stdout() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .uri("/v1/sandboxes/abc123/cmd/cmd_0011/logs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert!(body["stdout"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn kill_rejects_non_positive_signal() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/v1/sandboxes/abc123/cmd/cmd_0011/kill")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&json!({"signal": 0})).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn renew_expiration_rejects_non_positive_timeout() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/v1/sandboxes/abc123/renew-expiration")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&json!({"timeout": 0})).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn files_require_path_query() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .uri("/v1/sandboxes/abc123/files")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn file_round_trip_shapes() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .method("PUT")
                    .uri("/v1/sandboxes/abc123/files?path=/tmp/a.txt")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&json!({"content": "payload"})).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "written");

        let response = app
            .call(
                HttpRequest::builder()
                    .uri("/v1/sandboxes/abc123/files?path=/tmp/a.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["content"], "payload");

        let response = app
            .call(
                HttpRequest::builder()
                    .method("DELETE")
                    .uri("/v1/sandboxes/abc123/files?path=/tmp/a.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_image_is_404() {
        let mut app = router(None);
        let response = app
            .call(
                HttpRequest::builder()
                    .uri("/v1/images/sha256:deadbeef")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
