//! Worker surface and fleet registration.
//!
//! A worker mirrors the operation routes under `/internal/v1`, guarded by
//! the shared `X-Worker-Key`. The orchestrator serves the registration
//! endpoints under the same prefix; workers self-register on boot and
//! deregister on shutdown.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use osb_store::WorkerRecord;

use crate::{
    auth::{self, WORKER_KEY_HEADER},
    config::Config,
    error::ApiError,
    server::{api_routes, AppState},
};

/// `/internal/v1` mirror of the operation routes (worker side).
pub fn worker_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/internal/v1", api_routes())
        .layer(middleware::from_fn_with_state(state.clone(), worker_auth))
        .with_state(state)
}

/// Registration endpoints (orchestrator side).
pub fn registry_router(state: Arc<AppState>) -> Router {
    let routes = Router::new()
        .route("/workers/register", post(register_worker))
        .route("/workers", get(list_workers))
        .route("/workers/:id", delete(deregister_worker));
    Router::new()
        .nest("/internal/v1", routes)
        .layer(middleware::from_fn_with_state(state.clone(), worker_auth))
        .with_state(state)
}

async fn worker_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let Some(expected) = &state.worker_api_key else {
        return ApiError::unauthorized("worker surface is not configured").into_response();
    };
    match auth::require_worker_key(req.headers(), expected) {
        Ok(()) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RegisterWorkerBody {
    url: String,
}

#[derive(Debug, Serialize)]
struct RegisterWorkerResponse {
    worker_id: String,
}

#[derive(Debug, Serialize)]
struct WorkerInfo {
    id: String,
    url: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<WorkerRecord> for WorkerInfo {
    fn from(record: WorkerRecord) -> Self {
        Self {
            id: record.id,
            url: record.url,
            status: record.status.as_str().to_string(),
            created_at: record.created_at,
        }
    }
}

async fn register_worker(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterWorkerBody>,
) -> Result<(StatusCode, Json<RegisterWorkerResponse>), ApiError> {
    let registry = state
        .registry
        .as_ref()
        .ok_or_else(|| ApiError::internal("worker registry is not configured"))?;
    let key = state
        .worker_api_key
        .clone()
        .ok_or_else(|| ApiError::internal("worker key is not configured"))?;

    let record = registry.register(&body.url, &key).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterWorkerResponse {
            worker_id: record.id,
        }),
    ))
}

async fn list_workers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WorkerInfo>>, ApiError> {
    let registry = state
        .registry
        .as_ref()
        .ok_or_else(|| ApiError::internal("worker registry is not configured"))?;
    Ok(Json(
        registry.all().into_iter().map(WorkerInfo::from).collect(),
    ))
}

async fn deregister_worker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let registry = state
        .registry
        .as_ref()
        .ok_or_else(|| ApiError::internal("worker registry is not configured"))?;
    if !registry.deregister(&id).await? {
        return Err(ApiError::not_found("worker not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- worker-side self-registration ---------------------------------------

/// Handle to an active registration with an orchestrator.
pub struct WorkerRegistration {
    orchestrator_url: String,
    worker_key: String,
    worker_id: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RegisterReply {
    worker_id: String,
}

/// Registers this worker with the configured orchestrator, if any. Standalone
/// workers (no orchestrator configured) run without registration.
pub async fn register_with_orchestrator(
    config: &Config,
) -> anyhow::Result<Option<WorkerRegistration>> {
    let Some(orchestrator_url) = &config.orchestrator_url else {
        return Ok(None);
    };
    let worker_key = config
        .worker_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--orchestrator-url requires WORKER_API_KEY"))?;

    let advertised = match &config.worker_url {
        Some(url) => url.clone(),
        None => {
            let port = config.listen_addr()?.port();
            format!("http://{}:{}", config.host_ip, port)
        }
    };

    let http = reqwest::Client::new();
    let reply: RegisterReply = http
        .post(format!(
            "{}/internal/v1/workers/register",
            orchestrator_url.trim_end_matches('/')
        ))
        .header(WORKER_KEY_HEADER, &worker_key)
        .json(&serde_json::json!({ "url": advertised }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    info!(worker_id = %reply.worker_id, orchestrator = %orchestrator_url, url = %advertised, "registered with orchestrator");
    Ok(Some(WorkerRegistration {
        orchestrator_url: orchestrator_url.trim_end_matches('/').to_string(),
        worker_key,
        worker_id: reply.worker_id,
        http,
    }))
}

impl WorkerRegistration {
    /// Removes this worker's record from the orchestrator; best-effort on
    /// shutdown.
    pub async fn deregister(&self) {
        let result = self
            .http
            .delete(format!(
                "{}/internal/v1/workers/{}",
                self.orchestrator_url, self.worker_id
            ))
            .header(WORKER_KEY_HEADER, &self.worker_key)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                info!(worker_id = %self.worker_id, "deregistered from orchestrator");
            }
            Ok(response) => {
                warn!(worker_id = %self.worker_id, status = %response.status(), "orchestrator rejected deregistration");
            }
            Err(err) => {
                warn!(worker_id = %self.worker_id, error = %err, "failed to deregister from orchestrator");
            }
        }
    }
}
