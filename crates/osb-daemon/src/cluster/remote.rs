//! Remote execution client (orchestrator side).
//!
//! Implements the engine contract by forwarding each operation to the worker
//! that owns the sandbox. Placement happens here: `create` picks a worker
//! round-robin and records the assignment; fleet-wide operations fan out to
//! every active worker in parallel with partial-failure semantics.

use std::{collections::HashSet, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Method;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, instrument, warn};

use osb_engine::{
    backend::LogStream,
    names,
    types::{
        CommandDetail, CommandEnvelope, CommandListEnvelope, CreateSandbox,
        CreateSandboxResponse, ExecCommand, FileContent, FileListing, ImageDetail, ImageSummary,
        KillCommand, LifecycleResponse, LogFrame, LogSnapshot, PullImage, PullImageResponse,
        RenewExpiration, SandboxDetail, SandboxSummary, StatsSnapshot, WriteFile,
        WriteFileResponse,
    },
    EngineError, InvalidateHook, SandboxBackend,
};
use osb_store::{SandboxRecord, Store, WorkerRecord};

use crate::{auth::WORKER_KEY_HEADER, cluster::registry::WorkerRegistry};

#[derive(Debug, Clone, Default)]
pub struct RemoteConfig {
    /// Base domain advertised in create responses; the orchestrator's proxy
    /// is the public entry point, not the worker's.
    pub base_domain: Option<String>,
    pub proxy_port: Option<u16>,
}

pub struct RemoteClient {
    store: Store,
    registry: Arc<WorkerRegistry>,
    http: reqwest::Client,
    config: RemoteConfig,
    invalidate: Option<InvalidateHook>,
}

impl RemoteClient {
    pub fn new(store: Store, registry: Arc<WorkerRegistry>, config: RemoteConfig) -> Self {
        Self {
            store,
            registry,
            http: reqwest::Client::new(),
            config,
            invalidate: None,
        }
    }

    pub fn with_invalidator(mut self, hook: InvalidateHook) -> Self {
        self.invalidate = Some(hook);
        self
    }

    fn invalidate_route(&self, name: &str) {
        if let Some(hook) = &self.invalidate {
            hook(name);
        }
    }

    fn endpoint(worker: &WorkerRecord, path: &str) -> String {
        format!("{}/internal/v1{}", worker.url.trim_end_matches('/'), path)
    }

    /// Looks up the sandbox record and the worker that owns it. Every
    /// per-sandbox operation routes through exactly this pair.
    async fn sandbox_worker(
        &self,
        id: &str,
    ) -> Result<(SandboxRecord, WorkerRecord), EngineError> {
        let record = self
            .store
            .find_sandbox(id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::NotFound)?;
        let worker_id = record
            .worker_id
            .clone()
            .ok_or_else(|| EngineError::Store(anyhow!("sandbox {id} has no owning worker")))?;
        let worker = self
            .registry
            .lookup(&worker_id)
            .ok_or(EngineError::NoWorkers)?;
        Ok((record, worker))
    }

    async fn send(
        &self,
        worker: &WorkerRecord,
        method: Method,
        path: &str,
        body: Option<&(impl Serialize + Sync)>,
    ) -> Result<reqwest::Response, EngineError> {
        let mut request = self
            .http
            .request(method, Self::endpoint(worker, path))
            .header(WORKER_KEY_HEADER, &worker.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| EngineError::Runtime(anyhow!("worker {}: {err}", worker.id)))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(translate_worker_error(response).await)
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, EngineError> {
        response
            .json::<T>()
            .await
            .map_err(|err| EngineError::Runtime(anyhow!("decode worker response: {err}")))
    }

    /// Persists port-map changes a worker reported and drops the proxy
    /// route.
    async fn absorb_ports(
        &self,
        record: &SandboxRecord,
        response: &LifecycleResponse,
    ) -> Result<(), EngineError> {
        if let Some(ports) = &response.ports {
            self.store
                .update_sandbox_ports(&record.id, ports)
                .await
                .map_err(EngineError::Store)?;
        }
        self.invalidate_route(&record.name);
        Ok(())
    }

    fn proxy_url(&self, name: &str) -> Option<String> {
        let domain = self.config.base_domain.as_deref()?;
        Some(match self.config.proxy_port {
            Some(80) | None => format!("http://{name}.{domain}"),
            Some(port) => format!("http://{name}.{domain}:{port}"),
        })
    }
}

/// Maps a worker's `{code, message}` error body back onto engine sentinels.
async fn translate_worker_error(response: reqwest::Response) -> EngineError {
    let status = response.status();
    let message = match response.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("message")
            .and_then(|value| value.as_str())
            .unwrap_or("worker returned an error")
            .to_string(),
        Err(_) => "worker returned an error".to_string(),
    };

    match status.as_u16() {
        404 if message.contains("command not found") => EngineError::CommandNotFound,
        404 => EngineError::NotFound,
        409 => conflict_from_message(message),
        400 => EngineError::BadRequest(message),
        408 => EngineError::Timeout,
        _ => EngineError::Runtime(anyhow!("worker error ({status}): {message}")),
    }
}

fn conflict_from_message(message: String) -> EngineError {
    if message.contains("already running") {
        EngineError::AlreadyRunning
    } else if message.contains("already stopped") {
        EngineError::AlreadyStopped
    } else if message.contains("already paused") {
        EngineError::AlreadyPaused
    } else if message.contains("not paused") {
        EngineError::NotPaused
    } else if message.contains("not running") {
        EngineError::NotRunning
    } else if message.contains("finished") {
        EngineError::CommandFinished
    } else {
        EngineError::Conflict(message)
    }
}

#[async_trait]
impl SandboxBackend for RemoteClient {
    /// The orchestrator owns no container runtime; liveness is process
    /// liveness.
    async fn health(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Round-robin placement: pick a worker, settle the name against the
    /// orchestrator's own table, forward, then record the assignment.
    #[instrument(skip(self, request), fields(image = %request.image))]
    async fn create_sandbox(
        &self,
        mut request: CreateSandbox,
    ) -> Result<CreateSandboxResponse, EngineError> {
        let worker = self.registry.next()?;

        // The orchestrator is the arbiter of name uniqueness across the
        // fleet, so generation never consults the worker.
        if request.name.is_none() {
            let taken: HashSet<String> = self
                .store
                .list_sandboxes()
                .await
                .map_err(EngineError::Store)?
                .into_iter()
                .map(|record| record.name)
                .collect();
            request.name = Some(names::generate(|candidate| taken.contains(candidate)));
        } else if let Some(name) = &request.name {
            if self
                .store
                .find_sandbox_by_name(name)
                .await
                .map_err(EngineError::Store)?
                .is_some()
            {
                return Err(EngineError::Conflict(format!(
                    "sandbox name '{name}' is already in use"
                )));
            }
        }

        let response = self
            .send(&worker, Method::POST, "/sandboxes", Some(&request))
            .await?;
        let mut created: CreateSandboxResponse = Self::json(response).await?;

        // The worker reports its live port map through the detail view.
        let detail_response = self
            .send(
                &worker,
                Method::GET,
                &format!("/sandboxes/{}", created.id),
                None::<&()>,
            )
            .await?;
        let detail: SandboxDetail = Self::json(detail_response).await?;

        let record = SandboxRecord {
            id: created.id.clone(),
            name: created.name.clone(),
            image: request.image.clone(),
            ports: detail.ports,
            port: request.port,
            worker_id: Some(worker.id.clone()),
        };
        self.store
            .save_sandbox(&record)
            .await
            .map_err(EngineError::Store)?;

        created.url = self.proxy_url(&created.name);
        info!(sandbox_id = %created.id, worker_id = %worker.id, "sandbox placed");
        Ok(created)
    }

    /// Union of every worker's sandboxes; a bad worker is logged and
    /// skipped so it cannot break the listing.
    async fn list_sandboxes(&self) -> Result<Vec<SandboxSummary>, EngineError> {
        let workers = self.registry.all();
        let fetches = workers.iter().map(|worker| async move {
            let result = self
                .send(worker, Method::GET, "/sandboxes", None::<&()>)
                .await;
            match result {
                Ok(response) => match Self::json::<Vec<SandboxSummary>>(response).await {
                    Ok(list) => Some(list),
                    Err(err) => {
                        warn!(worker_id = %worker.id, error = %err, "worker list decode failed");
                        None
                    }
                },
                Err(err) => {
                    warn!(worker_id = %worker.id, error = %err, "worker list failed");
                    None
                }
            }
        });
        let results = join_all(fetches).await;
        Ok(results.into_iter().flatten().flatten().collect())
    }

    async fn inspect_sandbox(&self, id: &str) -> Result<SandboxDetail, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::GET,
                &format!("/sandboxes/{}", record.id),
                None::<&()>,
            )
            .await?;
        Self::json(response).await
    }

    /// Forwards the removal, then cleans the orchestrator's own records;
    /// a dead worker must not leave an undeletable sandbox behind.
    async fn remove_sandbox(&self, id: &str) -> Result<(), EngineError> {
        let record = self
            .store
            .find_sandbox(id)
            .await
            .map_err(EngineError::Store)?;

        if let Some(record) = &record {
            if let Some(worker_id) = &record.worker_id {
                if let Some(worker) = self.registry.lookup(worker_id) {
                    if let Err(err) = self
                        .send(
                            &worker,
                            Method::DELETE,
                            &format!("/sandboxes/{}", record.id),
                            None::<&()>,
                        )
                        .await
                    {
                        warn!(sandbox_id = %record.id, worker_id = %worker_id, error = %err, "worker removal failed; purging local record anyway");
                    }
                }
            }
        }

        self.store
            .delete_commands_for_sandbox(id)
            .await
            .map_err(EngineError::Store)?;
        self.store
            .delete_sandbox(id)
            .await
            .map_err(EngineError::Store)?;
        if let Some(record) = record {
            self.invalidate_route(&record.name);
        }
        Ok(())
    }

    async fn start_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::POST,
                &format!("/sandboxes/{}/start", record.id),
                None::<&()>,
            )
            .await?;
        let lifecycle: LifecycleResponse = Self::json(response).await?;
        self.absorb_ports(&record, &lifecycle).await?;
        Ok(lifecycle)
    }

    async fn stop_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::POST,
                &format!("/sandboxes/{}/stop", record.id),
                None::<&()>,
            )
            .await?;
        Self::json(response).await
    }

    async fn restart_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::POST,
                &format!("/sandboxes/{}/restart", record.id),
                None::<&()>,
            )
            .await?;
        let lifecycle: LifecycleResponse = Self::json(response).await?;
        self.absorb_ports(&record, &lifecycle).await?;
        Ok(lifecycle)
    }

    async fn pause_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::POST,
                &format!("/sandboxes/{}/pause", record.id),
                None::<&()>,
            )
            .await?;
        Self::json(response).await
    }

    async fn resume_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::POST,
                &format!("/sandboxes/{}/resume", record.id),
                None::<&()>,
            )
            .await?;
        Self::json(response).await
    }

    async fn renew_expiration(
        &self,
        id: &str,
        timeout: i64,
    ) -> Result<LifecycleResponse, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::POST,
                &format!("/sandboxes/{}/renew-expiration", record.id),
                Some(&RenewExpiration { timeout }),
            )
            .await?;
        Self::json(response).await
    }

    async fn sandbox_stats(&self, id: &str) -> Result<StatsSnapshot, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::GET,
                &format!("/sandboxes/{}/stats", record.id),
                None::<&()>,
            )
            .await?;
        Self::json(response).await
    }

    async fn exec_command(
        &self,
        id: &str,
        request: ExecCommand,
    ) -> Result<CommandDetail, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::POST,
                &format!("/sandboxes/{}/cmd", record.id),
                Some(&request),
            )
            .await?;
        let envelope: CommandEnvelope = Self::json(response).await?;
        Ok(envelope.command)
    }

    async fn list_commands(&self, id: &str) -> Result<Vec<CommandDetail>, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::GET,
                &format!("/sandboxes/{}/cmd", record.id),
                None::<&()>,
            )
            .await?;
        let envelope: CommandListEnvelope = Self::json(response).await?;
        Ok(envelope.commands)
    }

    async fn get_command(
        &self,
        id: &str,
        command_id: &str,
    ) -> Result<CommandDetail, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::GET,
                &format!("/sandboxes/{}/cmd/{command_id}", record.id),
                None::<&()>,
            )
            .await?;
        let envelope: CommandEnvelope = Self::json(response).await?;
        Ok(envelope.command)
    }

    /// The worker's `?wait=true` ND-JSON stream ends with the final state;
    /// the last line is the answer.
    async fn wait_command(
        &self,
        id: &str,
        command_id: &str,
    ) -> Result<CommandDetail, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::GET,
                &format!("/sandboxes/{}/cmd/{command_id}?wait=true", record.id),
                None::<&()>,
            )
            .await?;
        let body = response
            .text()
            .await
            .map_err(|err| EngineError::Runtime(anyhow!("read worker wait stream: {err}")))?;
        let last_line = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .last()
            .ok_or_else(|| EngineError::Runtime(anyhow!("worker wait stream was empty")))?;
        let envelope: CommandEnvelope = serde_json::from_str(last_line)
            .map_err(|err| EngineError::Runtime(anyhow!("decode worker wait frame: {err}")))?;
        Ok(envelope.command)
    }

    async fn kill_command(
        &self,
        id: &str,
        command_id: &str,
        signal: i32,
    ) -> Result<CommandDetail, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::POST,
                &format!("/sandboxes/{}/cmd/{command_id}/kill", record.id),
                Some(&KillCommand { signal }),
            )
            .await?;
        let envelope: CommandEnvelope = Self::json(response).await?;
        Ok(envelope.command)
    }

    async fn command_logs(
        &self,
        id: &str,
        command_id: &str,
    ) -> Result<LogSnapshot, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::GET,
                &format!("/sandboxes/{}/cmd/{command_id}/logs", record.id),
                None::<&()>,
            )
            .await?;
        Self::json(response).await
    }

    /// Pipes the worker's ND-JSON log stream through, re-framed as
    /// [`LogFrame`]s.
    async fn stream_command_logs(
        &self,
        id: &str,
        command_id: &str,
    ) -> Result<LogStream, EngineError> {
        use futures::StreamExt;

        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::GET,
                &format!(
                    "/sandboxes/{}/cmd/{command_id}/logs?stream=true",
                    record.id
                ),
                None::<&()>,
            )
            .await?;

        let (tx, rx) = mpsc::channel::<LogFrame>(64);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(error = %err, "worker log stream interrupted");
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(index) = buffer.find('\n') {
                    let line: String = buffer.drain(..=index).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LogFrame>(line) {
                        Ok(frame) => {
                            if tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => warn!(error = %err, "undecodable worker log frame"),
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn read_file(&self, id: &str, path: &str) -> Result<FileContent, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::GET,
                &format!("/sandboxes/{}/files?path={}", record.id, encode_query(path)),
                None::<&()>,
            )
            .await?;
        Self::json(response).await
    }

    async fn write_file(
        &self,
        id: &str,
        path: &str,
        content: &str,
    ) -> Result<WriteFileResponse, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::PUT,
                &format!("/sandboxes/{}/files?path={}", record.id, encode_query(path)),
                Some(&WriteFile {
                    content: content.to_string(),
                }),
            )
            .await?;
        Self::json(response).await
    }

    async fn delete_path(&self, id: &str, path: &str) -> Result<(), EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        self.send(
            &worker,
            Method::DELETE,
            &format!("/sandboxes/{}/files?path={}", record.id, encode_query(path)),
            None::<&()>,
        )
        .await?;
        Ok(())
    }

    async fn list_dir(&self, id: &str, path: &str) -> Result<FileListing, EngineError> {
        let (record, worker) = self.sandbox_worker(id).await?;
        let response = self
            .send(
                &worker,
                Method::GET,
                &format!(
                    "/sandboxes/{}/files/list?path={}",
                    record.id,
                    encode_query(path)
                ),
                None::<&()>,
            )
            .await?;
        Self::json(response).await
    }

    /// Union of every worker's image store, deduplicated by image id.
    async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        let workers = self.registry.all();
        let fetches = workers.iter().map(|worker| async move {
            let result = self.send(worker, Method::GET, "/images", None::<&()>).await;
            match result {
                Ok(response) => match Self::json::<Vec<ImageSummary>>(response).await {
                    Ok(list) => Some(list),
                    Err(err) => {
                        warn!(worker_id = %worker.id, error = %err, "worker image list decode failed");
                        None
                    }
                },
                Err(err) => {
                    warn!(worker_id = %worker.id, error = %err, "worker image list failed");
                    None
                }
            }
        });
        let results = join_all(fetches).await;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for image in results.into_iter().flatten().flatten() {
            if seen.insert(image.id.clone()) {
                out.push(image);
            }
        }
        Ok(out)
    }

    /// First worker that knows the image answers.
    async fn inspect_image(&self, reference: &str) -> Result<ImageDetail, EngineError> {
        for worker in self.registry.all() {
            match self
                .send(
                    &worker,
                    Method::GET,
                    &format!("/images/{reference}"),
                    None::<&()>,
                )
                .await
            {
                Ok(response) => return Self::json(response).await,
                Err(EngineError::NotFound) | Err(EngineError::ImageNotFoundById) => continue,
                Err(err) => {
                    warn!(worker_id = %worker.id, error = %err, "worker image inspect failed");
                    continue;
                }
            }
        }
        Err(EngineError::ImageNotFoundById)
    }

    /// Best-effort fleet-wide pull: success if any worker succeeded.
    #[instrument(skip(self))]
    async fn pull_image(&self, reference: &str) -> Result<PullImageResponse, EngineError> {
        let workers = self.registry.all();
        if workers.is_empty() {
            return Err(EngineError::NoWorkers);
        }
        let body = PullImage {
            image: reference.to_string(),
        };
        let pulls = workers.iter().map(|worker| {
            let body = body.clone();
            async move {
                self.send(worker, Method::POST, "/images/pull", Some(&body))
                    .await
                    .map(|_| ())
                    .map_err(|err| {
                        warn!(worker_id = %worker.id, error = %err, "worker pull failed");
                        err
                    })
            }
        });
        let results = join_all(pulls).await;

        let mut last_err = None;
        let mut succeeded = false;
        for result in results {
            match result {
                Ok(()) => succeeded = true,
                Err(err) => last_err = Some(err),
            }
        }
        if succeeded {
            Ok(PullImageResponse {
                status: "pulled".to_string(),
                image: reference.to_string(),
            })
        } else {
            Err(last_err.unwrap_or(EngineError::NoWorkers))
        }
    }

    /// Best-effort fleet-wide removal: success if any worker succeeded.
    async fn remove_image(&self, reference: &str, force: bool) -> Result<(), EngineError> {
        let workers = self.registry.all();
        if workers.is_empty() {
            return Err(EngineError::NoWorkers);
        }
        let suffix = if force { "?force=true" } else { "" };
        let path = format!("/images/{reference}{suffix}");
        let path = path.as_str();
        let removals = workers.iter().map(|worker| async move {
            self.send(worker, Method::DELETE, path, None::<&()>)
                .await
                .map(|_| ())
        });
        let results = join_all(removals).await;

        let mut last_err = None;
        let mut succeeded = false;
        for result in results {
            match result {
                Ok(()) => succeeded = true,
                Err(err) => last_err = Some(err),
            }
        }
        if succeeded {
            Ok(())
        } else {
            Err(last_err.unwrap_or(EngineError::NoWorkers))
        }
    }
}

/// Percent-encodes the characters that matter inside a query value.
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => {
                use std::fmt::Write;
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_messages_round_trip_to_sentinels() {
        assert!(matches!(
            conflict_from_message("sandbox is already running".into()),
            EngineError::AlreadyRunning
        ));
        assert!(matches!(
            conflict_from_message("sandbox is already stopped".into()),
            EngineError::AlreadyStopped
        ));
        assert!(matches!(
            conflict_from_message("sandbox is already paused".into()),
            EngineError::AlreadyPaused
        ));
        assert!(matches!(
            conflict_from_message("sandbox is not paused".into()),
            EngineError::NotPaused
        ));
        assert!(matches!(
            conflict_from_message("sandbox is not running".into()),
            EngineError::NotRunning
        ));
        assert!(matches!(
            conflict_from_message("command already finished".into()),
            EngineError::CommandFinished
        ));
        assert!(matches!(
            conflict_from_message("something else".into()),
            EngineError::Conflict(_)
        ));
    }

    #[test]
    fn query_encoding_preserves_paths() {
        assert_eq!(encode_query("/tmp/file.txt"), "/tmp/file.txt");
        assert_eq!(encode_query("/tmp/with space"), "/tmp/with%20space");
        assert_eq!(encode_query("a&b=c"), "a%26b%3Dc");
    }
}
