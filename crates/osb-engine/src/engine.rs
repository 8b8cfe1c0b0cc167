//! Sandbox lifecycle engine.
//!
//! Owns the store, the runtime client, the expiration timers and the live
//! command hub. Each operation validates its inputs, drives the runtime,
//! keeps the persisted record in sync and maintains the invariant that a
//! timer is armed exactly while its sandbox runs.

use std::{collections::HashSet, sync::Arc, time::Duration};

use bollard::models::ContainerInspectResponse;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{info, instrument, warn};

use osb_store::{SandboxRecord, Store, StoreError};

use crate::{
    commands::CommandHub,
    error::EngineError,
    names,
    runtime::{host_ports, Runtime},
    timers::ExpirationTimers,
    types::{
        CreateSandbox, CreateSandboxResponse, ImageDetail, ImageSummary, LifecycleResponse,
        MemoryStats, PullImageResponse, SandboxDetail, SandboxSummary, StatsSnapshot,
    },
};

/// Auto-stop default applied when the caller omits a timeout.
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 900;
/// Default resource limits.
pub const DEFAULT_MEMORY_MB: i64 = 1024;
pub const DEFAULT_CPUS: f64 = 1.0;
/// Validation bounds for caller-supplied limits.
pub const MAX_MEMORY_MB: i64 = 8192;
pub const MAX_CPUS: f64 = 4.0;

/// Budget for stopping every tracked container on shutdown.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

/// Called with a sandbox name whenever its port assignments may have
/// changed; the reverse proxy hooks its cache invalidation in here.
pub type InvalidateHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Base domain for proxy URLs (`<name>.<base_domain>`); `None` disables
    /// the `url` field on create responses.
    pub base_domain: Option<String>,
    /// Externally advertised proxy port, included in generated URLs unless
    /// it is 80.
    pub proxy_port: Option<u16>,
}

#[derive(Clone)]
pub struct Engine {
    store: Store,
    runtime: Runtime,
    timers: ExpirationTimers,
    hub: CommandHub,
    config: EngineConfig,
    invalidate: Option<InvalidateHook>,
}

impl Engine {
    pub fn new(store: Store, runtime: Runtime, config: EngineConfig) -> Self {
        Self {
            store,
            runtime,
            timers: ExpirationTimers::new(),
            hub: CommandHub::new(),
            config,
            invalidate: None,
        }
    }

    /// Installs the proxy-cache invalidation hook.
    pub fn with_invalidator(mut self, hook: InvalidateHook) -> Self {
        self.invalidate = Some(hook);
        self
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub(crate) fn hub(&self) -> &CommandHub {
        &self.hub
    }

    pub fn timers(&self) -> &ExpirationTimers {
        &self.timers
    }

    pub async fn health(&self) -> Result<(), EngineError> {
        self.runtime.ping().await.map_err(EngineError::Runtime)
    }

    pub(crate) async fn require_sandbox(&self, id: &str) -> Result<SandboxRecord, EngineError> {
        self.store
            .find_sandbox(id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::NotFound)
    }

    fn invalidate_route(&self, name: &str) {
        if let Some(hook) = &self.invalidate {
            hook(name);
        }
    }

    /// Arms (or replaces) the auto-stop timer and returns its deadline.
    fn arm_timer(&self, sandbox_id: &str, timeout_seconds: i64) -> DateTime<Utc> {
        let after = Duration::from_secs(timeout_seconds.max(1) as u64);
        let engine = self.clone();
        self.timers.schedule(sandbox_id, after, move |id| async move {
            engine.handle_expiration(&id).await;
        });
        self.timers
            .expires_at(sandbox_id)
            .unwrap_or_else(|| Utc::now())
    }

    /// Timer fire path: stops the container on a fresh context, independent
    /// of whatever request armed the timer.
    async fn handle_expiration(&self, sandbox_id: &str) {
        info!(sandbox_id = %sandbox_id, "sandbox expired, stopping");
        if let Err(err) = self.runtime.stop(sandbox_id).await {
            warn!(sandbox_id = %sandbox_id, error = %err, "failed to stop expired sandbox");
        }
    }

    /// Creates a sandbox from a locally-present image, starts it with
    /// publish-all port assignment and arms the auto-stop timer.
    #[instrument(skip(self, request), fields(image = %request.image))]
    pub async fn create_sandbox(
        &self,
        request: CreateSandbox,
    ) -> Result<CreateSandboxResponse, EngineError> {
        if request.image.trim().is_empty() {
            return Err(EngineError::bad_request("image is required"));
        }
        if let Some(timeout) = request.timeout {
            if timeout < 0 {
                return Err(EngineError::bad_request("timeout must not be negative"));
            }
        }
        let memory_mb = request.memory.unwrap_or(DEFAULT_MEMORY_MB);
        if !(0..=MAX_MEMORY_MB).contains(&memory_mb) {
            return Err(EngineError::bad_request(format!(
                "memory must be between 0 and {MAX_MEMORY_MB} MB"
            )));
        }
        let cpus = request.cpus.unwrap_or(DEFAULT_CPUS);
        if !(0.0..=MAX_CPUS).contains(&cpus) {
            return Err(EngineError::bad_request(format!(
                "cpus must be between 0 and {MAX_CPUS}"
            )));
        }

        if !self
            .runtime
            .image_present(&request.image)
            .await
            .map_err(EngineError::Runtime)?
        {
            return Err(EngineError::ImageNotFound(request.image));
        }

        let name = match &request.name {
            Some(name) => {
                validate_name(name)?;
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
                name.clone()
            }
            None => self.generate_name().await?,
        };

        let memory_bytes = memory_mb * 1024 * 1024;
        let nano_cpus = (cpus * 1e9) as i64;

        let container_id = self
            .runtime
            .create_sandbox_container(
                &name,
                &request.image,
                &request.env,
                &request.ports,
                memory_bytes,
                nano_cpus,
            )
            .await
            .map_err(EngineError::Runtime)?;
        self.runtime
            .start(&container_id)
            .await
            .map_err(EngineError::Runtime)?;

        let info = self
            .runtime
            .inspect(&container_id)
            .await
            .map_err(EngineError::Runtime)?
            .ok_or_else(|| {
                EngineError::Runtime(anyhow::anyhow!("container vanished right after start"))
            })?;
        let ports = host_ports(&info);

        let record = SandboxRecord {
            id: container_id.clone(),
            name: name.clone(),
            image: request.image.clone(),
            ports: ports.clone(),
            port: request.port,
            worker_id: None,
        };
        self.store.save_sandbox(&record).await.map_err(map_store_err)?;

        let timeout = normalize_timeout(request.timeout);
        self.arm_timer(&container_id, timeout);

        let exposed = if request.ports.is_empty() {
            declared_ports(&ports)
        } else {
            request.ports.clone()
        };

        info!(sandbox_id = %container_id, name = %name, "sandbox created");
        Ok(CreateSandboxResponse {
            id: container_id,
            name: name.clone(),
            ports: exposed,
            url: self.proxy_url(&name),
        })
    }

    /// Picks a unique name against the engine's own sandbox table.
    pub async fn generate_name(&self) -> Result<String, EngineError> {
        let taken: HashSet<String> = self
            .store
            .list_sandboxes()
            .await
            .map_err(EngineError::Store)?
            .into_iter()
            .map(|record| record.name)
            .collect();
        Ok(names::generate(|candidate| taken.contains(candidate)))
    }

    fn proxy_url(&self, name: &str) -> Option<String> {
        let domain = self.config.base_domain.as_deref()?;
        Some(match self.config.proxy_port {
            Some(80) | None => format!("http://{name}.{domain}"),
            Some(port) => format!("http://{name}.{domain}:{port}"),
        })
    }

    /// Curated inspect view; a container the runtime no longer knows is
    /// reported with status `removed`.
    pub async fn inspect_sandbox(&self, id: &str) -> Result<SandboxDetail, EngineError> {
        let record = self.require_sandbox(id).await?;
        let info = self
            .runtime
            .inspect(&record.id)
            .await
            .map_err(EngineError::Runtime)?;

        let detail = match info {
            Some(info) => self.detail_from_inspect(&record, &info),
            None => SandboxDetail {
                id: record.id.clone(),
                name: record.name.clone(),
                image: record.image.clone(),
                status: "removed".to_string(),
                running: false,
                ports: record.ports.clone(),
                memory_mb: 0,
                cpus: 0.0,
                started_at: None,
                finished_at: None,
                expires_at: None,
            },
        };
        Ok(detail)
    }

    fn detail_from_inspect(
        &self,
        record: &SandboxRecord,
        info: &ContainerInspectResponse,
    ) -> SandboxDetail {
        let state = info.state.as_ref();
        let status = state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let running = state.and_then(|s| s.running).unwrap_or(false);
        let name = info
            .name
            .as_deref()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| record.name.clone());
        let memory_mb = info
            .host_config
            .as_ref()
            .and_then(|hc| hc.memory)
            .unwrap_or(0)
            / (1024 * 1024);
        let cpus = info
            .host_config
            .as_ref()
            .and_then(|hc| hc.nano_cpus)
            .map(|nano| nano as f64 / 1e9)
            .unwrap_or(0.0);

        SandboxDetail {
            id: record.id.clone(),
            name,
            image: record.image.clone(),
            status,
            running,
            ports: host_ports(info),
            memory_mb,
            cpus,
            started_at: state.and_then(|s| s.started_at.clone()),
            finished_at: state.and_then(|s| s.finished_at.clone()),
            expires_at: self.timers.expires_at(&record.id),
        }
    }

    /// Enumerates persisted records enriched with live runtime state.
    pub async fn list_sandboxes(&self) -> Result<Vec<SandboxSummary>, EngineError> {
        let records = self.store.list_sandboxes().await.map_err(EngineError::Store)?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let info = self
                .runtime
                .inspect(&record.id)
                .await
                .map_err(EngineError::Runtime)?;
            let summary = match info {
                Some(info) => {
                    let state = info.state.as_ref();
                    SandboxSummary {
                        id: record.id.clone(),
                        name: record.name.clone(),
                        image: record.image.clone(),
                        status: state
                            .and_then(|s| s.status)
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                        running: state.and_then(|s| s.running).unwrap_or(false),
                        ports: host_ports(&info),
                        expires_at: self.timers.expires_at(&record.id),
                    }
                }
                None => SandboxSummary {
                    id: record.id.clone(),
                    name: record.name.clone(),
                    image: record.image.clone(),
                    status: "removed".to_string(),
                    running: false,
                    ports: record.ports.clone(),
                    expires_at: None,
                },
            };
            out.push(summary);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn start_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        let record = self.require_sandbox(id).await?;
        let info = self
            .runtime
            .inspect(&record.id)
            .await
            .map_err(EngineError::Runtime)?
            .ok_or(EngineError::NotFound)?;
        if info
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false)
        {
            return Err(EngineError::AlreadyRunning);
        }

        self.runtime.start(&record.id).await.map_err(EngineError::Runtime)?;
        let ports = self.refresh_ports(&record).await?;
        let expires_at = self.arm_timer(&record.id, DEFAULT_TIMEOUT_SECONDS);
        self.invalidate_route(&record.name);

        info!(sandbox_id = %record.id, "sandbox started");
        Ok(LifecycleResponse {
            status: "started".to_string(),
            ports: Some(ports),
            expires_at: Some(expires_at),
            timeout: None,
        })
    }

    #[instrument(skip(self))]
    pub async fn stop_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        let record = self.require_sandbox(id).await?;
        let info = self
            .runtime
            .inspect(&record.id)
            .await
            .map_err(EngineError::Runtime)?
            .ok_or(EngineError::NotFound)?;
        if !info
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false)
        {
            return Err(EngineError::AlreadyStopped);
        }

        // The timer must die before the container so a fire racing this stop
        // cannot observe a half-stopped sandbox.
        self.timers.cancel(&record.id);
        self.runtime.stop(&record.id).await.map_err(EngineError::Runtime)?;

        info!(sandbox_id = %record.id, "sandbox stopped");
        Ok(LifecycleResponse::status("stopped"))
    }

    /// Restart may reassign host ports, so the persisted map is refreshed
    /// and the proxy route dropped.
    #[instrument(skip(self))]
    pub async fn restart_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        let record = self.require_sandbox(id).await?;
        self.runtime
            .inspect(&record.id)
            .await
            .map_err(EngineError::Runtime)?
            .ok_or(EngineError::NotFound)?;

        self.timers.cancel(&record.id);
        self.runtime.restart(&record.id).await.map_err(EngineError::Runtime)?;
        let ports = self.refresh_ports(&record).await?;
        let expires_at = self.arm_timer(&record.id, DEFAULT_TIMEOUT_SECONDS);
        self.invalidate_route(&record.name);

        info!(sandbox_id = %record.id, "sandbox restarted");
        Ok(LifecycleResponse {
            status: "restarted".to_string(),
            ports: Some(ports),
            expires_at: Some(expires_at),
            timeout: None,
        })
    }

    #[instrument(skip(self))]
    pub async fn pause_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        let record = self.require_sandbox(id).await?;
        let info = self
            .runtime
            .inspect(&record.id)
            .await
            .map_err(EngineError::Runtime)?
            .ok_or(EngineError::NotFound)?;
        let state = info.state.as_ref();
        if state.and_then(|s| s.paused).unwrap_or(false) {
            return Err(EngineError::AlreadyPaused);
        }
        if !state.and_then(|s| s.running).unwrap_or(false) {
            return Err(EngineError::NotRunning);
        }

        self.runtime.pause(&record.id).await.map_err(EngineError::Runtime)?;
        Ok(LifecycleResponse::status("paused"))
    }

    #[instrument(skip(self))]
    pub async fn resume_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        let record = self.require_sandbox(id).await?;
        let info = self
            .runtime
            .inspect(&record.id)
            .await
            .map_err(EngineError::Runtime)?
            .ok_or(EngineError::NotFound)?;
        if !info
            .state
            .as_ref()
            .and_then(|s| s.paused)
            .unwrap_or(false)
        {
            return Err(EngineError::NotPaused);
        }

        self.runtime.unpause(&record.id).await.map_err(EngineError::Runtime)?;
        Ok(LifecycleResponse::status("resumed"))
    }

    /// Replaces the auto-stop timer with a fresh deadline.
    pub async fn renew_expiration(
        &self,
        id: &str,
        timeout: i64,
    ) -> Result<LifecycleResponse, EngineError> {
        if timeout <= 0 {
            return Err(EngineError::bad_request("timeout must be greater than zero"));
        }
        let record = self.require_sandbox(id).await?;
        self.timers.cancel(&record.id);
        self.arm_timer(&record.id, timeout);

        Ok(LifecycleResponse {
            status: "renewed".to_string(),
            ports: None,
            expires_at: self.timers.expires_at(&record.id),
            timeout: Some(timeout),
        })
    }

    /// Removes the sandbox, its live commands and every persisted trace.
    /// Idempotent: a missing record or container is cleaned up silently.
    #[instrument(skip(self))]
    pub async fn remove_sandbox(&self, id: &str) -> Result<(), EngineError> {
        let record = self.store.find_sandbox(id).await.map_err(EngineError::Store)?;

        self.timers.cancel(id);
        self.hub.cancel_for_sandbox(id);
        self.runtime.remove(id).await.map_err(EngineError::Runtime)?;
        self.store
            .delete_commands_for_sandbox(id)
            .await
            .map_err(EngineError::Store)?;
        self.store.delete_sandbox(id).await.map_err(EngineError::Store)?;

        if let Some(record) = record {
            self.invalidate_route(&record.name);
            info!(sandbox_id = %record.id, name = %record.name, "sandbox removed");
        }
        Ok(())
    }

    /// Two-sample resource snapshot with guarded denominators.
    pub async fn sandbox_stats(&self, id: &str) -> Result<StatsSnapshot, EngineError> {
        let record = self.require_sandbox(id).await?;
        let stats = self
            .runtime
            .stats_sample(&record.id)
            .await
            .map_err(EngineError::Runtime)?;

        let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64
            - stats.precpu_stats.cpu_usage.total_usage as f64;
        let sys_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        let online_cpus = stats.cpu_stats.online_cpus.unwrap_or(0) as f64;
        let cpu_percent = if cpu_delta > 0.0 && sys_delta > 0.0 {
            (cpu_delta / sys_delta) * online_cpus * 100.0
        } else {
            0.0
        };

        let usage = stats.memory_stats.usage.unwrap_or(0);
        let limit = stats.memory_stats.limit.unwrap_or(0);
        let memory_percent = if limit > 0 {
            usage as f64 / limit as f64 * 100.0
        } else {
            0.0
        };

        Ok(StatsSnapshot {
            cpu_percent: round2(cpu_percent),
            memory: MemoryStats {
                usage,
                limit,
                percent: round2(memory_percent),
            },
            pids: stats.pids_stats.current.unwrap_or(0),
        })
    }

    async fn refresh_ports(
        &self,
        record: &SandboxRecord,
    ) -> Result<std::collections::HashMap<String, String>, EngineError> {
        let info = self
            .runtime
            .inspect(&record.id)
            .await
            .map_err(EngineError::Runtime)?
            .ok_or(EngineError::NotFound)?;
        let ports = host_ports(&info);
        self.store
            .update_sandbox_ports(&record.id, &ports)
            .await
            .map_err(EngineError::Store)?;
        Ok(ports)
    }

    // --- images ----------------------------------------------------------

    pub async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        self.runtime.list_images().await.map_err(EngineError::Runtime)
    }

    pub async fn inspect_image(&self, reference: &str) -> Result<ImageDetail, EngineError> {
        self.runtime
            .inspect_image(reference)
            .await
            .map_err(EngineError::Runtime)?
            .ok_or(EngineError::ImageNotFoundById)
    }

    /// Streams a pull and verifies the image actually landed locally.
    #[instrument(skip(self))]
    pub async fn pull_image(&self, reference: &str) -> Result<PullImageResponse, EngineError> {
        if reference.trim().is_empty() {
            return Err(EngineError::bad_request("image is required"));
        }
        self.runtime
            .pull_image(reference)
            .await
            .map_err(EngineError::Runtime)?;
        if !self
            .runtime
            .image_present(reference)
            .await
            .map_err(EngineError::Runtime)?
        {
            return Err(EngineError::Runtime(anyhow::anyhow!(
                "image {reference} is still absent after pull"
            )));
        }
        Ok(PullImageResponse {
            status: "pulled".to_string(),
            image: reference.to_string(),
        })
    }

    pub async fn remove_image(&self, reference: &str, force: bool) -> Result<(), EngineError> {
        match self.runtime.remove_image(reference, force).await {
            Ok(()) => Ok(()),
            Err(err) => match err.downcast_ref::<bollard::errors::Error>() {
                Some(inner) if crate::runtime::is_not_found(inner) => {
                    Err(EngineError::ImageNotFoundById)
                }
                _ => Err(EngineError::Runtime(err)),
            },
        }
    }

    // --- shutdown --------------------------------------------------------

    /// Orderly shutdown: command workers, timers, then every tracked
    /// container that is still running, all within a bounded window.
    pub async fn shutdown(&self) {
        info!("engine shutdown: cancelling commands and timers");
        self.hub.cancel_all();
        self.timers.cancel_all();

        if tokio::time::timeout(SHUTDOWN_BUDGET, self.stop_tracked_containers())
            .await
            .is_err()
        {
            warn!("shutdown budget exceeded; leaving remaining containers to the runtime");
        }
    }

    async fn stop_tracked_containers(&self) {
        let records = match self.store.list_sandboxes().await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "failed to enumerate sandboxes during shutdown");
                return;
            }
        };

        let stops = records.into_iter().map(|record| {
            let runtime = self.runtime.clone();
            async move {
                match runtime.inspect(&record.id).await {
                    Ok(Some(info))
                        if info.state.as_ref().and_then(|s| s.running).unwrap_or(false) =>
                    {
                        if let Err(err) = runtime.stop(&record.id).await {
                            warn!(sandbox_id = %record.id, error = %err, "failed to stop sandbox during shutdown");
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(sandbox_id = %record.id, error = %err, "failed to inspect sandbox during shutdown");
                    }
                }
            }
        });
        join_all(stops).await;
    }
}

fn normalize_timeout(timeout: Option<i64>) -> i64 {
    match timeout {
        Some(t) if t > 0 => t,
        _ => DEFAULT_TIMEOUT_SECONDS,
    }
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::bad_request("name must not be empty"));
    }
    let dns_safe = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !dns_safe || name.starts_with('-') || name.ends_with('-') {
        return Err(EngineError::bad_request(
            "name must be a DNS-safe label (lowercase letters, digits and dashes)",
        ));
    }
    Ok(())
}

/// Container ports parsed back out of a `"<port>/<proto>"` keyed map.
fn declared_ports(ports: &std::collections::HashMap<String, String>) -> Vec<u16> {
    let mut out: Vec<u16> = ports
        .keys()
        .filter_map(|key| key.split('/').next().and_then(|p| p.parse().ok()))
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

fn map_store_err(err: anyhow::Error) -> EngineError {
    match err.downcast_ref::<StoreError>() {
        Some(StoreError::DuplicateName(name)) => {
            EngineError::Conflict(format!("sandbox name '{name}' is already in use"))
        }
        None => EngineError::Store(err),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CreateSandbox;
    use osb_store::Store;

    // Connecting lazily means no live daemon is needed for the validation
    // paths, which all reject before any runtime call.
    async fn engine() -> Engine {
        let store = Store::open_in_memory().await.unwrap();
        let runtime = Runtime::connect().unwrap();
        Engine::new(store, runtime, EngineConfig::default())
    }

    fn request(image: &str) -> CreateSandbox {
        CreateSandbox {
            image: image.to_string(),
            name: None,
            ports: Vec::new(),
            port: None,
            env: Default::default(),
            timeout: None,
            memory: None,
            cpus: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_missing_image() {
        let engine = engine().await;
        let err = engine.create_sandbox(request("")).await.unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[tokio::test]
    async fn create_rejects_negative_timeout() {
        let engine = engine().await;
        let mut req = request("alpine:latest");
        req.timeout = Some(-1);
        assert!(matches!(
            engine.create_sandbox(req).await.unwrap_err(),
            EngineError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn create_rejects_out_of_range_limits() {
        let engine = engine().await;

        let mut req = request("alpine:latest");
        req.memory = Some(8193);
        assert!(matches!(
            engine.create_sandbox(req).await.unwrap_err(),
            EngineError::BadRequest(_)
        ));

        let mut req = request("alpine:latest");
        req.memory = Some(-1);
        assert!(matches!(
            engine.create_sandbox(req).await.unwrap_err(),
            EngineError::BadRequest(_)
        ));

        let mut req = request("alpine:latest");
        req.cpus = Some(4.5);
        assert!(matches!(
            engine.create_sandbox(req).await.unwrap_err(),
            EngineError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn renew_rejects_non_positive_timeout_before_lookup() {
        let engine = engine().await;
        assert!(matches!(
            engine.renew_expiration("whatever", 0).await.unwrap_err(),
            EngineError::BadRequest(_)
        ));
        assert!(matches!(
            engine.renew_expiration("whatever", -5).await.unwrap_err(),
            EngineError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn renew_unknown_sandbox_is_not_found() {
        let engine = engine().await;
        assert!(matches!(
            engine.renew_expiration("missing", 60).await.unwrap_err(),
            EngineError::NotFound
        ));
    }

    #[tokio::test]
    async fn kill_rejects_non_positive_signal() {
        let engine = engine().await;
        assert!(matches!(
            engine.kill_command("sbx", "cmd_00", 0).await.unwrap_err(),
            EngineError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn operations_on_unknown_sandboxes_are_not_found() {
        let engine = engine().await;
        assert!(matches!(
            engine.inspect_sandbox("missing").await.unwrap_err(),
            EngineError::NotFound
        ));
        assert!(matches!(
            engine.list_commands("missing").await.unwrap_err(),
            EngineError::NotFound
        ));
    }

    #[test]
    fn timeout_normalization_applies_default() {
        assert_eq!(normalize_timeout(None), DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(normalize_timeout(Some(0)), DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(normalize_timeout(Some(60)), 60);
    }

    #[test]
    fn name_validation_rejects_non_dns_labels() {
        assert!(validate_name("brave-curie").is_ok());
        assert!(validate_name("web2").is_ok());
        assert!(validate_name("has_underscore").is_err());
        assert!(validate_name("Capitalized").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn declared_ports_parses_and_sorts_keys() {
        let ports = std::collections::HashMap::from([
            ("8080/tcp".to_string(), "32769".to_string()),
            ("3000/tcp".to_string(), "32768".to_string()),
        ]);
        assert_eq!(declared_ports(&ports), vec![3000, 8080]);
    }

    #[test]
    fn percentages_round_to_two_decimals() {
        assert_eq!(round2(33.33333), 33.33);
        assert_eq!(round2(0.005), 0.01);
        assert_eq!(round2(0.0), 0.0);
    }
}
