//! Worker fleet registry (orchestrator side).
//!
//! Holds an in-memory snapshot of active workers, refreshed from the store
//! on every mutation. Placement for `create` uses an atomic round-robin
//! cursor; every other per-sandbox operation goes through `lookup` with the
//! sandbox's owning worker id.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rand::RngCore;
use tracing::info;

use osb_engine::EngineError;
use osb_store::{Store, WorkerRecord, WorkerStatus};

/// Mints a `wrk_` identifier (16 hex chars).
pub fn mint_worker_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut id = String::with_capacity(4 + 16);
    id.push_str("wrk_");
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(id, "{byte:02x}");
    }
    id
}

#[derive(Default)]
struct RegistryState {
    workers: Vec<WorkerRecord>,
    cursor: usize,
}

pub struct WorkerRegistry {
    store: Store,
    state: Mutex<RegistryState>,
}

impl WorkerRegistry {
    /// Builds a registry primed with the store's active workers.
    pub async fn load(store: Store) -> anyhow::Result<Arc<Self>> {
        let registry = Arc::new(Self {
            store,
            state: Mutex::new(RegistryState::default()),
        });
        registry.refresh().await?;
        Ok(registry)
    }

    /// Re-reads the active worker list from the store.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let workers = self.store.list_active_workers().await?;
        let mut state = self.state.lock();
        state.workers = workers;
        if state.cursor >= state.workers.len() {
            state.cursor = 0;
        }
        Ok(())
    }

    /// Upserts a worker by URL: an existing record is re-activated, a new
    /// URL mints a fresh worker id.
    pub async fn register(&self, url: &str, api_key: &str) -> Result<WorkerRecord, EngineError> {
        let url = url.trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(EngineError::bad_request("worker url is required"));
        }

        let existing = self
            .store
            .find_worker_by_url(&url)
            .await
            .map_err(EngineError::Store)?;

        let record = match existing {
            Some(mut record) => {
                record.status = WorkerStatus::Active;
                record.api_key = api_key.to_string();
                record
            }
            None => WorkerRecord {
                id: mint_worker_id(),
                url: url.clone(),
                api_key: api_key.to_string(),
                status: WorkerStatus::Active,
                created_at: Utc::now(),
            },
        };
        self.store
            .save_worker(&record)
            .await
            .map_err(EngineError::Store)?;
        self.refresh().await.map_err(EngineError::Store)?;

        info!(worker_id = %record.id, url = %record.url, "worker registered");
        Ok(record)
    }

    /// Marks a worker inactive. Returns `false` when the id was never
    /// registered; repeating the call on a known worker is harmless.
    pub async fn deregister(&self, id: &str) -> Result<bool, EngineError> {
        if self
            .store
            .find_worker(id)
            .await
            .map_err(EngineError::Store)?
            .is_none()
        {
            return Ok(false);
        }
        self.store
            .update_worker_status(id, WorkerStatus::Inactive)
            .await
            .map_err(EngineError::Store)?;
        self.refresh().await.map_err(EngineError::Store)?;
        info!(worker_id = %id, "worker deregistered");
        Ok(true)
    }

    /// Atomic round-robin selection for new sandbox placement.
    pub fn next(&self) -> Result<WorkerRecord, EngineError> {
        let mut state = self.state.lock();
        if state.workers.is_empty() {
            return Err(EngineError::NoWorkers);
        }
        let index = state.cursor % state.workers.len();
        state.cursor = state.cursor.wrapping_add(1);
        Ok(state.workers[index].clone())
    }

    pub fn lookup(&self, id: &str) -> Option<WorkerRecord> {
        self.state
            .lock()
            .workers
            .iter()
            .find(|worker| worker.id == id)
            .cloned()
    }

    /// Snapshot copy of the active fleet.
    pub fn all(&self) -> Vec<WorkerRecord> {
        self.state.lock().workers.clone()
    }
}
