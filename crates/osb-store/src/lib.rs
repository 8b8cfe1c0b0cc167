//! Persistence layer for the Open Sandbox control plane.
//!
//! A thin async API over a single-file SQLite database (sqlx). The store is
//! the source of truth for durable state: sandbox records, command history
//! and the worker fleet. Live state (timers, ring buffers) never lands here.

use std::{collections::HashMap, path::Path, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use thiserror::Error;

/// SQLite busy timeout when the database is under concurrent load.
const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Errors surfaced by the store that callers branch on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sandbox name '{0}' is already in use")]
    DuplicateName(String),
}

/// Lifecycle status of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Active,
    Inactive,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Inactive => "inactive",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "active" => WorkerStatus::Active,
            _ => WorkerStatus::Inactive,
        }
    }
}

/// Durable sandbox row. `id` is the runtime-assigned container identifier,
/// `ports` maps the runtime's `"<port>/<proto>"` keys to host-port strings.
#[derive(Debug, Clone)]
pub struct SandboxRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub ports: HashMap<String, String>,
    pub port: Option<u16>,
    pub worker_id: Option<String>,
}

/// Durable command row. Timestamps are milliseconds since the Unix epoch;
/// `exit_code` and `finished_at` stay NULL while the command is running.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub id: String,
    pub sandbox_id: String,
    pub name: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub exit_code: Option<i64>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

/// Durable worker row.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: String,
    pub url: String,
    pub api_key: String,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
}

/// Primary entry point to the persistence layer.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (or creates) the database file and runs embedded migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS));
        Self::connect_with(options, 8).await
    }

    /// In-memory database, used by tests and ephemeral setups.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory sqlite options")?;
        Self::connect_with(options, 1).await
    }

    async fn connect_with(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("failed to open sandbox store")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run store migrations")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- sandboxes -------------------------------------------------------

    /// Upserts a sandbox record by id.
    pub async fn save_sandbox(&self, record: &SandboxRecord) -> Result<()> {
        let ports_json =
            serde_json::to_string(&record.ports).context("serialize sandbox ports")?;
        sqlx::query(
            r#"
            INSERT INTO sandboxes (id, name, image, ports, port, worker_id)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                image = excluded.image,
                ports = excluded.ports,
                port = excluded.port,
                worker_id = excluded.worker_id
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.image)
        .bind(ports_json)
        .bind(record.port.map(|p| p as i64))
        .bind(&record.worker_id)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                anyhow::Error::new(StoreError::DuplicateName(record.name.clone()))
            } else {
                err.into()
            }
        })?;
        Ok(())
    }

    pub async fn find_sandbox(&self, id: &str) -> Result<Option<SandboxRecord>> {
        let row = sqlx::query("SELECT * FROM sandboxes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_sandbox).transpose()
    }

    pub async fn find_sandbox_by_name(&self, name: &str) -> Result<Option<SandboxRecord>> {
        let row = sqlx::query("SELECT * FROM sandboxes WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_sandbox).transpose()
    }

    pub async fn list_sandboxes(&self) -> Result<Vec<SandboxRecord>> {
        let mut rows = sqlx::query("SELECT * FROM sandboxes ORDER BY name ASC").fetch(&self.pool);
        let mut out = Vec::new();
        while let Some(row) = rows.try_next().await? {
            out.push(map_sandbox(row)?);
        }
        Ok(out)
    }

    /// Replaces the persisted port map for a sandbox in one statement.
    pub async fn update_sandbox_ports(
        &self,
        id: &str,
        ports: &HashMap<String, String>,
    ) -> Result<()> {
        let ports_json = serde_json::to_string(ports).context("serialize sandbox ports")?;
        sqlx::query("UPDATE sandboxes SET ports = ? WHERE id = ?")
            .bind(ports_json)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Idempotent delete; removing an absent row is not an error.
    pub async fn delete_sandbox(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sandboxes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- commands --------------------------------------------------------

    pub async fn save_command(&self, record: &CommandRecord) -> Result<()> {
        let args_json = serde_json::to_string(&record.args).context("serialize command args")?;
        sqlx::query(
            r#"
            INSERT INTO commands (id, sandbox_id, name, args, cwd, exit_code, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.sandbox_id)
        .bind(&record.name)
        .bind(args_json)
        .bind(&record.cwd)
        .bind(record.exit_code)
        .bind(record.started_at)
        .bind(record.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_command(&self, id: &str) -> Result<Option<CommandRecord>> {
        let row = sqlx::query("SELECT * FROM commands WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_command).transpose()
    }

    /// Commands belonging to a sandbox, oldest first.
    pub async fn list_commands_for_sandbox(&self, sandbox_id: &str) -> Result<Vec<CommandRecord>> {
        let mut rows =
            sqlx::query("SELECT * FROM commands WHERE sandbox_id = ? ORDER BY started_at ASC")
                .bind(sandbox_id)
                .fetch(&self.pool);
        let mut out = Vec::new();
        while let Some(row) = rows.try_next().await? {
            out.push(map_command(row)?);
        }
        Ok(out)
    }

    /// Marks a command as finished with its exit code and completion instant.
    pub async fn finish_command(&self, id: &str, exit_code: i64, finished_at: i64) -> Result<()> {
        sqlx::query("UPDATE commands SET exit_code = ?, finished_at = ? WHERE id = ?")
            .bind(exit_code)
            .bind(finished_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_commands_for_sandbox(&self, sandbox_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM commands WHERE sandbox_id = ?")
            .bind(sandbox_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- workers ---------------------------------------------------------

    pub async fn save_worker(&self, record: &WorkerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, url, api_key, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                api_key = excluded.api_key,
                status = excluded.status
            "#,
        )
        .bind(&record.id)
        .bind(&record.url)
        .bind(&record.api_key)
        .bind(record.status.as_str())
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_worker(&self, id: &str) -> Result<Option<WorkerRecord>> {
        let row = sqlx::query("SELECT * FROM workers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_worker).transpose()
    }

    pub async fn find_worker_by_url(&self, url: &str) -> Result<Option<WorkerRecord>> {
        let row = sqlx::query("SELECT * FROM workers WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_worker).transpose()
    }

    pub async fn list_active_workers(&self) -> Result<Vec<WorkerRecord>> {
        let mut rows =
            sqlx::query("SELECT * FROM workers WHERE status = 'active' ORDER BY created_at ASC")
                .fetch(&self.pool);
        let mut out = Vec::new();
        while let Some(row) = rows.try_next().await? {
            out.push(map_worker(row)?);
        }
        Ok(out)
    }

    pub async fn update_worker_status(&self, id: &str, status: WorkerStatus) -> Result<()> {
        sqlx::query("UPDATE workers SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn map_sandbox(row: SqliteRow) -> Result<SandboxRecord> {
    let ports_json: String = row.try_get("ports")?;
    let ports: HashMap<String, String> =
        serde_json::from_str(&ports_json).context("decode sandbox ports column")?;
    let port: Option<i64> = row.try_get("port")?;
    Ok(SandboxRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        image: row.try_get("image")?,
        ports,
        port: port.map(|p| p as u16),
        worker_id: row.try_get("worker_id")?,
    })
}

fn map_command(row: SqliteRow) -> Result<CommandRecord> {
    let args_json: String = row.try_get("args")?;
    let args: Vec<String> =
        serde_json::from_str(&args_json).context("decode command args column")?;
    Ok(CommandRecord {
        id: row.try_get("id")?,
        sandbox_id: row.try_get("sandbox_id")?,
        name: row.try_get("name")?,
        args,
        cwd: row.try_get("cwd")?,
        exit_code: row.try_get("exit_code")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn map_worker(row: SqliteRow) -> Result<WorkerRecord> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|err| anyhow!("decode worker created_at: {err}"))?
        .with_timezone(&Utc);
    Ok(WorkerRecord {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        api_key: row.try_get("api_key")?,
        status: WorkerStatus::parse(&status),
        created_at,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| matches!(code.as_ref(), "2067" | "1555"))
            .unwrap_or(false),
        _ => false,
    }
}
