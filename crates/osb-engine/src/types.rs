//! Wire types shared by the HTTP surface, the worker surface and the remote
//! client. Everything here round-trips through serde so the orchestrator can
//! decode worker responses into the same structs the local engine produces.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for `POST /v1/sandboxes`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSandbox {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    /// Main port the reverse proxy should route to when several are exposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Auto-stop timeout in seconds; the default applies when unset or zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    /// Memory limit in MB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    /// CPU limit as a fractional core count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSandboxResponse {
    pub id: String,
    pub name: String,
    pub ports: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Enriched list entry: persisted record plus live runtime state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SandboxSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub running: bool,
    #[serde(default)]
    pub ports: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Curated inspect view; never leaks raw runtime fields.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SandboxDetail {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub running: bool,
    #[serde(default)]
    pub ports: HashMap<String, String>,
    pub memory_mb: i64,
    pub cpus: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Response shape shared by the lifecycle operations; absent fields are
/// omitted so `{"status":"stopped"}` stays minimal.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LifecycleResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
}

impl LifecycleResponse {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ports: None,
            expires_at: None,
            timeout: None,
        }
    }
}

/// Request body for `POST /v1/sandboxes/:id/cmd`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExecCommand {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KillCommand {
    pub signal: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RenewExpiration {
    pub timeout: i64,
}

/// Public command view; timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandDetail {
    pub id: String,
    pub sandbox_id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub exit_code: Option<i64>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

/// Envelope used by the command endpoints (`{"command": …}`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandEnvelope {
    pub command: CommandDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandListEnvelope {
    pub commands: Vec<CommandDetail>,
}

/// Snapshot of captured output; lossy UTF-8 of whatever the ring buffers
/// currently hold.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogSnapshot {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogChannel {
    Stdout,
    Stderr,
}

/// One ND-JSON frame of a followed log stream.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogFrame {
    #[serde(rename = "type")]
    pub channel: LogChannel,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemoryStats {
    pub usage: u64,
    pub limit: u64,
    pub percent: f64,
}

/// Two-sample resource snapshot with percentages rounded to two decimals.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsSnapshot {
    pub cpu_percent: f64,
    pub memory: MemoryStats,
    pub pids: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImageSummary {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub size: i64,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImageDetail {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PullImage {
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PullImageResponse {
    pub status: String,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WriteFile {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WriteFileResponse {
    pub path: String,
    pub status: String,
}

/// `ls`-style listing of a directory inside the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileListing {
    pub path: String,
    pub output: String,
}
