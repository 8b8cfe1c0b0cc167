//! Asynchronous command execution inside running sandboxes.
//!
//! Commands are tracked independently of the HTTP request that started them.
//! While a command runs (and for a retention window after it finishes) an
//! in-memory record holds its ring buffers, a cancel handle and a completion
//! signal; the durable row in the store is what survives afterwards.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bollard::container::LogOutput;
use bollard::exec::StartExecResults;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use osb_store::CommandRecord;

use crate::{
    backend::LogStream,
    engine::Engine,
    error::EngineError,
    ring::RingBuffer,
    types::{CommandDetail, ExecCommand, LogChannel, LogFrame, LogSnapshot},
};

/// How long the in-memory record outlives command completion so late
/// followers can still read logs.
pub const COMMAND_RETENTION: Duration = Duration::from_secs(5 * 60);

/// How long `kill` waits for the completion signal before answering.
const KILL_WAIT: Duration = Duration::from_millis(500);

/// Live state of a command while its worker runs (plus the retention window).
pub struct LiveCommand {
    pub id: String,
    pub sandbox_id: String,
    pub command: String,
    pub args: Vec<String>,
    pub stdout: RingBuffer,
    pub stderr: RingBuffer,
    pub cancel: CancellationToken,
    completion: watch::Sender<bool>,
    exit_code: Mutex<Option<i64>>,
}

impl LiveCommand {
    fn new(id: String, sandbox_id: String, command: String, args: Vec<String>) -> Self {
        let (completion, _) = watch::channel(false);
        Self {
            id,
            sandbox_id,
            command,
            args,
            stdout: RingBuffer::new(),
            stderr: RingBuffer::new(),
            cancel: CancellationToken::new(),
            completion,
            exit_code: Mutex::new(None),
        }
    }

    pub fn exit_code(&self) -> Option<i64> {
        *self.exit_code.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Fresh receiver over the completion signal.
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.completion.subscribe()
    }

    fn mark_finished(&self, exit_code: i64) {
        *self.exit_code.lock() = Some(exit_code);
        self.completion.send_replace(true);
    }

    /// The space-joined command line, as matched by `pkill -f`.
    pub fn joined_command(&self) -> String {
        let mut joined = self.command.clone();
        for arg in &self.args {
            joined.push(' ');
            joined.push_str(arg);
        }
        joined
    }
}

/// Concurrent map of live command records keyed by command id.
#[derive(Clone, Default)]
pub struct CommandHub {
    live: Arc<RwLock<HashMap<String, Arc<LiveCommand>>>>,
}

impl CommandHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, command: Arc<LiveCommand>) {
        self.live.write().insert(command.id.clone(), command);
    }

    pub fn get(&self, id: &str) -> Option<Arc<LiveCommand>> {
        self.live.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.live.write().remove(id);
    }

    /// Cancels every live command belonging to a sandbox.
    pub fn cancel_for_sandbox(&self, sandbox_id: &str) {
        for command in self.live.read().values() {
            if command.sandbox_id == sandbox_id {
                command.cancel.cancel();
            }
        }
    }

    pub fn cancel_all(&self) {
        for command in self.live.read().values() {
            command.cancel.cancel();
        }
    }

    /// Drops the in-memory record once the retention window elapses.
    pub fn schedule_removal(&self, id: String, after: Duration) {
        let hub = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            hub.remove(&id);
        });
    }
}

/// Mints a `cmd_` identifier with 128 bits of entropy (40 hex chars).
pub fn mint_command_id() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut id = String::with_capacity(4 + 40);
    id.push_str("cmd_");
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(id, "{byte:02x}");
    }
    id
}

fn detail_from_record(record: CommandRecord) -> CommandDetail {
    CommandDetail {
        id: record.id,
        sandbox_id: record.sandbox_id,
        command: record.name,
        args: record.args,
        cwd: record.cwd,
        exit_code: record.exit_code,
        started_at: record.started_at,
        finished_at: record.finished_at,
    }
}

impl Engine {
    /// Launches a command inside a running sandbox and returns immediately;
    /// a background worker demultiplexes output into the ring buffers and
    /// flushes completion state when the stream ends.
    #[instrument(skip(self, request), fields(sandbox_id = %sandbox_id))]
    pub async fn exec_command(
        &self,
        sandbox_id: &str,
        request: ExecCommand,
    ) -> Result<CommandDetail, EngineError> {
        if request.command.trim().is_empty() {
            return Err(EngineError::bad_request("command is required"));
        }

        let record = self.require_sandbox(sandbox_id).await?;
        let info = self
            .runtime()
            .inspect(&record.id)
            .await
            .map_err(EngineError::Runtime)?
            .ok_or(EngineError::NotFound)?;
        let running = info
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        if !running {
            return Err(EngineError::NotRunning);
        }

        let command_id = mint_command_id();
        let started_at = Utc::now().timestamp_millis();
        let row = CommandRecord {
            id: command_id.clone(),
            sandbox_id: record.id.clone(),
            name: request.command.clone(),
            args: request.args.clone(),
            cwd: request.cwd.clone(),
            exit_code: None,
            started_at,
            finished_at: None,
        };
        self.store()
            .save_command(&row)
            .await
            .map_err(EngineError::Store)?;

        let mut cmd = vec![request.command.clone()];
        cmd.extend(request.args.iter().cloned());

        let (exec_id, results) = self
            .runtime()
            .exec_start(&record.id, cmd, request.cwd.as_deref(), &request.env, false)
            .await
            .map_err(EngineError::Runtime)?;
        let StartExecResults::Attached { output, .. } = results else {
            return Err(EngineError::Runtime(anyhow::anyhow!(
                "exec unexpectedly detached"
            )));
        };

        let live = Arc::new(LiveCommand::new(
            command_id.clone(),
            record.id.clone(),
            request.command,
            request.args,
        ));
        self.hub().insert(live.clone());
        self.spawn_exec_worker(live, exec_id, output);

        debug!(command_id = %command_id, "command started");
        Ok(detail_from_record(row))
    }

    fn spawn_exec_worker(
        &self,
        live: Arc<LiveCommand>,
        exec_id: String,
        mut output: std::pin::Pin<
            Box<dyn futures::Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send>,
        >,
    ) {
        let runtime = self.runtime().clone();
        let store = self.store().clone();
        let hub = self.hub().clone();
        // The worker owns its own cancellation; client disconnects never
        // orphan the command, only `remove` and shutdown do this.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = live.cancel.cancelled() => break,
                    chunk = output.next() => match chunk {
                        Some(Ok(LogOutput::StdOut { message })) => live.stdout.write(&message),
                        Some(Ok(LogOutput::StdErr { message })) => live.stderr.write(&message),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(command_id = %live.id, error = %err, "error reading exec stream");
                        }
                        None => break,
                    },
                }
            }

            let exit_code = runtime.exec_exit_code(&exec_id).await;
            live.stdout.close();
            live.stderr.close();

            let finished_at = Utc::now().timestamp_millis();
            if let Err(err) = store.finish_command(&live.id, exit_code, finished_at).await {
                warn!(command_id = %live.id, error = %err, "failed to persist command completion");
            }
            live.mark_finished(exit_code);
            hub.schedule_removal(live.id.clone(), COMMAND_RETENTION);
            debug!(command_id = %live.id, exit_code, "command finished");
        });
    }

    /// Persisted view, overlaid with the in-memory exit code when the row
    /// has none. The worker persists completion before flipping the live
    /// record, so the overlay only matters when that store flush failed
    /// (it is logged, not retried).
    pub async fn get_command(
        &self,
        sandbox_id: &str,
        command_id: &str,
    ) -> Result<CommandDetail, EngineError> {
        let record = self.require_sandbox(sandbox_id).await?;
        let row = self
            .store()
            .find_command(command_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::CommandNotFound)?;
        if row.sandbox_id != record.id {
            return Err(EngineError::CommandNotFound);
        }

        let mut detail = detail_from_record(row);
        if detail.exit_code.is_none() {
            if let Some(live) = self.hub().get(command_id) {
                detail.exit_code = live.exit_code();
            }
        }
        Ok(detail)
    }

    pub async fn list_commands(&self, sandbox_id: &str) -> Result<Vec<CommandDetail>, EngineError> {
        let record = self.require_sandbox(sandbox_id).await?;
        let rows = self
            .store()
            .list_commands_for_sandbox(&record.id)
            .await
            .map_err(EngineError::Store)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut detail = detail_from_record(row);
                if detail.exit_code.is_none() {
                    if let Some(live) = self.hub().get(&detail.id) {
                        detail.exit_code = live.exit_code();
                    }
                }
                detail
            })
            .collect())
    }

    /// Sends a POSIX signal to the command's process group via `pkill`
    /// against the joined command line, then briefly waits for completion.
    #[instrument(skip(self), fields(sandbox_id = %sandbox_id, command_id = %command_id))]
    pub async fn kill_command(
        &self,
        sandbox_id: &str,
        command_id: &str,
        signal: i32,
    ) -> Result<CommandDetail, EngineError> {
        if signal <= 0 {
            return Err(EngineError::bad_request("signal must be greater than zero"));
        }
        let record = self.require_sandbox(sandbox_id).await?;

        let live = match self.hub().get(command_id) {
            Some(live) if live.sandbox_id == record.id => live,
            _ => {
                let row = self
                    .store()
                    .find_command(command_id)
                    .await
                    .map_err(EngineError::Store)?
                    .ok_or(EngineError::CommandNotFound)?;
                if row.sandbox_id != record.id {
                    return Err(EngineError::CommandNotFound);
                }
                return Err(EngineError::CommandFinished);
            }
        };
        if live.is_finished() {
            return Err(EngineError::CommandFinished);
        }

        // pkill's nonzero exit is ignored: the process may have raced to exit.
        let pkill = vec![
            "pkill".to_string(),
            format!("-{signal}"),
            "-f".to_string(),
            live.joined_command(),
        ];
        self.runtime()
            .exec_collect(&record.id, pkill, None)
            .await
            .map_err(EngineError::Runtime)?;

        let mut completion = live.completion();
        let _ = tokio::time::timeout(KILL_WAIT, completion.wait_for(|done| *done)).await;

        self.get_command(sandbox_id, command_id).await
    }

    /// Blocks until the command completes, then returns the updated detail.
    /// When the in-memory record is already gone the persisted row is final.
    pub async fn wait_command(
        &self,
        sandbox_id: &str,
        command_id: &str,
    ) -> Result<CommandDetail, EngineError> {
        let record = self.require_sandbox(sandbox_id).await?;
        let live = self
            .hub()
            .get(command_id)
            .filter(|live| live.sandbox_id == record.id);

        match live {
            None => self.get_command(sandbox_id, command_id).await,
            Some(live) => {
                let mut completion = live.completion();
                let _ = completion.wait_for(|done| *done).await;
                self.get_command(sandbox_id, command_id).await
            }
        }
    }

    /// Snapshot of captured output. Once the retention window has passed the
    /// buffers are gone and the snapshot is empty.
    pub async fn command_logs(
        &self,
        sandbox_id: &str,
        command_id: &str,
    ) -> Result<LogSnapshot, EngineError> {
        // Validates both ids.
        self.get_command(sandbox_id, command_id).await?;

        match self.hub().get(command_id) {
            Some(live) => Ok(LogSnapshot {
                stdout: String::from_utf8_lossy(&live.stdout.contents()).to_string(),
                stderr: String::from_utf8_lossy(&live.stderr.contents()).to_string(),
            }),
            None => Ok(LogSnapshot {
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }

    /// Live follow of both output streams; the stream ends when both ring
    /// buffers are closed. Interleaving across the two channels is
    /// observed-order only.
    pub async fn stream_command_logs(
        &self,
        sandbox_id: &str,
        command_id: &str,
    ) -> Result<LogStream, EngineError> {
        self.get_command(sandbox_id, command_id).await?;

        let Some(live) = self.hub().get(command_id) else {
            return Ok(Box::pin(futures::stream::empty()));
        };

        let (tx, rx) = mpsc::channel::<LogFrame>(64);
        for (channel, ring) in [
            (LogChannel::Stdout, live.stdout.clone()),
            (LogChannel::Stderr, live.stderr.clone()),
        ] {
            let tx = tx.clone();
            let mut reader = ring.reader();
            tokio::spawn(async move {
                while let Some(chunk) = reader.next_chunk().await {
                    let frame = LogFrame {
                        channel,
                        data: String::from_utf8_lossy(&chunk).to_string(),
                    };
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
