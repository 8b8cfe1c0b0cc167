//! The engine contract.
//!
//! Every sandbox operation the HTTP surface exposes goes through this trait.
//! The local [`Engine`](crate::engine::Engine) implements it directly; in
//! distributed mode the orchestrator's remote client implements the same
//! contract by forwarding to the owning worker.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    engine::Engine,
    error::EngineError,
    types::{
        CommandDetail, CreateSandbox, CreateSandboxResponse, ExecCommand, FileContent,
        FileListing, ImageDetail, ImageSummary, LifecycleResponse, LogFrame, LogSnapshot,
        PullImageResponse, SandboxDetail, SandboxSummary, StatsSnapshot, WriteFileResponse,
    },
};

/// Follow stream over a command's captured output.
pub type LogStream = BoxStream<'static, LogFrame>;

#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn health(&self) -> Result<(), EngineError>;

    // sandboxes
    async fn create_sandbox(&self, request: CreateSandbox)
        -> Result<CreateSandboxResponse, EngineError>;
    async fn list_sandboxes(&self) -> Result<Vec<SandboxSummary>, EngineError>;
    async fn inspect_sandbox(&self, id: &str) -> Result<SandboxDetail, EngineError>;
    async fn remove_sandbox(&self, id: &str) -> Result<(), EngineError>;
    async fn start_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError>;
    async fn stop_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError>;
    async fn restart_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError>;
    async fn pause_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError>;
    async fn resume_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError>;
    async fn renew_expiration(&self, id: &str, timeout: i64)
        -> Result<LifecycleResponse, EngineError>;
    async fn sandbox_stats(&self, id: &str) -> Result<StatsSnapshot, EngineError>;

    // commands
    async fn exec_command(&self, id: &str, request: ExecCommand)
        -> Result<CommandDetail, EngineError>;
    async fn list_commands(&self, id: &str) -> Result<Vec<CommandDetail>, EngineError>;
    async fn get_command(&self, id: &str, command_id: &str)
        -> Result<CommandDetail, EngineError>;
    async fn wait_command(&self, id: &str, command_id: &str)
        -> Result<CommandDetail, EngineError>;
    async fn kill_command(
        &self,
        id: &str,
        command_id: &str,
        signal: i32,
    ) -> Result<CommandDetail, EngineError>;
    async fn command_logs(&self, id: &str, command_id: &str)
        -> Result<LogSnapshot, EngineError>;
    async fn stream_command_logs(
        &self,
        id: &str,
        command_id: &str,
    ) -> Result<LogStream, EngineError>;

    // files
    async fn read_file(&self, id: &str, path: &str) -> Result<FileContent, EngineError>;
    async fn write_file(
        &self,
        id: &str,
        path: &str,
        content: &str,
    ) -> Result<WriteFileResponse, EngineError>;
    async fn delete_path(&self, id: &str, path: &str) -> Result<(), EngineError>;
    async fn list_dir(&self, id: &str, path: &str) -> Result<FileListing, EngineError>;

    // images
    async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError>;
    async fn inspect_image(&self, reference: &str) -> Result<ImageDetail, EngineError>;
    async fn pull_image(&self, reference: &str) -> Result<PullImageResponse, EngineError>;
    async fn remove_image(&self, reference: &str, force: bool) -> Result<(), EngineError>;
}

#[async_trait]
impl SandboxBackend for Engine {
    async fn health(&self) -> Result<(), EngineError> {
        Engine::health(self).await
    }

    async fn create_sandbox(
        &self,
        request: CreateSandbox,
    ) -> Result<CreateSandboxResponse, EngineError> {
        Engine::create_sandbox(self, request).await
    }

    async fn list_sandboxes(&self) -> Result<Vec<SandboxSummary>, EngineError> {
        Engine::list_sandboxes(self).await
    }

    async fn inspect_sandbox(&self, id: &str) -> Result<SandboxDetail, EngineError> {
        Engine::inspect_sandbox(self, id).await
    }

    async fn remove_sandbox(&self, id: &str) -> Result<(), EngineError> {
        Engine::remove_sandbox(self, id).await
    }

    async fn start_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        Engine::start_sandbox(self, id).await
    }

    async fn stop_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        Engine::stop_sandbox(self, id).await
    }

    async fn restart_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        Engine::restart_sandbox(self, id).await
    }

    async fn pause_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        Engine::pause_sandbox(self, id).await
    }

    async fn resume_sandbox(&self, id: &str) -> Result<LifecycleResponse, EngineError> {
        Engine::resume_sandbox(self, id).await
    }

    async fn renew_expiration(
        &self,
        id: &str,
        timeout: i64,
    ) -> Result<LifecycleResponse, EngineError> {
        Engine::renew_expiration(self, id, timeout).await
    }

    async fn sandbox_stats(&self, id: &str) -> Result<StatsSnapshot, EngineError> {
        Engine::sandbox_stats(self, id).await
    }

    async fn exec_command(
        &self,
        id: &str,
        request: ExecCommand,
    ) -> Result<CommandDetail, EngineError> {
        Engine::exec_command(self, id, request).await
    }

    async fn list_commands(&self, id: &str) -> Result<Vec<CommandDetail>, EngineError> {
        Engine::list_commands(self, id).await
    }

    async fn get_command(&self, id: &str, command_id: &str)
        -> Result<CommandDetail, EngineError> {
        Engine::get_command(self, id, command_id).await
    }

    async fn wait_command(&self, id: &str, command_id: &str)
        -> Result<CommandDetail, EngineError> {
        Engine::wait_command(self, id, command_id).await
    }

    async fn kill_command(
        &self,
        id: &str,
        command_id: &str,
        signal: i32,
    ) -> Result<CommandDetail, EngineError> {
        Engine::kill_command(self, id, command_id, signal).await
    }

    async fn command_logs(&self, id: &str, command_id: &str)
        -> Result<LogSnapshot, EngineError> {
        Engine::command_logs(self, id, command_id).await
    }

    async fn stream_command_logs(
        &self,
        id: &str,
        command_id: &str,
    ) -> Result<LogStream, EngineError> {
        Engine::stream_command_logs(self, id, command_id).await
    }

    async fn read_file(&self, id: &str, path: &str) -> Result<FileContent, EngineError> {
        Engine::read_file(self, id, path).await
    }

    async fn write_file(
        &self,
        id: &str,
        path: &str,
        content: &str,
    ) -> Result<WriteFileResponse, EngineError> {
        Engine::write_file(self, id, path, content).await
    }

    async fn delete_path(&self, id: &str, path: &str) -> Result<(), EngineError> {
        Engine::delete_path(self, id, path).await
    }

    async fn list_dir(&self, id: &str, path: &str) -> Result<FileListing, EngineError> {
        Engine::list_dir(self, id, path).await
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        Engine::list_images(self).await
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetail, EngineError> {
        Engine::inspect_image(self, reference).await
    }

    async fn pull_image(&self, reference: &str) -> Result<PullImageResponse, EngineError> {
        Engine::pull_image(self, reference).await
    }

    async fn remove_image(&self, reference: &str, force: bool) -> Result<(), EngineError> {
        Engine::remove_image(self, reference, force).await
    }
}
