//! File operations inside a running sandbox.
//!
//! All of these run through the runtime's exec facility with shell quoting,
//! so they work against any image that ships a POSIX shell and coreutils.

use tracing::instrument;

use crate::{
    engine::Engine,
    error::EngineError,
    types::{FileContent, FileListing, WriteFileResponse},
};

impl Engine {
    async fn require_running(&self, id: &str) -> Result<String, EngineError> {
        let record = self.require_sandbox(id).await?;
        let info = self
            .runtime()
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
            return Err(EngineError::NotRunning);
        }
        Ok(record.id)
    }

    /// Reads a file with `cat`.
    pub async fn read_file(&self, id: &str, path: &str) -> Result<FileContent, EngineError> {
        let container_id = self.require_running(id).await?;
        let output = self
            .runtime()
            .exec_collect(
                &container_id,
                vec!["cat".to_string(), path.to_string()],
                None,
            )
            .await
            .map_err(EngineError::Runtime)?;
        if !output.success() {
            return Err(EngineError::bad_request(format!(
                "read {path}: {}",
                output.stderr_text()
            )));
        }
        Ok(FileContent {
            path: path.to_string(),
            content: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }

    /// Writes a file, creating parent directories. The content travels over
    /// the exec's attached stdin so arbitrary bytes survive the shell.
    #[instrument(skip(self, content), fields(sandbox_id = %id, path = %path))]
    pub async fn write_file(
        &self,
        id: &str,
        path: &str,
        content: &str,
    ) -> Result<WriteFileResponse, EngineError> {
        let container_id = self.require_running(id).await?;
        let script = format!(
            "mkdir -p \"$(dirname {quoted})\" && cat > {quoted}",
            quoted = shell_quote(path)
        );
        let output = self
            .runtime()
            .exec_collect(
                &container_id,
                vec!["sh".to_string(), "-c".to_string(), script],
                Some(content.as_bytes().to_vec()),
            )
            .await
            .map_err(EngineError::Runtime)?;
        if !output.success() {
            return Err(EngineError::bad_request(format!(
                "write {path}: {}",
                output.stderr_text()
            )));
        }
        Ok(WriteFileResponse {
            path: path.to_string(),
            status: "written".to_string(),
        })
    }

    /// Recursive delete; removing an absent path succeeds.
    pub async fn delete_path(&self, id: &str, path: &str) -> Result<(), EngineError> {
        let container_id = self.require_running(id).await?;
        let output = self
            .runtime()
            .exec_collect(
                &container_id,
                vec!["rm".to_string(), "-rf".to_string(), path.to_string()],
                None,
            )
            .await
            .map_err(EngineError::Runtime)?;
        if !output.success() {
            return Err(EngineError::bad_request(format!(
                "delete {path}: {}",
                output.stderr_text()
            )));
        }
        Ok(())
    }

    /// `ls -la` style listing of a directory.
    pub async fn list_dir(&self, id: &str, path: &str) -> Result<FileListing, EngineError> {
        let container_id = self.require_running(id).await?;
        let output = self
            .runtime()
            .exec_collect(
                &container_id,
                vec!["ls".to_string(), "-la".to_string(), path.to_string()],
                None,
            )
            .await
            .map_err(EngineError::Runtime)?;
        if !output.success() {
            return Err(EngineError::bad_request(format!(
                "list {path}: {}",
                output.stderr_text()
            )));
        }
        Ok(FileListing {
            path: path.to_string(),
            output: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }
}

/// Single-quote shell escaping; embedded quotes become `'\''`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
