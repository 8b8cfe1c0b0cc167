//! Container runtime client.
//!
//! Thin wrapper around the local Docker-compatible daemon (bollard). This is
//! the only module that talks to the runtime; everything above it consumes
//! curated values. Sandbox containers are started with a never-exiting sleep
//! as their entry command so they persist until explicitly acted upon, and
//! with publish-all so the daemon assigns host ports.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
        RestartContainerOptions, StartContainerOptions, Stats, StatsOptions,
        StopContainerOptions,
    },
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    image::{CreateImageOptions, ListImagesOptions, RemoveImageOptions},
    models::{ContainerInspectResponse, HostConfig},
    Docker,
};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::types::{ImageDetail, ImageSummary};

/// Grace period in seconds before the runtime force-kills on stop/restart.
const STOP_GRACE_SECONDS: i64 = 5;

/// Handle to the container runtime; cheap to clone (bollard shares the
/// underlying connection).
#[derive(Clone)]
pub struct Runtime {
    docker: Docker,
}

/// Output of a fully-collected exec run.
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

impl Runtime {
    /// Connects using the platform's local defaults (unix socket / npipe).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("failed to dial the container runtime")?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .context("container runtime ping failed")?;
        Ok(())
    }

    /// True when the image is present in the local image store.
    pub async fn image_present(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err).context("inspect image"),
        }
    }

    /// Creates and returns the id of a sandbox container. The entry command
    /// is overridden with `sleep infinity`; exposed ports are published to
    /// runtime-assigned host ports on start.
    pub async fn create_sandbox_container(
        &self,
        name: &str,
        image: &str,
        env: &HashMap<String, String>,
        exposed_ports: &[u16],
        memory_bytes: i64,
        nano_cpus: i64,
    ) -> Result<String> {
        let env_pairs: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let exposed: HashMap<String, HashMap<(), ()>> = exposed_ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();

        let host_config = HostConfig {
            memory: Some(memory_bytes),
            nano_cpus: Some(nano_cpus),
            publish_all_ports: Some(true),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: Some(env_pairs),
            exposed_ports: if exposed.is_empty() { None } else { Some(exposed) },
            host_config: Some(host_config),
            tty: Some(false),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name,
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .context("create container")?;
        debug!(container_id = %created.id, image = %image, "container created");
        Ok(created.id)
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .context("start container")?;
        Ok(())
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_GRACE_SECONDS }))
            .await
            .context("stop container")?;
        Ok(())
    }

    pub async fn restart(&self, id: &str) -> Result<()> {
        self.docker
            .restart_container(
                id,
                Some(RestartContainerOptions {
                    t: STOP_GRACE_SECONDS as isize,
                }),
            )
            .await
            .context("restart container")?;
        Ok(())
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        self.docker.pause_container(id).await.context("pause container")?;
        Ok(())
    }

    pub async fn unpause(&self, id: &str) -> Result<()> {
        self.docker
            .unpause_container(id)
            .await
            .context("unpause container")?;
        Ok(())
    }

    /// Force-removes the container; a missing container is not an error.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(err).context("remove container"),
        }
    }

    /// Inspects a container; `None` when the runtime no longer knows it.
    pub async fn inspect(&self, id: &str) -> Result<Option<ContainerInspectResponse>> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(Some(info)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err).context("inspect container"),
        }
    }

    /// Creates and attaches an exec instance; the caller drains the output
    /// stream. `attach_stdin` also opens the input half.
    pub async fn exec_start(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        cwd: Option<&str>,
        env: &HashMap<String, String>,
        attach_stdin: bool,
    ) -> Result<(String, StartExecResults)> {
        let env_pairs: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let options = CreateExecOptions::<String> {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            attach_stdin: Some(attach_stdin),
            working_dir: cwd.map(str::to_string),
            env: if env_pairs.is_empty() { None } else { Some(env_pairs) },
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, options)
            .await
            .context("create exec")?;
        let results = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await
            .context("start exec")?;
        Ok((exec.id, results))
    }

    /// Exit code of a finished exec instance; -1 when inspection fails.
    pub async fn exec_exit_code(&self, exec_id: &str) -> i64 {
        match self.docker.inspect_exec(exec_id).await {
            Ok(inspect) => inspect.exit_code.unwrap_or(-1),
            Err(err) => {
                warn!(exec_id = %exec_id, error = %err, "failed to inspect exec instance");
                -1
            }
        }
    }

    /// Runs a command to completion, optionally feeding stdin, and collects
    /// both output streams. Used for file operations and signal delivery.
    pub async fn exec_collect(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput> {
        let attach_stdin = stdin.is_some();
        let (exec_id, results) = self
            .exec_start(container_id, cmd, None, &HashMap::new(), attach_stdin)
            .await?;

        let StartExecResults::Attached { mut output, mut input } = results else {
            return Err(anyhow!("exec unexpectedly detached"));
        };

        let writer = stdin.map(|data| {
            tokio::spawn(async move {
                if let Err(err) = input.write_all(&data).await {
                    warn!(error = %err, "failed to write exec stdin");
                }
                let _ = input.shutdown().await;
            })
        });

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(bollard::container::LogOutput::StdOut { message }) => {
                    stdout.extend_from_slice(&message)
                }
                Ok(bollard::container::LogOutput::StdErr { message }) => {
                    stderr.extend_from_slice(&message)
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "error reading exec output"),
            }
        }
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        let exit_code = self.exec_exit_code(&exec_id).await;
        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// One stats sample; the daemon computes the cpu delta against the
    /// embedded pre-cpu values.
    pub async fn stats_sample(&self, id: &str) -> Result<Stats> {
        let mut stream = self.docker.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );
        stream
            .next()
            .await
            .ok_or_else(|| anyhow!("runtime returned no stats sample"))?
            .context("read stats sample")
    }

    pub async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .context("list images")?;
        Ok(images
            .into_iter()
            .map(|img| ImageSummary {
                id: img.id,
                tags: img.repo_tags,
                size: img.size,
                created: img.created,
            })
            .collect())
    }

    pub async fn inspect_image(&self, reference: &str) -> Result<Option<ImageDetail>> {
        match self.docker.inspect_image(reference).await {
            Ok(info) => Ok(Some(ImageDetail {
                id: info.id.unwrap_or_default(),
                tags: info.repo_tags.unwrap_or_default(),
                size: info.size.unwrap_or_default(),
                created: info.created,
                architecture: info.architecture,
                os: info.os,
            })),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err).context("inspect image"),
        }
    }

    /// Streams a pull; any error payload in the stream fails the call. The
    /// caller verifies local presence afterwards.
    pub async fn pull_image(&self, reference: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(message) = stream.next().await {
            let info = message.context("image pull stream")?;
            if let Some(error) = info.error {
                return Err(anyhow!("image pull failed: {error}"));
            }
            if let Some(status) = info.status {
                debug!(image = %reference, status = %status, "image pull progress");
            }
        }
        Ok(())
    }

    pub async fn remove_image(&self, reference: &str, force: bool) -> Result<()> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_image(reference, Some(options), None)
            .await
            .context("remove image")?;
        Ok(())
    }
}

/// Host-port assignments from an inspect response, keyed by the runtime's
/// `"<port>/<proto>"` form.
pub fn host_ports(info: &ContainerInspectResponse) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(ports) = info
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref())
    {
        for (key, bindings) in ports {
            if let Some(binding) = bindings
                .as_ref()
                .and_then(|list| list.iter().find(|b| b.host_port.is_some()))
            {
                if let Some(host_port) = &binding.host_port {
                    out.insert(key.clone(), host_port.clone());
                }
            }
        }
    }
    out
}

/// True when the runtime reported 404 for the referenced object.
pub fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}
