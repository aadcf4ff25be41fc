//! Docker implementation of ContainerEngine.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::Docker;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::config::{EngineConfig, ExecConfig};
use crate::engine::{
    ContainerEngine, ExecSession, ExecStatus, ImageRecord, PrivilegeFn, PullProgress, PullStream,
    RegistryCredentials,
};
use crate::error::{RunnerError, RunnerResult};
use crate::frame::{encode_frame, StreamTag};
use crate::hijack::HijackedConnection;

/// Docker-based container engine.
///
/// The engine stopped reporting a separate virtual size in API 1.43, so
/// image records carry `size` in both fields.
#[derive(Clone)]
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    /// Connect using the given configuration and verify the engine answers.
    pub async fn connect(config: &EngineConfig) -> RunnerResult<Self> {
        let client = match config.host.as_deref() {
            None => Docker::connect_with_local_defaults()?.with_timeout(Duration::from_secs(
                config.timeout_seconds,
            )),
            #[cfg(unix)]
            Some(host) if host.starts_with("unix://") => Docker::connect_with_unix(
                host,
                config.timeout_seconds,
                bollard::API_DEFAULT_VERSION,
            )?,
            Some(host) => Docker::connect_with_http(
                host,
                config.timeout_seconds,
                bollard::API_DEFAULT_VERSION,
            )?,
        };

        let engine = Self { client };
        engine.ping().await?;
        Ok(engine)
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Docker) -> Self {
        Self { client }
    }
}

/// Turn one bollard output chunk back into the bytes the engine sent.
///
/// Tty sessions carry raw console bytes; everything else is framed.
fn wire_bytes(output: LogOutput) -> io::Result<Bytes> {
    let (tag, message) = match output {
        LogOutput::Console { message } => return Ok(message),
        LogOutput::StdIn { message } => (StreamTag::Stdin, message),
        LogOutput::StdOut { message } => (StreamTag::Stdout, message),
        LogOutput::StdErr { message } => (StreamTag::Stderr, message),
    };
    encode_frame(tag, &message)
        .map(Bytes::from)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn docker_credentials(credentials: RegistryCredentials) -> DockerCredentials {
    DockerCredentials {
        username: credentials.username,
        password: credentials.password,
        identitytoken: credentials.identity_token,
        serveraddress: credentials.server_address,
        ..Default::default()
    }
}

fn is_unauthorized(result: &Result<bollard::models::CreateImageInfo, bollard::errors::Error>) -> bool {
    matches!(
        result,
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 401,
            ..
        })
    )
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> RunnerResult<()> {
        self.client
            .ping()
            .await
            .map_err(|e| RunnerError::RemoteUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn create_exec(&self, config: &ExecConfig) -> RunnerResult<ExecSession> {
        config.validate()?;

        let options = CreateExecOptions {
            cmd: Some(config.command.clone()),
            attach_stdin: Some(config.attach_stdin),
            attach_stdout: Some(config.attach_stdout),
            attach_stderr: Some(config.attach_stderr),
            tty: Some(config.tty),
            env: if config.env.is_empty() {
                None
            } else {
                Some(config.env.clone())
            },
            working_dir: config.workdir.clone(),
            user: config.user.clone(),
            privileged: Some(config.privileged),
            ..Default::default()
        };

        let created = self.client.create_exec(&config.container_id, options).await?;
        debug!(
            "Created exec {} in container {}: {:?}",
            created.id, config.container_id, config.command
        );

        Ok(ExecSession::from_config(created.id, config))
    }

    async fn attach_exec(&self, session: &ExecSession) -> RunnerResult<HijackedConnection> {
        let options = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        match self.client.start_exec(&session.id, Some(options)).await? {
            StartExecResults::Attached { output, input } => {
                debug!("[hijack] Attached to exec {}", session.id);
                let output = output.map(|chunk| {
                    chunk
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
                        .and_then(wire_bytes)
                });
                Ok(HijackedConnection::from_parts(
                    Box::pin(StreamReader::new(output)),
                    input,
                ))
            }
            StartExecResults::Detached => {
                debug!("Exec {} started detached, nothing to relay", session.id);
                Ok(HijackedConnection::new(tokio::io::empty(), tokio::io::sink()))
            }
        }
    }

    async fn inspect_exec(&self, exec_id: &str) -> RunnerResult<ExecStatus> {
        let inspect = self.client.inspect_exec(exec_id).await?;

        Ok(ExecStatus {
            id: inspect.id.unwrap_or_else(|| exec_id.to_string()),
            container_id: inspect.container_id.unwrap_or_default(),
            running: inspect.running.unwrap_or(false),
            exit_code: inspect.exit_code,
            pid: inspect.pid,
            tty: inspect
                .process_config
                .and_then(|process| process.tty)
                .unwrap_or(false),
        })
    }

    async fn resize_exec(&self, exec_id: &str, rows: u16, cols: u16) -> RunnerResult<()> {
        self.client
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await?;
        Ok(())
    }

    async fn list_images(&self) -> RunnerResult<Vec<ImageRecord>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };

        let images = self.client.list_images(Some(options)).await?;
        Ok(images
            .into_iter()
            .map(|summary| ImageRecord {
                id: summary.id,
                repo_tags: summary.repo_tags,
                size: summary.size,
                virtual_size: summary.size,
            })
            .collect())
    }

    async fn inspect_image(&self, image: &str) -> RunnerResult<ImageRecord> {
        let inspect = self.client.inspect_image(image).await?;
        let size = inspect.size.unwrap_or_default();

        Ok(ImageRecord {
            id: inspect.id.unwrap_or_default(),
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            size,
            virtual_size: size,
        })
    }

    async fn pull_image(&self, reference: &str, privilege: PrivilegeFn) -> RunnerResult<PullStream> {
        info!("Pulling image {}", reference);

        let options = || CreateImageOptions::<String> {
            from_image: reference.to_string(),
            ..Default::default()
        };

        let mut anonymous = Box::pin(self.client.create_image(Some(options()), None, None));
        let first = anonymous.next().await;

        let progress = if first.as_ref().is_some_and(is_unauthorized) {
            debug!("Registry requires credentials for {}", reference);
            let credentials = docker_credentials(privilege()?);
            self.client
                .create_image(Some(options()), None, Some(credentials))
                .boxed()
        } else {
            stream::iter(first).chain(anonymous).boxed()
        };

        Ok(Box::pin(progress.map(|item| {
            item.map(|info| PullProgress {
                id: info.id,
                status: info.status,
                progress: info.progress,
                error: info.error,
            })
            .map_err(RunnerError::from)
        })))
    }

    async fn remove_image(&self, image: &str, force: bool, prune: bool) -> RunnerResult<()> {
        let options = RemoveImageOptions {
            force,
            noprune: !prune,
        };

        let removed = self.client.remove_image(image, Some(options), None).await?;
        info!("Removed image {} ({} layers affected)", image, removed.len());
        Ok(())
    }
}
