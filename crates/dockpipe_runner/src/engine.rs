//! Container engine trait and the records it exchanges.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::config::ExecConfig;
use crate::error::RunnerResult;
use crate::hijack::HijackedConnection;

/// An exec session created by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSession {
    /// Engine-assigned exec id
    pub id: String,
    /// Container the exec runs in
    pub container_id: String,
    /// Command vector
    pub command: Vec<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    /// Whether a tty was allocated (output is then not multiplexed)
    pub tty: bool,
}

impl ExecSession {
    pub fn from_config(id: impl Into<String>, config: &ExecConfig) -> Self {
        Self {
            id: id.into(),
            container_id: config.container_id.clone(),
            command: config.command.clone(),
            attach_stdin: config.attach_stdin,
            attach_stdout: config.attach_stdout,
            attach_stderr: config.attach_stderr,
            tty: config.tty,
        }
    }
}

/// Current state of an exec session as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecStatus {
    pub id: String,
    pub container_id: String,
    pub running: bool,
    /// Exit code, once the process has exited
    pub exit_code: Option<i64>,
    pub pid: Option<i64>,
    pub tty: bool,
}

/// Image facts as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub size: i64,
    pub virtual_size: i64,
}

/// One progress message from an image pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stream of pull progress messages.
pub type PullStream = Pin<Box<dyn Stream<Item = RunnerResult<PullProgress>> + Send>>;

/// Registry credentials handed to the engine when a pull needs them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub identity_token: Option<String>,
    pub server_address: Option<String>,
}

/// Source of registry credentials, asked at most once per pull when the
/// registry rejects an anonymous request.
pub type PrivilegeFn = Arc<dyn Fn() -> RunnerResult<RegistryCredentials> + Send + Sync>;

/// Capabilities of a remote container engine.
///
/// Implementations are pre-configured and connected; every operation is a
/// single request with no retries, and engine errors are surfaced as-is.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the engine answers.
    async fn ping(&self) -> RunnerResult<()>;

    /// Create an exec session inside a running container.
    async fn create_exec(&self, config: &ExecConfig) -> RunnerResult<ExecSession>;

    /// Start the session and hijack its connection.
    async fn attach_exec(&self, session: &ExecSession) -> RunnerResult<HijackedConnection>;

    /// Inspect an exec session.
    async fn inspect_exec(&self, exec_id: &str) -> RunnerResult<ExecStatus>;

    /// Resize the tty of an exec session.
    async fn resize_exec(&self, exec_id: &str, rows: u16, cols: u16) -> RunnerResult<()>;

    /// List images cached by the engine.
    async fn list_images(&self) -> RunnerResult<Vec<ImageRecord>>;

    /// Inspect a single image.
    async fn inspect_image(&self, image: &str) -> RunnerResult<ImageRecord>;

    /// Start pulling an image and return its progress stream.
    async fn pull_image(&self, reference: &str, privilege: PrivilegeFn) -> RunnerResult<PullStream>;

    /// Remove an image.
    async fn remove_image(&self, image: &str, force: bool, prune: bool) -> RunnerResult<()>;
}
