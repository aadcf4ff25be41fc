//! Exec and engine configuration types.

use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

/// Configuration for an exec session inside a running container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Container to run the command in
    pub container_id: String,
    /// Command vector
    pub command: Vec<String>,
    /// Attach the caller's stdin
    pub attach_stdin: bool,
    /// Attach stdout
    pub attach_stdout: bool,
    /// Attach stderr
    pub attach_stderr: bool,
    /// Allocate a pseudo-terminal (output is not multiplexed when set)
    pub tty: bool,
    /// Environment variables as `KEY=value` pairs
    pub env: Vec<String>,
    /// Working directory inside the container
    pub workdir: Option<String>,
    /// User to run as (e.g., "1000:1000")
    pub user: Option<String>,
    /// Run with extended privileges
    pub privileged: bool,
}

impl ExecConfig {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            command: Vec::new(),
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty: true,
            env: Vec::new(),
            workdir: None,
            user: None,
            privileged: false,
        }
    }

    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    pub fn cmd(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    /// Set the three attach flags at once.
    pub fn attach(mut self, stdin: bool, stdout: bool, stderr: bool) -> Self {
        self.attach_stdin = stdin;
        self.attach_stdout = stdout;
        self.attach_stderr = stderr;
        self
    }

    pub fn tty(mut self, enabled: bool) -> Self {
        self.tty = enabled;
        self
    }

    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env.push(format!("{}={}", key.as_ref(), value.as_ref()));
        self
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn privileged(mut self, enabled: bool) -> Self {
        self.privileged = enabled;
        self
    }

    /// Reject configurations the engine would refuse anyway.
    pub fn validate(&self) -> RunnerResult<()> {
        if self.container_id.trim().is_empty() {
            return Err(RunnerError::InvalidArgument(
                "container id must not be empty".into(),
            ));
        }
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(RunnerError::InvalidArgument(format!(
                "exec in {} requires a command",
                self.container_id
            )));
        }
        Ok(())
    }
}

/// How the Docker engine client is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine address (None = local defaults, honouring DOCKER_HOST)
    pub host: Option<String>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout_seconds: 120,
        }
    }
}

impl EngineConfig {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}
