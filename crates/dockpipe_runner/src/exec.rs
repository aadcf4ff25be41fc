//! Exec session management.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ExecConfig;
use crate::engine::{ContainerEngine, ExecSession, ExecStatus};
use crate::error::{RunnerError, RunnerResult};
use crate::hijack::HijackedConnection;
use crate::relay::{relay, RelayStreams};

/// Result of running a command to completion through [`ExecManager::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub exec_id: String,
    pub container_id: String,
    /// Exit code, if the process had exited when the relay finished
    pub exit_code: Option<i64>,
    /// Whether the process was still running when the relay finished
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecOutcome {
    /// Check if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Creates, attaches, inspects and resizes exec sessions.
#[derive(Clone)]
pub struct ExecManager {
    engine: Arc<dyn ContainerEngine>,
}

impl ExecManager {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Create an exec session and attach to it.
    pub async fn start(
        &self,
        config: &ExecConfig,
    ) -> RunnerResult<(ExecSession, HijackedConnection)> {
        config.validate()?;

        let session = self.engine.create_exec(config).await?;
        let conn = self.engine.attach_exec(&session).await?;
        debug!("Exec {} attached (tty: {})", session.id, session.tty);

        Ok((session, conn))
    }

    pub async fn inspect(&self, exec_id: &str) -> RunnerResult<ExecStatus> {
        self.engine.inspect_exec(exec_id).await
    }

    /// Poll a session until it reports an exit code.
    ///
    /// Returns `None` if it is still running after `attempts` inspections.
    pub async fn wait_for_exit(
        &self,
        exec_id: &str,
        attempts: u32,
        interval: Duration,
    ) -> RunnerResult<Option<i64>> {
        for attempt in 0..attempts {
            let status = self.engine.inspect_exec(exec_id).await?;
            if !status.running {
                return Ok(status.exit_code);
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        debug!("Exec {} still running after {} inspections", exec_id, attempts);
        Ok(None)
    }

    /// Resize the tty of a session. Sessions without a tty are rejected.
    pub async fn resize(&self, exec_id: &str, rows: u16, cols: u16) -> RunnerResult<()> {
        let status = self.engine.inspect_exec(exec_id).await?;
        if !status.tty {
            return Err(RunnerError::Unsupported(format!(
                "exec {} has no tty to resize",
                exec_id
            )));
        }
        if rows == 0 || cols == 0 {
            return Err(RunnerError::InvalidArgument(format!(
                "terminal size {}x{} is empty",
                rows, cols
            )));
        }

        self.engine.resize_exec(exec_id, rows, cols).await
    }

    /// Start a session, relay its streams until done and report how it ended.
    pub async fn run(&self, config: &ExecConfig, streams: RelayStreams) -> RunnerResult<ExecOutcome> {
        let started_at = Utc::now();
        info!("Exec in {}: {:?}", config.container_id, config.command);

        let (session, conn) = self.start(config).await?;
        relay(conn, streams).await?;
        let status = self.engine.inspect_exec(&session.id).await?;

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        debug!(
            "Exec {} finished (running: {}, exit code: {:?})",
            session.id, status.running, status.exit_code
        );

        Ok(ExecOutcome {
            exec_id: session.id,
            container_id: session.container_id,
            exit_code: status.exit_code,
            running: status.running,
            started_at,
            finished_at,
            duration_ms,
        })
    }
}
