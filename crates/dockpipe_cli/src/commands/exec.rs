//! Exec commands - run, resize and inspect exec sessions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use tracing::{debug, info, warn};

use dockpipe_runner::{DockerEngine, EngineConfig, ExecConfig, ExecManager, RelayStreams};

use crate::ExitCodes;

/// Inspections made when output closes before the process has exited.
const EXIT_POLL_ATTEMPTS: u32 = 20;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Args)]
pub struct ExecArgs {
    /// Container to run the command in
    container: String,

    /// Command and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Do not forward stdin
    #[arg(long)]
    no_stdin: bool,

    /// Do not allocate a tty
    #[arg(long)]
    no_tty: bool,

    /// Keep stderr separate from stdout (requires --no-tty)
    #[arg(long)]
    separate_stderr: bool,

    /// Environment variables (KEY=value)
    #[arg(short, long)]
    env: Vec<String>,

    /// Working directory inside the container
    #[arg(short, long)]
    workdir: Option<String>,

    /// User to run as
    #[arg(short, long)]
    user: Option<String>,
}

#[derive(Args)]
pub struct ResizeArgs {
    /// Exec session id
    exec_id: String,

    /// Terminal rows
    rows: u16,

    /// Terminal columns
    cols: u16,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Exec session id
    exec_id: String,
}

async fn manager(engine_config: &EngineConfig) -> Result<ExecManager> {
    let engine = DockerEngine::connect(engine_config).await?;
    Ok(ExecManager::new(Arc::new(engine)))
}

/// Run the command and return its exit code.
pub async fn execute(args: ExecArgs, engine_config: &EngineConfig) -> Result<u8> {
    if args.separate_stderr && !args.no_tty {
        bail!("--separate-stderr needs --no-tty: tty output is not multiplexed");
    }

    let mut config = ExecConfig::new(&args.container)
        .command(args.command)
        .attach(!args.no_stdin, true, true)
        .tty(!args.no_tty);
    for pair in &args.env {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid environment variable (expected KEY=value): {}", pair);
        };
        config = config.env(key, value);
    }
    if let Some(dir) = args.workdir {
        config = config.workdir(dir);
    }
    if let Some(user) = args.user {
        config = config.user(user);
    }

    let mut streams = RelayStreams::new().stdout(tokio::io::stdout());
    if !args.no_stdin {
        streams = streams.stdin(tokio::io::stdin());
    }
    if args.separate_stderr {
        streams = streams.stderr(tokio::io::stderr());
    }

    let execs = manager(engine_config).await?;
    let outcome = execs.run(&config, streams).await?;
    debug!("Exec {} took {} ms", outcome.exec_id, outcome.duration_ms);

    let exit_code = match outcome.exit_code {
        Some(code) => Some(code),
        None => {
            debug!("Exec {} still running after its output closed", outcome.exec_id);
            execs
                .wait_for_exit(&outcome.exec_id, EXIT_POLL_ATTEMPTS, EXIT_POLL_INTERVAL)
                .await?
        }
    };
    if exit_code.is_none() {
        warn!("Exec {} did not report an exit code", outcome.exec_id);
    }
    Ok(exit_status(exit_code))
}

/// Map a command's exit code to the process exit status.
///
/// An unknown exit code is a general error, never success.
fn exit_status(exit_code: Option<i64>) -> u8 {
    match exit_code {
        Some(code) => u8::try_from(code).unwrap_or(ExitCodes::GENERAL_ERROR),
        None => ExitCodes::GENERAL_ERROR,
    }
}

pub async fn resize(args: ResizeArgs, engine_config: &EngineConfig) -> Result<()> {
    let execs = manager(engine_config).await?;
    execs.resize(&args.exec_id, args.rows, args.cols).await?;
    info!("Resized exec {} to {}x{}", args.exec_id, args.rows, args.cols);
    Ok(())
}

pub async fn inspect(args: InspectArgs, engine_config: &EngineConfig) -> Result<()> {
    let execs = manager(engine_config).await?;
    let status = execs.inspect(&args.exec_id).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
