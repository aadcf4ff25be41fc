//! dockpipe CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Not found
//! - 4: Engine unavailable
//!
//! `exec` exits with the exit code of the executed command instead.

use std::io::Write;

use clap::Parser;
use dockpipe_runner::RunnerError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const NOT_FOUND: u8 = 3;
    pub const ENGINE_UNAVAILABLE: u8 = 4;
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging on stderr so relayed stdout stays clean
    let default_level = if cli.verbose { "dockpipe=debug" } else { "dockpipe=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{}", default_level)));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    let engine_config = cli.engine_config();

    let result = match cli.command {
        Commands::Exec(args) => commands::exec::execute(args, &engine_config).await,
        Commands::Resize(args) => commands::exec::resize(args, &engine_config)
            .await
            .map(|()| ExitCodes::SUCCESS),
        Commands::InspectExec(args) => commands::exec::inspect(args, &engine_config)
            .await
            .map(|()| ExitCodes::SUCCESS),
        Commands::Images(args) => commands::images::execute(args, &engine_config)
            .await
            .map(|()| ExitCodes::SUCCESS),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            categorize_error(&e)
        }
    };

    // A pending stdin read would block runtime shutdown, so exit directly.
    let _ = std::io::stdout().flush();
    std::process::exit(i32::from(code));
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<RunnerError>() {
        Some(RunnerError::NotFound(_)) => ExitCodes::NOT_FOUND,
        Some(RunnerError::InvalidArgument(_)) | Some(RunnerError::Unsupported(_)) => {
            ExitCodes::INVALID_ARGS
        }
        Some(RunnerError::RemoteUnavailable(_)) => ExitCodes::ENGINE_UNAVAILABLE,
        _ => ExitCodes::GENERAL_ERROR,
    }
}
