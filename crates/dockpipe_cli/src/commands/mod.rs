//! CLI command definitions.

use clap::{Parser, Subcommand};
use dockpipe_runner::EngineConfig;

pub mod exec;
pub mod images;

/// dockpipe - exec relay and image tool for container engines
#[derive(Parser)]
#[command(name = "dockpipe")]
#[command(version, about = "dockpipe - exec relay and image tool for container engines")]
#[command(long_about = r#"
dockpipe runs commands inside running containers and relays their
stdin/stdout/stderr over the engine's attach connection. It also wraps the
engine's image calls.

COMMANDS:
  exec          → Run a command in a container and relay its streams
  resize        → Resize the tty of an exec session
  inspect-exec  → Show the state of an exec session
  images        → List, check, pull, inspect and remove images

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Not found
  4 - Engine unavailable
  exec exits with the command's own exit code.
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Engine address (defaults to the local socket)
    #[arg(long, global = true, env = "DOCKER_HOST")]
    pub host: Option<String>,

    /// Engine request timeout in seconds
    #[arg(long, global = true, default_value_t = 120)]
    pub timeout: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        let config = EngineConfig::default().timeout(self.timeout);
        match &self.host {
            Some(host) => config.host(host.clone()),
            None => config,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command in a running container
    Exec(exec::ExecArgs),

    /// Resize the tty of an exec session
    Resize(exec::ResizeArgs),

    /// Show the state of an exec session
    #[command(name = "inspect-exec")]
    InspectExec(exec::InspectArgs),

    /// Manage images
    Images(images::ImagesArgs),
}
