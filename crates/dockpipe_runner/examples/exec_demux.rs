//! Example: run a command in a container with separate stdout/stderr
//!
//! Run with: cargo run --example exec_demux -- <container> <command...>

use std::sync::Arc;

use dockpipe_runner::{DockerEngine, EngineConfig, ExecConfig, ExecManager, RelayStreams};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let container = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: exec_demux <container> <command...>"))?;
    let command: Vec<String> = args.collect();

    let engine = DockerEngine::connect(&EngineConfig::default()).await?;
    let execs = ExecManager::new(Arc::new(engine));

    // Without a tty the engine multiplexes output, so both sinks can be used.
    let config = ExecConfig::new(container)
        .command(command)
        .attach(false, true, true)
        .tty(false);
    let streams = RelayStreams::new()
        .stdout(tokio::io::stdout())
        .stderr(tokio::io::stderr());

    let outcome = execs.run(&config, streams).await?;
    println!("\nExit code: {:?} ({} ms)", outcome.exit_code, outcome.duration_ms);

    Ok(())
}
