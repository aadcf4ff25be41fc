//! # dockpipe_runner
//!
//! Exec stream relay and image passthrough on top of a container engine.
//!
//! The engine owns every container, image and exec session; this crate only
//! forwards calls to it. The interesting part is [`relay`], which moves
//! stdin/stdout/stderr between a caller and an attached exec session over a
//! single hijacked connection, demultiplexing framed output when the caller
//! wants stdout and stderr kept apart.
//!
//! # Features
//!
//! - **Stream Relay**: concurrent input/output copy with coordinated half-close
//! - **Demultiplexing**: stdout/stderr frame routing for non-tty sessions
//! - **Exec Sessions**: create, attach, inspect and resize
//! - **Images**: exists, pull, list, inspect and remove
//! - **Mock Engine**: for testing without an actual Docker engine
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dockpipe_runner::{DockerEngine, EngineConfig, ExecConfig, ExecManager, RelayStreams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = DockerEngine::connect(&EngineConfig::default()).await?;
//!     let execs = ExecManager::new(Arc::new(engine));
//!
//!     let config = ExecConfig::new("my-container")
//!         .command(vec!["ls".to_string(), "-la".to_string()])
//!         .tty(false);
//!
//!     let streams = RelayStreams::new()
//!         .stdout(tokio::io::stdout())
//!         .stderr(tokio::io::stderr());
//!
//!     let outcome = execs.run(&config, streams).await?;
//!     println!("Exit code: {:?}", outcome.exit_code);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod exec;
pub mod frame;
pub mod hijack;
pub mod images;
pub mod mock;
pub mod relay;

pub use config::{EngineConfig, ExecConfig};
pub use docker::DockerEngine;
pub use engine::{
    ContainerEngine, ExecSession, ExecStatus, ImageRecord, PrivilegeFn, PullProgress, PullStream,
    RegistryCredentials,
};
pub use error::{RunnerError, RunnerResult};
pub use exec::{ExecManager, ExecOutcome};
pub use frame::{demux_copy, encode_frame, FrameHeader, StreamTag};
pub use hijack::HijackedConnection;
pub use images::{no_privilege, Image, ImageManager};
pub use mock::{CaptureBuffer, CapturedCall, MockEngine};
pub use relay::{relay, OutputStrategy, RelayStreams};
