//! Integration tests for exec relaying and image passthrough.
//!
//! These tests drive the public API through the mock engine and in-memory
//! duplex pipes to avoid requiring an actual Docker installation.

use std::sync::Arc;
use std::time::Duration;

use dockpipe_runner::{
    encode_frame, relay, CaptureBuffer, ExecConfig, ExecManager, HijackedConnection,
    ImageManager, MockEngine, RelayStreams, RunnerError, StreamTag,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(5);

/// Alternating stdout/stderr frames arrive in order on their own sinks.
#[tokio::test]
async fn test_demux_alternating_frames() {
    let chunks: Vec<(StreamTag, String)> = (0..20)
        .map(|i| {
            let tag = if i % 2 == 0 { StreamTag::Stdout } else { StreamTag::Stderr };
            (tag, format!("chunk-{:02};", i))
        })
        .collect();

    let mut wire = Vec::new();
    for (tag, payload) in &chunks {
        wire.extend(encode_frame(*tag, payload.as_bytes()).unwrap());
    }

    let expected_stdout: String = chunks
        .iter()
        .filter(|(tag, _)| *tag == StreamTag::Stdout)
        .map(|(_, p)| p.as_str())
        .collect();
    let expected_stderr: String = chunks
        .iter()
        .filter(|(tag, _)| *tag == StreamTag::Stderr)
        .map(|(_, p)| p.as_str())
        .collect();

    let engine = MockEngine::new().add_container("app").with_exec_output(wire);
    let stdout = CaptureBuffer::new();
    let stderr = CaptureBuffer::new();

    let outcome = ExecManager::new(Arc::new(engine))
        .run(
            &ExecConfig::new("app").cmd("chatty").tty(false),
            RelayStreams::new().stdout(stdout.clone()).stderr(stderr.clone()),
        )
        .await
        .unwrap();

    assert!(outcome.success());
    assert_eq!(stdout.text(), expected_stdout);
    assert_eq!(stderr.text(), expected_stderr);
}

/// Frames split across small writes are reassembled without loss.
#[tokio::test]
async fn test_demux_across_fragmented_reads() {
    let (local, mut remote) = tokio::io::duplex(16);
    let (reader, writer) = tokio::io::split(local);
    let conn = HijackedConnection::new(reader, writer);

    let mut wire = encode_frame(StreamTag::Stdout, b"a fairly long stdout payload").unwrap();
    wire.extend(encode_frame(StreamTag::Stderr, b"and stderr").unwrap());

    let feeder = tokio::spawn(async move {
        for piece in wire.chunks(3) {
            remote.write_all(piece).await.unwrap();
        }
        remote.shutdown().await.unwrap();
        let mut input = Vec::new();
        let _ = remote.read_to_end(&mut input).await;
    });

    let stdout = CaptureBuffer::new();
    let stderr = CaptureBuffer::new();
    let streams = RelayStreams::new().stdout(stdout.clone()).stderr(stderr.clone());

    timeout(DEADLINE, relay(conn, streams)).await.unwrap().unwrap();
    feeder.await.unwrap();

    assert_eq!(stdout.text(), "a fairly long stdout payload");
    assert_eq!(stderr.text(), "and stderr");
}

/// A single sink receives the raw stream even when it contains frames.
#[tokio::test]
async fn test_single_sink_gets_raw_bytes() {
    let wire = encode_frame(StreamTag::Stdout, b"framed").unwrap();
    let engine = MockEngine::new().add_container("app").with_exec_output(wire.clone());
    let stdout = CaptureBuffer::new();

    ExecManager::new(Arc::new(engine))
        .run(
            &ExecConfig::new("app").cmd("cat"),
            RelayStreams::new().stdout(stdout.clone()),
        )
        .await
        .unwrap();

    assert_eq!(stdout.contents(), wire);
}

/// With no output requested the relay waits for input, then half-closes once.
#[tokio::test]
async fn test_input_only_exec_half_closes_once() {
    let engine = MockEngine::new().add_container("db");
    let execs = ExecManager::new(Arc::new(engine.clone()));

    let outcome = execs
        .run(
            &ExecConfig::new("db").cmd("psql").attach(true, false, false),
            RelayStreams::new().stdin(&b"SELECT 1;\n"[..]),
        )
        .await
        .unwrap();

    assert!(outcome.success());
    assert_eq!(engine.stdin().text(), "SELECT 1;\n");
    assert_eq!(engine.stdin().shutdown_count(), 1);
}

/// Corrupt framing surfaces as the relay's error.
#[tokio::test]
async fn test_corrupt_frames_fail_the_exec() {
    let mut wire = encode_frame(StreamTag::Stdout, b"ok").unwrap();
    wire.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 50, b'x']);

    let engine = MockEngine::new().add_container("app").with_exec_output(wire);
    let result = ExecManager::new(Arc::new(engine))
        .run(
            &ExecConfig::new("app").cmd("broken").tty(false),
            RelayStreams::new()
                .stdout(CaptureBuffer::new())
                .stderr(CaptureBuffer::new()),
        )
        .await;

    assert!(matches!(result, Err(RunnerError::CorruptStream(_))));
}

/// Non-zero exit codes are reported, not turned into errors.
#[tokio::test]
async fn test_exit_code_is_reported() {
    let engine = MockEngine::new()
        .add_container("app")
        .with_exec_output("boom\n")
        .with_exit_code(2);

    let outcome = ExecManager::new(Arc::new(engine))
        .run(
            &ExecConfig::new("app").cmd("false"),
            RelayStreams::new().stdout(CaptureBuffer::new()),
        )
        .await
        .unwrap();

    assert!(!outcome.success());
    assert_eq!(outcome.exit_code, Some(2));
}

/// Exec in a missing container is a not-found error.
#[tokio::test]
async fn test_exec_in_missing_container() {
    let engine = MockEngine::new();
    let result = ExecManager::new(Arc::new(engine))
        .run(&ExecConfig::new("ghost").cmd("sh"), RelayStreams::new())
        .await;

    assert!(result.unwrap_err().is_not_found());
}

/// Pull, check, list and remove an image.
#[tokio::test]
async fn test_image_workflow() {
    let engine = MockEngine::new()
        .add_image("sha256:base", &["debian:bookworm"])
        .add_registry_image("redis:latest", "sha256:redis");
    let images = ImageManager::new(Arc::new(engine.clone()));

    assert!(!images.exists("redis").await);

    let pulled = images.pull("redis:latest").await.unwrap();
    assert_eq!(pulled.id, "sha256:redis");
    assert_eq!(pulled.status, "complete");
    assert!(images.exists("redis").await);

    let listed = images.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].slug, "debian:bookworm");

    images.remove("sha256:redis").await.unwrap();
    assert!(!images.exists("redis").await);

    let again = images.remove("sha256:redis").await;
    assert!(again.unwrap_err().is_not_found());
}

/// A failing engine makes exists() answer false and lookup() report why.
#[tokio::test]
async fn test_exists_is_lossy_on_engine_failure() {
    let engine = MockEngine::new()
        .add_image("sha256:1", &["foo"])
        .fail_list("engine unreachable");
    let images = ImageManager::new(Arc::new(engine));

    assert!(!images.exists("foo").await);
    assert!(images.lookup("foo").await.is_err());
}
