//! Bidirectional stream relay for attached exec sessions.
//!
//! One task copies the session's output into the caller's sinks, another
//! copies the caller's input into the connection and then half-closes it.
//! Each task reports on its own oneshot channel and the relay finishes on
//! whichever signal settles the outcome first.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};
use crate::frame::demux_copy;
use crate::hijack::{ConnReader, ConnWriter, HijackedConnection};

/// Caller-supplied input source.
pub type InputSource = Box<dyn AsyncRead + Send + Unpin>;

/// Caller-supplied output sink.
pub type OutputSink = Box<dyn AsyncWrite + Send + Unpin>;

/// The caller's side of a relay: an optional input and up to two outputs.
#[derive(Default)]
pub struct RelayStreams {
    pub stdin: Option<InputSource>,
    pub stdout: Option<OutputSink>,
    pub stderr: Option<OutputSink>,
}

impl RelayStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdin(mut self, source: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(source));
        self
    }

    pub fn stdout(mut self, sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(sink));
        self
    }

    pub fn stderr(mut self, sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(sink));
        self
    }

    /// Whether any output sink was supplied.
    pub fn wants_output(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }
}

/// How the connection's output is delivered, fixed when the relay starts.
pub enum OutputStrategy {
    /// Byte-for-byte copy into a single sink, no framing interpreted.
    RawCopy(OutputSink),
    /// Frame-by-frame routing into separate stdout and stderr sinks.
    DemuxCopy {
        stdout: OutputSink,
        stderr: OutputSink,
    },
}

impl OutputStrategy {
    /// Pick the strategy for the supplied sinks.
    ///
    /// A lone sink, whichever stream it was supplied for, receives the raw
    /// combined output.
    pub fn select(stdout: Option<OutputSink>, stderr: Option<OutputSink>) -> Option<Self> {
        match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => Some(OutputStrategy::DemuxCopy { stdout, stderr }),
            (Some(sink), None) | (None, Some(sink)) => Some(OutputStrategy::RawCopy(sink)),
            (None, None) => None,
        }
    }

    pub fn is_demux(&self) -> bool {
        matches!(self, OutputStrategy::DemuxCopy { .. })
    }

    async fn run(self, reader: &mut ConnReader) -> RunnerResult<u64> {
        match self {
            OutputStrategy::RawCopy(mut sink) => tokio::io::copy(reader, &mut sink)
                .await
                .map_err(RunnerError::CopyFailure),
            OutputStrategy::DemuxCopy {
                mut stdout,
                mut stderr,
            } => {
                let total = demux_copy(reader, &mut stdout, &mut stderr).await?;
                stdout.flush().await.map_err(RunnerError::CopyFailure)?;
                stderr.flush().await.map_err(RunnerError::CopyFailure)?;
                Ok(total)
            }
        }
    }
}

/// Relay bytes between the caller's streams and an attached connection.
///
/// Returns once the session's output is exhausted, or once input is
/// exhausted when no output was requested. Only errors on the output path
/// are reported; input copy and half-close failures are logged.
pub async fn relay(conn: HijackedConnection, streams: RelayStreams) -> RunnerResult<()> {
    let RelayStreams {
        stdin,
        stdout,
        stderr,
    } = streams;
    let (reader, writer) = conn.into_parts();

    // The read side stays open for the whole relay even when nobody reads it.
    let (output_done, _idle_reader) = match OutputStrategy::select(stdout, stderr) {
        Some(strategy) => (Some(spawn_output(strategy, reader)), None),
        None => (None, Some(reader)),
    };
    let input_done = spawn_input(stdin, writer);

    let Some(mut output_done) = output_done else {
        if input_done.await.is_err() {
            debug!("[hijack] stdin task ended without signalling");
        }
        return Ok(());
    };

    tokio::select! {
        output = &mut output_done => finish_output(output),
        _ = input_done => finish_output(output_done.await),
    }
}

fn spawn_output(
    strategy: OutputStrategy,
    mut reader: ConnReader,
) -> oneshot::Receiver<RunnerResult<u64>> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = strategy.run(&mut reader).await;
        debug!("[hijack] End of stdout");
        let _ = tx.send(result);
    });
    rx
}

fn spawn_input(stdin: Option<InputSource>, mut writer: ConnWriter) -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Some(mut source) = stdin {
            match tokio::io::copy(&mut source, &mut writer).await {
                Ok(bytes) => debug!("[hijack] End of stdin after {} bytes", bytes),
                Err(e) => debug!("[hijack] stdin copy stopped: {}", e),
            }
        }

        if let Err(e) = writer.shutdown().await {
            debug!("Couldn't send EOF: {}", e);
        }
        let _ = tx.send(());
    });
    rx
}

fn finish_output(
    output: Result<RunnerResult<u64>, oneshot::error::RecvError>,
) -> RunnerResult<()> {
    match output {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            debug!("Error receiveStdout: {}", e);
            Err(e)
        }
        Err(_) => Err(RunnerError::CopyFailure(io::Error::new(
            io::ErrorKind::Other,
            "output task ended without reporting",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::time::timeout;

    use super::*;
    use crate::frame::{encode_frame, StreamTag};
    use crate::mock::CaptureBuffer;

    const DEADLINE: Duration = Duration::from_secs(5);

    /// Connection whose remote end is returned to the test.
    fn connection() -> (HijackedConnection, DuplexStream) {
        let (local, remote) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(local);
        (HijackedConnection::new(reader, writer), remote)
    }

    /// Remote end that drains input until EOF, then writes `output` and hangs up.
    ///
    /// Write errors are ignored: a relay that asked for no output may already
    /// have dropped its side of the connection.
    fn echo_after_eof(
        mut remote: DuplexStream,
        output: Vec<u8>,
    ) -> tokio::task::JoinHandle<Vec<u8>> {
        tokio::spawn(async move {
            let mut received = Vec::new();
            remote.read_to_end(&mut received).await.unwrap();
            let _ = remote.write_all(&output).await;
            let _ = remote.shutdown().await;
            received
        })
    }

    struct FailingSink;

    impl AsyncWrite for FailingSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that accepts data but cannot be half-closed.
    #[derive(Clone, Default)]
    struct BrokenShutdown {
        inner: CaptureBuffer,
    }

    impl AsyncWrite for BrokenShutdown {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "already closed")))
        }
    }

    struct FailingSource;

    impl AsyncRead for FailingSource {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "stdin gone")))
        }
    }

    #[test]
    fn test_strategy_selection() {
        let sink = || -> Option<OutputSink> { Some(Box::new(tokio::io::sink())) };

        assert!(OutputStrategy::select(None, None).is_none());
        assert!(!OutputStrategy::select(sink(), None).unwrap().is_demux());
        assert!(!OutputStrategy::select(None, sink()).unwrap().is_demux());
        assert!(OutputStrategy::select(sink(), sink()).unwrap().is_demux());
    }

    #[tokio::test]
    async fn test_all_stream_combinations_terminate() {
        for with_input in [false, true] {
            for with_stdout in [false, true] {
                for with_stderr in [false, true] {
                    let (conn, remote) = connection();
                    let demux = with_stdout && with_stderr;
                    let output = if demux {
                        let mut bytes = encode_frame(StreamTag::Stdout, b"out").unwrap();
                        bytes.extend(encode_frame(StreamTag::Stderr, b"err").unwrap());
                        bytes
                    } else {
                        b"raw output".to_vec()
                    };
                    let remote = echo_after_eof(remote, output);

                    let stdout = CaptureBuffer::new();
                    let stderr = CaptureBuffer::new();
                    let mut streams = RelayStreams::new();
                    if with_input {
                        streams = streams.stdin(&b"input bytes"[..]);
                    }
                    if with_stdout {
                        streams = streams.stdout(stdout.clone());
                    }
                    if with_stderr {
                        streams = streams.stderr(stderr.clone());
                    }

                    let result = timeout(DEADLINE, relay(conn, streams))
                        .await
                        .unwrap_or_else(|_| {
                            panic!(
                                "relay deadlocked (input={}, stdout={}, stderr={})",
                                with_input, with_stdout, with_stderr
                            )
                        });
                    assert!(result.is_ok());

                    let received = timeout(DEADLINE, remote).await.unwrap().unwrap();
                    if with_input {
                        assert_eq!(received, b"input bytes");
                    } else {
                        assert!(received.is_empty());
                    }

                    if demux {
                        assert_eq!(stdout.contents(), b"out");
                        assert_eq!(stderr.contents(), b"err");
                    } else if with_stdout {
                        assert_eq!(stdout.contents(), b"raw output");
                    } else if with_stderr {
                        assert_eq!(stderr.contents(), b"raw output");
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_output_error_does_not_wait_for_input() {
        let (conn, mut remote) = connection();
        // Input that never ends while `_keep_open` is alive.
        let (_keep_open, endless_stdin) = tokio::io::duplex(64);

        remote.write_all(&[7, 0, 0, 0, 0, 0, 0, 1, b'x']).await.unwrap();

        let streams = RelayStreams::new()
            .stdin(endless_stdin)
            .stdout(CaptureBuffer::new())
            .stderr(CaptureBuffer::new());

        let result = timeout(DEADLINE, relay(conn, streams))
            .await
            .expect("relay blocked on the input task");
        assert!(matches!(result, Err(RunnerError::CorruptStream(_))));
    }

    #[tokio::test]
    async fn test_sink_failure_is_copy_failure() {
        let (conn, mut remote) = connection();
        let (_keep_open, endless_stdin) = tokio::io::duplex(64);
        remote.write_all(b"some output").await.unwrap();

        let streams = RelayStreams::new().stdin(endless_stdin).stdout(FailingSink);

        let result = timeout(DEADLINE, relay(conn, streams)).await.unwrap();
        assert!(matches!(result, Err(RunnerError::CopyFailure(_))));
    }

    #[tokio::test]
    async fn test_input_only_does_not_read_output() {
        // The remote end never writes nor hangs up.
        let (conn, _remote) = connection();
        let streams = RelayStreams::new().stdin(&b"fire and forget"[..]);

        let result = timeout(DEADLINE, relay(conn, streams))
            .await
            .expect("relay waited on the read side");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_output_success_ends_relay_before_input() {
        let (conn, mut remote) = connection();
        let (_keep_open, endless_stdin) = tokio::io::duplex(64);
        let stdout = CaptureBuffer::new();

        remote.write_all(b"done").await.unwrap();
        remote.shutdown().await.unwrap();

        let streams = RelayStreams::new().stdin(endless_stdin).stdout(stdout.clone());
        let result = timeout(DEADLINE, relay(conn, streams)).await.unwrap();

        assert!(result.is_ok());
        assert_eq!(stdout.contents(), b"done");
    }

    #[tokio::test]
    async fn test_remote_hangs_up_immediately() {
        let (conn, remote) = connection();
        drop(remote);
        let stdout = CaptureBuffer::new();

        let streams = RelayStreams::new().stdout(stdout.clone());
        let result = timeout(DEADLINE, relay(conn, streams)).await.unwrap();

        assert!(result.is_ok());
        assert!(stdout.contents().is_empty());
    }

    #[tokio::test]
    async fn test_raw_mode_does_not_interpret_frames() {
        let (conn, remote) = connection();
        let framed = encode_frame(StreamTag::Stderr, b"looks framed").unwrap();
        let remote = echo_after_eof(remote, framed.clone());
        let stdout = CaptureBuffer::new();

        let result = relay(conn, RelayStreams::new().stdout(stdout.clone())).await;

        assert!(result.is_ok());
        assert_eq!(stdout.contents(), framed);
        remote.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_input_half_closes_once() {
        let writer = CaptureBuffer::new();
        let conn = HijackedConnection::new(tokio::io::empty(), writer.clone());

        let result = relay(conn, RelayStreams::new().stdin(tokio::io::empty())).await;

        assert!(result.is_ok());
        assert!(writer.contents().is_empty());
        assert_eq!(writer.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_half_close_is_not_reported() {
        let writer = BrokenShutdown::default();
        let stdout = CaptureBuffer::new();
        let conn = HijackedConnection::new(&b"output"[..], writer.clone());

        let streams = RelayStreams::new()
            .stdin(&b"data"[..])
            .stdout(stdout.clone());
        let result = timeout(DEADLINE, relay(conn, streams)).await.unwrap();

        assert!(result.is_ok());
        assert_eq!(stdout.contents(), b"output");
    }

    #[tokio::test]
    async fn test_failed_half_close_without_output() {
        let writer = BrokenShutdown::default();
        let conn = HijackedConnection::new(tokio::io::empty(), writer.clone());

        let streams = RelayStreams::new().stdin(&b"data"[..]);
        let result = timeout(DEADLINE, relay(conn, streams)).await.unwrap();

        assert!(result.is_ok());
        assert_eq!(writer.inner.contents(), b"data");

        let conn = HijackedConnection::new(tokio::io::empty(), BrokenShutdown::default());
        assert!(relay(conn, RelayStreams::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_input_read_error_is_not_reported() {
        let writer = CaptureBuffer::new();
        let conn = HijackedConnection::new(tokio::io::empty(), writer.clone());

        let result = relay(conn, RelayStreams::new().stdin(FailingSource)).await;

        assert!(result.is_ok());
        assert_eq!(writer.shutdown_count(), 1);

        let (conn, remote) = connection();
        let remote = echo_after_eof(remote, b"still delivered".to_vec());
        let stdout = CaptureBuffer::new();
        let streams = RelayStreams::new()
            .stdin(FailingSource)
            .stdout(stdout.clone());

        let result = timeout(DEADLINE, relay(conn, streams)).await.unwrap();
        assert!(result.is_ok());
        assert_eq!(stdout.contents(), b"still delivered");
        assert!(remote.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_streams_half_closes_once() {
        let writer = CaptureBuffer::new();
        let conn = HijackedConnection::new(tokio::io::empty(), writer.clone());

        relay(conn, RelayStreams::new()).await.unwrap();

        assert_eq!(writer.shutdown_count(), 1);
    }
}
