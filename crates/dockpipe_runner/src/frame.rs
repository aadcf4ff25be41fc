//! Multiplexed exec output framing.
//!
//! When an exec session has no tty the engine interleaves stdout and stderr
//! on one connection. Each frame starts with an 8-byte header:
//!
//! ```text
//! [tag, 0, 0, 0, len_be[0], len_be[1], len_be[2], len_be[3]]
//! ```
//!
//! followed by exactly `len` payload bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};

/// Size of a frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTag {
    Stdin,
    Stdout,
    Stderr,
    /// Engine-side failure; the payload is an error message.
    SystemErr,
}

impl StreamTag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(StreamTag::Stdin),
            1 => Some(StreamTag::Stdout),
            2 => Some(StreamTag::Stderr),
            3 => Some(StreamTag::SystemErr),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            StreamTag::Stdin => 0,
            StreamTag::Stdout => 1,
            StreamTag::Stderr => 2,
            StreamTag::SystemErr => 3,
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: StreamTag,
    pub len: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let len = self.len.to_be_bytes();
        [self.tag.as_byte(), 0, 0, 0, len[0], len[1], len[2], len[3]]
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> RunnerResult<Self> {
        let tag = StreamTag::from_byte(bytes[0]).ok_or_else(|| {
            RunnerError::CorruptStream(format!("unknown stream tag {}", bytes[0]))
        })?;
        let len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self { tag, len })
    }
}

/// Encode a payload as a single frame.
pub fn encode_frame(tag: StreamTag, payload: &[u8]) -> RunnerResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        RunnerError::InvalidArgument(format!("frame payload of {} bytes", payload.len()))
    })?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&FrameHeader { tag, len }.encode());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read the next frame header.
///
/// Returns `Ok(None)` on end of stream at a frame boundary; a stream that
/// ends inside a header is corrupt.
pub async fn read_header<R>(reader: &mut R) -> RunnerResult<Option<FrameHeader>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_LEN];
    let mut filled = 0;

    while filled < HEADER_LEN {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(RunnerError::CopyFailure)?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(RunnerError::CorruptStream(format!(
                "stream ended after {} of {} header bytes",
                filled, HEADER_LEN
            )));
        }
        filled += n;
    }

    FrameHeader::decode(&buf).map(Some)
}

/// Demultiplex frames from `reader` into `stdout` and `stderr`.
///
/// Stdin and stdout frames go to `stdout`, stderr frames to `stderr`.
/// Returns the total number of payload bytes written.
pub async fn demux_copy<R, O, E>(reader: &mut R, stdout: &mut O, stderr: &mut E) -> RunnerResult<u64>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut total = 0u64;

    while let Some(header) = read_header(reader).await? {
        let expected = u64::from(header.len);

        let copied = match header.tag {
            StreamTag::Stdin | StreamTag::Stdout => {
                copy_payload(reader, stdout, expected).await?
            }
            StreamTag::Stderr => copy_payload(reader, stderr, expected).await?,
            StreamTag::SystemErr => {
                let mut message = Vec::with_capacity(header.len.min(4096) as usize);
                let read = (&mut *reader)
                    .take(expected)
                    .read_to_end(&mut message)
                    .await
                    .map_err(RunnerError::CopyFailure)?;
                if read as u64 != expected {
                    return Err(truncated(read as u64, expected));
                }
                return Err(RunnerError::EngineStream(
                    String::from_utf8_lossy(&message).into_owned(),
                ));
            }
        };

        if copied != expected {
            return Err(truncated(copied, expected));
        }
        total += copied;
    }

    debug!("Demultiplexed {} payload bytes", total);
    Ok(total)
}

async fn copy_payload<R, W>(reader: &mut R, sink: &mut W, len: u64) -> RunnerResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut payload = (&mut *reader).take(len);
    tokio::io::copy(&mut payload, sink)
        .await
        .map_err(RunnerError::CopyFailure)
}

fn truncated(copied: u64, expected: u64) -> RunnerError {
    RunnerError::CorruptStream(format!(
        "frame declared {} payload bytes but stream ended after {}",
        expected, copied
    ))
}
