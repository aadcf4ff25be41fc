//! Duplex connection obtained by attaching to an exec session.

use std::fmt;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed read side of a hijacked connection.
pub type ConnReader = Pin<Box<dyn AsyncRead + Send>>;

/// Boxed write side of a hijacked connection.
pub type ConnWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// A duplex byte stream bound to one exec attach call.
///
/// The read side carries the session's output (multiplexed unless the
/// session has a tty). Shutting down the write side signals end of input
/// without closing the read side. A connection is consumed by exactly one
/// relay and is not reusable afterwards.
pub struct HijackedConnection {
    reader: ConnReader,
    writer: ConnWriter,
}

impl HijackedConnection {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        Self::from_parts(Box::pin(reader), Box::pin(writer))
    }

    pub fn from_parts(reader: ConnReader, writer: ConnWriter) -> Self {
        Self { reader, writer }
    }

    /// Split into the read and write halves.
    pub fn into_parts(self) -> (ConnReader, ConnWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for HijackedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HijackedConnection").finish_non_exhaustive()
    }
}
