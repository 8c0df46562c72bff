//! Terminator-delimited reader for SMTP input.
//!
//! Commands end at `\r\n`; DATA blocks end at a line holding a single dot.
//! Input is pulled one physical line at a time and the accumulated unit is
//! checked against the terminator after every line, so a terminator split
//! across several socket reads is still found.
//!
//! Every line read runs under its own deadline: the timeout is a sliding idle
//! timeout, not a limit on the whole unit.

use super::error::ReadError;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::time::timeout;

/// Marks the end of one protocol unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// `\r\n`, used for command lines.
    Line,
    /// `\r\n.\r\n`, used while collecting DATA.
    Data,
}

impl Terminator {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Terminator::Line => b"\r\n",
            Terminator::Data => b"\r\n.\r\n",
        }
    }

    fn is_complete(self, unit: &[u8]) -> bool {
        match self {
            Terminator::Line => unit.ends_with(self.as_bytes()),
            // A dot on the very first line is an empty message.
            Terminator::Data => unit.ends_with(self.as_bytes()) || unit == b".\r\n",
        }
    }
}

/// Reads protocol units from one side of a connection.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    max_size: usize,
    idle_timeout: Duration,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_size: usize, idle_timeout: Duration) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_size,
            idle_timeout,
        }
    }

    /// Read until the accumulated input ends with `terminator`.
    ///
    /// The terminator is included in the returned bytes. If the input grows
    /// past the size limit first, everything read so far is dropped and
    /// [`ReadError::TooLarge`] is returned.
    pub async fn read_unit(&mut self, terminator: Terminator) -> Result<Vec<u8>, ReadError> {
        let idle_timeout = self.idle_timeout;
        let mut unit = Vec::new();

        loop {
            // Allow one byte past the limit so an oversized unit is detectable.
            let budget = (self.max_size + 1).saturating_sub(unit.len()) as u64;
            let mut limited = (&mut self.inner).take(budget);
            let read = limited.read_until(b'\n', &mut unit);

            let n = match timeout(idle_timeout, read).await {
                Ok(result) => result?,
                Err(_) => return Err(ReadError::TimedOut(idle_timeout)),
            };
            if n == 0 {
                return Err(ReadError::Closed);
            }
            if unit.len() > self.max_size {
                return Err(ReadError::TooLarge { max: self.max_size });
            }
            if terminator.is_complete(&unit) {
                return Ok(unit);
            }
        }
    }

    /// Read one command line. Invalid UTF-8 is replaced, not rejected.
    pub async fn read_line(&mut self) -> Result<String, ReadError> {
        let unit = self.read_unit(Terminator::Line).await?;
        Ok(String::from_utf8_lossy(&unit).into_owned())
    }

    /// Read a DATA block and strip the final dot line.
    ///
    /// The payload keeps the CRLF that ends its last line.
    pub async fn read_payload(&mut self) -> Result<Bytes, ReadError> {
        let mut unit = self.read_unit(Terminator::Data).await?;
        unit.truncate(unit.len() - 3);
        Ok(Bytes::from(unit))
    }
}
