//! Errors raised while reading from or driving an SMTP session.

use super::session::State;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure to produce the next protocol unit.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The peer closed its side of the connection.
    #[error("connection closed by peer")]
    Closed,

    #[error("no data received within {0:?}")]
    TimedOut(Duration),

    /// Accumulated input went past the limit; what was read is discarded.
    #[error("protocol unit exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("event not accepted in {state:?} state")]
    OutOfSequence { state: State },

    #[error(transparent)]
    Io(#[from] io::Error),
}

