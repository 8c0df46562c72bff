//! SMTP connection handler.
//!
//! Drives one session from greeting to teardown: read a unit, step the
//! state machine, write the reply, repeat.

use super::error::{ReadError, SessionError};
use super::reader::LineReader;
use super::response::Reply;
use super::session::{Event, Session, State};
use crate::config::SessionConfig;
use crate::delivery::Delivery;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The client sent QUIT.
    Quit,
    /// The client closed the connection.
    PeerClosed,
    /// No read or write completed within the idle timeout.
    TimedOut,
    /// A command line or DATA block went past the size limit.
    TooLarge,
    /// The session hit the configured round-trip ceiling.
    ExchangeLimit,
}

/// Handle a single client connection.
///
/// The write side is flushed and shut down on every exit path before this
/// returns; the caller owns the admission permit and drops it afterwards.
pub async fn handle_connection<S>(
    stream: S,
    config: &SessionConfig,
    delivery: &dyn Delivery,
) -> Result<Outcome, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = LineReader::new(reader, config.max_data_size, config.timeout);
    let mut writer = BufWriter::new(writer);

    let outcome = run_session(&mut reader, &mut writer, config, delivery).await;

    if let Ok(Err(e)) = timeout(config.timeout, writer.shutdown()).await {
        debug!(error = %e, "Shutdown failed");
    }

    outcome
}

async fn run_session<R, W>(
    reader: &mut LineReader<R>,
    writer: &mut W,
    config: &SessionConfig,
    delivery: &dyn Delivery,
) -> Result<Outcome, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = Session::new(config.hostname.as_str());

    let greeting = session.step(Event::Connected)?;
    if !send(writer, &greeting.reply, config).await? {
        return Ok(Outcome::TimedOut);
    }

    let mut exchanges = 0;
    while !session.is_closed() {
        if config.max_exchanges != 0 && exchanges >= config.max_exchanges {
            debug!(exchanges, "Session length ceiling reached");
            return Ok(Outcome::ExchangeLimit);
        }

        let step = match session.state() {
            State::Command => match reader.read_line().await {
                Ok(line) => session.step(Event::Line(&line))?,
                Err(e) => return read_failed(e, writer, config).await,
            },
            State::ReceivingData => match reader.read_payload().await {
                Ok(payload) => session.step(Event::Payload(&payload))?,
                Err(e) => return read_failed(e, writer, config).await,
            },
            state => return Err(SessionError::OutOfSequence { state }),
        };
        exchanges += 1;

        if let Some(message) = step.message {
            delivery.deliver(message);
        }
        if !send(writer, &step.reply, config).await? {
            return Ok(Outcome::TimedOut);
        }
    }

    Ok(Outcome::Quit)
}

/// Write and flush one reply. Returns `false` if the write timed out.
async fn send<W>(writer: &mut W, reply: &Reply, config: &SessionConfig) -> Result<bool, SessionError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = reply.to_bytes();
    let write = async {
        writer.write_all(&bytes).await?;
        writer.flush().await
    };

    match timeout(config.timeout, write).await {
        Ok(result) => {
            result?;
            Ok(true)
        }
        Err(_) => {
            debug!(code = reply.code, "Reply write timed out");
            Ok(false)
        }
    }
}

/// Map a failed read onto the way the session ends.
async fn read_failed<W>(
    err: ReadError,
    writer: &mut W,
    config: &SessionConfig,
) -> Result<Outcome, SessionError>
where
    W: AsyncWrite + Unpin,
{
    match err {
        ReadError::Closed => {
            debug!("Connection closed by client");
            Ok(Outcome::PeerClosed)
        }
        ReadError::TimedOut(after) => {
            debug!(?after, "Session idle timeout");
            Ok(Outcome::TimedOut)
        }
        ReadError::TooLarge { max } => {
            warn!(max, "Input exceeds size limit, closing session");
            if config.reject_oversized {
                send(writer, &Reply::too_large(), config).await?;
            }
            Ok(Outcome::TooLarge)
        }
        ReadError::Io(e) => Err(e.into()),
    }
}
