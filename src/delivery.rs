//! Hand-off point for received messages.
//!
//! The server does not store or relay mail. Once a DATA block has been
//! collected it is wrapped in a [`Message`] and passed to whichever
//! [`Delivery`] implementation the server was built with.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A received message and its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Argument of the last HELO/EHLO (may be empty)
    pub helo_name: String,
    /// Argument of the last MAIL FROM, verbatim
    pub mail_from: String,
    /// Argument of the last RCPT TO, verbatim
    pub mail_to: String,
    /// Payload without the terminating dot line
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

/// Receives every message accepted by a session.
pub trait Delivery: Send + Sync {
    fn deliver(&self, message: Message);
}

/// Logs each message and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelivery;

impl Delivery for LogDelivery {
    fn deliver(&self, message: Message) {
        info!(
            helo = %message.helo_name,
            from = %message.mail_from,
            to = %message.mail_to,
            bytes = message.payload.len(),
            received_at = %message.received_at.to_rfc3339(),
            payload = %String::from_utf8_lossy(&message.payload),
            "Received DATA"
        );
    }
}

/// Forwards messages into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    sender: mpsc::UnboundedSender<Message>,
}

impl ChannelDelivery {
    /// Create a delivery sink and the receiver that observes it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Delivery for ChannelDelivery {
    fn deliver(&self, message: Message) {
        if self.sender.send(message).is_err() {
            warn!("Delivery receiver dropped, discarding message");
        }
    }
}
