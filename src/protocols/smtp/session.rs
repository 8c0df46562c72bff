//! Session state machine.
//!
//! A [`Session`] holds the envelope of one connection and interprets one
//! event at a time. It performs no I/O: the connection handler reads the
//! next unit, feeds it in with [`Session::step`] and writes back the reply.
//!
//! ```text
//! Greeting --Connected--> Command --DATA--> ReceivingData --Payload--> Command
//!                            |
//!                            +--QUIT--> Closed
//! ```

use super::error::SessionError;
use super::parser::{self, Command};
use super::response::Reply;
use crate::delivery::Message;
use bytes::Bytes;
use chrono::Utc;
use tracing::trace;

/// Current session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Connection accepted, greeting not yet sent.
    Greeting,
    /// Waiting for a command line.
    Command,
    /// Collecting a DATA block.
    ReceivingData,
    /// QUIT received. Terminal.
    Closed,
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// The connection has just been opened.
    Connected,
    /// One command line, CRLF included.
    Line(&'a str),
    /// A complete DATA block with the terminating dot line removed.
    Payload(&'a Bytes),
}

/// Result of a single transition.
#[derive(Debug)]
pub struct Step {
    pub reply: Reply,
    /// Set when a DATA block was accepted.
    pub message: Option<Message>,
}

impl Step {
    fn reply(reply: Reply) -> Self {
        Self {
            reply,
            message: None,
        }
    }
}

/// Per-connection SMTP state.
#[derive(Debug, Clone)]
pub struct Session {
    hostname: String,
    helo_name: String,
    mail_from: String,
    mail_to: String,
    state: State,
}

impl Session {
    /// Create a session that will announce itself as `hostname`.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            helo_name: String::new(),
            mail_from: String::new(),
            mail_to: String::new(),
            state: State::Greeting,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn helo_name(&self) -> &str {
        &self.helo_name
    }

    pub fn mail_from(&self) -> &str {
        &self.mail_from
    }

    pub fn mail_to(&self) -> &str {
        &self.mail_to
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Apply one event and return the reply to send.
    ///
    /// Events that do not belong to the current state are rejected without
    /// changing anything; in particular nothing leaves `Closed`.
    pub fn step(&mut self, event: Event<'_>) -> Result<Step, SessionError> {
        match (self.state, event) {
            (State::Greeting, Event::Connected) => {
                self.state = State::Command;
                Ok(Step::reply(Reply::ready(&self.hostname)))
            }
            (State::Command, Event::Line(line)) => Ok(Step::reply(self.command(line))),
            (State::ReceivingData, Event::Payload(payload)) => {
                self.state = State::Command;
                let message = Message {
                    helo_name: self.helo_name.clone(),
                    mail_from: self.mail_from.clone(),
                    mail_to: self.mail_to.clone(),
                    payload: payload.clone(),
                    received_at: Utc::now(),
                };
                Ok(Step {
                    reply: Reply::ok(),
                    message: Some(message),
                })
            }
            (state, _) => Err(SessionError::OutOfSequence { state }),
        }
    }

    fn command(&mut self, line: &str) -> Reply {
        let command = parser::parse(line);
        trace!(?command, "Processing command");

        match command {
            Command::Hello(name) => {
                if let Some(name) = name {
                    self.helo_name = name.to_string();
                }
                Reply::hello(&self.hostname)
            }
            Command::MailFrom(addr) => {
                if let Some(addr) = addr {
                    self.mail_from = addr.to_string();
                }
                Reply::ok()
            }
            Command::RcptTo(addr) => {
                // Single recipient slot: a later RCPT replaces the earlier one.
                if let Some(addr) = addr {
                    self.mail_to = addr.to_string();
                }
                Reply::accepted()
            }
            Command::Noop => Reply::ok(),
            Command::Data => {
                self.state = State::ReceivingData;
                Reply::start_data()
            }
            Command::Quit => {
                self.state = State::Closed;
                Reply::bye()
            }
            Command::Unrecognized => Reply::unrecognized(),
        }
    }
}
