//! SMTP receiving side.
//!
//! A deliberately small subset of the protocol: one sender, one recipient
//! and one message at a time, no extensions.
//!
//! ## Protocol Format
//!
//! ```text
//! S: 220 <host> ready
//! C: EHLO client.example
//! S: 250 <host> Hello
//! C: MAIL FROM:<a@example.org>
//! S: 250 OK
//! C: RCPT TO:<b@example.org>
//! S: 250 Accepted
//! C: DATA
//! S: 354 Enter message, ending with "." on a line by itself
//! C: Subject: hi
//! C:
//! C: hello
//! C: .
//! S: 250 OK
//! C: QUIT
//! S: 221 Bye
//! ```
//!
//! `NOOP` answers `250 OK`; anything unknown answers
//! `500 unrecognized command` and leaves the session where it was.
//!
//! ## Layout
//! - `reader`: pulls CRLF lines or dot-terminated blocks off the socket
//! - `parser`: turns a command line into a [`parser::Command`]
//! - `session`: the per-connection state machine
//! - `handler`: ties the three together for one connection

pub mod error;
pub mod handler;
pub mod parser;
pub mod reader;
pub mod response;
pub mod session;

pub use handler::{handle_connection, Outcome};
pub use response::Reply;
