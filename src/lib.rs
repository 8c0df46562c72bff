//! dotline: a minimal SMTP receiving server
//!
//! Accepts SMTP connections, walks each one through a small command
//! dialogue and hands the collected DATA block to a [`delivery::Delivery`]
//! implementation.
//!
//! Features:
//! - HELO/EHLO, MAIL FROM, RCPT TO, NOOP, DATA and QUIT
//! - One task per connection, bounded by a fixed pool of admission permits
//! - Sliding idle timeout on every read
//! - Size limit on command lines and message data
//! - Configuration via CLI arguments or TOML file

pub mod admission;
pub mod config;
pub mod delivery;
pub mod protocols;
pub mod server;
