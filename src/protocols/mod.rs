//! Protocol implementations.
//!
//! - `smtp`: SMTP receiving session, used by the server for every connection

pub mod smtp;
