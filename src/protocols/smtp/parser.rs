//! SMTP command parser.
//!
//! Verbs are matched case-insensitively as prefixes of the line; whatever
//! follows the verb and its delimiter is kept verbatim as the argument.

/// Parsed SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// HELO or EHLO, with the client's name if one was given.
    Hello(Option<&'a str>),
    MailFrom(Option<&'a str>),
    RcptTo(Option<&'a str>),
    Noop,
    Data,
    Quit,
    /// Anything that is not one of the above.
    Unrecognized,
}

/// Parse one command line. Leading and trailing CR/LF characters are ignored.
pub fn parse(line: &str) -> Command<'_> {
    let line = line.trim_matches(|c| c == '\r' || c == '\n');

    if has_verb(line, "HELO") || has_verb(line, "EHLO") {
        // Skip the verb and the single delimiter after it.
        Command::Hello(argument(line, 5))
    } else if has_verb(line, "MAIL FROM:") {
        Command::MailFrom(argument(line, 10))
    } else if has_verb(line, "RCPT TO:") {
        Command::RcptTo(argument(line, 8))
    } else if has_verb(line, "NOOP") {
        Command::Noop
    } else if has_verb(line, "DATA") {
        Command::Data
    } else if has_verb(line, "QUIT") {
        Command::Quit
    } else {
        Command::Unrecognized
    }
}

fn has_verb(line: &str, verb: &str) -> bool {
    line.as_bytes()
        .get(..verb.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(verb.as_bytes()))
}

fn argument(line: &str, start: usize) -> Option<&str> {
    line.get(start..).filter(|arg| !arg.is_empty())
}
