//! SMTP reply lines.

use bytes::BytesMut;
use std::borrow::Cow;
use std::fmt;

/// A single-line reply: `<code> <text>\r\n` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: Cow<'static, str>,
}

impl Reply {
    fn fixed(code: u16, text: &'static str) -> Self {
        Self {
            code,
            text: Cow::Borrowed(text),
        }
    }

    /// 220 greeting sent when a session opens.
    pub fn ready(hostname: &str) -> Self {
        Self {
            code: 220,
            text: Cow::Owned(format!("{hostname} ready")),
        }
    }

    /// 250 reply to HELO/EHLO.
    pub fn hello(hostname: &str) -> Self {
        Self {
            code: 250,
            text: Cow::Owned(format!("{hostname} Hello")),
        }
    }

    pub fn ok() -> Self {
        Self::fixed(250, "OK")
    }

    pub fn accepted() -> Self {
        Self::fixed(250, "Accepted")
    }

    pub fn start_data() -> Self {
        Self::fixed(354, "Enter message, ending with \".\" on a line by itself")
    }

    pub fn bye() -> Self {
        Self::fixed(221, "Bye")
    }

    pub fn unrecognized() -> Self {
        Self::fixed(500, "unrecognized command")
    }

    /// Sent when the server is saturated and configured to turn clients away.
    pub fn unavailable(hostname: &str) -> Self {
        Self {
            code: 421,
            text: Cow::Owned(format!(
                "{hostname} Service not available, closing transmission channel"
            )),
        }
    }

    pub fn too_large() -> Self {
        Self::fixed(552, "Message size exceeds fixed maximum")
    }

    /// Wire encoding, CRLF included.
    pub fn to_bytes(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(self.text.len() + 6);
        out.extend_from_slice(self.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(&Reply::ok().to_bytes()[..], b"250 OK\r\n");
        assert_eq!(&Reply::bye().to_bytes()[..], b"221 Bye\r\n");
        assert_eq!(
            &Reply::unrecognized().to_bytes()[..],
            b"500 unrecognized command\r\n"
        );
        assert_eq!(
            &Reply::start_data().to_bytes()[..],
            b"354 Enter message, ending with \".\" on a line by itself\r\n"
        );
    }

    #[test]
    fn test_host_replies() {
        assert_eq!(Reply::ready("mx.local").to_string(), "220 mx.local ready");
        assert_eq!(Reply::hello("mx.local").to_string(), "250 mx.local Hello");
        assert!(Reply::unavailable("mx.local").to_string().starts_with("421 mx.local "));
    }
}
