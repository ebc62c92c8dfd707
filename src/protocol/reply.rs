//! Module `reply`
//!
//! Parsed control-channel replies: the 3-digit status code, its class, and the
//! text carried by one or more reply lines.

use std::fmt;

/// Category implied by the leading digit of a reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    Preliminary,
    Success,
    Intermediate,
    TransientError,
    PermanentError,
}

impl ReplyClass {
    /// Returns the class of a code in `100..=599`, `None` otherwise.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            100..=199 => Some(ReplyClass::Preliminary),
            200..=299 => Some(ReplyClass::Success),
            300..=399 => Some(ReplyClass::Intermediate),
            400..=499 => Some(ReplyClass::TransientError),
            500..=599 => Some(ReplyClass::PermanentError),
            _ => None,
        }
    }
}

/// A single `DDD[- ]text` line as read from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    /// `true` for `DDD text` (or a bare `DDD`), `false` for `DDD-text`.
    pub is_final: bool,
    pub text: String,
}

/// Parses one reply line (CRLF already removed or not).
///
/// Returns `None` when the line does not start with a 3-digit code in
/// `100..=599` followed by a space, a dash, or the end of the line.
pub fn parse_reply_line(line: &str) -> Option<ReplyLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }

    let code: u16 = line[..3].parse().ok()?;
    ReplyClass::from_code(code)?;

    let (is_final, text) = match bytes.get(3) {
        None => (true, ""),
        Some(b' ') => (true, &line[4..]),
        Some(b'-') => (false, &line[4..]),
        Some(_) => return None,
    };

    Some(ReplyLine {
        code,
        is_final,
        text: text.to_string(),
    })
}

/// A complete reply, single-line or multiline.
///
/// For a multiline reply `lines` holds the opening text, every intermediate
/// line verbatim, and the closing text, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        let lines = if lines.is_empty() {
            vec![String::new()]
        } else {
            lines
        };
        Self { code, lines }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn class(&self) -> ReplyClass {
        ReplyClass::from_code(self.code).unwrap_or(ReplyClass::PermanentError)
    }

    pub fn is_preliminary(&self) -> bool {
        self.class() == ReplyClass::Preliminary
    }

    pub fn is_success(&self) -> bool {
        self.class() == ReplyClass::Success
    }

    pub fn is_intermediate(&self) -> bool {
        self.class() == ReplyClass::Intermediate
    }

    pub fn is_multiline(&self) -> bool {
        self.lines.len() > 1
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// All reply lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Encodes the reply as it is written on the control channel.
    pub fn to_wire(&self) -> String {
        if !self.is_multiline() {
            return format!("{} {}\r\n", self.code, self.lines[0]);
        }

        let last = self.lines.len() - 1;

        let mut out = format!("{}-{}\r\n", self.code, self.lines[0]);
        for line in &self.lines[1..last] {
            // A continuation must never read as the closing line.
            if parse_reply_line(line).is_some_and(|l| l.is_final) {
                out.push(' ');
            }
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.push_str(&format!("{} {}\r\n", self.code, self.lines[last]));
        out
    }

    /// Extracts the path from a `257 "<path>" ...` reply, undoubling quotes.
    pub fn quoted_path(&self) -> Option<String> {
        let text = &self.lines[0];
        let start = text.find('"')? + 1;
        let mut path = String::new();
        let mut chars = text[start..].chars().peekable();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    path.push('"');
                } else {
                    return Some(path);
                }
            } else {
                path.push(c);
            }
        }
        None
    }

    /// Extracts the size announced as `(N bytes)` in a `150` reply.
    pub fn announced_size(&self) -> Option<u64> {
        let text = &self.lines[0];
        let open = text.rfind('(')?;
        let rest = &text[open + 1..];
        let close = rest.find(')')?;
        let inner = rest[..close].trim();
        let digits = inner.strip_suffix("bytes")?.trim();
        digits.parse().ok()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" / "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_and_continuation_lines() {
        let line = parse_reply_line("230 Login successful\r\n").unwrap();
        assert_eq!(line.code, 230);
        assert!(line.is_final);
        assert_eq!(line.text, "Login successful");

        let line = parse_reply_line("220-Welcome").unwrap();
        assert!(!line.is_final);
        assert_eq!(line.text, "Welcome");

        let bare = parse_reply_line("226").unwrap();
        assert!(bare.is_final);
        assert_eq!(bare.text, "");
    }

    #[test]
    fn rejects_lines_without_a_valid_code() {
        assert!(parse_reply_line("hello").is_none());
        assert!(parse_reply_line("22").is_none());
        assert!(parse_reply_line("600 out of range").is_none());
        assert!(parse_reply_line("099 too low").is_none());
        assert!(parse_reply_line("2a0 nope").is_none());
        assert!(parse_reply_line("220xWelcome").is_none());
    }

    #[test]
    fn classifies_by_leading_digit() {
        assert_eq!(Reply::new(150, "").class(), ReplyClass::Preliminary);
        assert_eq!(Reply::new(226, "").class(), ReplyClass::Success);
        assert_eq!(Reply::new(331, "").class(), ReplyClass::Intermediate);
        assert_eq!(Reply::new(421, "").class(), ReplyClass::TransientError);
        assert_eq!(Reply::new(550, "").class(), ReplyClass::PermanentError);
    }

    #[test]
    fn multiline_wire_form_closes_with_space_separator() {
        let reply = Reply::multiline(
            220,
            vec!["Welcome".into(), "220 looks final".into(), "Ready".into()],
        );
        assert_eq!(
            reply.to_wire(),
            "220-Welcome\r\n 220 looks final\r\n220 Ready\r\n"
        );
        assert_eq!(Reply::new(200, "OK").to_wire(), "200 OK\r\n");
    }

    #[test]
    fn extracts_quoted_path() {
        let reply = Reply::new(257, "\"/pub/a \"\"b\"\"\" is the current directory");
        assert_eq!(reply.quoted_path().as_deref(), Some("/pub/a \"b\""));
        assert_eq!(Reply::new(257, "no quotes").quoted_path(), None);
    }

    #[test]
    fn extracts_announced_size() {
        let reply = Reply::new(150, "Opening BINARY mode data connection for a.bin (1024 bytes)");
        assert_eq!(reply.announced_size(), Some(1024));
        assert_eq!(Reply::new(150, "Here comes the listing").announced_size(), None);
    }
}
