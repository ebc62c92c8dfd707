//! Module `codec`
//!
//! The control-channel line codec: writes CRLF-terminated commands and replies,
//! reads lines, and assembles single-line and multiline replies.

use std::io;
use std::time::Duration;

use log::trace;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;

use crate::error::FtpError;
use crate::protocol::{Command, Reply, parse_reply_line};

/// Longest reply line a client accepts, excluding CRLF.
pub const DEFAULT_MAX_LINE: usize = 8192;

/// One end of a control connection.
///
/// Every read and write is bounded by `timeout`; expiry maps to
/// `FtpError::ChannelTimeout`. At most `max_line + 1` bytes of a line are
/// buffered.
pub struct ControlChannel<R, W> {
    reader: R,
    writer: W,
    timeout: Duration,
    max_line: usize,
    /// The previous line overflowed; skip to its end before reading on.
    discarding: bool,
}

impl<R, W> ControlChannel<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, timeout: Duration) -> Self {
        Self {
            reader,
            writer,
            timeout,
            max_line: DEFAULT_MAX_LINE,
            discarding: false,
        }
    }

    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Buffered read half, used to watch for closure during a data transfer.
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Writes `VERB[ argument]\r\n`.
    pub async fn send_command(&mut self, command: &Command) -> Result<(), FtpError> {
        trace!("CC OUT: {}", command.masked());
        let line = format!("{}\r\n", command);
        self.write_raw(command.verb(), line.as_bytes()).await
    }

    /// Writes a complete (possibly multiline) reply.
    pub async fn send_reply(&mut self, reply: &Reply) -> Result<(), FtpError> {
        trace!("CC OUT: {}", reply);
        let wire = reply.to_wire();
        self.write_raw(&reply.code().to_string(), wire.as_bytes())
            .await
    }

    async fn write_raw(&mut self, context: &str, bytes: &[u8]) -> Result<(), FtpError> {
        let timeout = self.timeout;
        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(bytes).await?;
            writer.flush().await
        };
        match time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(FtpError::ChannelWrite {
                command: context.to_string(),
                source,
            }),
            Err(_) => Err(FtpError::ChannelTimeout(timeout)),
        }
    }

    /// Reads one line with CRLF stripped; `None` once the peer has closed.
    ///
    /// A line longer than `max_line` comes back cut to `max_line + 1` bytes,
    /// and the rest of it is skipped by the next read.
    pub async fn read_line(&mut self) -> Result<Option<String>, FtpError> {
        match time::timeout(self.timeout, self.next_line()).await {
            Ok(result) => result,
            Err(_) => Err(FtpError::ChannelTimeout(self.timeout)),
        }
    }

    /// Reads lines until a complete reply has been assembled.
    pub async fn read_reply(&mut self) -> Result<Reply, FtpError> {
        match time::timeout(self.timeout, self.assemble_reply()).await {
            Ok(result) => result,
            Err(_) => Err(FtpError::ChannelTimeout(self.timeout)),
        }
    }

    async fn assemble_reply(&mut self) -> Result<Reply, FtpError> {
        let first = self.next_line().await?.ok_or_else(|| {
            FtpError::ChannelRead(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "control connection closed",
            ))
        })?;
        trace!("CC IN: {}", first);
        self.check_reply_line(&first)?;

        let opening = parse_reply_line(&first)
            .ok_or_else(|| FtpError::ProtocolFraming(format!("malformed reply line {:?}", first)))?;
        if opening.is_final {
            return Ok(Reply::new(opening.code, opening.text));
        }

        let mut lines = vec![opening.text];
        loop {
            let line = self.next_line().await?.ok_or_else(|| {
                FtpError::ProtocolFraming(format!(
                    "connection closed inside multiline {} reply",
                    opening.code
                ))
            })?;
            trace!("CC IN: {}", line);
            self.check_reply_line(&line)?;

            match parse_reply_line(&line) {
                Some(closing) if closing.code == opening.code && closing.is_final => {
                    lines.push(closing.text);
                    return Ok(Reply::multiline(opening.code, lines));
                }
                _ => lines.push(line),
            }
        }
    }

    fn check_reply_line(&self, line: &str) -> Result<(), FtpError> {
        if line.len() > self.max_line {
            return Err(FtpError::ProtocolFraming(format!(
                "reply line longer than {} bytes",
                self.max_line
            )));
        }
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>, FtpError> {
        if self.discarding {
            self.skip_line().await?;
        }

        // Room for the line, a trailing CR, and one byte of overflow.
        let limit = self.max_line + 2;
        let mut buf = Vec::new();
        loop {
            let available = self.reader.fill_buf().await.map_err(FtpError::ChannelRead)?;
            if available.is_empty() {
                if buf.is_empty() {
                    return Ok(None);
                }
                break;
            }

            let room = limit - buf.len();
            let (used, complete) = match available.iter().take(room).position(|&b| b == b'\n') {
                Some(end) => {
                    buf.extend_from_slice(&available[..end]);
                    (end + 1, true)
                }
                None => {
                    let used = available.len().min(room);
                    buf.extend_from_slice(&available[..used]);
                    (used, false)
                }
            };
            self.reader.consume(used);

            if complete {
                break;
            }
            if buf.len() >= limit {
                self.discarding = true;
                buf.truncate(self.max_line + 1);
                return Ok(Some(String::from_utf8_lossy(&buf).into_owned()));
            }
        }

        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Drops bytes up to and including the next LF.
    async fn skip_line(&mut self) -> Result<(), FtpError> {
        loop {
            let available = self.reader.fill_buf().await.map_err(FtpError::ChannelRead)?;
            if available.is_empty() {
                self.discarding = false;
                return Ok(());
            }
            let (used, found) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            };
            self.reader.consume(used);
            if found {
                self.discarding = false;
                return Ok(());
            }
        }
    }
}
