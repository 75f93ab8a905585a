//! Line framing for the wire protocol.
//!
//! Inbound bytes are split on LF and the trailing CRLF is stripped; outbound
//! commands are rendered as `COMMAND [args] [:trailing]\r\n`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Longest inbound line accepted, terminator excluded. Room for a 512-byte
/// message plus IRCv3 tags.
pub const MAX_LINE_LEN: usize = 8191;

/// Reads CRLF-terminated lines off a buffered stream.
///
/// A bare LF is also accepted as a terminator, as many servers and test
/// fixtures send one.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(512),
        }
    }

    /// Read the next line, without its terminator.
    ///
    /// Returns `Ok(None)` at end of stream. A partial line left at EOF is
    /// discarded. Invalid UTF-8 or a line longer than [`MAX_LINE_LEN`] yields
    /// [`Error::Framing`]; the offending line has already been consumed so
    /// the caller can keep reading.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let mut oversized = false;
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(None);
            }
            let (used, done) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            // Overlong lines are skipped up to their terminator, not buffered.
            if !oversized && self.buf.len() + used > MAX_LINE_LEN + 2 {
                oversized = true;
                self.buf.clear();
            }
            if !oversized {
                self.buf.extend_from_slice(&available[..used]);
            }
            self.inner.consume(used);
            if done {
                break;
            }
        }
        if oversized {
            return Err(Error::Framing(format!("line longer than {MAX_LINE_LEN} bytes")));
        }

        let mut end = self.buf.len() - 1;
        if end > 0 && self.buf[end - 1] == b'\r' {
            end -= 1;
        }
        if end > MAX_LINE_LEN {
            return Err(Error::Framing(format!("line longer than {MAX_LINE_LEN} bytes")));
        }

        match std::str::from_utf8(&self.buf[..end]) {
            Ok(line) => Ok(Some(line.to_string())),
            Err(e) => Err(Error::Framing(format!(
                "invalid UTF-8 at byte {}: {}",
                e.valid_up_to(),
                String::from_utf8_lossy(&self.buf[..end])
            ))),
        }
    }
}

fn check_line_safe(part: &str) -> Result<()> {
    if part.contains(['\r', '\n', '\0']) {
        return Err(Error::InvalidCommand(format!("{part:?} contains CR, LF or NUL")));
    }
    Ok(())
}

/// Render a command line: `COMMAND [args] [:trailing]\r\n`.
///
/// `args` are space-joined literal tokens. `trailing` may contain spaces and
/// is always colon-prefixed when present. Empty pieces are omitted. Any piece
/// containing CR, LF or NUL is rejected with [`Error::InvalidCommand`], so one
/// command always yields exactly one line.
pub fn encode_command(command: &str, args: &[&str], trailing: Option<&str>) -> Result<Vec<u8>> {
    check_line_safe(command)?;
    let mut line = command.trim().to_string();
    for arg in args.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
        check_line_safe(arg)?;
        line.push(' ');
        line.push_str(arg);
    }
    if let Some(trailing) = trailing.map(str::trim).filter(|t| !t.is_empty()) {
        check_line_safe(trailing)?;
        line.push_str(" :");
        line.push_str(trailing);
    }
    line.push_str("\r\n");
    Ok(line.into_bytes())
}

/// Commands the client puts on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nick(String),
    /// `USER <username> * * :<password>`
    User { username: String, password: String },
    Join(String),
    Privmsg { target: String, text: String },
    Pong(String),
    Quit(Option<String>),
}

impl Command {
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Command::Nick(nick) => encode_command("NICK", &[nick.as_str()], None),
            Command::User { username, password } => {
                encode_command("USER", &[username.as_str(), "*", "*"], Some(password.as_str()))
            }
            Command::Join(channel) => encode_command("JOIN", &[channel.as_str()], None),
            Command::Privmsg { target, text } => encode_command("PRIVMSG", &[target.as_str()], Some(text.as_str())),
            // Tokens with spaces cannot travel as a middle parameter.
            Command::Pong(token) if token.contains(' ') => {
                encode_command("PONG", &[], Some(token.as_str()))
            }
            Command::Pong(token) => encode_command("PONG", &[token.as_str()], None),
            Command::Quit(reason) => encode_command("QUIT", &[], reason.as_deref()),
        }
    }
}

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// The single write half of a connection.
///
/// Each [`send`](LineWriter::send) encodes and writes one whole line under a
/// mutex, so concurrent senders never interleave partial lines.
#[derive(Default)]
pub struct LineWriter {
    inner: Mutex<Option<BoxedWrite>>,
}

impl LineWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn attach(&self, writer: BoxedWrite) {
        *self.inner.lock().await = Some(writer);
    }

    pub async fn send(&self, command: &Command) -> Result<()> {
        let line = command.encode()?;
        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(Error::ConnectionClosed)?;
        writer.write_all(&line).await?;
        writer.flush().await?;
        tracing::debug!(line = %String::from_utf8_lossy(&line).trim_end(), "Sent command");
        Ok(())
    }

    /// Flush and close the write half. Later sends fail with
    /// [`Error::ConnectionClosed`].
    pub async fn shutdown(&self) -> Result<()> {
        let writer = self.inner.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }
        Ok(())
    }

    pub async fn is_attached(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}
