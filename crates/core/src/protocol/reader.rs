//! Incremental RTSP message framing over a byte stream.
//!
//! TCP delivers RTSP messages in arbitrary pieces: a read may return half a
//! header line, or two pipelined messages at once. [`MessageReader`] buffers
//! whatever arrives and yields one [`RawMessage`] at a time once the blank
//! line and `Content-Length` body bytes are all present.

use std::io::{self, Read};

use crate::error::{ParseErrorKind, ProtocolError, Result, RtspError};

/// Upper bound on buffered bytes while waiting for a complete message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// One framed message: start line plus headers, and the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Start line and header lines, without the terminating blank line.
    pub head: String,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub struct MessageReader {
    buf: Vec<u8>,
    max_size: usize,
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageReader {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(READ_CHUNK),
            max_size,
        }
    }

    /// Append bytes received from the peer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete message out of the buffer, if there is one.
    pub fn next_message(&mut self) -> Result<Option<RawMessage>> {
        // Tolerate stray CRLFs between messages.
        let leading = self
            .buf
            .iter()
            .take_while(|b| **b == b'\r' || **b == b'\n')
            .count();
        if leading > 0 {
            self.buf.drain(..leading);
        }

        let Some(head_end) = find_blank_line(&self.buf) else {
            if self.buf.len() > self.max_size {
                return Err(RtspError::parse(ParseErrorKind::MessageTooLarge));
            }
            return Ok(None);
        };

        let head = String::from_utf8_lossy(&self.buf[..head_end]).into_owned();
        let body_start = head_end + 4;
        let body_len = content_length(&head)?;
        if body_len > self.max_size {
            return Err(RtspError::parse(ParseErrorKind::MessageTooLarge));
        }
        if self.buf.len() < body_start + body_len {
            return Ok(None);
        }

        let body = self.buf[body_start..body_start + body_len].to_vec();
        self.buf.drain(..body_start + body_len);
        Ok(Some(RawMessage { head, body }))
    }

    /// Perform at most one read from `src` and return a message if one is
    /// complete.
    ///
    /// Read timeouts and `WouldBlock` yield `Ok(None)` so the caller can
    /// check its cancellation flag and deadline between polls. End of stream
    /// is [`ProtocolError::ConnectionClosed`].
    pub fn read_from<R: Read>(&mut self, src: &mut R) -> Result<Option<RawMessage>> {
        if let Some(msg) = self.next_message()? {
            return Ok(Some(msg));
        }

        let mut chunk = [0u8; READ_CHUNK];
        match src.read(&mut chunk) {
            Ok(0) => Err(ProtocolError::ConnectionClosed.into()),
            Ok(n) => {
                self.feed(&chunk[..n]);
                self.next_message()
            }
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether an I/O error is a poll timeout rather than a failure.
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(head: &str) -> Result<usize> {
    for line in head.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("Content-Length")
        {
            return value
                .trim()
                .parse()
                .map_err(|_| RtspError::parse(ParseErrorKind::InvalidContentLength));
        }
    }
    Ok(0)
}

/// Parse `Name: value` header lines. Stops at the first empty line.
pub(crate) fn parse_header_lines<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(RtspError::parse(ParseErrorKind::InvalidHeader))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}
