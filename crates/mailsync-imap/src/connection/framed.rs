//! Framed I/O for the IMAP wire format.
//!
//! Responses are CRLF-terminated lines that may embed `{n}` literals; a
//! message body arrives as one such literal. The reader hands out complete
//! frames so the parser never sees half a literal.

#![allow(clippy::missing_errors_doc)]

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length outside literals.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Default maximum literal size.
pub const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

/// Buffered, frame-aware IMAP stream.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
    max_literal_size: usize,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            max_literal_size: MAX_LITERAL_SIZE,
        }
    }

    /// Sets the largest literal that is kept.
    pub const fn set_max_literal_size(&mut self, limit: usize) {
        self.max_literal_size = limit;
    }

    /// Reads one complete response, including any embedded literals.
    ///
    /// A literal over the size limit is read off the wire and discarded,
    /// and `NIL` takes its place in the frame, so the response still
    /// parses and the connection stays in sync.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();

        loop {
            let line = self.read_line().await?;
            response.extend_from_slice(&line);

            let Some(literal_len) = parse_literal_length(&line) else {
                break;
            };
            if literal_len > self.max_literal_size {
                self.discard_literal(&mut response, literal_len).await?;
                continue;
            }

            let start = response.len();
            response.resize(start + literal_len, 0);
            self.reader.read_exact(&mut response[start..]).await?;
        }

        Ok(response)
    }

    async fn discard_literal(&mut self, response: &mut Vec<u8>, literal_len: usize) -> Result<()> {
        tracing::warn!(
            bytes = literal_len,
            limit = self.max_literal_size,
            "discarding oversized literal"
        );
        let len = u64::try_from(literal_len)
            .map_err(|_| Error::Protocol(format!("literal length {literal_len} out of range")))?;
        let drained = tokio::io::copy(&mut (&mut self.reader).take(len), &mut tokio::io::sink()).await?;
        if drained < len {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside a literal",
            )));
        }

        // Swap the trailing `{n}\r\n` for NIL.
        if let Some(open) = response.iter().rposition(|&b| b == b'{') {
            response.truncate(open);
        }
        response.extend_from_slice(b"NIL");
        Ok(())
    }

    /// Reads responses until the tagged completion for `tag`, inclusive.
    pub async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Vec<u8>>> {
        let mut responses = Vec::new();

        loop {
            let response = self.read_response().await?;
            let done = response
                .strip_prefix(tag.as_bytes())
                .is_some_and(|rest| rest.first() == Some(&b' '));
            responses.push(response);
            if done {
                return Ok(responses);
            }
        }
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            // A CR may end one read and its LF start the next.
            let seam = usize::from(line.last() == Some(&b'\r') && buf[0] == b'\n');
            if seam == 1 {
                line.push(b'\n');
                self.reader.consume(1);
                return Ok(line);
            }

            if let Some(pos) = find_crlf(buf) {
                line.extend_from_slice(&buf[..pos + 2]);
                self.reader.consume(pos + 2);
                return Ok(line);
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }
    }

    /// Writes and flushes a serialized command.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Returns the inner stream. Buffered unread data is dropped.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses `{123}\r\n` or `{123+}\r\n` at the end of a line.
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}
