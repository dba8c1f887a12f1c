/*
 * reader.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Cassetta, a POP3 mail retrieval client.
 *
 * Cassetta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Cassetta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Cassetta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Response line reader and dot-stuffed payload reader.
//!
//! POP3 mixes single-line responses (CRLF-terminated) with multi-line
//! payloads terminated by a lone `.` line, where content lines starting
//! with `.` arrive with an extra `.` prepended (RFC 1939 §3). Inbound
//! lines tolerate bare LF; sent lines are always CRLF.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Pop3Error;

/// Longest line accepted from the server before the response is declared broken.
pub const MAX_LINE_LEN: usize = 65536;

/// Rolling receive buffer yielding one response line at a time.
pub struct LineBuffer {
    buf: BytesMut,
    /// Bytes already scanned for a terminator (restart point for the next scan).
    scanned: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            scanned: 0,
        }
    }

    /// Discard any buffered bytes (used when the transport is replaced).
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }

    /// Read one line, without its terminator. Accepts CRLF and bare LF.
    pub async fn read_line<S>(&mut self, stream: &mut S) -> Result<Bytes, Pop3Error>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Some(i) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
                let end = self.scanned + i;
                let mut line = self.buf.split_to(end + 1);
                self.scanned = 0;
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(line.freeze());
            }
            self.scanned = self.buf.len();
            if self.scanned > MAX_LINE_LEN {
                return Err(Pop3Error::protocol("response line too long"));
            }
            let n = stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Pop3Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }
        }
    }

    /// True when no server bytes are pending (expected after STLS `+OK`).
    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }
}

/// Lazy view over one multi-line payload: yields dot-unstuffed content
/// lines until the terminating `.` line, which it consumes.
pub struct PayloadReader<'a, S> {
    stream: &'a mut S,
    buf: &'a mut LineBuffer,
    done: bool,
}

impl<'a, S> PayloadReader<'a, S>
where
    S: AsyncRead + Unpin,
{
    pub fn new(stream: &'a mut S, buf: &'a mut LineBuffer) -> Self {
        Self {
            stream,
            buf,
            done: false,
        }
    }

    /// Next content line without its CRLF, or `None` at the terminator.
    pub async fn next_line(&mut self) -> Result<Option<Bytes>, Pop3Error> {
        if self.done {
            return Ok(None);
        }
        let line = self.buf.read_line(self.stream).await?;
        if line.as_ref() == b"." {
            self.done = true;
            return Ok(None);
        }
        if line.first() == Some(&b'.') {
            return Ok(Some(line.slice(1..)));
        }
        Ok(Some(line))
    }

    /// Collect the remaining payload, re-joining lines with CRLF.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<(), Pop3Error> {
        while let Some(line) = self.next_line().await? {
            out.extend_from_slice(&line);
            out.extend_from_slice(b"\r\n");
        }
        Ok(())
    }

    /// Consume the rest of the payload without keeping it.
    pub async fn discard(&mut self) -> Result<(), Pop3Error> {
        while self.next_line().await?.is_some() {}
        Ok(())
    }

    /// Whether the terminating `.` line has been consumed.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn line_from(input: &[u8]) -> Result<Bytes, Pop3Error> {
        let mut input = input;
        LineBuffer::new().read_line(&mut input).await
    }

    async fn payload_from(input: &[u8]) -> Result<Vec<u8>, Pop3Error> {
        let mut input = input;
        let mut buf = LineBuffer::new();
        let mut payload = PayloadReader::new(&mut input, &mut buf);
        let mut out = Vec::new();
        payload.read_to_end(&mut out).await?;
        Ok(out)
    }

    /// Dot-stuff content the way a server would send it.
    fn stuff(content: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(content.len() + 8);
        for line in content.split_inclusive(|&b| b == b'\n') {
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
        }
        out.extend_from_slice(b".\r\n");
        out
    }

    #[tokio::test]
    async fn crlf_line() {
        let line = line_from(b"+OK hello\r\n").await.unwrap();
        assert_eq!(line.as_ref(), b"+OK hello");
    }

    #[tokio::test]
    async fn bare_lf_tolerated() {
        let line = line_from(b"+OK lax server\n").await.unwrap();
        assert_eq!(line.as_ref(), b"+OK lax server");
    }

    #[tokio::test]
    async fn empty_line() {
        let line = line_from(b"\r\n").await.unwrap();
        assert_eq!(line.as_ref(), b"");
    }

    #[tokio::test]
    async fn eof_mid_line_is_io_error() {
        let err = line_from(b"+OK no terminator").await.unwrap_err();
        assert!(matches!(err, Pop3Error::Io(_)));
    }

    #[tokio::test]
    async fn oversized_line_is_protocol_error() {
        let big = vec![b'a'; MAX_LINE_LEN + 16];
        let err = line_from(&big).await.unwrap_err();
        assert!(matches!(err, Pop3Error::Protocol(_)));
    }

    #[tokio::test]
    async fn consecutive_lines_from_one_buffer() {
        let mut input: &[u8] = b"one\r\ntwo\r\n";
        let mut buf = LineBuffer::new();
        assert_eq!(buf.read_line(&mut input).await.unwrap().as_ref(), b"one");
        assert_eq!(buf.read_line(&mut input).await.unwrap().as_ref(), b"two");
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn payload_unstuffs_leading_dots() {
        let out = payload_from(b"a\r\n..b\r\n...\r\n.\r\n").await.unwrap();
        assert_eq!(out, b"a\r\n.b\r\n..\r\n");
    }

    #[tokio::test]
    async fn payload_stops_at_terminator() {
        let mut input: &[u8] = b"body\r\n.\r\n+OK next\r\n";
        let mut buf = LineBuffer::new();
        let mut payload = PayloadReader::new(&mut input, &mut buf);
        let mut out = Vec::new();
        payload.read_to_end(&mut out).await.unwrap();
        assert!(payload.is_done());
        // The reader is positioned after the dot line.
        let next = buf.read_line(&mut input).await.unwrap();
        assert_eq!(next.as_ref(), b"+OK next");
    }

    #[tokio::test]
    async fn empty_payload() {
        let out = payload_from(b".\r\n").await.unwrap();
        assert_eq!(out, b"");
    }

    #[tokio::test]
    async fn stuff_then_read_round_trips() {
        let content: &[u8] = b"From: a@b\r\n\r\n.hidden\r\n..twice\r\nplain\r\n";
        let wire = stuff(content);
        let out = payload_from(&wire).await.unwrap();
        assert_eq!(out, content);
    }
}
