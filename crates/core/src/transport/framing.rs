//! Demultiplexing of the RTSP control stream (RFC 2326 §10.12).
//!
//! Once interleaved transport is in use, RTSP messages and media share
//! one TCP stream. Every unit on that stream starts either with `$`
//! (an interleaved frame) or with text (an RTSP message):
//!
//! ```text
//! ┌──────┬─────────┬───────────────┬─────────────────┐
//! │ 0x24 │ channel │ length (u16)  │ payload ...     │
//! │ '$'  │ 1 byte  │ big-endian    │ length bytes    │
//! └──────┴─────────┴───────────────┴─────────────────┘
//!
//! RTSP/1.0 200 OK\r\n ... \r\n\r\n [Content-Length bytes]
//! ```
//!
//! [`Decoder`] looks only at the first byte of the next unit and never
//! consumes a unit until it is complete, so partial reads, timeouts and
//! arbitrary chunking cannot desynchronize the stream.

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::{RtspRequest, RtspResponse};

/// Interleaved frame marker.
pub const INTERLEAVED_MARKER: u8 = b'$';

/// Header bytes before an interleaved payload.
pub const INTERLEAVED_HEADER_LEN: usize = 4;

/// Largest payload an interleaved frame can carry.
pub const MAX_INTERLEAVED_PAYLOAD: usize = u16::MAX as usize;

/// Upper bound on a message head before giving up on the stream.
const MAX_HEAD_LEN: usize = 64 * 1024;

/// Upper bound on a message body; RTSP bodies are SDP or parameter text.
const MAX_BODY_LEN: usize = 1024 * 1024;

/// One complete unit taken off the control stream.
#[derive(Debug)]
pub enum Unit {
    Frame { channel: u8, payload: Vec<u8> },
    Response(RtspResponse),
    Request(RtspRequest),
}

/// Incremental decoder for the control stream.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete unit, or `None` if more bytes are needed.
    pub fn next_unit(&mut self) -> Result<Option<Unit>> {
        // Some servers pad between messages with bare line breaks.
        let padding = self
            .buf
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        if padding > 0 {
            self.buf.drain(..padding);
        }

        match self.buf.first() {
            None => Ok(None),
            Some(&INTERLEAVED_MARKER) => Ok(self.next_frame()),
            Some(_) => self.next_message(),
        }
    }

    fn next_frame(&mut self) -> Option<Unit> {
        if self.buf.len() < INTERLEAVED_HEADER_LEN {
            return None;
        }
        let channel = self.buf[1];
        let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
        let end = INTERLEAVED_HEADER_LEN + len;
        if self.buf.len() < end {
            return None;
        }

        let payload = self.buf[INTERLEAVED_HEADER_LEN..end].to_vec();
        self.buf.drain(..end);
        Some(Unit::Frame { channel, payload })
    }

    fn next_message(&mut self) -> Result<Option<Unit>> {
        let Some(head_len) = head_end(&self.buf) else {
            if self.buf.len() > MAX_HEAD_LEN {
                self.buf.clear();
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::HeadTooLarge,
                });
            }
            return Ok(None);
        };

        let head = String::from_utf8_lossy(&self.buf[..head_len]).into_owned();
        let unit = if head.starts_with("RTSP/") {
            RtspResponse::parse(&head).map(Unit::Response)
        } else {
            RtspRequest::parse(&head).map(Unit::Request)
        };
        let unit = match unit {
            Ok(unit) => unit,
            Err(e) => {
                self.buf.drain(..head_len);
                return Err(e);
            }
        };

        let body_len = match &unit {
            Unit::Response(res) => res.content_length(),
            Unit::Request(req) => content_length(req.get_header("Content-Length")),
            Unit::Frame { .. } => Ok(0),
        };
        let body_len = match body_len {
            Ok(len) => len,
            Err(e) => {
                self.buf.drain(..head_len);
                return Err(e);
            }
        };

        if body_len > MAX_BODY_LEN {
            // The body cannot be skipped without buffering it.
            self.buf.clear();
            return Err(RtspError::Parse {
                kind: ParseErrorKind::BodyTooLarge,
            });
        }

        let end = head_len + body_len;
        if self.buf.len() < end {
            return Ok(None);
        }
        let body = self.buf[head_len..end].to_vec();
        self.buf.drain(..end);

        Ok(Some(match unit {
            Unit::Response(res) => Unit::Response(res.with_body(body)),
            Unit::Request(mut req) => {
                req.body = body;
                Unit::Request(req)
            }
            frame => frame,
        }))
    }
}

/// Encode one interleaved frame.
pub fn encode_interleaved(channel: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_INTERLEAVED_PAYLOAD {
        return Err(RtspError::FrameTooLarge(payload.len()));
    }
    let mut out = Vec::with_capacity(INTERLEAVED_HEADER_LEN + payload.len());
    out.push(INTERLEAVED_MARKER);
    out.push(channel);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Offset just past the blank line ending a message head.
fn head_end(buf: &[u8]) -> Option<usize> {
    (0..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        if rest.starts_with(b"\r\n\r\n") {
            Some(i + 4)
        } else if rest.starts_with(b"\n\n") {
            Some(i + 2)
        } else {
            None
        }
    })
}

fn content_length(value: Option<&str>) -> Result<usize> {
    match value {
        None => Ok(0),
        Some(v) => v.trim().parse().map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidContentLength,
        }),
    }
}
