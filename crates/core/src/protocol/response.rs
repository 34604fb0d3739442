use std::str::Lines;

use crate::error::{ParseErrorKind, Result, RtspError};

use super::RTSP_VERSION;

/// An RTSP response (RFC 2326 §7).
///
/// The text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// The client decodes responses with [`parse`](Self::parse) (the head) and
/// attaches the `Content-Length` body read from the stream. The builder
/// half ([`new`](Self::new), [`add_header`](Self::add_header),
/// [`with_body`](Self::with_body), [`serialize`](Self::serialize)) is what
/// a peer uses to answer, and is handy for scripted servers in tests.
#[derive(Debug, Clone)]
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// 200 OK (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> Vec<u8> {
        let mut head = format!(
            "{} {} {}\r\n",
            RTSP_VERSION, self.status_code, self.status_text
        );

        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }

        if !self.body.is_empty() {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a response head: status line, headers and the blank line.
    ///
    /// The body is not part of `raw`; see [`content_length`](Self::content_length).
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or(RtspError::Parse {
                kind: ParseErrorKind::EmptyMessage,
            })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("RTSP/") {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            });
        }

        let status_code = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            })?;
        let status_text = parts.next().unwrap_or_default().trim().to_string();

        let headers = parse_headers(lines)?;

        Ok(RtspResponse {
            status_code,
            status_text,
            headers,
            body: Vec::new(),
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value of a repeatable header, in order (e.g. `WWW-Authenticate`).
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    /// Declared body length; zero when the header is absent.
    pub fn content_length(&self) -> Result<usize> {
        match self.get_header("Content-Length") {
            None => Ok(0),
            Some(v) => v.trim().parse().map_err(|_| RtspError::Parse {
                kind: ParseErrorKind::InvalidContentLength,
            }),
        }
    }

    /// 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// 3xx.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code)
    }
}

/// Parse `Name: value` lines up to the first empty line.
pub(crate) fn parse_headers(lines: Lines<'_>) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();

    for line in lines {
        if line.is_empty() {
            break;
        }

        let colon_pos = line.find(':').ok_or(RtspError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        })?;

        let name = line[..colon_pos].trim().to_string();
        let value = line[colon_pos + 1..].trim().to_string();

        headers.push((name, value));
    }

    Ok(headers)
}
