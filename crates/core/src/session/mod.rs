//! The client's view of an RTSP session (RFC 2326 §3, §12.37).
//!
//! A [`Session`] is produced by the negotiator at the end of a successful
//! handshake and owned by exactly one [`ClientConn`](crate::ClientConn).
//! It never changes afterwards: the bindings chosen during SETUP stay in
//! place until TEARDOWN.
//!
//! ## Lifecycle (RFC 2326 §A.1, client side)
//!
//! ```text
//! SETUP ... SETUP   -> Session built (one binding per track)
//! PLAY / RECORD     -> media flows over the bound transport
//! PAUSE             -> media suspended, bindings kept
//! TEARDOWN / close  -> Session discarded
//! ```

pub mod transport;

use std::fmt;
use std::time::Duration;

use crate::protocol::RtspUrl;
use crate::transport::StreamProtocol;
pub use transport::TransportHeader;

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Parsed `Session` response header: `<id>[;timeout=<secs>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub id: String,
    pub timeout_secs: u64,
}

impl SessionHeader {
    /// Parse a `Session` header value. Returns `None` for an empty id.
    ///
    /// Unknown parameters are ignored; a missing or malformed timeout
    /// falls back to [`DEFAULT_SESSION_TIMEOUT_SECS`].
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(';').map(str::trim);
        let id = parts.next().filter(|id| !id.is_empty())?;

        let timeout_secs = parts
            .filter_map(|p| {
                let (name, value) = p.split_once('=')?;
                name.trim()
                    .eq_ignore_ascii_case("timeout")
                    .then(|| value.trim().parse::<u64>().ok())
                    .flatten()
            })
            .find(|&t| t > 0)
            .unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS);

        Some(SessionHeader {
            id: id.to_string(),
            timeout_secs,
        })
    }
}

/// How one track's media travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackTransport {
    /// Separate UDP sockets; ports are `(rtp, rtcp)`.
    Udp {
        client_ports: (u16, u16),
        server_ports: Option<(u16, u16)>,
    },
    /// `$`-framed on the control connection; channels are `(rtp, rtcp)`.
    Interleaved { channels: (u8, u8) },
}

/// One track bound to its transport parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackBinding {
    pub track_id: usize,
    pub transport: TrackTransport,
}

/// An established RTSP session.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    timeout: Duration,
    protocol: StreamProtocol,
    url: RtspUrl,
    bindings: Vec<TrackBinding>,
}

impl Session {
    pub(crate) fn new(
        header: SessionHeader,
        protocol: StreamProtocol,
        url: RtspUrl,
        bindings: Vec<TrackBinding>,
    ) -> Self {
        tracing::debug!(
            session_id = %header.id,
            timeout = header.timeout_secs,
            %protocol,
            tracks = bindings.len(),
            "session established"
        );
        Session {
            id: header.id,
            timeout: Duration::from_secs(header.timeout_secs),
            protocol,
            url,
            bindings,
        }
    }

    /// Server-issued session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// How long the server keeps the session without a request.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Transport kind negotiated for every track.
    pub fn protocol(&self) -> StreamProtocol {
        self.protocol
    }

    /// Final URL, after any redirects.
    pub fn url(&self) -> &RtspUrl {
        &self.url
    }

    /// One binding per negotiated track, in SETUP order.
    pub fn bindings(&self) -> &[TrackBinding] {
        &self.bindings
    }

    pub fn binding(&self, track_id: usize) -> Option<&TrackBinding> {
        self.bindings.iter().find(|b| b.track_id == track_id)
    }

    /// Value for the `Session` request header.
    pub fn header_value(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} tracks, {})",
            self.id,
            self.protocol,
            self.bindings.len(),
            self.url
        )
    }
}
