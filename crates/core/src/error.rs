//! Error types for the RTSP client library.

use std::fmt;

use crate::client::ConnState;
use crate::protocol::Method;

/// Errors that can occur in the RTSP client library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transport**: [`Io`](Self::Io), [`Tls`](Self::Tls),
///   [`RemoteClosed`](Self::RemoteClosed), [`Timeout`](Self::Timeout):
///   socket-level failures, never retried inside the library.
/// - **Protocol**: [`BadStatus`](Self::BadStatus),
///   [`MissingHeader`](Self::MissingHeader),
///   [`BadTransport`](Self::BadTransport), [`Parse`](Self::Parse),
///   [`Sdp`](Self::Sdp), [`Auth`](Self::Auth),
///   [`Exchange`](Self::Exchange).
/// - **State**: [`InvalidState`](Self::InvalidState),
///   [`Closed`](Self::Closed), [`ReadLoopActive`](Self::ReadLoopActive),
///   [`UnknownTrack`](Self::UnknownTrack),
///   [`FrameTooLarge`](Self::FrameTooLarge): rejected before any I/O.
/// - **Dial input**: [`InvalidUrl`](Self::InvalidUrl),
///   [`UnsupportedScheme`](Self::UnsupportedScheme),
///   [`NoTracks`](Self::NoTracks),
///   [`DuplicateTrackId`](Self::DuplicateTrackId).
/// - **Redirect**: [`TooManyRedirects`](Self::TooManyRedirects).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or handshake failure on an `rtsps` connection.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The server closed the control connection.
    #[error("connection closed by server")]
    RemoteClosed,

    /// No response arrived within the configured read timeout.
    #[error("timed out waiting for {0} response")]
    Timeout(Method),

    /// The URL could not be parsed or has no host.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The URL scheme is neither `rtsp` nor `rtsps`.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Publishing requires at least one track.
    #[error("no tracks provided")]
    NoTracks,

    /// Two tracks in the same set share an id.
    #[error("duplicate track id: {0}")]
    DuplicateTrackId(usize),

    /// The server answered with a status that is neither 2xx nor 3xx.
    #[error("{method} failed: {code} {reason}")]
    BadStatus {
        method: Method,
        code: u16,
        reason: String,
    },

    /// A response lacked a header required to continue.
    #[error("{method} response is missing the {header} header")]
    MissingHeader {
        method: Method,
        header: &'static str,
    },

    /// The SETUP reply carried a transport the client cannot use.
    #[error("bad transport negotiation: {0}")]
    BadTransport(String),

    /// Failed to decode an RTSP message (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The session description could not be used.
    #[error("SDP error: {0}")]
    Sdp(String),

    /// Authentication was requested but cannot be satisfied.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A decode error raised while handling the response to `method`.
    #[error("{method}: {source}")]
    Exchange {
        method: Method,
        #[source]
        source: Box<RtspError>,
    },

    /// Too many 3xx hops while dialing.
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),

    /// The operation is not allowed in the connection's current state.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ConnState,
    },

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// A read loop is already running on this connection.
    #[error("a read loop is already active")]
    ReadLoopActive,

    /// The frame names a track that is not part of the session.
    #[error("unknown track id: {0}")]
    UnknownTrack(usize),

    /// Interleaved frames carry a 16-bit length.
    #[error("frame of {0} bytes exceeds the interleaved limit")]
    FrameTooLarge(usize),
}

impl RtspError {
    /// Attach the request method to decode errors coming out of a response.
    ///
    /// Errors of every other kind already name their context and pass
    /// through untouched.
    pub(crate) fn in_method(self, method: Method) -> Self {
        match self {
            e @ (RtspError::Parse { .. } | RtspError::Sdp(_)) => RtspError::Exchange {
                method,
                source: Box::new(e),
            },
            e => e,
        }
    }

    /// Whether this failure happened at the socket level.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RtspError::Io(_) | RtspError::Tls(_) | RtspError::RemoteClosed | RtspError::Timeout(_)
        )
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was not a number.
    InvalidContentLength,
    /// The message head grew past the buffering limit without a blank line.
    HeadTooLarge,
    /// `Content-Length` announced a body past the buffering limit.
    BodyTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid content length"),
            Self::HeadTooLarge => write!(f, "message head too large"),
            Self::BodyTooLarge => write!(f, "message body too large"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
