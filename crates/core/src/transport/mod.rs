//! Network transport layer for RTSP signaling and RTP media.
//!
//! RTSP uses a split transport model:
//!
//! - **Control** ([`tcp::RtspConn`]): the RTSP request/response exchange
//!   over one TCP connection, optionally wrapped in TLS ([`tls`]).
//!
//! - **Media**, behind the [`MediaTransport`] trait, in one of two forms
//!   chosen at SETUP time:
//!
//!   | Variant | Carrier | RFC |
//!   |---------|---------|-----|
//!   | [`UdpTransport`] | one RTP/RTCP socket pair per track | RFC 2326 §12.39 |
//!   | [`InterleavedTransport`] | `$`-framed on the control connection | RFC 2326 §10.12 |
//!
//! The byte-level `$` framing shared by the control connection and the
//! interleaved transport lives in [`framing`].

pub mod framing;
pub mod tcp;
pub mod tls;
pub mod udp;

use std::fmt;
use std::time::Duration;

use crate::error::Result;
pub use tcp::{InterleavedTransport, RtspConn};
pub use udp::{UdpPair, UdpTransport};

/// How long a blocking receive waits before reporting "nothing yet", so
/// loops can notice stop requests.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Media transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamProtocol {
    /// RTP over UDP (`RTP/AVP`).
    Udp,
    /// RTP interleaved on the RTSP TCP connection (`RTP/AVP/TCP`).
    Tcp,
}

impl fmt::Display for StreamProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamProtocol::Udp => f.write_str("udp"),
            StreamProtocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// Coarse frame type: media data or control data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Rtp,
    Rtcp,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Rtp => f.write_str("RTP"),
            StreamType::Rtcp => f.write_str("RTCP"),
        }
    }
}

/// A received unit of media, tagged with its track and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub track_id: usize,
    pub stream_type: StreamType,
    pub payload: Vec<u8>,
}

/// Moves opaque RTP/RTCP payloads between the client and the server.
///
/// Implementations are shared between the read loop and writers, so every
/// method takes `&self`.
pub trait MediaTransport: Send + Sync {
    /// Send one payload for `track_id`.
    fn send(&self, track_id: usize, stream_type: StreamType, payload: &[u8]) -> Result<()>;

    /// Wait up to [`POLL_INTERVAL`] for the next frame.
    ///
    /// `Ok(None)` means nothing arrived in time; errors are fatal for the
    /// read loop.
    fn receive(&self) -> Result<Option<Frame>>;

    /// Drop frames received but not yet handed to `receive`. A queued
    /// error is kept.
    fn discard_pending(&self);

    /// Release sockets. Pending and later `receive` calls fail.
    fn close(&self);
}
