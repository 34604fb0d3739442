//! Blocking RTSP client for reading and publishing media streams.
//!
//! The crate dials an `rtsp://` or `rtsps://` URL, runs the RTSP handshake
//! and hands back a [`ClientConn`] that moves opaque RTP/RTCP payloads
//! over UDP or interleaved on the control connection.
//!
//! | Layer | Module |
//! |-------|--------|
//! | Dialing, handshake, connection state machine | [`client`] |
//! | RTSP messages, SDP, URLs, authentication | [`protocol`] |
//! | Session, `Session` and `Transport` headers | [`session`] |
//! | Control connection, UDP and interleaved media | [`transport`] |
//! | Tracks and codec descriptors | [`media`] |

pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::{
    ClientConfig, ClientConn, ConnState, ReadDone, dial_publish, dial_read,
};
pub use error::{Result, RtspError};
pub use media::{MediaKind, Track, Tracks};
pub use session::Session;
pub use transport::{Frame, StreamProtocol, StreamType};
