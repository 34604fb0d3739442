//! RTSP client: dialing, negotiation and the connection state machine.
//!
//! ## Reading
//!
//! ```no_run
//! use std::time::Duration;
//!
//! let conn = rtsp::dial_read("rtsp://camera.local:554/live")?;
//! let done = conn.read_frames(|track_id, stream_type, payload| {
//!     println!("track {track_id}: {stream_type} {} bytes", payload.len());
//! });
//! std::thread::sleep(Duration::from_secs(5));
//! conn.close()?;
//! done.wait().ok();
//! # Ok::<(), rtsp::RtspError>(())
//! ```
//!
//! ## Publishing
//!
//! ```no_run
//! use rtsp::{StreamType, Track};
//!
//! let sps = [0x67, 0x64, 0x00, 0x1f, 0xac, 0xd9];
//! let pps = [0x68, 0xee, 0x3c, 0x80];
//! let track = Track::h264(0, 96, &sps, &pps)?;
//!
//! let conn = rtsp::dial_publish("rtsp://server:8554/mystream", vec![track])?;
//! conn.write_frame(0, StreamType::Rtp, &[0x80, 0x60, 0x00, 0x01])?;
//! conn.close()?;
//! # Ok::<(), rtsp::RtspError>(())
//! ```
//!
//! ## Method flow
//!
//! ```text
//! dial_read:     OPTIONS → DESCRIBE → SETUP × tracks → PLAY
//! dial_publish:  OPTIONS → ANNOUNCE → SETUP × tracks → RECORD
//! close:         TEARDOWN
//! ```

pub mod conn;
mod control;
pub mod done;
mod negotiator;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::media::{Tracks, validate_tracks};
use crate::protocol::RtspUrl;
use crate::transport::StreamProtocol;
pub use conn::{ClientConn, ConnState};
pub use done::ReadDone;

/// Default read timeout for responses and connection setup.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default write timeout on the control socket.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of 3xx hops followed while dialing.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Dial-time options shared by every connection they create.
///
/// ```
/// use std::time::Duration;
/// use rtsp::{ClientConfig, StreamProtocol};
///
/// let config = ClientConfig {
///     stream_protocol: Some(StreamProtocol::Tcp),
///     read_timeout: Duration::from_secs(5),
///     ..ClientConfig::default()
/// };
/// assert_eq!(config.max_redirects, 5);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Media transport to request. `None` tries UDP first and falls back
    /// to interleaved TCP once if SETUP fails.
    pub stream_protocol: Option<StreamProtocol>,
    /// How long to wait for connect and for each response.
    pub read_timeout: Duration,
    /// How long a socket write may block.
    pub write_timeout: Duration,
    /// 3xx hops followed before giving up.
    pub max_redirects: usize,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// TLS settings for `rtsps`. `None` accepts any server certificate.
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            stream_protocol: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: format!("rtsp-rs/{}", env!("CARGO_PKG_VERSION")),
            tls_config: None,
        }
    }
}

impl ClientConfig {
    /// Connect, negotiate and start playing. Frames can be read from the
    /// returned connection right away.
    pub fn dial_read(&self, url: &str) -> Result<ClientConn> {
        let conn = self.prepare_read(url)?;
        conn.play()?;
        Ok(conn)
    }

    /// Connect, announce `tracks`, negotiate and start recording. Frames
    /// can be written right away.
    pub fn dial_publish(&self, url: &str, tracks: Tracks) -> Result<ClientConn> {
        let conn = self.prepare_publish(url, tracks)?;
        conn.record()?;
        Ok(conn)
    }

    /// Negotiate a read session and stop before PLAY.
    pub fn prepare_read(&self, url: &str) -> Result<ClientConn> {
        let url = RtspUrl::parse(url)?;
        tracing::info!(%url, "dialing for read");
        let negotiated = negotiator::negotiate(self, url, None)?;
        Ok(ClientConn::new(negotiated))
    }

    /// Negotiate a publish session and stop before RECORD.
    pub fn prepare_publish(&self, url: &str, tracks: Tracks) -> Result<ClientConn> {
        let url = RtspUrl::parse(url)?;
        validate_tracks(&tracks)?;
        tracing::info!(%url, tracks = tracks.len(), "dialing for publish");
        let negotiated = negotiator::negotiate(self, url, Some(tracks))?;
        Ok(ClientConn::new(negotiated))
    }
}

/// [`ClientConfig::dial_read`] with the default configuration.
pub fn dial_read(url: &str) -> Result<ClientConn> {
    ClientConfig::default().dial_read(url)
}

/// [`ClientConfig::dial_publish`] with the default configuration.
pub fn dial_publish(url: &str, tracks: Tracks) -> Result<ClientConn> {
    ClientConfig::default().dial_publish(url, tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RtspError;
    use crate::media::{MediaKind, Track};

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.stream_protocol, None);
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.max_redirects, 5);
        assert!(config.user_agent.starts_with("rtsp-rs/"));
    }

    #[test]
    fn dial_input_rejected_before_io() {
        let config = ClientConfig::default();
        assert!(matches!(
            config.dial_read("http://example.com/stream"),
            Err(RtspError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            config.dial_read("not a url"),
            Err(RtspError::InvalidUrl(_))
        ));
        assert!(matches!(
            config.dial_publish("rtsp://127.0.0.1:1/x", vec![]),
            Err(RtspError::NoTracks)
        ));

        let track = Track::new(3, MediaKind::Video, "96", vec![]);
        assert!(matches!(
            config.dial_publish("rtsp://127.0.0.1:1/x", vec![track.clone(), track]),
            Err(RtspError::DuplicateTrackId(3))
        ));
    }
}
