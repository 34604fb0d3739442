//! RTSP protocol implementation (RFC 2326), client side.
//!
//! This module handles the text-based RTSP signaling protocol: building
//! requests, decoding responses, describing sessions, resolving URLs and
//! answering authentication challenges.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! ## Methods used by the client
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery, UDP keep-alive |
//! | DESCRIBE | §10.2 | Retrieve SDP session description (read) |
//! | ANNOUNCE | §10.3 | Post SDP session description (publish) |
//! | SETUP | §10.4 | Negotiate transport (UDP ports or interleaved channels) |
//! | PLAY | §10.5 | Start media delivery from the server |
//! | PAUSE | §10.6 | Suspend media delivery |
//! | RECORD | §10.11 | Start media delivery to the server |
//! | TEARDOWN | §10.7 | Destroy session |

pub mod auth;
pub mod request;
pub mod response;
pub mod sdp;
pub mod url;

use std::fmt;

pub use request::RtspRequest;
pub use response::RtspResponse;
pub use self::url::{Credentials, RtspUrl};

/// RTSP protocol version written on every request line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// RTSP request methods issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Describe,
    Announce,
    Setup,
    Play,
    Record,
    Pause,
    Teardown,
    GetParameter,
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Announce => "ANNOUNCE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Record => "RECORD",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::GetParameter => "GET_PARAMETER",
        }
    }

    /// Look up a method by its wire name (case-sensitive, RFC 2326 §6.1).
    pub fn from_name(name: &str) -> Option<Self> {
        let method = match name {
            "OPTIONS" => Method::Options,
            "DESCRIBE" => Method::Describe,
            "ANNOUNCE" => Method::Announce,
            "SETUP" => Method::Setup,
            "PLAY" => Method::Play,
            "RECORD" => Method::Record,
            "PAUSE" => Method::Pause,
            "TEARDOWN" => Method::Teardown,
            "GET_PARAMETER" => Method::GetParameter,
            _ => return None,
        };
        Some(method)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
