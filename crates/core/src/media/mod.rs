//! Media tracks and their codec-specific descriptors.
//!
//! A [`Track`] is what the client negotiates during SETUP: one elementary
//! stream (video, audio, ...) with an id unique within its session. The
//! codec parameters are kept as opaque SDP media-level attributes; the
//! connection only needs the id, the media kind and a way to render the
//! track into an SDP media section.
//!
//! ## Track constructors
//!
//! | Codec | Constructor | RFC |
//! |-------|-------------|-----|
//! | H.264 | [`Track::h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | AAC | [`Track::aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) |
//! | any | [`Track::new`] | |

pub mod aac;
pub mod h264;

use std::collections::HashSet;
use std::fmt;

use crate::error::{Result, RtspError};

/// Media type of an SDP `m=` line (RFC 8866 §5.14).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Application,
    Other(String),
}

impl MediaKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            "application" => MediaKind::Application,
            other => MediaKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Application => "application",
            MediaKind::Other(name) => name,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One media stream of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    id: usize,
    kind: MediaKind,
    formats: String,
    attributes: Vec<String>,
    control: Option<String>,
}

/// Ordered set of tracks. Order decides SETUP order and, for interleaved
/// transport, channel assignment.
pub type Tracks = Vec<Track>;

impl Track {
    /// Build a track from raw SDP pieces.
    ///
    /// `formats` is the payload-type list of the `m=` line (e.g. `"96"`);
    /// `attributes` are media-level lines including the `a=` prefix, in
    /// order. `a=control:` lines are rejected here: the control URL is
    /// derived from the id when publishing.
    pub fn new(id: usize, kind: MediaKind, formats: &str, attributes: Vec<String>) -> Self {
        let attributes = attributes
            .into_iter()
            .filter(|a| !a.starts_with("a=control:"))
            .collect();
        Track {
            id,
            kind,
            formats: formats.to_string(),
            attributes,
            control: None,
        }
    }

    pub(crate) fn with_control(mut self, control: Option<String>) -> Self {
        self.control = control;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> &MediaKind {
        &self.kind
    }

    /// Payload types from the `m=` line.
    pub fn formats(&self) -> &str {
        &self.formats
    }

    /// Media-level SDP attributes (codec parameters), `a=` prefixed.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Value of the first `a=<name>:` attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find_map(|line| {
            line.strip_prefix("a=")
                .and_then(|a| a.strip_prefix(name))
                .and_then(|rest| rest.strip_prefix(':'))
        })
    }

    /// The `a=control:` value a server advertised for this track.
    pub fn control(&self) -> Option<&str> {
        self.control.as_deref()
    }

    /// Control attribute used when this track is published.
    pub fn publish_control(&self) -> String {
        format!("trackID={}", self.id)
    }

    /// Render the SDP media section for this track, `a=control:` last.
    pub fn sdp_media_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.attributes.len() + 2);
        lines.push(format!("m={} 0 RTP/AVP {}", self.kind, self.formats));
        lines.extend(self.attributes.iter().cloned());
        lines.push(format!(
            "a=control:{}",
            self.control.clone().unwrap_or_else(|| self.publish_control())
        ));
        lines
    }
}

/// Check a caller-supplied track set: non-empty, ids unique.
pub fn validate_tracks(tracks: &[Track]) -> Result<()> {
    if tracks.is_empty() {
        return Err(RtspError::NoTracks);
    }
    let mut seen = HashSet::with_capacity(tracks.len());
    for track in tracks {
        if !seen.insert(track.id) {
            return Err(RtspError::DuplicateTrackId(track.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcmu(id: usize) -> Track {
        Track::new(
            id,
            MediaKind::Audio,
            "0",
            vec!["a=rtpmap:0 PCMU/8000".into()],
        )
    }

    #[test]
    fn validate_rejects_empty_and_duplicates() {
        assert!(matches!(validate_tracks(&[]), Err(RtspError::NoTracks)));
        assert!(matches!(
            validate_tracks(&[pcmu(1), pcmu(2), pcmu(1)]),
            Err(RtspError::DuplicateTrackId(1))
        ));
        assert!(validate_tracks(&[pcmu(0), pcmu(3)]).is_ok());
    }

    #[test]
    fn control_attributes_are_not_kept_as_codec_params() {
        let track = Track::new(
            0,
            MediaKind::Video,
            "96",
            vec!["a=rtpmap:96 H264/90000".into(), "a=control:track9".into()],
        );
        assert_eq!(track.attributes().len(), 1);
        assert_eq!(track.control(), None);
    }

    #[test]
    fn media_lines_end_with_control() {
        let lines = pcmu(4).sdp_media_lines();
        assert_eq!(lines[0], "m=audio 0 RTP/AVP 0");
        assert_eq!(lines[1], "a=rtpmap:0 PCMU/8000");
        assert_eq!(lines.last().unwrap(), "a=control:trackID=4");
    }

    #[test]
    fn attribute_lookup() {
        let track = pcmu(0);
        assert_eq!(track.attribute("rtpmap"), Some("0 PCMU/8000"));
        assert_eq!(track.attribute("fmtp"), None);
    }
}
