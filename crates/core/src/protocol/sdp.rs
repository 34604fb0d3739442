//! SDP (Session Description Protocol) handling (RFC 4566 / RFC 8866).
//!
//! DESCRIBE responses carry the server's description, one media section
//! per track; ANNOUNCE requests carry ours. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                             ← session name
//! c=IN IP4 <addr>                              ← connection address
//! t=0 0                                        ← timing (live stream)
//! m=video 0 RTP/AVP 96                         ← media description
//! a=rtpmap:96 H264/90000                       ← codec/clock rate
//! a=fmtp:96 packetization-mode=1               ← codec parameters
//! a=control:trackID=0                          ← track control URL
//! ```
//!
//! Only what the client needs is interpreted: the media kind, the format
//! list and `a=control`. Every other media-level attribute is carried
//! through untouched as the track's codec parameters.

use crate::error::{Result, RtspError};
use crate::media::{MediaKind, Track, Tracks};

/// SDP session name used in ANNOUNCE bodies.
pub const SESSION_NAME: &str = "Stream";

/// Parse a session description into tracks, ids assigned by position.
pub fn parse(body: &str) -> Result<Tracks> {
    let mut tracks: Tracks = Vec::new();
    let mut current: Option<Section> = None;
    let mut saw_version = false;

    for line in body.lines().map(str::trim_end) {
        if line.is_empty() {
            continue;
        }

        if let Some(v) = line.strip_prefix("v=") {
            if v.trim() != "0" {
                return Err(RtspError::Sdp(format!("unsupported SDP version {v:?}")));
            }
            saw_version = true;
            continue;
        }

        if let Some(media) = line.strip_prefix("m=") {
            if let Some(section) = current.take() {
                tracks.push(section.into_track(tracks.len()));
            }
            current = Some(Section::parse(media)?);
            continue;
        }

        if let Some(section) = current.as_mut() {
            if let Some(value) = line.strip_prefix("a=control:") {
                section.control = Some(value.trim().to_string());
            } else if line.starts_with("a=") {
                section.attributes.push(line.to_string());
            }
        }
    }

    if let Some(section) = current.take() {
        tracks.push(section.into_track(tracks.len()));
    }

    if !saw_version {
        return Err(RtspError::Sdp("missing v= line".into()));
    }
    if tracks.is_empty() {
        return Err(RtspError::Sdp("no media sections".into()));
    }

    tracing::debug!(tracks = tracks.len(), "parsed session description");
    Ok(tracks)
}

/// One `m=` section while it is being collected.
struct Section {
    kind: MediaKind,
    formats: String,
    attributes: Vec<String>,
    control: Option<String>,
}

impl Section {
    fn parse(media: &str) -> Result<Self> {
        let mut parts = media.split_whitespace();
        let (Some(kind), Some(_port), Some(_proto)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RtspError::Sdp(format!("malformed media line {media:?}")));
        };
        Ok(Section {
            kind: MediaKind::from_name(kind),
            formats: parts.collect::<Vec<_>>().join(" "),
            attributes: Vec::new(),
            control: None,
        })
    }

    fn into_track(self, id: usize) -> Track {
        Track::new(id, self.kind, &self.formats, self.attributes).with_control(self.control)
    }
}

/// Render the description sent with ANNOUNCE.
///
/// `host` fills the origin and connection lines; every track gets an
/// `a=control:trackID=<id>` attribute so SETUP URLs can be derived from it.
pub fn render(tracks: &[Track], host: &str) -> String {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let ip_version = if host.contains(':') { "IP6" } else { "IP4" };

    let mut sdp: Vec<String> = vec![
        "v=0".to_string(),
        format!("o=- 0 0 IN {} {}", ip_version, host),
        format!("s={}", SESSION_NAME),
        format!("c=IN {} {}", ip_version, host),
        "t=0 0".to_string(),
        "a=tool:rtsp-rs".to_string(),
    ];

    for track in tracks {
        sdp.extend(track.sdp_media_lines());
    }

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERA_SDP: &str = "v=0\r\n\
        o=- 1 1 IN IP4 10.0.0.5\r\n\
        s=Media Presentation\r\n\
        c=IN IP4 0.0.0.0\r\n\
        t=0 0\r\n\
        a=control:*\r\n\
        m=video 0 RTP/AVP 96\r\n\
        b=AS:5000\r\n\
        a=rtpmap:96 H264/90000\r\n\
        a=fmtp:96 packetization-mode=1;profile-level-id=420029\r\n\
        a=control:trackID=1\r\n\
        m=audio 0 RTP/AVP 0 8\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        a=control:rtsp://10.0.0.5/stream/trackID=2\r\n";

    #[test]
    fn parses_camera_description() {
        let tracks = parse(CAMERA_SDP).unwrap();
        assert_eq!(tracks.len(), 2);

        assert_eq!(tracks[0].id(), 0);
        assert_eq!(tracks[0].kind(), &MediaKind::Video);
        assert_eq!(tracks[0].formats(), "96");
        assert_eq!(tracks[0].control(), Some("trackID=1"));
        assert_eq!(tracks[0].attributes().len(), 2, "b= lines are not attributes");

        assert_eq!(tracks[1].id(), 1);
        assert_eq!(tracks[1].kind(), &MediaKind::Audio);
        assert_eq!(tracks[1].formats(), "0 8");
        assert_eq!(
            tracks[1].control(),
            Some("rtsp://10.0.0.5/stream/trackID=2")
        );
    }

    #[test]
    fn session_level_control_is_ignored() {
        let tracks = parse(CAMERA_SDP).unwrap();
        assert!(tracks.iter().all(|t| t.control() != Some("*")));
    }

    #[test]
    fn rejects_descriptions_without_media() {
        assert!(parse("v=0\r\ns=x\r\n").is_err());
        assert!(parse("m=video 0 RTP/AVP 96\r\n").is_err(), "v= is required");
        assert!(parse("v=1\r\nm=video 0 RTP/AVP 96\r\n").is_err());
        assert!(parse("v=0\r\nm=video\r\n").is_err());
    }

    #[test]
    fn render_contains_every_track() {
        let tracks = vec![
            Track::new(0, MediaKind::Video, "96", vec!["a=rtpmap:96 H264/90000".into()]),
            Track::new(5, MediaKind::Audio, "97", vec!["a=rtpmap:97 opus/48000/2".into()]),
        ];
        let sdp = render(&tracks, "127.0.0.1");
        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("o=- 0 0 IN IP4 127.0.0.1\r\n"));
        assert!(sdp.contains("s=Stream\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:trackID=0\r\n"));
        assert!(sdp.contains("m=audio 0 RTP/AVP 97\r\na=rtpmap:97 opus/48000/2\r\na=control:trackID=5\r\n"));
        assert!(sdp.ends_with("\r\n"));

        // what the server sees must decode back into the same media
        let parsed = parse(&sdp).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].control(), Some("trackID=5"));
        assert_eq!(parsed[1].attributes(), tracks[1].attributes());
    }

    #[test]
    fn render_ipv6_host() {
        let tracks = vec![Track::new(0, MediaKind::Video, "96", vec![])];
        assert!(render(&tracks, "::1").contains("c=IN IP6 ::1\r\n"));
    }
}
