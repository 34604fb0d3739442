use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::{MediaKind, Track};
use crate::error::{Result, RtspError};

/// RTP clock rate for H.264 (RFC 6184 §8.1).
pub const H264_CLOCK_RATE: u32 = 90000;

impl Track {
    /// Build an H.264 video track from its parameter sets (RFC 6184).
    ///
    /// `sps` and `pps` are raw NAL units without start codes. The SDP
    /// attributes follow RFC 6184 §8.2.1. `a=rtpmap` defines the payload
    /// type and must precede the `a=fmtp` line that references it:
    ///
    /// - `a=rtpmap:<pt> H264/90000`
    /// - `a=fmtp:<pt> packetization-mode=1;profile-level-id=<hex>;sprop-parameter-sets=<b64 sps>,<b64 pps>`
    pub fn h264(id: usize, payload_type: u8, sps: &[u8], pps: &[u8]) -> Result<Self> {
        let profile_level_id = profile_level_id(sps)?;
        if pps.is_empty() {
            return Err(RtspError::Sdp("H.264 PPS is empty".into()));
        }

        let fmtp = format!(
            "a=fmtp:{} packetization-mode=1;profile-level-id={};sprop-parameter-sets={},{}",
            payload_type,
            profile_level_id,
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        );

        Ok(Track::new(
            id,
            MediaKind::Video,
            &payload_type.to_string(),
            vec![
                format!("a=rtpmap:{} H264/{}", payload_type, H264_CLOCK_RATE),
                fmtp,
            ],
        ))
    }
}

/// Derive profile-level-id from the SPS NAL (RFC 6184 §8.1): bytes 1–3 are
/// profile_idc, constraint flags and level_idc.
fn profile_level_id(sps: &[u8]) -> Result<String> {
    if sps.len() < 4 {
        return Err(RtspError::Sdp("H.264 SPS too short for profile-level-id".into()));
    }
    Ok(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
}
