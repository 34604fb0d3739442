use super::{MediaKind, Track};
use crate::error::{Result, RtspError};

/// Sampling frequencies indexed by `samplingFrequencyIndex`
/// (ISO/IEC 14496-3 §1.6.3.4).
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Fields decoded from the first bytes of an AudioSpecificConfig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacConfig {
    pub object_type: u8,
    pub sample_rate: u32,
    pub channel_count: u8,
}

impl AacConfig {
    /// Decode `audioObjectType` (5 bits), `samplingFrequencyIndex` (4 bits,
    /// or 15 followed by an explicit 24-bit rate) and
    /// `channelConfiguration` (4 bits).
    pub fn parse(config: &[u8]) -> Result<Self> {
        let mut bits = BitReader::new(config);

        let object_type = bits.read(5)? as u8;
        if object_type == 31 {
            return Err(RtspError::Sdp("extended AAC object types are not supported".into()));
        }

        let sample_rate = match bits.read(4)? as usize {
            15 => bits.read(24)?,
            idx if idx < SAMPLE_RATES.len() => SAMPLE_RATES[idx],
            idx => {
                return Err(RtspError::Sdp(format!(
                    "invalid AAC sampling frequency index {idx}"
                )));
            }
        };

        let channel_count = bits.read(4)? as u8;
        if channel_count == 0 {
            return Err(RtspError::Sdp("AAC channel configuration 0 is not supported".into()));
        }

        Ok(AacConfig {
            object_type,
            sample_rate,
            channel_count,
        })
    }
}

impl Track {
    /// Build an AAC audio track from its AudioSpecificConfig (RFC 3640,
    /// `mode=AAC-hbr`).
    pub fn aac(id: usize, payload_type: u8, config: &[u8]) -> Result<Self> {
        let parsed = AacConfig::parse(config)?;
        let config_hex: String = config.iter().map(|b| format!("{:02x}", b)).collect();

        Ok(Track::new(
            id,
            MediaKind::Audio,
            &payload_type.to_string(),
            vec![
                format!(
                    "a=rtpmap:{} MPEG4-GENERIC/{}/{}",
                    payload_type, parsed.sample_rate, parsed.channel_count
                ),
                format!(
                    "a=fmtp:{} profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;\
                     indexdeltalength=3;config={}",
                    payload_type, config_hex
                ),
            ],
        ))
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read(&mut self, count: usize) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = self
                .data
                .get(self.pos / 8)
                .ok_or_else(|| RtspError::Sdp("AAC config too short".into()))?;
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Ok(value)
    }
}
