use crate::transport::StreamProtocol;

/// The RTSP `Transport` header (RFC 2326 §12.39), client side.
///
/// The client renders its proposal into a SETUP request and parses the
/// server's reply, which is authoritative for what was actually set up.
///
/// ## Wire format examples
///
/// ```text
/// UDP, reading:
///   Client → Server:  Transport: RTP/AVP;unicast;client_port=8000-8001
///   Server → Client:  Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
///
/// Interleaved, publishing:
///   Client → Server:  Transport: RTP/AVP/TCP;unicast;interleaved=0-1;mode=record
///   Server → Client:  Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// `RTP/AVP[/UDP]` or `RTP/AVP/TCP`.
    pub protocol: StreamProtocol,
    /// Client's (RTP, RTCP) receive ports.
    pub client_port: Option<(u16, u16)>,
    /// Server's (RTP, RTCP) ports.
    pub server_port: Option<(u16, u16)>,
    /// Interleaved (RTP, RTCP) channel ids.
    pub interleaved: Option<(u8, u8)>,
    /// `mode=record`: the client sends media.
    pub record: bool,
}

impl TransportHeader {
    /// UDP proposal for the given client port pair.
    pub fn udp(client_port: (u16, u16), record: bool) -> Self {
        TransportHeader {
            protocol: StreamProtocol::Udp,
            client_port: Some(client_port),
            server_port: None,
            interleaved: None,
            record,
        }
    }

    /// Interleaved proposal for the given channel pair.
    pub fn interleaved(channels: (u8, u8), record: bool) -> Self {
        TransportHeader {
            protocol: StreamProtocol::Tcp,
            client_port: None,
            server_port: None,
            interleaved: Some(channels),
            record,
        }
    }

    /// Render as a header value.
    pub fn to_header_value(&self) -> String {
        let mut value = match self.protocol {
            StreamProtocol::Udp => "RTP/AVP;unicast".to_string(),
            StreamProtocol::Tcp => "RTP/AVP/TCP;unicast".to_string(),
        };
        if let Some((rtp, rtcp)) = self.client_port {
            value.push_str(&format!(";client_port={}-{}", rtp, rtcp));
        }
        if let Some((rtp, rtcp)) = self.server_port {
            value.push_str(&format!(";server_port={}-{}", rtp, rtcp));
        }
        if let Some((rtp, rtcp)) = self.interleaved {
            value.push_str(&format!(";interleaved={}-{}", rtp, rtcp));
        }
        if self.record {
            value.push_str(";mode=record");
        }
        value
    }

    /// Parse a `Transport` header value.
    ///
    /// Only the first transport specification is considered when a server
    /// lists several. A single port or channel (`server_port=5000`) implies
    /// the next one for RTCP.
    ///
    /// ```
    /// use rtsp::session::transport::TransportHeader;
    /// use rtsp::StreamProtocol;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001").unwrap();
    /// assert_eq!(th.protocol, StreamProtocol::Udp);
    /// assert_eq!(th.server_port, Some((5000, 5001)));
    ///
    /// assert!(TransportHeader::parse("RAW/RAW/UDP;unicast").is_err());
    /// ```
    pub fn parse(header: &str) -> Result<Self, String> {
        let first = header.split(',').next().unwrap_or_default();
        let mut parts = first.split(';').map(str::trim);

        let profile = parts.next().unwrap_or_default();
        let mut protocol = match profile.to_ascii_uppercase().as_str() {
            "RTP/AVP" | "RTP/AVP/UDP" => StreamProtocol::Udp,
            "RTP/AVP/TCP" => StreamProtocol::Tcp,
            other => return Err(format!("unsupported transport profile {other:?}")),
        };

        let mut parsed = TransportHeader {
            protocol,
            client_port: None,
            server_port: None,
            interleaved: None,
            record: false,
        };

        for part in parts {
            if let Some(ports) = part.strip_prefix("client_port=") {
                parsed.client_port = Some(parse_pair(ports)?);
            } else if let Some(ports) = part.strip_prefix("server_port=") {
                parsed.server_port = Some(parse_pair(ports)?);
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                parsed.interleaved = Some(parse_pair(channels)?);
                protocol = StreamProtocol::Tcp;
            } else if part.eq_ignore_ascii_case("mode=record")
                || part.eq_ignore_ascii_case("mode=\"record\"")
            {
                parsed.record = true;
            }
        }

        parsed.protocol = protocol;
        Ok(parsed)
    }
}

/// `a-b` or `a` (meaning `a-(a+1)`).
fn parse_pair<T>(value: &str) -> Result<(T, T), String>
where
    T: std::str::FromStr + Copy + TryFrom<u32>,
    u32: From<T>,
{
    let bad = || format!("bad port or channel range {value:?}");
    let mut numbers = value.splitn(2, '-');
    let first: T = numbers
        .next()
        .and_then(|n| n.trim().parse().ok())
        .ok_or_else(bad)?;
    let second: T = match numbers.next() {
        Some(n) => n.trim().parse().map_err(|_| bad())?,
        None => T::try_from(u32::from(first) + 1).map_err(|_| bad())?,
    };
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_udp_proposal() {
        assert_eq!(
            TransportHeader::udp((8000, 8001), false).to_header_value(),
            "RTP/AVP;unicast;client_port=8000-8001"
        );
        assert_eq!(
            TransportHeader::udp((8000, 8001), true).to_header_value(),
            "RTP/AVP;unicast;client_port=8000-8001;mode=record"
        );
    }

    #[test]
    fn render_interleaved_proposal() {
        assert_eq!(
            TransportHeader::interleaved((2, 3), true).to_header_value(),
            "RTP/AVP/TCP;unicast;interleaved=2-3;mode=record"
        );
    }

    #[test]
    fn parse_udp_reply() {
        let th = TransportHeader::parse(
            "RTP/AVP;unicast;client_port=5000-5001;server_port=6970-6971;ssrc=1A2B3C4D",
        )
        .unwrap();
        assert_eq!(th.protocol, StreamProtocol::Udp);
        assert_eq!(th.client_port, Some((5000, 5001)));
        assert_eq!(th.server_port, Some((6970, 6971)));
        assert_eq!(th.interleaved, None);
    }

    #[test]
    fn parse_interleaved_reply() {
        let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=4-5;mode=\"RECORD\"")
            .unwrap();
        assert_eq!(th.protocol, StreamProtocol::Tcp);
        assert_eq!(th.interleaved, Some((4, 5)));
        assert!(th.record);
    }

    #[test]
    fn interleaved_parameter_implies_tcp() {
        let th = TransportHeader::parse("RTP/AVP;unicast;interleaved=0-1").unwrap();
        assert_eq!(th.protocol, StreamProtocol::Tcp);
    }

    #[test]
    fn single_value_implies_next() {
        let th = TransportHeader::parse("RTP/AVP;unicast;server_port=7000").unwrap();
        assert_eq!(th.server_port, Some((7000, 7001)));
        let th = TransportHeader::parse("RTP/AVP/TCP;interleaved=6").unwrap();
        assert_eq!(th.interleaved, Some((6, 7)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(TransportHeader::parse("").is_err());
        assert!(TransportHeader::parse("RTP/AVP;client_port=abc").is_err());
        assert!(TransportHeader::parse("RTP/AVP/TCP;interleaved=255").is_err());
    }

    #[test]
    fn first_of_several_specs() {
        let th =
            TransportHeader::parse("RTP/AVP/TCP;interleaved=0-1,RTP/AVP;client_port=1-2").unwrap();
        assert_eq!(th.protocol, StreamProtocol::Tcp);
        assert_eq!(th.client_port, None);
    }
}
