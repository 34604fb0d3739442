//! The RTSP handshake (RFC 2326 §10): everything from connect to the last
//! SETUP.
//!
//! ```text
//!  connect ──► OPTIONS ──► DESCRIBE / ANNOUNCE ──► SETUP × tracks ──► Negotiated
//!     ▲           │                │                    │
//!     └───────────┴──── 3xx + Location (budgeted) ──────┘
//! ```
//!
//! With no pinned transport, SETUP is first attempted over UDP. If any
//! track's SETUP fails for a reason other than I/O, whatever the server
//! set up is torn down and the whole SETUP phase runs once more with
//! interleaved transport.

use std::net::IpAddr;
use std::sync::Arc;

use super::ClientConfig;
use super::control::{ControlChannel, bad_status};
use crate::error::{Result, RtspError};
use crate::media::{Track, Tracks};
use crate::protocol::{Method, RtspRequest, RtspResponse, RtspUrl, sdp};
use crate::session::{Session, TrackBinding, TrackTransport, TransportHeader};
use crate::transport::{
    InterleavedTransport, MediaTransport, RtspConn, StreamProtocol, UdpPair, UdpTransport,
};

/// A finished handshake, ready to be driven by a connection.
pub(crate) struct Negotiated {
    pub(crate) channel: ControlChannel,
    pub(crate) conn: Arc<RtspConn>,
    pub(crate) session: Session,
    /// Aggregate control URL for PLAY, RECORD, PAUSE and TEARDOWN.
    pub(crate) base: RtspUrl,
    pub(crate) tracks: Tracks,
    pub(crate) transport: Arc<dyn MediaTransport>,
    pub(crate) publishing: bool,
}

/// Result of one step: go on, or start over at another URL.
enum Outcome<T> {
    Done(T),
    Redirect(String),
}

/// Unwrap an [`Outcome`], handing a redirect up to the caller.
macro_rules! proceed {
    ($step:expr) => {
        match $step {
            Outcome::Done(value) => value,
            Outcome::Redirect(location) => return Ok(Outcome::Redirect(location)),
        }
    };
}

/// Run the handshake, following redirects within the configured budget.
pub(crate) fn negotiate(
    config: &ClientConfig,
    url: RtspUrl,
    publish: Option<Tracks>,
) -> Result<Negotiated> {
    let mut url = url;
    let mut redirects = 0;

    loop {
        match attempt(config, &url, publish.as_ref())? {
            Outcome::Done(negotiated) => {
                tracing::info!(
                    url = %negotiated.session.url(),
                    session_id = negotiated.session.id(),
                    protocol = %negotiated.session.protocol(),
                    "handshake complete"
                );
                return Ok(negotiated);
            }
            Outcome::Redirect(location) => {
                if redirects >= config.max_redirects {
                    return Err(RtspError::TooManyRedirects(config.max_redirects));
                }
                redirects += 1;
                let next = url.join(&location)?;
                tracing::info!(from = %url, to = %next, hop = redirects, "following redirect");
                url = next;
            }
        }
    }
}

/// Classify a response: 2xx continues, 3xx redirects, anything else fails.
fn check(method: Method, response: RtspResponse) -> Result<Outcome<RtspResponse>> {
    if response.is_success() {
        return Ok(Outcome::Done(response));
    }
    if response.is_redirect() {
        let location = response
            .get_header("Location")
            .ok_or(RtspError::MissingHeader {
                method,
                header: "Location",
            })?;
        tracing::debug!(%method, status = response.status_code, location, "redirected");
        return Ok(Outcome::Redirect(location.to_string()));
    }
    Err(bad_status(method, &response))
}

/// One pass from connect to the last SETUP against `url`.
fn attempt(
    config: &ClientConfig,
    url: &RtspUrl,
    publish: Option<&Tracks>,
) -> Result<Outcome<Negotiated>> {
    let conn = Arc::new(RtspConn::connect(
        url,
        config.tls_config.clone(),
        config.read_timeout,
        config.write_timeout,
    )?);
    let mut channel = ControlChannel::new(
        conn.clone(),
        &config.user_agent,
        url.credentials().cloned(),
    );

    let response = channel.send(
        Method::Options,
        RtspRequest::new(Method::Options, url.as_str()),
    )?;
    match response.status_code {
        404 | 405 | 501 => {
            tracing::warn!(status = response.status_code, "server does not support OPTIONS");
        }
        _ => {
            let response = proceed!(check(Method::Options, response)?);
            match response.get_header("Public").filter(|p| !p.trim().is_empty()) {
                Some(public) => tracing::debug!(public, "server methods"),
                None => tracing::debug!("OPTIONS response without Public header"),
            }
        }
    }

    let (base, tracks) = match publish {
        None => proceed!(describe(&mut channel, url)?),
        Some(tracks) => {
            proceed!(announce(&mut channel, url, tracks)?);
            (url.clone(), tracks.clone())
        }
    };
    let publishing = publish.is_some();

    let proposals: &[StreamProtocol] = match config.stream_protocol {
        Some(StreamProtocol::Udp) => &[StreamProtocol::Udp],
        Some(StreamProtocol::Tcp) => &[StreamProtocol::Tcp],
        None => &[StreamProtocol::Udp, StreamProtocol::Tcp],
    };
    let pinned = config.stream_protocol.is_some();
    let server_ip = conn.peer_addr().ip();

    let mut last_err = None;
    for (i, &proposal) in proposals.iter().enumerate() {
        let setup = match setup_all(
            &mut channel,
            &base,
            &tracks,
            proposal,
            pinned,
            publishing,
            server_ip,
        ) {
            Ok(outcome) => proceed!(outcome),
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                if i + 1 < proposals.len() {
                    tracing::warn!(error = %e, "SETUP over UDP failed, retrying with interleaved transport");
                    teardown_quietly(&mut channel, &base);
                }
                last_err = Some(e);
                continue;
            }
        };

        let header = channel
            .session()
            .cloned()
            .ok_or(RtspError::MissingHeader {
                method: Method::Setup,
                header: "Session",
            })?;

        let transport: Arc<dyn MediaTransport> = match setup.protocol {
            StreamProtocol::Udp => Arc::new(UdpTransport::new(
                server_ip,
                setup.udp_pairs,
                Some(conn.clone()),
            )?),
            StreamProtocol::Tcp => Arc::new(InterleavedTransport::new(
                conn.clone(),
                &setup.bindings,
            )?),
        };

        let session = Session::new(header, setup.protocol, url.clone(), setup.bindings);
        return Ok(Outcome::Done(Negotiated {
            channel,
            conn,
            session,
            base,
            tracks,
            transport,
            publishing,
        }));
    }

    Err(last_err.unwrap_or_else(|| RtspError::BadTransport("no transport to propose".into())))
}

/// DESCRIBE and parse the tracks. Returns the base URL for SETUP.
fn describe(channel: &mut ControlChannel, url: &RtspUrl) -> Result<Outcome<(RtspUrl, Tracks)>> {
    let request =
        RtspRequest::new(Method::Describe, url.as_str()).add_header("Accept", "application/sdp");
    let response = proceed!(check(Method::Describe, channel.send(Method::Describe, request)?)?);

    if let Some(content_type) = response.get_header("Content-Type") {
        if !content_type.to_ascii_lowercase().starts_with("application/sdp") {
            return Err(RtspError::Sdp(format!("unexpected content type {content_type:?}"))
                .in_method(Method::Describe));
        }
    }

    let body = String::from_utf8_lossy(&response.body);
    let tracks = sdp::parse(&body).map_err(|e| e.in_method(Method::Describe))?;

    // RFC 2326 §C.1.1: Content-Base, then Content-Location, then the
    // request URL.
    let base = match response
        .get_header("Content-Base")
        .or_else(|| response.get_header("Content-Location"))
    {
        Some(base) => url.join(base)?,
        None => url.clone(),
    };

    tracing::debug!(tracks = tracks.len(), base = %base, "described");
    Ok(Outcome::Done((base, tracks)))
}

fn announce(channel: &mut ControlChannel, url: &RtspUrl, tracks: &[Track]) -> Result<Outcome<()>> {
    let body = sdp::render(tracks, url.host());
    let request = RtspRequest::new(Method::Announce, url.as_str())
        .with_body("application/sdp", body.into_bytes());
    proceed!(check(Method::Announce, channel.send(Method::Announce, request)?)?);
    Ok(Outcome::Done(()))
}

/// Bindings produced by a complete SETUP phase.
struct Setup {
    protocol: StreamProtocol,
    bindings: Vec<TrackBinding>,
    udp_pairs: Vec<(usize, UdpPair, Option<(u16, u16)>)>,
}

/// SETUP every track. The transport kind of the first reply binds the
/// remaining tracks.
fn setup_all(
    channel: &mut ControlChannel,
    base: &RtspUrl,
    tracks: &[Track],
    proposal: StreamProtocol,
    pinned: bool,
    record: bool,
    server_ip: IpAddr,
) -> Result<Outcome<Setup>> {
    let mut bound: Option<StreamProtocol> = None;
    let mut bindings = Vec::with_capacity(tracks.len());
    let mut udp_pairs = Vec::new();

    for (i, track) in tracks.iter().enumerate() {
        let protocol = bound.unwrap_or(proposal);
        let channels = interleaved_channels(i)?;

        let (proposed, pair) = match protocol {
            StreamProtocol::Udp => {
                let pair = UdpPair::bind_random(server_ip)?;
                (TransportHeader::udp(pair.ports()?, record), Some(pair))
            }
            StreamProtocol::Tcp => (TransportHeader::interleaved(channels, record), None),
        };

        let uri = if record {
            base.control_url(&track.publish_control())
        } else {
            match track.control() {
                Some(control) => base.control_url(control),
                None => base.as_str().to_string(),
            }
        };

        let request = RtspRequest::new(Method::Setup, &uri)
            .add_header("Transport", &proposed.to_header_value());
        let response = proceed!(check(Method::Setup, channel.send(Method::Setup, request)?)?);

        let reply = response
            .get_header("Transport")
            .ok_or(RtspError::MissingHeader {
                method: Method::Setup,
                header: "Transport",
            })?;
        let reply = TransportHeader::parse(reply).map_err(RtspError::BadTransport)?;

        if pinned && reply.protocol != proposal {
            return Err(RtspError::BadTransport(format!(
                "requested {proposal} transport, server chose {}",
                reply.protocol
            )));
        }
        if let Some(bound) = bound {
            if reply.protocol != bound {
                return Err(RtspError::BadTransport(format!(
                    "server mixed {bound} and {} transports in one session",
                    reply.protocol
                )));
            }
        }
        bound = Some(reply.protocol);

        let transport = match (reply.protocol, pair) {
            (StreamProtocol::Udp, Some(pair)) => {
                if record && reply.server_port.is_none() {
                    return Err(RtspError::BadTransport(
                        "server did not provide server_port for publishing".into(),
                    ));
                }
                let client_ports = pair.ports()?;
                udp_pairs.push((track.id(), pair, reply.server_port));
                TrackTransport::Udp {
                    client_ports,
                    server_ports: reply.server_port,
                }
            }
            (StreamProtocol::Udp, None) => {
                return Err(RtspError::BadTransport(
                    "server chose UDP for an interleaved proposal".into(),
                ));
            }
            (StreamProtocol::Tcp, _) => TrackTransport::Interleaved {
                channels: reply.interleaved.unwrap_or(channels),
            },
        };

        tracing::debug!(track_id = track.id(), uri = %uri, ?transport, "track set up");
        bindings.push(TrackBinding {
            track_id: track.id(),
            transport,
        });
    }

    Ok(Outcome::Done(Setup {
        protocol: bound.unwrap_or(proposal),
        bindings,
        udp_pairs,
    }))
}

/// Channels `2i` and `2i + 1` for the i-th track.
fn interleaved_channels(index: usize) -> Result<(u8, u8)> {
    let rtp = u8::try_from(index * 2)
        .ok()
        .filter(|&c| c < u8::MAX)
        .ok_or_else(|| RtspError::BadTransport("too many tracks for interleaved channels".into()))?;
    Ok((rtp, rtp + 1))
}

/// Best-effort TEARDOWN of a half-built session before retrying SETUP.
fn teardown_quietly(channel: &mut ControlChannel, base: &RtspUrl) {
    if channel.session().is_some() {
        let request = RtspRequest::new(Method::Teardown, base.as_str());
        if let Err(e) = channel.send(Method::Teardown, request) {
            tracing::debug!(error = %e, "TEARDOWN before SETUP retry failed");
        }
    }
    channel.clear_session();
}
