//! Scripted in-process RTSP server for the client integration tests.
//!
//! One thread per accepted connection, like a real server. Every request
//! and every interleaved frame the client sends is recorded so tests can
//! assert on what went over the wire. [`FakeServer::start_tls`] puts a
//! rustls acceptor with a throwaway certificate in front of it.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rtsp::StreamProtocol;
use rtsp::protocol::{RtspRequest, RtspResponse};
use rtsp::session::TransportHeader;
use rtsp::transport::framing::{Decoder, Unit, encode_interleaved};

pub const SESSION_ID: &str = "TESTSESSION";
pub const REALM: &str = "test-realm";
pub const NONCE: &str = "0123456789abcdef";

/// Knobs for the scripted server.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Media sections returned by DESCRIBE (at least one).
    pub tracks: usize,
    /// Answer UDP SETUP requests with 461 Unsupported Transport.
    pub reject_udp: bool,
    /// `(path, location)`: DESCRIBE on `path` answers 302 to `location`.
    pub redirects: Vec<(String, String)>,
    /// Status for DESCRIBE instead of 200.
    pub describe_status: Option<u16>,
    /// Require Digest credentials `(username, password)` on DESCRIBE.
    pub digest: Option<(String, String)>,
    /// Never send a `Session` header.
    pub omit_session: bool,
    /// Hang up right after answering PLAY, without streaming.
    pub close_after_play: bool,
}

struct Shared {
    behavior: Behavior,
    running: AtomicBool,
    requests: Mutex<Vec<RtspRequest>>,
    frames: Mutex<Vec<(u8, Vec<u8>)>>,
    /// `(method, frames received so far)` at each request.
    marks: Mutex<Vec<(String, usize)>>,
}

pub struct FakeServer {
    addr: SocketAddr,
    tls_addr: Option<SocketAddr>,
    shared: Arc<Shared>,
}

impl FakeServer {
    pub fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake server");
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let shared = Arc::new(Shared {
            behavior,
            running: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            marks: Mutex::new(Vec::new()),
        });

        let accept_shared = shared.clone();
        thread::spawn(move || {
            while accept_shared.running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        let shared = accept_shared.clone();
                        thread::spawn(move || Connection::new(stream, shared).run());
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(20));
                    }
                    Err(_) => break,
                }
            }
        });

        FakeServer {
            addr,
            tls_addr: None,
            shared,
        }
    }

    /// Same server, reached over `rtsps://` through a TLS relay.
    pub fn start_tls(behavior: Behavior) -> Self {
        let mut server = FakeServer::start(behavior);
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind TLS front");
        listener.set_nonblocking(true).unwrap();
        server.tls_addr = Some(listener.local_addr().unwrap());

        let config = tls_server_config();
        let backend = server.addr;
        let shared = server.shared.clone();
        thread::spawn(move || {
            while shared.running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        let config = config.clone();
                        let shared = shared.clone();
                        thread::spawn(move || relay_tls(stream, backend, config, shared));
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(20));
                    }
                    Err(_) => break,
                }
            }
        });
        server
    }

    pub fn url(&self, path: &str) -> String {
        match self.tls_addr {
            Some(tls) => format!("rtsps://127.0.0.1:{}{}", tls.port(), path),
            None => format!("rtsp://127.0.0.1:{}{}", self.addr.port(), path),
        }
    }

    pub fn url_with_credentials(&self, user: &str, pass: &str, path: &str) -> String {
        format!("rtsp://{}:{}@127.0.0.1:{}{}", user, pass, self.addr.port(), path)
    }

    pub fn requests(&self) -> Vec<RtspRequest> {
        self.shared.requests.lock().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.method).collect()
    }

    pub fn requests_for(&self, method: &str) -> Vec<RtspRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    pub fn received_frames(&self) -> Vec<(u8, Vec<u8>)> {
        self.shared.frames.lock().clone()
    }

    /// Frames received before the first `method` request, if one came.
    pub fn frames_before(&self, method: &str) -> Option<usize> {
        self.shared
            .marks
            .lock()
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, count)| *count)
    }

    /// Poll until `count` frames arrived or `timeout` passed.
    pub fn wait_for_frames(&self, count: usize, timeout: Duration) -> Vec<(u8, Vec<u8>)> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let frames = self.received_frames();
            if frames.len() >= count {
                return frames;
            }
            thread::sleep(Duration::from_millis(10));
        }
        self.received_frames()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

/// Where media for one set-up track goes.
enum Target {
    Udp { socket: UdpSocket, client: SocketAddr },
    Interleaved { channel: u8 },
}

struct Connection {
    reader: TcpStream,
    writer: Arc<Mutex<TcpStream>>,
    shared: Arc<Shared>,
    decoder: Decoder,
    targets: Vec<(usize, Target)>,
    streaming: Option<Arc<AtomicBool>>,
    session_sent: bool,
}

impl Connection {
    fn new(stream: TcpStream, shared: Arc<Shared>) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let writer = Arc::new(Mutex::new(stream.try_clone().unwrap()));
        Connection {
            reader: stream,
            writer,
            shared,
            decoder: Decoder::new(),
            targets: Vec::new(),
            streaming: None,
            session_sent: false,
        }
    }

    fn run(mut self) {
        let mut buf = [0u8; 4096];
        'outer: while self.shared.running.load(Ordering::SeqCst) {
            match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.decoder.feed(&buf[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_) => break,
            }

            loop {
                match self.decoder.next_unit() {
                    Ok(Some(Unit::Request(request))) => {
                        if !self.handle(request) {
                            break 'outer;
                        }
                    }
                    Ok(Some(Unit::Frame { channel, payload })) => {
                        self.shared.frames.lock().push((channel, payload));
                    }
                    Ok(Some(Unit::Response(_))) => {}
                    Ok(None) => break,
                    Err(_) => break 'outer,
                }
            }
        }
        self.stop_streaming();
        let _ = self.reader.shutdown(Shutdown::Both);
    }

    /// Answer one request. `false` ends the connection.
    fn handle(&mut self, request: RtspRequest) -> bool {
        let received = self.shared.frames.lock().len();
        self.shared
            .marks
            .lock()
            .push((request.method.clone(), received));
        self.shared.requests.lock().push(request.clone());
        let cseq = request.cseq().unwrap_or("0").to_string();
        let path = request_path(&request.uri);

        let mut start_streaming = false;
        let mut keep_open = true;
        let response = match request.method.as_str() {
            "OPTIONS" => RtspResponse::ok().add_header(
                "Public",
                "OPTIONS, DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD, PAUSE, TEARDOWN",
            ),
            "DESCRIBE" => self.describe(&request, &path),
            "ANNOUNCE" | "RECORD" => RtspResponse::ok(),
            "SETUP" => self.setup(&request),
            "PLAY" => {
                if self.shared.behavior.close_after_play {
                    keep_open = false;
                } else {
                    start_streaming = true;
                }
                RtspResponse::ok()
            }
            "PAUSE" => {
                self.stop_streaming();
                RtspResponse::ok()
            }
            "TEARDOWN" => {
                self.stop_streaming();
                keep_open = false;
                RtspResponse::ok()
            }
            _ => RtspResponse::new(501, "Not Implemented"),
        };

        let mut response = response.add_header("CSeq", &cseq);
        if response.status_code == 200
            && !self.shared.behavior.omit_session
            && (request.method == "SETUP" && !self.session_sent)
        {
            response = response.add_header("Session", &format!("{SESSION_ID};timeout=60"));
            self.session_sent = true;
        }

        if self
            .writer
            .lock()
            .write_all(&response.serialize())
            .is_err()
        {
            return false;
        }

        if start_streaming {
            self.start_streaming();
        }
        keep_open
    }

    fn describe(&self, request: &RtspRequest, path: &str) -> RtspResponse {
        let behavior = &self.shared.behavior;

        if let Some((_, location)) = behavior.redirects.iter().find(|(from, _)| from == path) {
            return RtspResponse::new(302, "Moved Temporarily").add_header("Location", location);
        }
        if let Some(status) = behavior.describe_status {
            return RtspResponse::new(status, "Scripted");
        }
        if let Some((user, pass)) = &behavior.digest {
            let expected = digest_response(user, pass, "DESCRIBE", &request.uri);
            let authorized = request
                .get_header("Authorization")
                .is_some_and(|a| a.contains(&format!("response=\"{expected}\"")));
            if !authorized {
                return RtspResponse::new(401, "Unauthorized").add_header(
                    "WWW-Authenticate",
                    &format!("Digest realm=\"{REALM}\", nonce=\"{NONCE}\""),
                );
            }
        }

        let mut sdp = String::from("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=Test\r\nt=0 0\r\n");
        for i in 0..behavior.tracks.max(1) {
            sdp.push_str(&format!(
                "m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:trackID={i}\r\n"
            ));
        }
        RtspResponse::ok()
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &format!("{}/", request.uri.trim_end_matches('/')))
            .with_body(sdp.into_bytes())
    }

    fn setup(&mut self, request: &RtspRequest) -> RtspResponse {
        let Some(proposal) = request
            .get_header("Transport")
            .and_then(|t| TransportHeader::parse(t).ok())
        else {
            return RtspResponse::new(400, "Bad Request");
        };
        let track = self.targets.len();

        match proposal.protocol {
            StreamProtocol::Udp => {
                if self.shared.behavior.reject_udp {
                    return RtspResponse::new(461, "Unsupported Transport");
                }
                let Some((rtp, rtcp)) = proposal.client_port else {
                    return RtspResponse::new(400, "Bad Request");
                };
                let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
                let server_port = socket.local_addr().unwrap().port();
                self.targets.push((
                    track,
                    Target::Udp {
                        socket,
                        client: SocketAddr::from(([127, 0, 0, 1], rtp)),
                    },
                ));
                RtspResponse::ok().add_header(
                    "Transport",
                    &format!(
                        "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                        rtp,
                        rtcp,
                        server_port,
                        server_port + 1
                    ),
                )
            }
            StreamProtocol::Tcp => {
                let (rtp, rtcp) = proposal.interleaved.unwrap_or((0, 1));
                self.targets
                    .push((track, Target::Interleaved { channel: rtp }));
                RtspResponse::ok().add_header(
                    "Transport",
                    &format!("RTP/AVP/TCP;unicast;interleaved={}-{}", rtp, rtcp),
                )
            }
        }
    }

    fn start_streaming(&mut self) {
        self.stop_streaming();
        let stop = Arc::new(AtomicBool::new(false));
        self.streaming = Some(stop.clone());

        let targets: Vec<(usize, StreamTarget)> = self
            .targets
            .iter()
            .map(|(track, target)| {
                let target = match target {
                    Target::Udp { socket, client } => StreamTarget::Udp {
                        socket: socket.try_clone().unwrap(),
                        client: *client,
                    },
                    Target::Interleaved { channel } => StreamTarget::Interleaved {
                        channel: *channel,
                        writer: self.writer.clone(),
                    },
                };
                (*track, target)
            })
            .collect();

        thread::spawn(move || {
            let mut seq = 0u32;
            while !stop.load(Ordering::SeqCst) {
                for (track, target) in &targets {
                    let payload = format!("frame-{track}-{seq}").into_bytes();
                    let sent = match target {
                        StreamTarget::Udp { socket, client } => {
                            socket.send_to(&payload, client).is_ok()
                        }
                        StreamTarget::Interleaved { channel, writer } => writer
                            .lock()
                            .write_all(&encode_interleaved(*channel, &payload).unwrap())
                            .is_ok(),
                    };
                    if !sent {
                        return;
                    }
                }
                seq += 1;
                thread::sleep(Duration::from_millis(10));
            }
        });
    }

    fn stop_streaming(&mut self) {
        if let Some(stop) = self.streaming.take() {
            stop.store(true, Ordering::SeqCst);
        }
    }
}

enum StreamTarget {
    Udp {
        socket: UdpSocket,
        client: SocketAddr,
    },
    Interleaved {
        channel: u8,
        writer: Arc<Mutex<TcpStream>>,
    },
}

/// Path part of a request URI (`rtsp://host:port/a/b` → `/a/b`).
fn request_path(uri: &str) -> String {
    let without_scheme = uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri);
    match without_scheme.find('/') {
        Some(i) => without_scheme[i..].to_string(),
        None => "/".to_string(),
    }
}

/// RFC 2617 digest without qop, computed independently of the client.
pub fn digest_response(user: &str, pass: &str, method: &str, uri: &str) -> String {
    let ha1 = format!("{:x}", md5::compute(format!("{user}:{REALM}:{pass}")));
    let ha2 = format!("{:x}", md5::compute(format!("{method}:{uri}")));
    format!("{:x}", md5::compute(format!("{ha1}:{NONCE}:{ha2}")))
}

/// Self-signed certificate for 127.0.0.1, made fresh for each server.
fn tls_server_config() -> Arc<rustls::ServerConfig> {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .expect("generate certificate");
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .expect("server certificate");
    Arc::new(config)
}

/// Decrypt one client connection and pass it through to the plain server.
fn relay_tls(
    client: TcpStream,
    backend: SocketAddr,
    config: Arc<rustls::ServerConfig>,
    shared: Arc<Shared>,
) {
    let tick = Some(Duration::from_millis(10));
    client.set_read_timeout(tick).unwrap();
    let session = rustls::ServerConnection::new(config).unwrap();
    let mut tls = rustls::StreamOwned::new(session, client);
    let mut plain = TcpStream::connect(backend).unwrap();
    plain.set_read_timeout(tick).unwrap();

    let idle = |e: &std::io::Error| {
        matches!(
            e.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        )
    };
    let mut buf = [0u8; 8192];
    while shared.running.load(Ordering::SeqCst) {
        match tls.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if plain.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
            Err(ref e) if idle(e) => {}
            Err(_) => break,
        }
        match plain.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tls.write_all(&buf[..n]).and_then(|_| tls.flush()).is_err() {
                    break;
                }
            }
            Err(ref e) if idle(e) => {}
            Err(_) => break,
        }
    }
    tls.conn.send_close_notify();
    let _ = tls.flush();
}
