use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use rustls::{ClientConnection, StreamOwned};

use super::framing::{self, Decoder, Unit};
use super::{Frame, MediaTransport, POLL_INTERVAL, StreamType};
use crate::error::{Result, RtspError};
use crate::protocol::{Method, RtspRequest, RtspResponse, RtspUrl};
use crate::session::{TrackBinding, TrackTransport};

/// Frames that arrive while a request waits for its response are kept for
/// the read loop, up to this many.
const MAX_PENDING_FRAMES: usize = 1024;

const READ_CHUNK: usize = 8192;

/// Plain or TLS-wrapped control socket.
enum NetStream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            NetStream::Plain(s) => s.read(buf),
            NetStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            NetStream::Plain(s) => s.write(buf),
            NetStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            NetStream::Plain(s) => s.flush(),
            NetStream::Tls(s) => s.flush(),
        }
    }
}

/// Everything behind the connection lock: the stream, its decoder and
/// frames set aside during request/response exchanges.
struct ConnIo {
    stream: NetStream,
    decoder: Decoder,
    pending: VecDeque<(u8, Vec<u8>)>,
}

impl ConnIo {
    /// Next decoded unit, reading at most once from the socket.
    ///
    /// `Ok(None)` when the read timed out without completing a unit.
    fn poll(&mut self) -> Result<Option<Unit>> {
        if let Some(unit) = self.decoder.next_unit()? {
            return Ok(Some(unit));
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => Err(RtspError::RemoteClosed),
            Ok(n) => {
                self.decoder.feed(&chunk[..n]);
                self.decoder.next_unit()
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll between requests: frames are returned, responses nobody waits
    /// for are dropped and server requests are answered.
    fn poll_idle(&mut self) -> Result<Option<(u8, Vec<u8>)>> {
        match self.poll()? {
            Some(Unit::Frame { channel, payload }) => Ok(Some((channel, payload))),
            Some(Unit::Response(response)) => {
                tracing::debug!(status = response.status_code, "unsolicited response dropped");
                Ok(None)
            }
            Some(Unit::Request(server_request)) => self.reject(&server_request).map(|_| None),
            None => Ok(None),
        }
    }

    fn set_aside(&mut self, channel: u8, payload: Vec<u8>) {
        if self.pending.len() == MAX_PENDING_FRAMES {
            self.pending.pop_front();
        }
        self.pending.push_back((channel, payload));
    }

    /// Servers may send requests of their own (RFC 2326 §10); the client
    /// implements none of them.
    fn reject(&mut self, request: &RtspRequest) -> Result<()> {
        tracing::debug!(method = %request.method, "rejecting server request");
        let mut response = RtspResponse::new(501, "Not Implemented");
        if let Some(cseq) = request.cseq() {
            response = response.add_header("CSeq", cseq);
        }
        self.stream.write_all(&response.serialize())?;
        Ok(())
    }
}

/// The RTSP control connection (RFC 2326 §10).
///
/// Owns the TCP (or TLS) stream, numbers requests with `CSeq` and pairs
/// each request with its response. Interleaved frames that show up while
/// waiting are queued for [`InterleavedTransport`].
///
/// The socket polls with a short read timeout so that no reader holds the
/// connection lock for long; the configured read timeout bounds how long
/// a request waits for its response.
pub struct RtspConn {
    io: Mutex<ConnIo>,
    socket: TcpStream,
    peer: SocketAddr,
    cseq: AtomicU32,
    read_timeout: Duration,
}

impl RtspConn {
    /// Connect to the URL's host, wrapping in TLS for `rtsps`.
    pub fn connect(
        url: &RtspUrl,
        tls: Option<Arc<rustls::ClientConfig>>,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self> {
        let mut last_err = None;
        let mut socket = None;
        for addr in url.host_port().to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, read_timeout) {
                Ok(s) => {
                    socket = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let socket = match (socket, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(e.into()),
            (None, None) => {
                return Err(RtspError::InvalidUrl(format!(
                    "{}: host did not resolve",
                    url.host()
                )));
            }
        };

        socket.set_nodelay(true)?;
        socket.set_read_timeout(Some(read_timeout))?;
        socket.set_write_timeout(Some(write_timeout))?;
        let peer = socket.peer_addr()?;

        let stream = if url.is_secure() {
            let config = match tls {
                Some(config) => config,
                None => super::tls::default_client_config()?,
            };
            NetStream::Tls(Box::new(super::tls::connect(
                config,
                url.host(),
                socket.try_clone()?,
            )?))
        } else {
            NetStream::Plain(socket.try_clone()?)
        };
        socket.set_read_timeout(Some(POLL_INTERVAL))?;

        tracing::info!(%peer, secure = url.is_secure(), "control connection established");

        Ok(RtspConn {
            io: Mutex::new(ConnIo {
                stream,
                decoder: Decoder::new(),
                pending: VecDeque::new(),
            }),
            socket,
            peer,
            cseq: AtomicU32::new(1),
            read_timeout,
        })
    }

    /// Remote address of the control connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send `request` and wait for the response carrying the same `CSeq`.
    ///
    /// Interleaved frames received meanwhile are queued, server-originated
    /// requests are answered with 501, and responses to earlier requests
    /// (left over after a timeout) are skipped.
    pub fn request(&self, method: Method, mut request: RtspRequest) -> Result<RtspResponse> {
        let cseq = self.cseq.fetch_add(1, Ordering::SeqCst);
        request.set_header("CSeq", &cseq.to_string());

        let mut io = self.io.lock();
        io.stream.write_all(&request.serialize())?;
        io.stream.flush()?;
        tracing::debug!(%method, uri = %request.uri, cseq, "request sent");

        let deadline = Instant::now() + self.read_timeout;
        loop {
            match io.poll().map_err(|e| e.in_method(method))? {
                Some(Unit::Response(response)) => match response.cseq() {
                    Some(seq) if seq != cseq => {
                        tracing::debug!(expected = cseq, got = seq, "skipping stale response");
                    }
                    _ => {
                        tracing::debug!(
                            %method,
                            status = response.status_code,
                            reason = %response.status_text,
                            cseq,
                            "response received"
                        );
                        return Ok(response);
                    }
                },
                Some(Unit::Frame { channel, payload }) => io.set_aside(channel, payload),
                Some(Unit::Request(server_request)) => io.reject(&server_request)?,
                None => {}
            }

            if Instant::now() >= deadline {
                return Err(RtspError::Timeout(method));
            }
        }
    }

    /// Write one interleaved frame.
    pub fn write_frame(&self, channel: u8, payload: &[u8]) -> Result<()> {
        let bytes = framing::encode_interleaved(channel, payload)?;
        let mut io = self.io.lock();
        io.stream.write_all(&bytes)?;
        io.stream.flush()?;
        Ok(())
    }

    /// Next interleaved frame, waiting at most one poll interval.
    pub fn read_frame(&self) -> Result<Option<(u8, Vec<u8>)>> {
        let mut io = self.io.lock();
        let result = match io.pending.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => io.poll_idle(),
        };
        // Hand the lock straight to a waiting request.
        MutexGuard::unlock_fair(io);
        result
    }

    /// Read whatever the server sent between requests, waiting at most one
    /// poll interval.
    ///
    /// For sessions whose media does not travel on this connection: it is
    /// the only way to notice the server hanging up. Frames are set aside.
    pub fn watch(&self) -> Result<()> {
        let mut io = self.io.lock();
        let result = match io.poll_idle() {
            Ok(Some((channel, payload))) => {
                io.set_aside(channel, payload);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        MutexGuard::unlock_fair(io);
        result
    }

    /// Drop the frames set aside so far, returning how many there were.
    pub fn discard_pending(&self) -> usize {
        let mut io = self.io.lock();
        let dropped = io.pending.len();
        io.pending.clear();
        dropped
    }

    /// Close both directions; blocked readers wake up with an error.
    pub fn shutdown(&self) {
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            tracing::trace!(error = %e, "control socket shutdown");
        }
    }
}

/// Media interleaved on the control connection (RFC 2326 §10.12).
pub struct InterleavedTransport {
    conn: Arc<RtspConn>,
    inbound: HashMap<u8, (usize, StreamType)>,
    outbound: HashMap<usize, (u8, u8)>,
    closed: AtomicBool,
}

impl InterleavedTransport {
    pub fn new(conn: Arc<RtspConn>, bindings: &[TrackBinding]) -> Result<Self> {
        let mut inbound = HashMap::new();
        let mut outbound = HashMap::new();
        for binding in bindings {
            let TrackTransport::Interleaved { channels } = binding.transport else {
                return Err(RtspError::BadTransport(format!(
                    "track {} is not bound to interleaved channels",
                    binding.track_id
                )));
            };
            inbound.insert(channels.0, (binding.track_id, StreamType::Rtp));
            inbound.insert(channels.1, (binding.track_id, StreamType::Rtcp));
            outbound.insert(binding.track_id, channels);
        }
        Ok(InterleavedTransport {
            conn,
            inbound,
            outbound,
            closed: AtomicBool::new(false),
        })
    }
}

impl MediaTransport for InterleavedTransport {
    fn send(&self, track_id: usize, stream_type: StreamType, payload: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RtspError::Closed);
        }
        let (rtp, rtcp) = *self
            .outbound
            .get(&track_id)
            .ok_or(RtspError::UnknownTrack(track_id))?;
        let channel = match stream_type {
            StreamType::Rtp => rtp,
            StreamType::Rtcp => rtcp,
        };
        self.conn.write_frame(channel, payload)?;
        tracing::trace!(track_id, %stream_type, channel, len = payload.len(), "frame sent");
        Ok(())
    }

    fn receive(&self) -> Result<Option<Frame>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RtspError::Closed);
        }
        let Some((channel, payload)) = self.conn.read_frame()? else {
            return Ok(None);
        };
        match self.inbound.get(&channel) {
            Some(&(track_id, stream_type)) => Ok(Some(Frame {
                track_id,
                stream_type,
                payload,
            })),
            None => {
                tracing::trace!(channel, "frame on unbound channel dropped");
                Ok(None)
            }
        }
    }

    fn discard_pending(&self) {
        let dropped = self.conn.discard_pending();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded interleaved frames");
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (Arc<RtspConn>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = RtspUrl::parse(&format!(
            "rtsp://127.0.0.1:{}/test",
            listener.local_addr().unwrap().port()
        ))
        .unwrap();
        let conn = RtspConn::connect(
            &url,
            None,
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .unwrap();
        let (server, _) = listener.accept().unwrap();
        (Arc::new(conn), server)
    }

    fn bindings() -> Vec<TrackBinding> {
        vec![
            TrackBinding {
                track_id: 0,
                transport: TrackTransport::Interleaved { channels: (0, 1) },
            },
            TrackBinding {
                track_id: 9,
                transport: TrackTransport::Interleaved { channels: (2, 3) },
            },
        ]
    }

    #[test]
    fn request_skips_frames_and_keeps_them() {
        let (conn, mut server) = pair();

        let responder = thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let n = server.read(&mut buf).unwrap();
            let text = String::from_utf8_lossy(&buf[..n]).to_string();
            assert!(text.starts_with("OPTIONS rtsp://127.0.0.1"));
            assert!(text.contains("CSeq: 1\r\n"));

            server
                .write_all(&framing::encode_interleaved(2, b"early").unwrap())
                .unwrap();
            server
                .write_all(&RtspResponse::ok().add_header("CSeq", "1").serialize())
                .unwrap();
            server
        });

        let response = conn
            .request(Method::Options, RtspRequest::new(Method::Options, "rtsp://127.0.0.1/test"))
            .unwrap();
        assert_eq!(response.status_code, 200);
        let _server = responder.join().unwrap();

        let transport = InterleavedTransport::new(conn, &bindings()).unwrap();
        let frame = transport.receive().unwrap().unwrap();
        assert_eq!(frame.track_id, 9);
        assert_eq!(frame.stream_type, StreamType::Rtp);
        assert_eq!(frame.payload, b"early");
    }

    #[test]
    fn request_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = RtspUrl::parse(&format!(
            "rtsp://127.0.0.1:{}/",
            listener.local_addr().unwrap().port()
        ))
        .unwrap();
        let conn = RtspConn::connect(
            &url,
            None,
            Duration::from_millis(300),
            Duration::from_secs(1),
        )
        .unwrap();
        let _server = listener.accept().unwrap();

        let err = conn
            .request(Method::Describe, RtspRequest::new(Method::Describe, "rtsp://127.0.0.1/"))
            .unwrap_err();
        assert!(matches!(err, RtspError::Timeout(Method::Describe)), "got {err:?}");
    }

    #[test]
    fn send_uses_track_channels() {
        let (conn, mut server) = pair();
        let transport = InterleavedTransport::new(conn, &bindings()).unwrap();

        transport.send(9, StreamType::Rtcp, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 7];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [b'$', 3, 0, 3, 1, 2, 3]);

        assert!(matches!(
            transport.send(4, StreamType::Rtp, &[0]),
            Err(RtspError::UnknownTrack(4))
        ));
    }

    #[test]
    fn remote_close_is_reported() {
        let (conn, server) = pair();
        drop(server);
        let transport = InterleavedTransport::new(conn, &bindings()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match transport.receive() {
                Err(RtspError::RemoteClosed) => break,
                Ok(None) if Instant::now() < deadline => continue,
                other => panic!("expected remote close, got {other:?}"),
            }
        }
    }

    #[test]
    fn discarded_frames_are_not_delivered() {
        let (conn, mut server) = pair();

        let responder = thread::spawn(move || {
            let mut buf = [0u8; 1024];
            server.read(&mut buf).unwrap();
            server
                .write_all(&framing::encode_interleaved(0, b"stale").unwrap())
                .unwrap();
            server
                .write_all(&RtspResponse::ok().add_header("CSeq", "1").serialize())
                .unwrap();
            server
        });
        conn.request(Method::Play, RtspRequest::new(Method::Play, "rtsp://127.0.0.1/test"))
            .unwrap();
        let mut server = responder.join().unwrap();

        let transport = InterleavedTransport::new(conn, &bindings()).unwrap();
        transport.discard_pending();
        assert!(transport.receive().unwrap().is_none());

        server
            .write_all(&framing::encode_interleaved(0, b"fresh").unwrap())
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let frame = loop {
            if let Some(frame) = transport.receive().unwrap() {
                break frame;
            }
            assert!(Instant::now() < deadline, "fresh frame never arrived");
        };
        assert_eq!(frame.payload, b"fresh");
    }

    #[test]
    fn watch_sets_frames_aside_and_reports_close() {
        let (conn, mut server) = pair();
        server
            .write_all(&framing::encode_interleaved(1, b"rtcp").unwrap())
            .unwrap();
        drop(server);

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match conn.watch() {
                Err(RtspError::RemoteClosed) => break,
                Ok(()) if Instant::now() < deadline => continue,
                other => panic!("expected remote close, got {other:?}"),
            }
        }
        assert_eq!(conn.discard_pending(), 1);
    }

    #[test]
    fn rejects_udp_bindings() {
        let (conn, _server) = pair();
        let udp = [TrackBinding {
            track_id: 0,
            transport: TrackTransport::Udp {
                client_ports: (5000, 5001),
                server_ports: None,
            },
        }];
        assert!(InterleavedTransport::new(conn, &udp).is_err());
    }
}
