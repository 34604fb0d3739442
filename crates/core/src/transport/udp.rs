use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use rand::Rng;

use super::{Frame, MediaTransport, POLL_INTERVAL, RtspConn, StreamType};
use crate::error::{Result, RtspError};

/// RTP ports are picked from this range; RTCP uses the next port up.
const CLIENT_PORT_MIN: u16 = 10000;
const CLIENT_PORT_MAX: u16 = 65534;
const BIND_ATTEMPTS: usize = 20;

/// Largest datagram read; RTP over Ethernet stays well below this.
const MAX_DATAGRAM: usize = 2048;

/// Received frames waiting for the read loop. When full, new datagrams
/// are dropped.
const FRAME_QUEUE_DEPTH: usize = 1024;

/// An RTP/RTCP socket pair on consecutive ports, RTP even (RFC 3550 §11).
#[derive(Debug)]
pub struct UdpPair {
    pub rtp: UdpSocket,
    pub rtcp: UdpSocket,
}

impl UdpPair {
    /// Bind a pair on random ports, matching the address family of `peer`.
    pub fn bind_random(peer: IpAddr) -> Result<Self> {
        let unspecified = match peer {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let mut rng = rand::rng();
        let mut last_err = None;

        for _ in 0..BIND_ATTEMPTS {
            let rtp_port = rng.random_range(CLIENT_PORT_MIN / 2..CLIENT_PORT_MAX / 2) * 2;
            let rtp = match UdpSocket::bind((unspecified, rtp_port)) {
                Ok(s) => s,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            match UdpSocket::bind((unspecified, rtp_port + 1)) {
                Ok(rtcp) => {
                    tracing::trace!(rtp_port, rtcp_port = rtp_port + 1, "bound UDP pair");
                    return Ok(UdpPair { rtp, rtcp });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "no free UDP port pair"))
            .into())
    }

    /// Local (RTP, RTCP) ports.
    pub fn ports(&self) -> Result<(u16, u16)> {
        Ok((
            self.rtp.local_addr()?.port(),
            self.rtcp.local_addr()?.port(),
        ))
    }
}

/// Sockets of one track.
struct UdpTrack {
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
    server_ports: Option<(u16, u16)>,
}

/// Media over UDP, one socket pair per track (RFC 2326 §12.39).
///
/// Every socket gets its own receiver thread. Received datagrams are
/// tagged with their track and type and queued for [`receive`](MediaTransport::receive);
/// datagrams from any host other than the server are discarded.
///
/// Nothing else reads the control connection while media flows over UDP,
/// so one more thread watches it and queues [`RtspError::RemoteClosed`]
/// when the server hangs up.
pub struct UdpTransport {
    server_ip: IpAddr,
    tracks: HashMap<usize, UdpTrack>,
    frames: Mutex<Receiver<Result<Frame>>>,
    failure: Mutex<Option<RtspError>>,
    running: Arc<AtomicBool>,
    receivers: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Take ownership of the bound pairs and start receiving.
    ///
    /// `tracks` holds `(track_id, pair, server_ports)` per negotiated track.
    /// `control` is the connection to watch for the server going away.
    pub fn new(
        server_ip: IpAddr,
        tracks: Vec<(usize, UdpPair, Option<(u16, u16)>)>,
        control: Option<Arc<RtspConn>>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::sync_channel(FRAME_QUEUE_DEPTH);
        let mut receivers = Vec::with_capacity(tracks.len() * 2);
        let mut bound = HashMap::with_capacity(tracks.len());

        for (track_id, pair, server_ports) in tracks {
            let rtp = Arc::new(pair.rtp);
            let rtcp = Arc::new(pair.rtcp);
            for (socket, stream_type) in [(&rtp, StreamType::Rtp), (&rtcp, StreamType::Rtcp)] {
                socket.set_read_timeout(Some(POLL_INTERVAL))?;
                let reader = SocketReader {
                    socket: socket.clone(),
                    track_id,
                    stream_type,
                    server_ip,
                    tx: tx.clone(),
                    running: running.clone(),
                };
                receivers.push(
                    thread::Builder::new()
                        .name(format!("rtsp-udp-{track_id}-{stream_type}"))
                        .spawn(move || reader.run())?,
                );
            }
            bound.insert(
                track_id,
                UdpTrack {
                    rtp,
                    rtcp,
                    server_ports,
                },
            );
        }

        if let Some(conn) = control {
            let watcher = ControlWatcher {
                conn,
                tx,
                running: running.clone(),
            };
            receivers.push(
                thread::Builder::new()
                    .name("rtsp-control-watch".into())
                    .spawn(move || watcher.run())?,
            );
        }

        Ok(UdpTransport {
            server_ip,
            tracks: bound,
            frames: Mutex::new(rx),
            failure: Mutex::new(None),
            running,
            receivers: Mutex::new(receivers),
        })
    }
}

impl MediaTransport for UdpTransport {
    fn send(&self, track_id: usize, stream_type: StreamType, payload: &[u8]) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RtspError::Closed);
        }
        let track = self
            .tracks
            .get(&track_id)
            .ok_or(RtspError::UnknownTrack(track_id))?;
        let (rtp_port, rtcp_port) = track.server_ports.ok_or_else(|| {
            RtspError::BadTransport(format!("no server ports for track {track_id}"))
        })?;
        let (socket, port) = match stream_type {
            StreamType::Rtp => (&track.rtp, rtp_port),
            StreamType::Rtcp => (&track.rtcp, rtcp_port),
        };
        socket.send_to(payload, SocketAddr::new(self.server_ip, port))?;
        tracing::trace!(track_id, %stream_type, len = payload.len(), "datagram sent");
        Ok(())
    }

    fn receive(&self) -> Result<Option<Frame>> {
        if let Some(e) = self.failure.lock().take() {
            return Err(e);
        }
        match self.frames.lock().recv_timeout(POLL_INTERVAL) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RtspError::Closed),
        }
    }

    fn discard_pending(&self) {
        let frames = self.frames.lock();
        let mut dropped = 0usize;
        while let Ok(item) = frames.try_recv() {
            match item {
                Ok(_) => dropped += 1,
                Err(e) => {
                    let mut failure = self.failure.lock();
                    if failure.is_none() {
                        *failure = Some(e);
                    }
                }
            }
        }
        if dropped > 0 {
            tracing::debug!(dropped, "discarded queued datagrams");
        }
    }

    fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let receivers = std::mem::take(&mut *self.receivers.lock());
        for handle in receivers {
            if handle.join().is_err() {
                tracing::warn!("UDP receiver thread panicked");
            }
        }
        tracing::debug!(tracks = self.tracks.len(), "UDP transport closed");
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receive loop for one socket.
struct SocketReader {
    socket: Arc<UdpSocket>,
    track_id: usize,
    stream_type: StreamType,
    server_ip: IpAddr,
    tx: SyncSender<Result<Frame>>,
    running: Arc<AtomicBool>,
}

impl SocketReader {
    fn run(self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        while self.running.load(Ordering::SeqCst) {
            let (n, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        tracing::warn!(track_id = self.track_id, error = %e, "UDP receive failed");
                        let _ = self.tx.try_send(Err(e.into()));
                    }
                    return;
                }
            };

            if from.ip() != self.server_ip {
                tracing::trace!(%from, "datagram from unexpected host dropped");
                continue;
            }

            let frame = Frame {
                track_id: self.track_id,
                stream_type: self.stream_type,
                payload: buf[..n].to_vec(),
            };
            match self.tx.try_send(Ok(frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(track_id = self.track_id, "frame queue full, datagram dropped");
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Polls the control connection of a UDP session for the server closing it.
struct ControlWatcher {
    conn: Arc<RtspConn>,
    tx: SyncSender<Result<Frame>>,
    running: Arc<AtomicBool>,
}

impl ControlWatcher {
    fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            match self.conn.watch() {
                Ok(()) => {}
                Err(e) if !e.is_transport() => {
                    tracing::debug!(error = %e, "undecodable data on control connection");
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        tracing::debug!(error = %e, "control connection lost");
                        self.deliver(Err(e));
                    }
                    return;
                }
            }
        }
    }

    /// Queue `item` even when the queue is full, unless the transport closes first.
    fn deliver(&self, mut item: Result<Frame>) {
        loop {
            match self.tx.try_send(item) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(back)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        return;
                    }
                    item = back;
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}
