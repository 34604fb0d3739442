//! The client connection state machine (RFC 2326 §A.1, client side).
//!
//! ```text
//!                 PLAY                         PAUSE
//!   Prepared ──────────────► Playing ─────────────────► Paused
//!      │                        ▲                         │
//!      │   RECORD               └──────── PLAY ───────────┤
//!      └────────────────► Recording ◄──── RECORD ─────────┘
//!                               │         PAUSE
//!                               └───────────────────────► Paused
//!
//!   any state ── close() / TEARDOWN ──► Closed
//! ```
//!
//! The state mutex doubles as the write gate: `write_frame` holds it for
//! the duration of one send, and transitions hold it for their round
//! trip, so a `pause` waits for an in-flight write and every later write
//! sees the new state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use super::control::ControlChannel;
use super::done::ReadDone;
use super::negotiator::Negotiated;
use crate::error::{Result, RtspError};
use crate::media::Track;
use crate::protocol::{Method, RtspRequest, RtspResponse, RtspUrl};
use crate::session::Session;
use crate::transport::{MediaTransport, RtspConn, StreamProtocol, StreamType};

/// Granularity of the keep-alive thread's sleep, so it notices stop
/// requests promptly.
const KEEPALIVE_TICK: Duration = Duration::from_millis(50);

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Session set up, no media flowing.
    Prepared,
    /// PLAY accepted; frames can be read.
    Playing,
    /// RECORD accepted; frames can be written.
    Recording,
    /// Media suspended, session kept.
    Paused,
    /// Torn down. Terminal.
    Closed,
}

/// A running read loop.
struct ReadLoop {
    stop: Arc<AtomicBool>,
    done: ReadDone,
    handle: JoinHandle<()>,
}

/// Background OPTIONS sender for UDP sessions.
struct Keepalive {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// An established RTSP connection in read or publish mode.
///
/// Created by [`ClientConfig::dial_read`](super::ClientConfig::dial_read),
/// [`ClientConfig::dial_publish`](super::ClientConfig::dial_publish)
/// or their `prepare_*` variants. Closing is the only way to release the
/// sockets; dropping the connection closes it.
pub struct ClientConn {
    state: Mutex<ConnState>,
    closed: AtomicBool,
    channel: Arc<Mutex<ControlChannel>>,
    conn: Arc<RtspConn>,
    transport: Arc<dyn MediaTransport>,
    session: Session,
    base: RtspUrl,
    tracks: Vec<Track>,
    publishing: bool,
    reader: Mutex<Option<ReadLoop>>,
    keepalive: Mutex<Option<Keepalive>>,
}

impl ClientConn {
    pub(crate) fn new(negotiated: Negotiated) -> Self {
        let Negotiated {
            channel,
            conn,
            session,
            base,
            tracks,
            transport,
            publishing,
        } = negotiated;

        let channel = Arc::new(Mutex::new(channel));

        // Interleaved sessions stay alive through the control connection.
        let keepalive = if session.protocol() == StreamProtocol::Udp {
            match spawn_keepalive(channel.clone(), base.clone(), session.timeout() / 2) {
                Ok(keepalive) => Some(keepalive),
                Err(e) => {
                    tracing::warn!(error = %e, "could not start keep-alive thread");
                    None
                }
            }
        } else {
            None
        };

        ClientConn {
            state: Mutex::new(ConnState::Prepared),
            closed: AtomicBool::new(false),
            channel,
            conn,
            transport,
            session,
            base,
            tracks,
            publishing,
            reader: Mutex::new(None),
            keepalive: Mutex::new(keepalive),
        }
    }

    /// The negotiated session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Tracks of the session, in SETUP order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock()
    }

    /// Whether this connection publishes (ANNOUNCE/RECORD) rather than
    /// reads.
    pub fn is_publishing(&self) -> bool {
        self.publishing
    }

    /// Send PLAY. Allowed from `Prepared` or `Paused` in read mode.
    pub fn play(&self) -> Result<RtspResponse> {
        self.transition(Method::Play, "play", ConnState::Playing)
    }

    /// Send RECORD. Allowed from `Prepared` or `Paused` in publish mode.
    pub fn record(&self) -> Result<RtspResponse> {
        self.transition(Method::Record, "record", ConnState::Recording)
    }

    /// Send PAUSE. On success the read loop is told to stop (its
    /// [`ReadDone`] reports the end) and writes are rejected.
    pub fn pause(&self) -> Result<RtspResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RtspError::Closed);
        }
        let mut state = self.state.lock();
        match *state {
            ConnState::Playing | ConnState::Recording => {}
            ConnState::Closed => return Err(RtspError::Closed),
            other => {
                return Err(RtspError::InvalidState {
                    operation: "pause",
                    state: other,
                });
            }
        }

        let response = self.exchange(Method::Pause, &[])?;
        let from = std::mem::replace(&mut *state, ConnState::Paused);
        drop(state);

        if let Some(reader) = self.reader.lock().as_ref() {
            reader.stop.store(true, Ordering::SeqCst);
        }
        tracing::debug!(?from, to = ?ConnState::Paused, "state transition");
        Ok(response)
    }

    /// Tear the connection down.
    ///
    /// Sends TEARDOWN (failures ignored), stops the read loop and the
    /// keep-alive thread and closes every socket. Closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (reader, keepalive) = {
            let mut state = self.state.lock();

            let reader = self.reader.lock().take();
            if let Some(reader) = &reader {
                reader.stop.store(true, Ordering::SeqCst);
            }
            let keepalive = self.keepalive.lock().take();
            if let Some(keepalive) = &keepalive {
                keepalive.stop.store(true, Ordering::SeqCst);
            }

            let request = RtspRequest::new(Method::Teardown, self.base.as_str());
            match self.channel.lock().send(Method::Teardown, request) {
                Ok(response) if response.is_success() => {}
                Ok(response) => {
                    tracing::debug!(status = response.status_code, "TEARDOWN refused")
                }
                Err(e) => tracing::debug!(error = %e, "TEARDOWN failed"),
            }
            *state = ConnState::Closed;
            (reader, keepalive)
        };

        self.transport.close();
        self.conn.shutdown();

        let current = thread::current().id();
        if let Some(reader) = reader {
            join_unless_current(reader.handle, current, "read loop");
            reader.done.complete(Ok(()));
        }
        if let Some(keepalive) = keepalive {
            join_unless_current(keepalive.handle, current, "keep-alive");
        }

        tracing::info!(session_id = self.session.id(), "connection closed");
        Ok(())
    }

    /// Start delivering received frames to `callback` on a new thread.
    ///
    /// The callback gets `(track_id, stream_type, payload)` in arrival
    /// order and is never called after the returned [`ReadDone`] is set.
    /// The loop ends on `pause`, `close`, a transport error or the server
    /// closing the connection. Starting a loop while one is running, after
    /// close or outside `Playing` resolves immediately with an error.
    pub fn read_frames<F>(&self, callback: F) -> ReadDone
    where
        F: FnMut(usize, StreamType, &[u8]) + Send + 'static,
    {
        // A loop stopped by an earlier pause may still be running its last
        // callback, which can call back into this connection: wait for it
        // without holding any lock, then look again.
        let previous = match self.read_slot() {
            Ok(previous) => previous,
            Err(e) => return ReadDone::resolved(Err(e)),
        };
        if let Some(previous) = previous {
            join_unless_current(previous.handle, thread::current().id(), "read loop");
        }

        let _state = match self.check_readable() {
            Ok(state) => state,
            Err(e) => return ReadDone::resolved(Err(e)),
        };
        let mut reader = self.reader.lock();
        if reader.is_some() {
            return ReadDone::resolved(Err(RtspError::ReadLoopActive));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let done = ReadDone::new();
        let spawned = thread::Builder::new().name("rtsp-read".into()).spawn({
            let transport = self.transport.clone();
            let stop = stop.clone();
            let done = done.clone();
            move || read_loop(transport, stop, done, callback)
        });

        match spawned {
            Ok(handle) => {
                *reader = Some(ReadLoop {
                    stop,
                    done: done.clone(),
                    handle,
                });
                tracing::debug!(session_id = self.session.id(), "read loop started");
                done
            }
            Err(e) => ReadDone::resolved(Err(e.into())),
        }
    }

    /// Lock the state if a read loop may start now.
    fn check_readable(&self) -> Result<MutexGuard<'_, ConnState>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RtspError::Closed);
        }
        let state = self.state.lock();
        match *state {
            ConnState::Playing => Ok(state),
            ConnState::Closed => Err(RtspError::Closed),
            other => Err(RtspError::InvalidState {
                operation: "read frames",
                state: other,
            }),
        }
    }

    /// Empty the reader slot for a new loop, returning a stopped loop that
    /// still has to be joined.
    fn read_slot(&self) -> Result<Option<ReadLoop>> {
        let _state = self.check_readable()?;
        let mut reader = self.reader.lock();
        let running = reader
            .as_ref()
            .is_some_and(|r| !r.stop.load(Ordering::SeqCst) && !r.done.is_done());
        if running {
            return Err(RtspError::ReadLoopActive);
        }
        Ok(reader.take())
    }

    /// Send one frame to the server. Only accepted while `Recording`.
    pub fn write_frame(&self, track_id: usize, stream_type: StreamType, payload: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RtspError::Closed);
        }
        let state = self.state.lock();
        match *state {
            ConnState::Recording => self.transport.send(track_id, stream_type, payload),
            ConnState::Closed => Err(RtspError::Closed),
            other => Err(RtspError::InvalidState {
                operation: "write frame",
                state: other,
            }),
        }
    }

    /// PLAY or RECORD from `Prepared` or `Paused`.
    fn transition(
        &self,
        method: Method,
        operation: &'static str,
        target: ConnState,
    ) -> Result<RtspResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RtspError::Closed);
        }
        let mut state = self.state.lock();
        let mode_matches = self.publishing == (target == ConnState::Recording);
        match *state {
            ConnState::Prepared | ConnState::Paused if mode_matches => {}
            ConnState::Closed => return Err(RtspError::Closed),
            other => return Err(RtspError::InvalidState { operation, state: other }),
        }

        let resuming = method == Method::Play && *state == ConnState::Paused;
        // Interleaved frames ahead of the PLAY response predate it, datagrams
        // cannot be ordered against it.
        let interleaved = self.session.protocol() == StreamProtocol::Tcp;
        if resuming && !interleaved {
            self.transport.discard_pending();
        }

        let response = if method == Method::Play && *state == ConnState::Prepared {
            self.exchange(method, &[("Range", "npt=0.000-")])?
        } else {
            self.exchange(method, &[])?
        };

        if resuming && interleaved {
            self.transport.discard_pending();
        }

        let from = std::mem::replace(&mut *state, target);
        tracing::debug!(?from, to = ?target, "state transition");
        Ok(response)
    }

    /// Request on the aggregate URL; anything but 2xx is an error.
    fn exchange(&self, method: Method, headers: &[(&str, &str)]) -> Result<RtspResponse> {
        let request = headers
            .iter()
            .fold(RtspRequest::new(method, self.base.as_str()), |req, (name, value)| {
                req.add_header(name, value)
            });
        self.channel.lock().send_expect_success(method, request)
    }
}

impl Drop for ClientConn {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConn")
            .field("state", &self.state())
            .field("session", &self.session)
            .field("publishing", &self.publishing)
            .finish()
    }
}

fn read_loop<F>(
    transport: Arc<dyn MediaTransport>,
    stop: Arc<AtomicBool>,
    done: ReadDone,
    mut callback: F,
) where
    F: FnMut(usize, StreamType, &[u8]),
{
    let mut frames: u64 = 0;
    let outcome = loop {
        if stop.load(Ordering::SeqCst) {
            break Ok(());
        }
        match transport.receive() {
            Ok(Some(frame)) => {
                if stop.load(Ordering::SeqCst) {
                    break Ok(());
                }
                frames += 1;
                tracing::trace!(
                    track_id = frame.track_id,
                    stream_type = %frame.stream_type,
                    len = frame.payload.len(),
                    "frame received"
                );
                callback(frame.track_id, frame.stream_type, &frame.payload);
            }
            Ok(None) => {}
            // Errors caused by our own close are not failures.
            Err(_) if stop.load(Ordering::SeqCst) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    match &outcome {
        Ok(()) => tracing::debug!(frames, "read loop stopped"),
        Err(e) => tracing::warn!(frames, error = %e, "read loop ended"),
    }
    done.complete(outcome);
}

fn spawn_keepalive(
    channel: Arc<Mutex<ControlChannel>>,
    base: RtspUrl,
    interval: Duration,
) -> std::io::Result<Keepalive> {
    let stop = Arc::new(AtomicBool::new(false));
    let handle = thread::Builder::new().name("rtsp-keepalive".into()).spawn({
        let stop = stop.clone();
        move || {
            let mut next = Instant::now() + interval;
            while !stop.load(Ordering::SeqCst) {
                if Instant::now() < next {
                    thread::sleep(KEEPALIVE_TICK);
                    continue;
                }
                next = Instant::now() + interval;

                let request = RtspRequest::new(Method::Options, base.as_str());
                match channel.lock().send(Method::Options, request) {
                    Ok(response) => {
                        tracing::trace!(status = response.status_code, "keep-alive sent");
                    }
                    Err(e) if stop.load(Ordering::SeqCst) => {
                        tracing::trace!(error = %e, "keep-alive interrupted by close");
                    }
                    Err(e @ (RtspError::RemoteClosed | RtspError::Io(_))) => {
                        tracing::warn!(error = %e, "keep-alive stopped, control connection lost");
                        return;
                    }
                    Err(e) => tracing::warn!(error = %e, "keep-alive failed"),
                }
            }
        }
    })?;
    tracing::debug!(interval_ms = interval.as_millis() as u64, "keep-alive started");
    Ok(Keepalive { stop, handle })
}

fn join_unless_current(handle: JoinHandle<()>, current: ThreadId, what: &str) {
    if handle.thread().id() == current {
        return;
    }
    if handle.join().is_err() {
        tracing::warn!(thread = what, "background thread panicked");
    }
}
