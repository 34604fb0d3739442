use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use rtsp::{ClientConfig, StreamProtocol, StreamType};

#[derive(Clone, Copy, ValueEnum)]
enum Protocol {
    Udp,
    Tcp,
}

impl From<Protocol> for StreamProtocol {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::Udp => StreamProtocol::Udp,
            Protocol::Tcp => StreamProtocol::Tcp,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "rtsp-read",
    about = "Read an RTSP stream and print per-track frame counts"
)]
struct Args {
    /// Stream URL (rtsp:// or rtsps://)
    url: String,

    /// Media transport; tries UDP then TCP when omitted
    #[arg(long, short, value_enum)]
    protocol: Option<Protocol>,

    /// How long to read before closing
    #[arg(long, short, default_value_t = 10)]
    seconds: u64,
}

#[derive(Default)]
struct Counts {
    rtp: u64,
    rtcp: u64,
    bytes: u64,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = ClientConfig {
        stream_protocol: args.protocol.map(Into::into),
        ..ClientConfig::default()
    };

    let conn = match config.dial_read(&args.url) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Failed to dial {}: {}", args.url, e);
            std::process::exit(1);
        }
    };
    println!(
        "Reading {} track(s) over {} for {}s (session {})",
        conn.tracks().len(),
        conn.session().protocol(),
        args.seconds,
        conn.session().id()
    );

    let counts: Arc<Mutex<BTreeMap<usize, Counts>>> = Arc::default();
    let done = conn.read_frames({
        let counts = counts.clone();
        move |track_id, stream_type, payload| {
            let mut counts = counts.lock();
            let entry = counts.entry(track_id).or_default();
            match stream_type {
                StreamType::Rtp => entry.rtp += 1,
                StreamType::Rtcp => entry.rtcp += 1,
            }
            entry.bytes += payload.len() as u64;
        }
    });

    if let Some(Err(e)) = done.wait_timeout(Duration::from_secs(args.seconds)) {
        eprintln!("Read loop ended early: {}", e);
    }
    if let Err(e) = conn.close() {
        tracing::warn!(error = %e, "close failed");
    }

    for track in conn.tracks() {
        let counts = counts.lock();
        let c = counts.get(&track.id());
        println!(
            "track {} ({}): {} RTP, {} RTCP, {} bytes",
            track.id(),
            track.kind(),
            c.map_or(0, |c| c.rtp),
            c.map_or(0, |c| c.rtcp),
            c.map_or(0, |c| c.bytes)
        );
    }
}
