use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use parking_lot::Mutex;
use rtsp::{ClientListener, MediaFrame, RtspClient};

#[derive(Parser)]
#[command(
    name = "rtsp-recorder",
    about = "Record an RTSP stream's elementary frames to a file"
)]
struct Args {
    /// Stream URL (rtsp://host[:port]/path)
    url: String,

    /// Output file for the reassembled frames
    output: String,

    /// Use TCP-interleaved transport instead of UDP
    #[arg(long)]
    tcp: bool,

    /// Recording duration in seconds
    #[arg(long, default_value_t = 10)]
    seconds: u64,
}

struct Recorder {
    file: Mutex<File>,
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl ClientListener for Recorder {
    fn on_describe(&self, _url: &str, sdp: &str) {
        tracing::info!("stream described:\n{sdp}");
    }

    fn on_frame(&self, frame: MediaFrame) {
        if self.file.lock().write_all(&frame.data).is_ok() {
            self.frames.fetch_add(1, Ordering::Relaxed);
            self.bytes.fetch_add(frame.data.len() as u64, Ordering::Relaxed);
        }
    }

    fn on_error(&self, code: i32, message: &str) {
        eprintln!("stream error {code}: {message}");
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let file = match File::create(&args.output) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("cannot create {}: {e}", args.output);
            std::process::exit(1);
        }
    };
    let recorder = Arc::new(Recorder {
        file: Mutex::new(file),
        frames: AtomicU64::new(0),
        bytes: AtomicU64::new(0),
    });

    let mut client = match RtspClient::new(&args.url, recorder.clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("bad URL: {e}");
            std::process::exit(1);
        }
    };
    if args.tcp {
        client = client.with_interleaved_transport();
    }

    if let Err(e) = client.start() {
        eprintln!("handshake failed: {e}");
        std::process::exit(1);
    }
    println!("recording {} for {}s", args.url, args.seconds);

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut last_keepalive = Instant::now();
    while Instant::now() < deadline {
        if let Err(e) = client.poll(Duration::from_millis(250)) {
            eprintln!("connection lost: {e}");
            break;
        }
        // Refresh the session well inside the 60 s server timeout.
        if last_keepalive.elapsed() > Duration::from_secs(20) {
            let _ = client.keepalive();
            last_keepalive = Instant::now();
        }
    }

    let _ = client.teardown();
    println!(
        "wrote {} frames ({} bytes) to {}",
        recorder.frames.load(Ordering::Relaxed),
        recorder.bytes.load(Ordering::Relaxed),
        args.output
    );
}
