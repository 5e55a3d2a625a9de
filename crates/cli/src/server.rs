use std::thread;
use std::time::Duration;

use clap::Parser;
use rtsp::media::Codec;
use rtsp::{MediaFrame, MediaStreamInfo, Server};

#[derive(Parser)]
#[command(
    name = "rtsp-server",
    about = "Standalone RTSP server publishing a synthetic H.264 stream"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Stream mount path
    #[arg(long, default_value = "/live")]
    path: String,

    /// Frame rate of the synthetic stream
    #[arg(long, default_value_t = 25)]
    fps: u32,
}

const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1f, 0x8c, 0x8d, 0x40, 0x50, 0x1e, 0x90];
const PPS: &[u8] = &[0x68, 0xce, 0x3c, 0x80];

/// A placeholder access unit: parameter sets plus a filler IDR slice.
/// Stands in for an elementary-stream reader, which is the application's
/// job, not the server's.
fn synthetic_frame(timestamp: u32, counter: u32) -> MediaFrame {
    let mut data = Vec::new();
    for nal in [SPS, PPS] {
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(nal);
    }
    data.extend_from_slice(&[0, 0, 0, 1, 0x65]);
    data.extend((0..4000u32).map(|i| (i.wrapping_add(counter) % 251) as u8));
    MediaFrame::new(Codec::H264, data, timestamp)
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut server = Server::new(&args.bind);
    server.add_stream(MediaStreamInfo::h264(&args.path, SPS.to_vec(), PPS.to_vec()));

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {e}");
        std::process::exit(1);
    }
    println!(
        "RTSP server on rtsp://{}{} — Ctrl-C to stop",
        args.bind, args.path
    );

    let interval = Duration::from_millis(1000 / args.fps.max(1) as u64);
    let ts_step = 90000 / args.fps.max(1);
    let mut timestamp = 0u32;
    let mut counter = 0u32;
    loop {
        timestamp = timestamp.wrapping_add(ts_step);
        counter = counter.wrapping_add(1);
        if let Err(e) = server.push_frame(&args.path, &synthetic_frame(timestamp, counter)) {
            eprintln!("push failed: {e}");
            break;
        }
        thread::sleep(interval);
    }
}
