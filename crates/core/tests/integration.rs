//! Integration tests: full RTSP handshakes against a live server.
//!
//! A raw TCP client exercises the wire protocol directly; the library
//! client then runs end-to-end over UDP and TCP-interleaved transports.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use rtsp::media::Codec;
use rtsp::{ClientListener, MediaFrame, MediaStreamInfo, RtspClient, Server};

const TEST_SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1f, 0x8c, 0x8d, 0x40];
const TEST_PPS: &[u8] = &[0x68, 0xce, 0x3c, 0x80];

fn start_server(bind: &str) -> Server {
    let mut server = Server::new(bind);
    server.add_stream(MediaStreamInfo::h264("/live", TEST_SPS.to_vec(), TEST_PPS.to_vec()));
    server.start().expect("server start");
    server
}

fn rtsp_request(stream: &mut TcpStream, request: &str) -> std::io::Result<String> {
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    // Read the body if Content-Length is present
    if let Some(len) = response
        .lines()
        .find(|l| l.to_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
        && len > 0
    {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        response.push_str(&String::from_utf8_lossy(&body));
    }

    Ok(response)
}

#[test]
fn full_handshake_over_raw_tcp() {
    const BIND: &str = "127.0.0.1:18554";
    let mut server = start_server(BIND);

    let addr = BIND.to_socket_addrs().unwrap().next().unwrap();
    let mut stream =
        TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to server");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let base_uri = format!("rtsp://{BIND}/live");

    // OPTIONS
    let resp = rtsp_request(
        &mut stream,
        &format!("OPTIONS {base_uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n"),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "OPTIONS: {resp}");
    assert!(resp.contains("Public: OPTIONS, DESCRIBE, SETUP, TEARDOWN, PLAY, PAUSE"));

    // DESCRIBE
    let resp = rtsp_request(
        &mut stream,
        &format!("DESCRIBE {base_uri} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n"),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "DESCRIBE: {resp}");
    assert!(resp.contains("Content-Type: application/sdp"));
    assert!(resp.contains("v=0"));
    assert!(resp.contains("m=video 0 RTP/AVP 96"));
    assert!(resp.contains("a=rtpmap:96 H264/90000"));
    assert!(resp.contains("a=fmtp:96 packetization-mode=1;profile-level-id=42001f;sprop-parameter-sets="));

    // PLAY before SETUP: no session
    let resp = rtsp_request(
        &mut stream,
        &format!("PLAY {base_uri} RTSP/1.0\r\nCSeq: 3\r\nSession: BOGUS\r\n\r\n"),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 454"), "PLAY pre-SETUP: {resp}");

    // SETUP
    let resp = rtsp_request(
        &mut stream,
        &format!(
            "SETUP {base_uri}/track0 RTSP/1.0\r\nCSeq: 4\r\n\
             Transport: RTP/AVP;unicast;client_port=5004-5005\r\n\r\n"
        ),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {resp}");
    assert!(resp.contains("Transport: RTP/AVP;unicast;client_port=5004-5005;server_port="));
    let session_id = resp
        .lines()
        .find(|l| l.to_lowercase().starts_with("session:"))
        .and_then(|l| l.split(':').nth(1))
        .map(|v| v.trim().split(';').next().unwrap_or("").trim().to_string())
        .expect("session id");
    assert!(!session_id.is_empty());

    // PAUSE in READY state is 455
    let resp = rtsp_request(
        &mut stream,
        &format!("PAUSE {base_uri} RTSP/1.0\r\nCSeq: 5\r\nSession: {session_id}\r\n\r\n"),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 455"), "PAUSE in READY: {resp}");

    // PLAY
    let resp = rtsp_request(
        &mut stream,
        &format!("PLAY {base_uri} RTSP/1.0\r\nCSeq: 6\r\nSession: {session_id}\r\n\r\n"),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "PLAY: {resp}");
    assert!(resp.contains("Range: npt=0-"));
    assert!(resp.contains("RTP-Info: url="));
    assert!(resp.contains(";seq="));
    assert!(resp.contains(";rtptime="));

    // TEARDOWN returns the session to INIT and frees it
    let resp = rtsp_request(
        &mut stream,
        &format!("TEARDOWN {base_uri} RTSP/1.0\r\nCSeq: 7\r\nSession: {session_id}\r\n\r\n"),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "TEARDOWN: {resp}");

    let resp = rtsp_request(
        &mut stream,
        &format!("PLAY {base_uri} RTSP/1.0\r\nCSeq: 8\r\nSession: {session_id}\r\n\r\n"),
    )
    .unwrap();
    assert!(resp.starts_with("RTSP/1.0 454"), "PLAY after TEARDOWN: {resp}");

    server.stop();
}

#[derive(Default)]
struct FrameCollector {
    frames: Mutex<Vec<MediaFrame>>,
}

impl ClientListener for FrameCollector {
    fn on_frame(&self, frame: MediaFrame) {
        self.frames.lock().push(frame);
    }
}

fn test_frame(timestamp: u32) -> MediaFrame {
    // SPS + PPS + a ~6000-byte IDR slice: forces FU-A fragmentation
    let mut data = Vec::new();
    for nal in [TEST_SPS, TEST_PPS] {
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(nal);
    }
    data.extend_from_slice(&[0, 0, 0, 1, 0x65]);
    data.extend((0..6000u32).map(|i| (i % 250) as u8));
    MediaFrame::new(Codec::H264, data, timestamp)
}

fn wait_for_frames(collector: &FrameCollector, server: &Server, path: &str) -> Vec<MediaFrame> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut ts = 0u32;
    while Instant::now() < deadline {
        ts += 3000;
        let _ = server.push_frame(path, &test_frame(ts));
        std::thread::sleep(Duration::from_millis(50));
        let frames = collector.frames.lock();
        if frames.len() >= 2 {
            return frames.clone();
        }
    }
    collector.frames.lock().clone()
}

#[test]
fn client_receives_frames_over_udp() {
    const BIND: &str = "127.0.0.1:18556";
    let mut server = start_server(BIND);

    let collector = Arc::new(FrameCollector::default());
    let mut client =
        RtspClient::new(&format!("rtsp://{BIND}/live"), collector.clone()).expect("client");
    client.start().expect("handshake");

    let frames = wait_for_frames(&collector, &server, "/live");
    assert!(!frames.is_empty(), "no frames received over UDP");

    // Reassembled frames are the original Annex B access units
    let frame = &frames[0];
    assert_eq!(frame.codec, Codec::H264);
    assert!(frame.data.starts_with(&[0, 0, 0, 1]));
    assert!(frame.data.len() > 6000);

    client.teardown().expect("teardown");
    server.stop();
}

#[test]
fn client_receives_frames_over_interleaved_tcp() {
    const BIND: &str = "127.0.0.1:18558";
    let mut server = start_server(BIND);

    let collector = Arc::new(FrameCollector::default());
    let mut client = RtspClient::new(&format!("rtsp://{BIND}/live"), collector.clone())
        .expect("client")
        .with_interleaved_transport();
    client.start().expect("handshake");

    // Media rides the control connection; pump it while the server pushes.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut ts = 0u32;
    while Instant::now() < deadline && collector.frames.lock().len() < 2 {
        ts += 3000;
        let _ = server.push_frame("/live", &test_frame(ts));
        client.poll(Duration::from_millis(100)).expect("poll");
    }

    let frames = collector.frames.lock().clone();
    assert!(!frames.is_empty(), "no frames received over interleaved TCP");
    assert!(frames[0].data.len() > 6000);

    client.teardown().expect("teardown");
    server.stop();
}
