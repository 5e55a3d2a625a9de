//! AAC RTP payload format (RFC 3640, `mpeg4-generic` AAC-hbr mode).
//!
//! Every RTP packet starts with an AU-header section:
//!
//! ```text
//! +---------------------+-----------------------+
//! | AU-headers-length   | AU-header (size|index)|
//! |      (16 bits)      |  13 bits   |  3 bits  |
//! +---------------------+-----------------------+
//! ```
//!
//! With the SDP parameters `sizelength=13;indexlength=3;indexdeltalength=3`
//! one AU header is 16 bits, so `AU-headers-length` is always 16 here. The
//! size field carries the full access-unit size; a fragmented AU repeats it
//! in every fragment, and the marker bit is set on the final fragment
//! (RFC 3640 §3.3.6).

use rand::RngExt;

use super::rtp::RtpPacket;
use super::{Codec, DEFAULT_MTU, Depacketizer, FrameParams, MediaFrame, Packetizer};

const RTP_HEADER_SIZE: usize = 12;
/// AU-headers-length (2 bytes) + one 16-bit AU header.
const AU_SECTION_SIZE: usize = 4;
/// One AU header of sizelength=13 + indexlength=3.
const AU_HEADERS_LENGTH_BITS: u16 = 16;

/// AAC-hbr packetizer (RFC 3640 §3.3.6).
#[derive(Debug)]
pub struct AacPacketizer {
    payload_type: u8,
    ssrc: u32,
    mtu: usize,
    clock_rate: u32,
    sequence: u16,
    last_timestamp: u32,
}

impl AacPacketizer {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        let mut rng = rand::rng();
        Self {
            payload_type,
            ssrc,
            mtu: DEFAULT_MTU,
            clock_rate: 48000,
            sequence: rng.random::<u16>(),
            last_timestamp: rng.random::<u32>(),
        }
    }

    /// Set the RTP clock rate (the stream's sample rate).
    pub fn with_clock_rate(mut self, clock_rate: u32) -> Self {
        self.clock_rate = clock_rate;
        self
    }

    /// Override the MTU (default 1400).
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }
}

impl Packetizer for AacPacketizer {
    fn packetize(&mut self, frame: &MediaFrame) -> Vec<RtpPacket> {
        let au = &frame.data;
        if au.is_empty() || au.len() > 0x1FFF {
            // The 13-bit size field bounds a single AU at 8191 bytes.
            tracing::warn!(au_size = au.len(), "AAC access unit size out of range");
            return Vec::new();
        }

        let max_fragment = self.mtu - RTP_HEADER_SIZE - AU_SECTION_SIZE;
        let mut packets = Vec::new();
        let mut offset = 0usize;

        while offset < au.len() {
            let remaining = au.len() - offset;
            let last = remaining <= max_fragment;
            let chunk = &au[offset..offset + remaining.min(max_fragment)];

            let mut pkt = RtpPacket::new(self.payload_type, self.sequence, frame.timestamp, self.ssrc);
            self.sequence = self.sequence.wrapping_add(1);
            pkt.marker = last;

            // AU-header: size in the upper 13 bits, AU-index 0 below.
            let au_header = (au.len() as u16) << 3;
            pkt.payload = Vec::with_capacity(AU_SECTION_SIZE + chunk.len());
            pkt.payload.extend_from_slice(&AU_HEADERS_LENGTH_BITS.to_be_bytes());
            pkt.payload.extend_from_slice(&au_header.to_be_bytes());
            pkt.payload.extend_from_slice(chunk);
            packets.push(pkt);

            offset += chunk.len();
        }

        self.last_timestamp = frame.timestamp;
        packets
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn next_sequence(&self) -> u16 {
        self.sequence
    }

    fn last_timestamp(&self) -> u32 {
        self.last_timestamp
    }
}

/// AAC-hbr depacketizer.
///
/// Validates and strips the AU-header section of each packet, then
/// concatenates fragment data until the marker bit or a timestamp change
/// completes the access unit.
#[derive(Debug, Default)]
pub struct AacDepacketizer {
    pending: Vec<u8>,
    have_frame_data: bool,
    current_timestamp: u32,
}

impl AacDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_frame(&mut self) -> Option<MediaFrame> {
        if !self.have_frame_data || self.pending.is_empty() {
            return None;
        }
        self.have_frame_data = false;
        Some(MediaFrame {
            data: std::mem::take(&mut self.pending),
            timestamp: self.current_timestamp,
            codec: Codec::Aac,
            params: FrameParams::None,
        })
    }
}

impl Depacketizer for AacDepacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Option<MediaFrame> {
        let mut completed = None;
        if self.have_frame_data && packet.timestamp != self.current_timestamp {
            completed = self.take_frame();
        }
        self.current_timestamp = packet.timestamp;

        let data = &packet.payload;
        if data.len() < 2 {
            return completed;
        }

        // AU-headers-length is in bits; round up to bytes.
        let header_bits = u16::from_be_bytes([data[0], data[1]]) as usize;
        let header_bytes = header_bits.div_ceil(8);
        let au_start = 2 + header_bytes;
        if data.len() <= au_start {
            tracing::debug!(header_bits, payload = data.len(), "truncated AAC AU section");
            return completed;
        }

        self.pending.extend_from_slice(&data[au_start..]);
        self.have_frame_data = true;

        if packet.marker && completed.is_none() {
            completed = self.take_frame();
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_packet_au() {
        let mut p = AacPacketizer::new(97, 3).with_clock_rate(44100);
        let au: Vec<u8> = (0..512u32).map(|i| i as u8).collect();
        let frame = MediaFrame::new(Codec::Aac, au.clone(), 1024);
        let packets = p.packetize(&frame);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].marker);

        // AU-headers-length = 16 bits, AU-header = size << 3
        let payload = &packets[0].payload;
        assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 16);
        assert_eq!(u16::from_be_bytes([payload[2], payload[3]]), (512u16) << 3);
        assert_eq!(&payload[4..], &au[..]);
    }

    #[test]
    fn roundtrip_single_au() {
        let mut p = AacPacketizer::new(97, 3);
        let mut d = AacDepacketizer::new();
        let au: Vec<u8> = (0..700u32).map(|i| (i % 256) as u8).collect();
        let frame = MediaFrame::new(Codec::Aac, au.clone(), 2048);

        let mut out = None;
        for pkt in p.packetize(&frame) {
            if let Some(f) = d.push(&pkt) {
                out = Some(f);
            }
        }
        let out = out.expect("AU reassembled");
        assert_eq!(out.data, au);
        assert_eq!(out.timestamp, 2048);
        assert_eq!(out.codec, Codec::Aac);
    }

    #[test]
    fn roundtrip_fragmented_au() {
        let mut p = AacPacketizer::new(97, 3).with_mtu(200);
        let mut d = AacDepacketizer::new();
        let au: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        let frame = MediaFrame::new(Codec::Aac, au.clone(), 4096);

        let packets = p.packetize(&frame);
        assert!(packets.len() > 1);
        assert!(!packets[0].marker);
        assert!(packets.last().unwrap().marker);

        let mut out = None;
        for pkt in &packets {
            if let Some(f) = d.push(pkt) {
                out = Some(f);
            }
        }
        assert_eq!(out.expect("AU reassembled").data, au);
    }

    #[test]
    fn oversized_au_rejected() {
        let mut p = AacPacketizer::new(97, 3);
        let frame = MediaFrame::new(Codec::Aac, vec![0; 0x2000], 0);
        assert!(p.packetize(&frame).is_empty());
    }

    #[test]
    fn timestamp_change_flushes() {
        let mut p = AacPacketizer::new(97, 3);
        let mut d = AacDepacketizer::new();

        // First AU's marker packet lost; second AU's first packet flushes it.
        let first = p.packetize(&MediaFrame::new(Codec::Aac, vec![1, 2, 3], 100));
        let mut lost_marker = first[0].clone();
        lost_marker.marker = false;
        assert!(d.push(&lost_marker).is_none());

        let second = p.packetize(&MediaFrame::new(Codec::Aac, vec![4, 5], 200));
        let flushed = d.push(&second[0]).expect("stale AU flushed");
        assert_eq!(flushed.timestamp, 100);
        assert_eq!(flushed.data, vec![1, 2, 3]);
    }
}
