//! H.264 RTP payload format (RFC 6184).
//!
//! Two packetization modes are produced:
//!
//! - **Single NAL Unit** (§5.6): NALs that fit within the MTU are sent
//!   as-is in one RTP packet (12-byte header + NAL bytes, no start code).
//!
//! - **FU-A fragmentation** (§5.8): NALs exceeding the MTU are split across
//!   multiple RTP packets. Each fragment carries a 2-byte prefix before the
//!   fragment data:
//!
//!   ```text
//!   FU indicator:  [F|NRI|Type=28]     (1 byte)
//!   FU header:     [S|E|R|NAL_Type]    (1 byte)
//!   ```
//!
//!   - **S** (start): set on the first fragment
//!   - **E** (end): set on the last fragment
//!   - **NAL_Type**: the original NAL unit type
//!
//! The depacketizer reverses both modes, reconstructing Annex B frames with
//! 4-byte start codes. STAP-A and other aggregation modes are parsed far
//! enough to be skipped, never emitted.

use std::collections::VecDeque;

use rand::RngExt;

use super::rtp::RtpPacket;
use super::{Codec, DEFAULT_MTU, Depacketizer, FrameParams, MediaFrame, Packetizer};

const RTP_HEADER_SIZE: usize = 12;
const FU_A_TYPE: u8 = 28;

/// Split an Annex B bitstream into NAL units.
///
/// Scans for both 4-byte (`00 00 00 01`) and 3-byte (`00 00 01`) start
/// codes and returns the NAL bytes between them, excluding the start codes.
/// Used by both the H.264 and H.265 packetizers (same delimiting, different
/// NAL header layout).
pub(crate) fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    // (nal_data_start_index, start_code_length)
    let mut starts: Vec<(usize, usize)> = Vec::new();
    let mut i = 0usize;

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            starts.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            starts.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (idx, &(start, _)) in starts.iter().enumerate() {
        let end = if idx + 1 < starts.len() {
            let (next_start, next_sc_len) = starts[idx + 1];
            next_start - next_sc_len
        } else {
            data.len()
        };
        if start < end {
            nals.push(&data[start..end]);
        }
    }
    nals
}

pub(crate) fn append_start_code(dst: &mut Vec<u8>) {
    dst.extend_from_slice(&[0, 0, 0, 1]);
}

/// H.264 RTP packetizer (RFC 6184).
///
/// Stateful only through its sequence number, which starts at a random
/// value (RFC 3550 §5.1) and increments per emitted packet mod 2^16.
#[derive(Debug)]
pub struct H264Packetizer {
    payload_type: u8,
    ssrc: u32,
    mtu: usize,
    sequence: u16,
    last_timestamp: u32,
}

impl H264Packetizer {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        let mut rng = rand::rng();
        Self {
            payload_type,
            ssrc,
            mtu: DEFAULT_MTU,
            sequence: rng.random::<u16>(),
            last_timestamp: rng.random::<u32>(),
        }
    }

    /// Override the MTU (default 1400).
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    fn next_packet(&mut self, timestamp: u32, marker: bool) -> RtpPacket {
        let mut pkt = RtpPacket::new(self.payload_type, self.sequence, timestamp, self.ssrc);
        pkt.marker = marker;
        self.sequence = self.sequence.wrapping_add(1);
        pkt
    }

    /// Packetize a single NAL unit into one or more RTP packets.
    fn packetize_nal(
        &mut self,
        nal: &[u8],
        timestamp: u32,
        is_last_nal: bool,
        out: &mut Vec<RtpPacket>,
    ) {
        if nal.is_empty() {
            return;
        }

        let max_payload = self.mtu - RTP_HEADER_SIZE;
        if nal.len() <= max_payload {
            // Single NAL Unit mode (RFC 6184 §5.6)
            let mut pkt = self.next_packet(timestamp, is_last_nal);
            pkt.payload = nal.to_vec();
            out.push(pkt);
            return;
        }

        // FU-A fragmentation (RFC 6184 §5.8)
        let nal_header = nal[0];
        let nal_type = nal_header & 0x1F;
        let fu_indicator = (nal_header & 0xE0) | FU_A_TYPE;

        let max_fragment = max_payload - 2;
        let payload = &nal[1..];
        let mut offset = 0usize;
        let mut first = true;
        let before = out.len();

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last_fragment = remaining <= max_fragment;
            let chunk = &payload[offset..offset + remaining.min(max_fragment)];

            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };
            let fu_header = start_bit | end_bit | nal_type;

            let mut pkt = self.next_packet(timestamp, is_last_nal && last_fragment);
            pkt.payload = Vec::with_capacity(2 + chunk.len());
            pkt.payload.push(fu_indicator);
            pkt.payload.push(fu_header);
            pkt.payload.extend_from_slice(chunk);
            out.push(pkt);

            offset += chunk.len();
            first = false;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal.len(),
            fragments = out.len() - before,
            "FU-A fragmented NAL unit"
        );
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, frame: &MediaFrame) -> Vec<RtpPacket> {
        let nals = split_nal_units(&frame.data);
        let mut packets = Vec::new();

        for (i, nal) in nals.iter().enumerate() {
            let is_last = i == nals.len() - 1;
            self.packetize_nal(nal, frame.timestamp, is_last, &mut packets);
        }
        self.last_timestamp = frame.timestamp;

        tracing::trace!(
            nal_count = nals.len(),
            rtp_packets = packets.len(),
            frame_bytes = frame.data.len(),
            seq = self.sequence,
            ts = frame.timestamp,
            "frame packetized"
        );

        packets
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// 90 kHz clock rate per RFC 6184 §8.1.
    fn clock_rate(&self) -> u32 {
        90000
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

/// H.264 RTP depacketizer.
///
/// Accumulates the current access unit in Annex B form and emits it when
/// the marker bit is seen or the timestamp changes. A sequence gap during
/// FU-A reassembly discards the partial access unit; the reconstructed
/// frame would be corrupt.
#[derive(Debug, Default)]
pub struct H264Depacketizer {
    pending: Vec<u8>,
    ready: VecDeque<MediaFrame>,
    have_frame_data: bool,
    fu_active: bool,
    current_timestamp: u32,
    last_sequence: Option<u16>,
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.have_frame_data = false;
        self.fu_active = false;
    }

    fn flush(&mut self) {
        if !self.have_frame_data || self.pending.is_empty() {
            return;
        }
        let frame = MediaFrame {
            data: std::mem::take(&mut self.pending),
            timestamp: self.current_timestamp,
            codec: Codec::H264,
            params: FrameParams::None,
        };
        self.ready.push_back(frame);
        self.have_frame_data = false;
        self.fu_active = false;
    }
}

impl Depacketizer for H264Depacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Option<MediaFrame> {
        if let Some(last) = self.last_sequence {
            let expected = last.wrapping_add(1);
            if packet.sequence_number != expected {
                tracing::debug!(
                    got = packet.sequence_number,
                    expected,
                    fu_active = self.fu_active,
                    "sequence gap"
                );
                if self.fu_active {
                    // The in-flight NAL is missing a fragment; unrecoverable.
                    self.reset();
                }
            }
        }
        self.last_sequence = Some(packet.sequence_number);

        if self.have_frame_data && packet.timestamp != self.current_timestamp {
            self.flush();
        }
        self.current_timestamp = packet.timestamp;

        let data = &packet.payload;
        if data.is_empty() {
            return self.ready.pop_front();
        }

        let nal_type = data[0] & 0x1F;
        match nal_type {
            1..=23 => {
                append_start_code(&mut self.pending);
                self.pending.extend_from_slice(data);
                self.have_frame_data = true;
                self.fu_active = false;
            }
            FU_A_TYPE if data.len() >= 2 => {
                let fu_header = data[1];
                let start = fu_header & 0x80 != 0;
                let end = fu_header & 0x40 != 0;
                let original_type = fu_header & 0x1F;

                if start {
                    // F and NRI come from the indicator, type from the FU header.
                    let nal_header = (data[0] & 0xE0) | original_type;
                    append_start_code(&mut self.pending);
                    self.pending.push(nal_header);
                    self.fu_active = true;
                }
                if self.fu_active && data.len() > 2 {
                    self.pending.extend_from_slice(&data[2..]);
                    self.have_frame_data = true;
                }
                if end {
                    self.fu_active = false;
                }
            }
            _ => {
                // STAP-A (24) and other aggregation modes are not produced
                // by this crate's packetizers; drop them.
                tracing::debug!(nal_type, "unsupported H.264 payload mode dropped");
            }
        }

        if packet.marker {
            self.flush();
        }
        self.ready.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annexb_frame(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out
    }

    // --- NAL extraction ---

    #[test]
    fn split_single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let nals = split_nal_units(&data);
        assert_eq!(nals, vec![&[0x65, 0xAA, 0xBB][..]]);
    }

    #[test]
    fn split_single_nal_3byte_sc() {
        let data = [0, 0, 1, 0x67, 0x42, 0x00];
        let nals = split_nal_units(&data);
        assert_eq!(nals, vec![&[0x67, 0x42, 0x00][..]]);
    }

    #[test]
    fn split_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = split_nal_units(&data);
        assert_eq!(nals, vec![&[0x67, 0x42][..], &[0x68, 0xCE][..]]);
    }

    #[test]
    fn split_no_start_code() {
        assert!(split_nal_units(&[0xFF, 0xFE]).is_empty());
        assert!(split_nal_units(&[]).is_empty());
    }

    // --- Packetization ---

    #[test]
    fn small_nal_single_packet() {
        let mut p = H264Packetizer::new(96, 0x1234);
        let frame = MediaFrame::new(Codec::H264, annexb_frame(&[&[0x65, 0xAA, 0xBB]]), 3000);
        let packets = p.packetize(&frame);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload, vec![0x65, 0xAA, 0xBB]);
        assert!(packets[0].marker);
    }

    #[test]
    fn large_nal_fragmented() {
        let mut p = H264Packetizer::new(96, 0x1234);
        let mut nal = vec![0x65];
        nal.extend(vec![0xAA; DEFAULT_MTU + 500]);
        let frame = MediaFrame::new(Codec::H264, annexb_frame(&[&nal]), 3000);
        let packets = p.packetize(&frame);
        assert!(packets.len() > 1);

        assert_eq!(packets[0].payload[0] & 0x1F, FU_A_TYPE);
        assert_eq!(packets[0].payload[1] & 0x80, 0x80); // Start bit
        assert!(!packets[0].marker);

        let last = packets.last().unwrap();
        assert_eq!(last.payload[1] & 0x40, 0x40); // End bit
        assert!(last.marker);

        for w in packets.windows(2) {
            assert_eq!(w[1].sequence_number, w[0].sequence_number.wrapping_add(1));
            assert_eq!(w[0].timestamp, w[1].timestamp);
        }
    }

    #[test]
    fn fragmentation_boundary() {
        // A NAL of exactly MTU-12 bytes fits in one packet; one more byte
        // forces at least two FU-A fragments.
        let fit = DEFAULT_MTU - 12;

        let mut p = H264Packetizer::new(96, 1);
        let mut nal = vec![0x65];
        nal.extend(vec![0; fit - 1]);
        assert_eq!(
            p.packetize(&MediaFrame::new(Codec::H264, annexb_frame(&[&nal]), 0)).len(),
            1
        );

        nal.push(0);
        let packets = p.packetize(&MediaFrame::new(Codec::H264, annexb_frame(&[&nal]), 0));
        assert!(packets.len() >= 2);
    }

    #[test]
    fn marker_only_on_last_nal() {
        let mut p = H264Packetizer::new(96, 1);
        let frame = MediaFrame::new(
            Codec::H264,
            annexb_frame(&[&[0x67, 0x42], &[0x68, 0xCE], &[0x65, 0x88]]),
            900,
        );
        let packets = p.packetize(&frame);
        assert_eq!(packets.len(), 3);
        assert!(!packets[0].marker);
        assert!(!packets[1].marker);
        assert!(packets[2].marker);
    }

    #[test]
    fn sequence_contiguous_across_frames() {
        let mut p = H264Packetizer::new(96, 1);
        let first = p.next_sequence();
        let frame = MediaFrame::new(Codec::H264, annexb_frame(&[&[0x65, 1, 2]]), 0);
        let n1 = p.packetize(&frame).len() as u16;
        assert_eq!(p.next_sequence(), first.wrapping_add(n1));
        let n2 = p.packetize(&frame).len() as u16;
        assert_eq!(p.next_sequence(), first.wrapping_add(n1 + n2));
    }

    // --- Depacketization and round trip ---

    #[test]
    fn roundtrip_single_nal_frame() {
        let mut p = H264Packetizer::new(96, 7);
        let mut d = H264Depacketizer::new();
        let data = annexb_frame(&[&[0x67, 0x42, 0x00], &[0x68, 0xCE], &[0x65, 0x88, 0x01]]);
        let frame = MediaFrame::new(Codec::H264, data.clone(), 12345);

        let mut out = None;
        for pkt in p.packetize(&frame) {
            if let Some(f) = d.push(&pkt) {
                out = Some(f);
            }
        }
        let out = out.expect("frame reassembled");
        assert_eq!(out.data, data);
        assert_eq!(out.timestamp, 12345);
        assert_eq!(out.codec, Codec::H264);
    }

    #[test]
    fn roundtrip_fragmented_idr() {
        // SPS + PPS + 6000-byte IDR at MTU 1400: at least five packets,
        // first FU fragment has S=1, last has E=1 and the marker.
        let mut p = H264Packetizer::new(96, 7);
        let mut d = H264Depacketizer::new();

        let sps = vec![0x67, 0x42, 0x00, 0x1F, 0xAB];
        let pps = vec![0x68, 0xCE, 0x3C, 0x80];
        let mut idr = vec![0x65];
        idr.extend((0..6000u32 - 1).map(|i| (i % 251) as u8));
        let data = annexb_frame(&[&sps, &pps, &idr]);
        let frame = MediaFrame::new(Codec::H264, data.clone(), 90000);

        let packets = p.packetize(&frame);
        assert!(packets.len() >= 5);
        assert!(packets.iter().all(|pk| pk.timestamp == 90000));

        let mut out = None;
        for pkt in &packets {
            if let Some(f) = d.push(pkt) {
                out = Some(f);
            }
        }
        assert_eq!(out.expect("frame reassembled").data, data);
    }

    #[test]
    fn gap_during_fu_discards_partial_frame() {
        let mut p = H264Packetizer::new(96, 7);
        let mut d = H264Depacketizer::new();

        let mut idr = vec![0x65];
        idr.extend(vec![0x11; 4000]);
        let packets = p.packetize(&MediaFrame::new(Codec::H264, annexb_frame(&[&idr]), 100));
        assert!(packets.len() >= 3);

        // Drop a middle fragment
        let mut out = Vec::new();
        for (i, pkt) in packets.iter().enumerate() {
            if i == 1 {
                continue;
            }
            if let Some(f) = d.push(pkt) {
                out.push(f);
            }
        }
        assert!(out.is_empty(), "corrupt frame must not be delivered");

        // The next intact frame still comes through
        let packets = p.packetize(&MediaFrame::new(
            Codec::H264,
            annexb_frame(&[&[0x65, 0x01, 0x02]]),
            200,
        ));
        let frame = d.push(&packets[0]).expect("stream recovers after loss");
        assert_eq!(frame.timestamp, 200);
    }

    #[test]
    fn timestamp_change_flushes_previous_frame() {
        let mut d = H264Depacketizer::new();

        // Frame 1 without marker (lost), frame 2 arrives with a new timestamp
        let mut pkt1 = RtpPacket::new(96, 10, 1000, 7);
        pkt1.payload = vec![0x65, 0x01];
        assert!(d.push(&pkt1).is_none());

        let mut pkt2 = RtpPacket::new(96, 11, 2000, 7);
        pkt2.payload = vec![0x65, 0x02];
        let flushed = d.push(&pkt2).expect("previous frame flushed");
        assert_eq!(flushed.timestamp, 1000);
        assert_eq!(flushed.data, vec![0, 0, 0, 1, 0x65, 0x01]);
    }

    #[test]
    fn stap_a_dropped() {
        let mut d = H264Depacketizer::new();
        let mut pkt = RtpPacket::new(96, 1, 0, 7);
        pkt.payload = vec![24, 0x00, 0x02, 0x65, 0x01]; // STAP-A
        pkt.marker = true;
        assert!(d.push(&pkt).is_none());
    }
}
