//! H.265 (HEVC) RTP payload format (RFC 7798).
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header**: `|F(1)|Type(6)|LayerId(6)|TID(3)|`.
//!   The NAL type lives in bits 1..6 of the first byte.
//!
//! - **FU layout**: a 2-byte PayloadHdr (copy of the NAL header with
//!   Type=49) followed by a 1-byte FU header (`S|E|FuType`), so the
//!   per-fragment overhead is 3 bytes instead of 2.
//!
//! - NAL types 0–47 are single-unit packets; 48 is AP (aggregation),
//!   49 is FU, 50 is PACI. AP and PACI are dropped on receive and never
//!   produced.
//!
//! Annex B delimiting is identical to H.264, so NAL extraction is shared
//! with [`super::h264`].

use std::collections::VecDeque;

use rand::RngExt;

use super::h264::{append_start_code, split_nal_units};
use super::rtp::RtpPacket;
use super::{Codec, DEFAULT_MTU, Depacketizer, FrameParams, MediaFrame, Packetizer};

const RTP_HEADER_SIZE: usize = 12;
const FU_TYPE: u8 = 49;
const AP_TYPE: u8 = 48;

fn nal_unit_type(header_byte: u8) -> u8 {
    (header_byte >> 1) & 0x3F
}

/// H.265 RTP packetizer (RFC 7798).
#[derive(Debug)]
pub struct H265Packetizer {
    payload_type: u8,
    ssrc: u32,
    mtu: usize,
    sequence: u16,
    last_timestamp: u32,
}

impl H265Packetizer {
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

    fn packetize_nal(
        &mut self,
        nal: &[u8],
        timestamp: u32,
        is_last_nal: bool,
        out: &mut Vec<RtpPacket>,
    ) {
        if nal.len() < 2 {
            return;
        }

        let max_payload = self.mtu - RTP_HEADER_SIZE;
        if nal.len() <= max_payload {
            let mut pkt = self.next_packet(timestamp, is_last_nal);
            pkt.payload = nal.to_vec();
            out.push(pkt);
            return;
        }

        // FU (RFC 7798 §4.4.3): PayloadHdr keeps F, LayerId and TID from
        // the original header but carries Type=49.
        let fu_type = nal_unit_type(nal[0]);
        let payload_hdr0 = (nal[0] & 0x81) | (FU_TYPE << 1);
        let payload_hdr1 = nal[1];

        let max_fragment = max_payload - 3;
        let payload = &nal[2..];
        let mut offset = 0usize;
        let mut first = true;
        let before = out.len();

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last_fragment = remaining <= max_fragment;
            let chunk = &payload[offset..offset + remaining.min(max_fragment)];

            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };
            let fu_header = start_bit | end_bit | fu_type;

            let mut pkt = self.next_packet(timestamp, is_last_nal && last_fragment);
            pkt.payload = Vec::with_capacity(3 + chunk.len());
            pkt.payload.push(payload_hdr0);
            pkt.payload.push(payload_hdr1);
            pkt.payload.push(fu_header);
            pkt.payload.extend_from_slice(chunk);
            out.push(pkt);

            offset += chunk.len();
            first = false;
        }

        tracing::trace!(
            fu_type,
            nal_size = nal.len(),
            fragments = out.len() - before,
            "FU fragmented NAL unit"
        );
    }
}

impl Packetizer for H265Packetizer {
    fn packetize(&mut self, frame: &MediaFrame) -> Vec<RtpPacket> {
        let nals = split_nal_units(&frame.data);
        let mut packets = Vec::new();

        for (i, nal) in nals.iter().enumerate() {
            let is_last = i == nals.len() - 1;
            self.packetize_nal(nal, frame.timestamp, is_last, &mut packets);
        }
        self.last_timestamp = frame.timestamp;

        packets
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// 90 kHz clock rate per RFC 7798 §7.1.
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

/// H.265 RTP depacketizer.
#[derive(Debug, Default)]
pub struct H265Depacketizer {
    pending: Vec<u8>,
    ready: VecDeque<MediaFrame>,
    have_frame_data: bool,
    fu_active: bool,
    current_timestamp: u32,
    last_sequence: Option<u16>,
}

impl H265Depacketizer {
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
            codec: Codec::H265,
            params: FrameParams::None,
        };
        self.ready.push_back(frame);
        self.have_frame_data = false;
        self.fu_active = false;
    }
}

impl Depacketizer for H265Depacketizer {
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
        if data.len() < 2 {
            return self.ready.pop_front();
        }

        let nal_type = nal_unit_type(data[0]);
        match nal_type {
            0..=47 => {
                append_start_code(&mut self.pending);
                self.pending.extend_from_slice(data);
                self.have_frame_data = true;
                self.fu_active = false;
            }
            FU_TYPE if data.len() >= 3 => {
                let fu_header = data[2];
                let start = fu_header & 0x80 != 0;
                let end = fu_header & 0x40 != 0;
                let fu_type = fu_header & 0x3F;

                if start {
                    // Rebuild the 2-byte NAL header: F and LayerId MSB from
                    // the PayloadHdr, Type from the FU header, second byte
                    // (LayerId LSBs + TID) verbatim.
                    let header = [(data[0] & 0x81) | (fu_type << 1), data[1]];
                    append_start_code(&mut self.pending);
                    self.pending.extend_from_slice(&header);
                    self.fu_active = true;
                }
                if self.fu_active && data.len() > 3 {
                    self.pending.extend_from_slice(&data[3..]);
                    self.have_frame_data = true;
                }
                if end {
                    self.fu_active = false;
                }
            }
            AP_TYPE => {
                tracing::debug!("H.265 aggregation packet dropped");
            }
            _ => {
                tracing::debug!(nal_type, "unsupported H.265 payload mode dropped");
            }
        }

        if packet.marker {
            self.flush();
        }
        self.ready.pop_front()
    }
}
