//! MPEG-2 transport stream RTP payload format (RFC 2250 §2).
//!
//! TS payloads are runs of fixed 188-byte packets, each beginning with the
//! sync byte `0x47`. An RTP packet carries as many whole TS packets as fit
//! in the MTU; there is no fragmentation and no reassembly state — the
//! depacketizer validates each payload and forwards it as-is.

use rand::RngExt;

use super::rtp::RtpPacket;
use super::{Codec, DEFAULT_MTU, Depacketizer, FrameParams, MediaFrame, Packetizer};

/// Fixed MPEG-2 TS packet size.
pub const TS_PACKET_SIZE: usize = 188;
/// MPEG-2 TS sync byte.
pub const TS_SYNC_BYTE: u8 = 0x47;

const RTP_HEADER_SIZE: usize = 12;

/// MPEG-2 TS packetizer (RFC 2250).
#[derive(Debug)]
pub struct TsPacketizer {
    payload_type: u8,
    ssrc: u32,
    mtu: usize,
    sequence: u16,
    last_timestamp: u32,
}

impl TsPacketizer {
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
}

impl Packetizer for TsPacketizer {
    fn packetize(&mut self, frame: &MediaFrame) -> Vec<RtpPacket> {
        let data = &frame.data;
        let max_ts_per_rtp = ((self.mtu - RTP_HEADER_SIZE) / TS_PACKET_SIZE).max(1);

        let mut packets = Vec::new();
        let mut offset = 0usize;

        while offset < data.len() {
            let remaining_ts = (data.len() - offset) / TS_PACKET_SIZE;
            if remaining_ts == 0 {
                tracing::warn!(
                    trailing = data.len() - offset,
                    "incomplete TS packet at end of frame, skipping"
                );
                break;
            }
            let count = remaining_ts.min(max_ts_per_rtp);
            let payload_size = count * TS_PACKET_SIZE;

            let mut pkt = RtpPacket::new(self.payload_type, self.sequence, frame.timestamp, self.ssrc);
            self.sequence = self.sequence.wrapping_add(1);
            // The marker bit has no frame-boundary meaning for TS (RFC 2250 §2).
            pkt.payload = data[offset..offset + payload_size].to_vec();
            packets.push(pkt);

            offset += payload_size;
        }

        self.last_timestamp = frame.timestamp;
        packets
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// 90 kHz clock rate per RFC 2250 §2.
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

/// MPEG-2 TS depacketizer.
///
/// Each RTP payload must be a whole number of 188-byte TS packets, all with
/// the `0x47` sync byte. Valid payloads are forwarded without reassembly;
/// invalid ones are dropped.
#[derive(Debug, Default)]
pub struct TsDepacketizer;

impl TsDepacketizer {
    pub fn new() -> Self {
        Self
    }
}

impl Depacketizer for TsDepacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Option<MediaFrame> {
        let data = &packet.payload;
        if data.is_empty() {
            return None;
        }

        if data.len() % TS_PACKET_SIZE != 0 {
            tracing::warn!(size = data.len(), "TS payload not a multiple of 188, dropped");
            return None;
        }
        for chunk in data.chunks_exact(TS_PACKET_SIZE) {
            if chunk[0] != TS_SYNC_BYTE {
                tracing::warn!("TS packet missing sync byte, payload dropped");
                return None;
            }
        }

        Some(MediaFrame {
            data: data.clone(),
            timestamp: packet.timestamp,
            codec: Codec::Mp2t,
            params: FrameParams::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_packets(count: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(count * TS_PACKET_SIZE);
        for i in 0..count {
            let mut pkt = vec![0u8; TS_PACKET_SIZE];
            pkt[0] = TS_SYNC_BYTE;
            pkt[1] = i as u8;
            data.extend_from_slice(&pkt);
        }
        data
    }

    #[test]
    fn groups_whole_ts_packets_per_rtp() {
        let mut p = TsPacketizer::new(33, 5);
        // MTU 1400: (1400-12)/188 = 7 TS packets per RTP packet
        let frame = MediaFrame::new(Codec::Mp2t, ts_packets(10), 3000);
        let packets = p.packetize(&frame);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload.len(), 7 * TS_PACKET_SIZE);
        assert_eq!(packets[1].payload.len(), 3 * TS_PACKET_SIZE);
    }

    #[test]
    fn trailing_partial_packet_skipped() {
        let mut p = TsPacketizer::new(33, 5);
        let mut data = ts_packets(2);
        data.extend_from_slice(&[TS_SYNC_BYTE, 0, 0]); // incomplete
        let packets = p.packetize(&MediaFrame::new(Codec::Mp2t, data, 0));
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload.len(), 2 * TS_PACKET_SIZE);
    }

    #[test]
    fn depacketizer_forwards_valid_payload() {
        let mut d = TsDepacketizer::new();
        let mut pkt = RtpPacket::new(33, 1, 999, 5);
        pkt.payload = ts_packets(3);
        let frame = d.push(&pkt).expect("valid TS payload forwarded");
        assert_eq!(frame.data.len(), 3 * TS_PACKET_SIZE);
        assert_eq!(frame.timestamp, 999);
        assert_eq!(frame.codec, Codec::Mp2t);
    }

    #[test]
    fn depacketizer_drops_bad_size() {
        let mut d = TsDepacketizer::new();
        let mut pkt = RtpPacket::new(33, 1, 0, 5);
        pkt.payload = vec![TS_SYNC_BYTE; 100];
        assert!(d.push(&pkt).is_none());
    }

    #[test]
    fn depacketizer_drops_bad_sync_byte() {
        let mut d = TsDepacketizer::new();
        let mut data = ts_packets(2);
        data[TS_PACKET_SIZE] = 0x00;
        let mut pkt = RtpPacket::new(33, 1, 0, 5);
        pkt.payload = data;
        assert!(d.push(&pkt).is_none());
    }

    #[test]
    fn roundtrip() {
        let mut p = TsPacketizer::new(33, 5);
        let mut d = TsDepacketizer::new();
        let data = ts_packets(7);
        let packets = p.packetize(&MediaFrame::new(Codec::Mp2t, data.clone(), 42));
        assert_eq!(packets.len(), 1);
        assert_eq!(d.push(&packets[0]).unwrap().data, data);
    }
}
