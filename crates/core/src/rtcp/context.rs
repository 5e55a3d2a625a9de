//! RTCP statistics contexts (RFC 3550 §6.4, Appendix A).
//!
//! One context exists per RTP flow. The sender side counts outbound
//! packets/octets, emits SR+SDES compounds on a timer, and computes RTT
//! from inbound RR report blocks (`RTT = now - SR send time - DLSR`).
//! The receiver side tracks the extended sequence number, computes the
//! RFC 3550 interarrival jitter estimate, and fills RR report blocks.
//!
//! All methods take wall-clock milliseconds from the caller; the contexts
//! never read a clock themselves, which keeps the arithmetic testable.

use std::collections::HashMap;

use super::packet::{
    Bye, RtcpPacket, ReceiverReport, ReportBlock, SenderReport, SourceDescription, lsr_from_ntp,
    parse_compound, unix_ms_to_ntp,
};

/// Permissible forward jump before a sequence step counts as a restart
/// (RFC 3550 A.1).
const MAX_DROPOUT: u16 = 3000;
/// Window treated as reordering/duplication rather than a jump.
const MAX_MISORDER: u16 = 100;

/// Sender-side RTCP context: outbound statistics plus RTT bookkeeping.
#[derive(Debug, Default)]
pub struct SenderContext {
    ssrc: u32,
    packet_count: u32,
    octet_count: u32,
    last_rtp_timestamp: u32,
    /// LSR value of each SR we sent → wall-clock send time, for RTT.
    sr_send_times: HashMap<u32, u64>,
    /// Receiver SSRC → most recent RTT in milliseconds.
    rtt_ms: HashMap<u32, u32>,
}

impl SenderContext {
    pub fn new(ssrc: u32) -> Self {
        Self {
            ssrc,
            ..Default::default()
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Account for one outbound RTP packet.
    pub fn on_rtp_sent(&mut self, rtp_timestamp: u32, payload_bytes: usize) {
        self.packet_count = self.packet_count.wrapping_add(1);
        self.octet_count = self.octet_count.wrapping_add(payload_bytes as u32);
        self.last_rtp_timestamp = rtp_timestamp;
    }

    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    pub fn octet_count(&self) -> u32 {
        self.octet_count
    }

    /// Build an SR and remember its LSR for later RTT computation.
    pub fn build_sr(&mut self, now_ms: u64) -> SenderReport {
        let (ntp_secs, ntp_frac) = unix_ms_to_ntp(now_ms);
        let sr = SenderReport {
            ssrc: self.ssrc,
            ntp_secs,
            ntp_frac,
            rtp_timestamp: self.last_rtp_timestamp,
            packet_count: self.packet_count,
            octet_count: self.octet_count,
            report_blocks: Vec::new(),
        };
        self.sr_send_times.insert(sr.lsr(), now_ms);
        sr
    }

    /// Build the periodic compound packet: SR followed by SDES.
    pub fn build_compound(&mut self, cname: &str, name: Option<&str>, now_ms: u64) -> Vec<u8> {
        let mut wire = self.build_sr(now_ms).serialize();
        wire.extend_from_slice(&SourceDescription::with_cname(self.ssrc, cname, name).serialize());
        wire
    }

    /// Process an inbound RTCP datagram (typically RR + SDES from the peer).
    pub fn on_rtcp(&mut self, data: &[u8], now_ms: u64) {
        for packet in parse_compound(data) {
            match packet {
                RtcpPacket::ReceiverReport(rr) => self.process_rr(&rr, now_ms),
                RtcpPacket::Bye(bye) => {
                    tracing::info!(ssrcs = ?bye.ssrcs, reason = ?bye.reason, "RTCP BYE received");
                }
                RtcpPacket::SenderReport(_) => {
                    tracing::debug!("SR received on sender context, ignored");
                }
                RtcpPacket::SourceDescription(_) | RtcpPacket::Other { .. } => {}
            }
        }
    }

    fn process_rr(&mut self, rr: &ReceiverReport, now_ms: u64) {
        for block in &rr.report_blocks {
            if block.last_sr == 0 {
                continue;
            }
            if let Some(&sent_ms) = self.sr_send_times.get(&block.last_sr) {
                // DLSR is in units of 1/65536 s.
                let dlsr_ms = (block.delay_since_last_sr as u64 * 1000) >> 16;
                let rtt = now_ms.saturating_sub(sent_ms).saturating_sub(dlsr_ms);
                self.rtt_ms.insert(rr.ssrc, rtt as u32);
                tracing::debug!(ssrc = rr.ssrc, rtt_ms = rtt, "RTT updated from RR");
            }
        }
    }

    /// Most recent RTT for a receiver, in milliseconds.
    pub fn rtt(&self, ssrc: u32) -> Option<u32> {
        self.rtt_ms.get(&ssrc).copied()
    }

    /// Mean RTT across all receivers that have reported.
    pub fn average_rtt(&self) -> Option<u32> {
        if self.rtt_ms.is_empty() {
            return None;
        }
        let total: u64 = self.rtt_ms.values().map(|&v| v as u64).sum();
        Some((total / self.rtt_ms.len() as u64) as u32)
    }

    /// Build the BYE sent at teardown.
    pub fn build_bye(&self, reason: &str) -> Vec<u8> {
        Bye {
            ssrcs: vec![self.ssrc],
            reason: (!reason.is_empty()).then(|| reason.to_string()),
        }
        .serialize()
    }
}

/// Receiver-side RTCP context: loss, jitter, and RR generation.
#[derive(Debug)]
pub struct ReceiverContext {
    /// Our SSRC, used as the RR sender.
    ssrc: u32,
    /// SSRC of the media source being reported on.
    peer_ssrc: u32,
    clock_rate: u32,

    base_seq: u16,
    max_seq: u16,
    cycles: u16,
    seq_initialized: bool,
    received: u64,

    // Interval bookkeeping for fraction-lost
    last_expected: u64,
    last_received: u64,

    jitter: f64,
    last_arrival_ms: Option<u64>,
    last_rtp_timestamp: u32,

    last_sr_lsr: u32,
    last_sr_arrival_ms: Option<u64>,
}

impl ReceiverContext {
    pub fn new(ssrc: u32, peer_ssrc: u32, clock_rate: u32) -> Self {
        Self {
            ssrc,
            peer_ssrc,
            clock_rate,
            base_seq: 0,
            max_seq: 0,
            cycles: 0,
            seq_initialized: false,
            received: 0,
            last_expected: 0,
            last_received: 0,
            jitter: 0.0,
            last_arrival_ms: None,
            last_rtp_timestamp: 0,
            last_sr_lsr: 0,
            last_sr_arrival_ms: None,
        }
    }

    /// SSRC of the media source (learned from the first packet when the
    /// context was created with peer SSRC 0).
    pub fn peer_ssrc(&self) -> u32 {
        self.peer_ssrc
    }

    /// Account for one inbound RTP packet.
    pub fn on_rtp(&mut self, seq: u16, rtp_timestamp: u32, ssrc: u32, arrival_ms: u64) {
        if self.peer_ssrc == 0 {
            self.peer_ssrc = ssrc;
        }
        self.received += 1;

        if !self.seq_initialized {
            self.base_seq = seq;
            self.max_seq = seq;
            self.cycles = 0;
            self.seq_initialized = true;
            tracing::debug!(base_seq = seq, "sequence tracking initialized");
        } else {
            self.update_sequence(seq);
        }

        self.update_jitter(rtp_timestamp, arrival_ms);
    }

    fn update_sequence(&mut self, seq: u16) {
        let udelta = seq.wrapping_sub(self.max_seq);
        if udelta < MAX_DROPOUT {
            if seq < self.max_seq {
                self.cycles = self.cycles.wrapping_add(1);
                tracing::debug!(cycles = self.cycles, "sequence number wrapped");
            }
            self.max_seq = seq;
        } else if udelta <= u16::MAX - MAX_MISORDER {
            tracing::warn!(last = self.max_seq, current = seq, "large sequence jump");
        } else {
            tracing::debug!(seq, max_seq = self.max_seq, "reordered or duplicate packet");
        }
    }

    fn update_jitter(&mut self, rtp_timestamp: u32, arrival_ms: u64) {
        let Some(last_arrival) = self.last_arrival_ms else {
            self.last_arrival_ms = Some(arrival_ms);
            self.last_rtp_timestamp = rtp_timestamp;
            return;
        };

        // D = (arrival delta in clock units) - (timestamp delta); RFC 3550 A.8.
        let arrival_delta =
            (arrival_ms as i64 - last_arrival as i64) as f64 * self.clock_rate as f64 / 1000.0;
        let timestamp_delta = rtp_timestamp.wrapping_sub(self.last_rtp_timestamp) as i32 as f64;
        let d = (arrival_delta - timestamp_delta).abs();
        self.jitter += (d - self.jitter) / 16.0;

        self.last_arrival_ms = Some(arrival_ms);
        self.last_rtp_timestamp = rtp_timestamp;
    }

    /// Process an inbound RTCP datagram (typically SR + SDES from the sender).
    pub fn on_rtcp(&mut self, data: &[u8], now_ms: u64) {
        for packet in parse_compound(data) {
            match packet {
                RtcpPacket::SenderReport(sr) => {
                    self.last_sr_lsr = lsr_from_ntp(sr.ntp_secs, sr.ntp_frac);
                    self.last_sr_arrival_ms = Some(now_ms);
                    tracing::debug!(ssrc = sr.ssrc, lsr = self.last_sr_lsr, "SR processed");
                }
                RtcpPacket::Bye(bye) => {
                    tracing::info!(ssrcs = ?bye.ssrcs, reason = ?bye.reason, "RTCP BYE received");
                }
                RtcpPacket::ReceiverReport(_) => {
                    tracing::debug!("RR received on receiver context, ignored");
                }
                RtcpPacket::SourceDescription(_) | RtcpPacket::Other { .. } => {}
            }
        }
    }

    /// `(cycles << 16) | max_seq`.
    pub fn extended_highest_seq(&self) -> u32 {
        ((self.cycles as u32) << 16) | self.max_seq as u32
    }

    /// Packets expected so far: `extended_highest - base + 1`.
    pub fn expected(&self) -> u64 {
        if !self.seq_initialized {
            return 0;
        }
        (self.extended_highest_seq() as u64).saturating_sub(self.base_seq as u64) + 1
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Cumulative packets lost, floored at zero.
    pub fn lost(&self) -> u64 {
        self.expected().saturating_sub(self.received)
    }

    /// Current jitter estimate in timestamp units.
    pub fn jitter(&self) -> u32 {
        self.jitter as u32
    }

    /// Build an RR with one report block and advance the interval counters.
    pub fn build_rr(&mut self, now_ms: u64) -> ReceiverReport {
        let expected = self.expected();
        let lost = self.lost();

        let expected_interval = expected - self.last_expected;
        let received_interval = self.received - self.last_received;
        let lost_interval = expected_interval.saturating_sub(received_interval);
        let fraction_lost = if expected_interval > 0 {
            ((lost_interval * 256) / expected_interval) as u8
        } else {
            0
        };
        self.last_expected = expected;
        self.last_received = self.received;

        let delay_since_last_sr = self
            .last_sr_arrival_ms
            .map(|sr_ms| ((now_ms.saturating_sub(sr_ms) * 65536) / 1000) as u32)
            .unwrap_or(0);

        ReceiverReport {
            ssrc: self.ssrc,
            report_blocks: vec![ReportBlock {
                ssrc: self.peer_ssrc,
                fraction_lost,
                cumulative_lost: lost.min(0xFF_FFFF) as u32,
                extended_highest_seq: self.extended_highest_seq(),
                jitter: self.jitter(),
                last_sr: self.last_sr_lsr,
                delay_since_last_sr,
            }],
        }
    }

    /// Build the periodic compound packet: RR followed by SDES.
    pub fn build_compound(&mut self, cname: &str, name: Option<&str>, now_ms: u64) -> Vec<u8> {
        let mut wire = self.build_rr(now_ms).serialize();
        wire.extend_from_slice(&SourceDescription::with_cname(self.ssrc, cname, name).serialize());
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_counts_accumulate() {
        let mut ctx = SenderContext::new(0x10);
        ctx.on_rtp_sent(1000, 1200);
        ctx.on_rtp_sent(1000, 800);
        assert_eq!(ctx.packet_count(), 2);
        assert_eq!(ctx.octet_count(), 2000);

        let sr = ctx.build_sr(1_700_000_000_000);
        assert_eq!(sr.packet_count, 2);
        assert_eq!(sr.octet_count, 2000);
        assert_eq!(sr.rtp_timestamp, 1000);
    }

    #[test]
    fn rtt_from_rr_dlsr() {
        let mut sender = SenderContext::new(0x10);
        let t0 = 1_000_000u64;
        let sr = sender.build_sr(t0);

        // Receiver echoes LSR 700 ms later, having held the SR for 200 ms.
        let rr = ReceiverReport {
            ssrc: 0x20,
            report_blocks: vec![ReportBlock {
                ssrc: 0x10,
                last_sr: sr.lsr(),
                delay_since_last_sr: (200 * 65536) / 1000,
                ..Default::default()
            }],
        };
        sender.on_rtcp(&rr.serialize(), t0 + 700);
        // RTT = 700 - 200 = 500 ms (within DLSR quantization)
        let rtt = sender.rtt(0x20).expect("RTT recorded");
        assert!((499..=501).contains(&rtt), "rtt = {rtt}");
    }

    #[test]
    fn unknown_lsr_ignored() {
        let mut sender = SenderContext::new(0x10);
        let rr = ReceiverReport {
            ssrc: 0x20,
            report_blocks: vec![ReportBlock {
                ssrc: 0x10,
                last_sr: 0xDEAD_BEEF,
                delay_since_last_sr: 100,
                ..Default::default()
            }],
        };
        sender.on_rtcp(&rr.serialize(), 5000);
        assert!(sender.rtt(0x20).is_none());
    }

    #[test]
    fn receiver_loss_accounting() {
        // Sequences 100..1100 except 150, 200, 201.
        let mut ctx = ReceiverContext::new(1, 2, 90000);
        for seq in 100u16..1100 {
            if matches!(seq, 150 | 200 | 201) {
                continue;
            }
            ctx.on_rtp(seq, seq as u32 * 90, 2, seq as u64);
        }
        assert_eq!(ctx.expected(), 1000);
        assert_eq!(ctx.received(), 997);
        assert_eq!(ctx.lost(), 3);
        assert_eq!(ctx.extended_highest_seq(), 1099);

        let rr = ctx.build_rr(10_000);
        let block = &rr.report_blocks[0];
        assert_eq!(block.cumulative_lost, 3);
        assert_eq!(block.extended_highest_seq, 1099);
        assert_eq!(block.fraction_lost, (3 * 256 / 1000) as u8);
    }

    #[test]
    fn sequence_wrap_increments_cycles() {
        let mut ctx = ReceiverContext::new(1, 2, 90000);
        ctx.on_rtp(0xFFFE, 0, 2, 0);
        ctx.on_rtp(0xFFFF, 90, 2, 1);
        ctx.on_rtp(0x0000, 180, 2, 2);
        assert_eq!(ctx.extended_highest_seq(), 0x0001_0000);
        assert_eq!(ctx.expected(), 3);
        assert_eq!(ctx.lost(), 0);
    }

    #[test]
    fn large_jump_does_not_reset() {
        let mut ctx = ReceiverContext::new(1, 2, 90000);
        ctx.on_rtp(10, 0, 2, 0);
        ctx.on_rtp(20000, 90, 2, 1);
        // Jump beyond MAX_DROPOUT is logged, max_seq unchanged
        assert_eq!(ctx.extended_highest_seq(), 10);
    }

    #[test]
    fn jitter_zero_for_ideal_arrival() {
        // Arrivals exactly matching the media clock produce no jitter.
        let mut ctx = ReceiverContext::new(1, 2, 90000);
        for i in 0u32..50 {
            ctx.on_rtp(i as u16, i * 90, 2, i as u64);
        }
        assert_eq!(ctx.jitter(), 0);
    }

    #[test]
    fn jitter_grows_with_variable_arrival() {
        let mut ctx = ReceiverContext::new(1, 2, 90000);
        // 33 ms of media per frame, arrivals alternating early/late
        for i in 0u32..50 {
            let arrival = i as u64 * 33 + if i % 2 == 0 { 0 } else { 15 };
            ctx.on_rtp(i as u16, i * 3000, 2, arrival);
        }
        assert!(ctx.jitter() > 0);
    }

    #[test]
    fn fraction_lost_resets_per_interval() {
        let mut ctx = ReceiverContext::new(1, 2, 90000);
        for seq in 0u16..100 {
            if seq == 50 {
                continue;
            }
            ctx.on_rtp(seq, 0, 2, 0);
        }
        let rr1 = ctx.build_rr(0);
        assert_eq!(rr1.report_blocks[0].fraction_lost, (256 / 100) as u8);

        // Next interval: no losses
        for seq in 100u16..200 {
            ctx.on_rtp(seq, 0, 2, 0);
        }
        let rr2 = ctx.build_rr(1000);
        assert_eq!(rr2.report_blocks[0].fraction_lost, 0);
        assert_eq!(rr2.report_blocks[0].cumulative_lost, 1);
    }

    #[test]
    fn rr_echoes_sr_lsr_and_dlsr() {
        let mut ctx = ReceiverContext::new(1, 2, 90000);
        ctx.on_rtp(5, 0, 2, 0);

        let mut sender = SenderContext::new(2);
        let sr_wire = sender.build_compound("s@h", None, 1_000_000);
        ctx.on_rtcp(&sr_wire, 2000);

        let rr = ctx.build_rr(2500);
        let block = &rr.report_blocks[0];
        assert_ne!(block.last_sr, 0);
        // 500 ms in 1/65536 s units
        assert_eq!(block.delay_since_last_sr, (500 * 65536) / 1000);
    }

    #[test]
    fn peer_ssrc_learned_from_first_packet() {
        let mut ctx = ReceiverContext::new(1, 0, 90000);
        ctx.on_rtp(5, 0, 0xCAFE, 0);
        assert_eq!(ctx.peer_ssrc(), 0xCAFE);
        let rr = ctx.build_rr(0);
        assert_eq!(rr.report_blocks[0].ssrc, 0xCAFE);
    }

    #[test]
    fn bye_serialization_from_sender() {
        let sender = SenderContext::new(3);
        let wire = sender.build_bye("teardown");
        let packets = parse_compound(&wire);
        assert!(matches!(&packets[0], RtcpPacket::Bye(b) if b.ssrcs == vec![3]));
    }
}
