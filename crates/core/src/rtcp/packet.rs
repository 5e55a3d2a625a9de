//! RTCP packet codec (RFC 3550 §6).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|   RC    |      PT       |            length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The length field counts 32-bit words minus one. Compound packets always
//! begin with SR or RR, followed by SDES; [`parse_compound`] walks the
//! length fields and skips packet types this crate does not model (APP,
//! FB, XR) best-effort.

const RTCP_VERSION: u8 = 2;

/// RTCP packet type codes (RFC 3550 §12.1, RFC 4585 §6.1).
pub const PT_SR: u8 = 200;
pub const PT_RR: u8 = 201;
pub const PT_SDES: u8 = 202;
pub const PT_BYE: u8 = 203;
pub const PT_APP: u8 = 204;
pub const PT_RTPFB: u8 = 205;
pub const PT_PSFB: u8 = 206;
pub const PT_XR: u8 = 207;

/// SDES item types (RFC 3550 §6.5).
pub const SDES_END: u8 = 0;
pub const SDES_CNAME: u8 = 1;
pub const SDES_NAME: u8 = 2;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
pub const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// Convert Unix milliseconds to a 64-bit NTP timestamp (seconds, fraction).
pub fn unix_ms_to_ntp(unix_ms: u64) -> (u32, u32) {
    let secs = unix_ms / 1000 + NTP_UNIX_OFFSET_SECS;
    let frac = ((unix_ms % 1000) << 32) / 1000;
    (secs as u32, frac as u32)
}

/// LSR: the middle 32 bits of a 64-bit NTP timestamp (RFC 3550 §6.4.1).
pub fn lsr_from_ntp(ntp_secs: u32, ntp_frac: u32) -> u32 {
    ((ntp_secs & 0xFFFF) << 16) | (ntp_frac >> 16)
}

/// One reception report block, carried in SR and RR packets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportBlock {
    /// SSRC of the source this block reports on.
    pub ssrc: u32,
    /// Fraction of packets lost in the last interval (fixed point /256).
    pub fraction_lost: u8,
    /// Cumulative packets lost, saturating 24-bit.
    pub cumulative_lost: u32,
    /// `(cycles << 16) | max_seq`.
    pub extended_highest_seq: u32,
    /// Interarrival jitter in timestamp units.
    pub jitter: u32,
    /// Last SR timestamp (middle 32 bits of the SR's NTP timestamp).
    pub last_sr: u32,
    /// Delay since last SR in units of 1/65536 s.
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    const SIZE: usize = 24;

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        let lost = self.cumulative_lost.min(0xFF_FFFF);
        buf.push(self.fraction_lost);
        buf.extend_from_slice(&lost.to_be_bytes()[1..]);
        buf.extend_from_slice(&self.extended_highest_seq.to_be_bytes());
        buf.extend_from_slice(&self.jitter.to_be_bytes());
        buf.extend_from_slice(&self.last_sr.to_be_bytes());
        buf.extend_from_slice(&self.delay_since_last_sr.to_be_bytes());
    }

    fn read(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            ssrc: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            fraction_lost: data[4],
            cumulative_lost: u32::from_be_bytes([0, data[5], data[6], data[7]]),
            extended_highest_seq: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            jitter: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            last_sr: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
            delay_since_last_sr: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
        })
    }
}

/// Sender report (PT 200).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_secs: u32,
    pub ntp_frac: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub report_blocks: Vec<ReportBlock>,
}

/// Receiver report (PT 201).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub report_blocks: Vec<ReportBlock>,
}

/// Source description (PT 202); one chunk per SSRC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDescription {
    pub chunks: Vec<SdesChunk>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdesChunk {
    pub ssrc: u32,
    /// (item type, text) pairs; CNAME first by convention.
    pub items: Vec<(u8, String)>,
}

/// Goodbye (PT 203).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bye {
    pub ssrcs: Vec<u32>,
    pub reason: Option<String>,
}

/// A parsed RTCP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Bye(Bye),
    /// APP / FB / XR and anything else: carried through unmodelled.
    Other { packet_type: u8 },
}

fn write_header(buf: &mut Vec<u8>, count: u8, packet_type: u8, body_len: usize) {
    buf.push((RTCP_VERSION << 6) | (count & 0x1F));
    buf.push(packet_type);
    let words = (4 + body_len) / 4;
    buf.extend_from_slice(&((words - 1) as u16).to_be_bytes());
}

impl SenderReport {
    pub fn serialize(&self) -> Vec<u8> {
        let body_len = 24 + self.report_blocks.len() * ReportBlock::SIZE;
        let mut buf = Vec::with_capacity(4 + body_len);
        write_header(&mut buf, self.report_blocks.len() as u8, PT_SR, body_len);
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.ntp_secs.to_be_bytes());
        buf.extend_from_slice(&self.ntp_frac.to_be_bytes());
        buf.extend_from_slice(&self.rtp_timestamp.to_be_bytes());
        buf.extend_from_slice(&self.packet_count.to_be_bytes());
        buf.extend_from_slice(&self.octet_count.to_be_bytes());
        for block in &self.report_blocks {
            block.write(&mut buf);
        }
        buf
    }

    fn parse(count: u8, body: &[u8]) -> Option<Self> {
        if body.len() < 24 {
            return None;
        }
        let mut sr = Self {
            ssrc: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            ntp_secs: u32::from_be_bytes([body[4], body[5], body[6], body[7]]),
            ntp_frac: u32::from_be_bytes([body[8], body[9], body[10], body[11]]),
            rtp_timestamp: u32::from_be_bytes([body[12], body[13], body[14], body[15]]),
            packet_count: u32::from_be_bytes([body[16], body[17], body[18], body[19]]),
            octet_count: u32::from_be_bytes([body[20], body[21], body[22], body[23]]),
            report_blocks: Vec::new(),
        };
        let mut offset = 24;
        for _ in 0..count {
            sr.report_blocks.push(ReportBlock::read(body.get(offset..)?)?);
            offset += ReportBlock::SIZE;
        }
        Some(sr)
    }

    /// The LSR value receivers will echo for this report.
    pub fn lsr(&self) -> u32 {
        lsr_from_ntp(self.ntp_secs, self.ntp_frac)
    }
}

impl ReceiverReport {
    pub fn serialize(&self) -> Vec<u8> {
        let body_len = 4 + self.report_blocks.len() * ReportBlock::SIZE;
        let mut buf = Vec::with_capacity(4 + body_len);
        write_header(&mut buf, self.report_blocks.len() as u8, PT_RR, body_len);
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        for block in &self.report_blocks {
            block.write(&mut buf);
        }
        buf
    }

    fn parse(count: u8, body: &[u8]) -> Option<Self> {
        if body.len() < 4 {
            return None;
        }
        let mut rr = Self {
            ssrc: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            report_blocks: Vec::new(),
        };
        let mut offset = 4;
        for _ in 0..count {
            rr.report_blocks.push(ReportBlock::read(body.get(offset..)?)?);
            offset += ReportBlock::SIZE;
        }
        Some(rr)
    }
}

impl SourceDescription {
    /// A single-chunk SDES with CNAME and optional NAME, the shape both
    /// RTCP contexts emit.
    pub fn with_cname(ssrc: u32, cname: &str, name: Option<&str>) -> Self {
        let mut items = vec![(SDES_CNAME, cname.to_string())];
        if let Some(name) = name {
            items.push((SDES_NAME, name.to_string()));
        }
        Self {
            chunks: vec![SdesChunk { ssrc, items }],
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for chunk in &self.chunks {
            body.extend_from_slice(&chunk.ssrc.to_be_bytes());
            for (item_type, text) in &chunk.items {
                body.push(*item_type);
                body.push(text.len().min(255) as u8);
                body.extend_from_slice(&text.as_bytes()[..text.len().min(255)]);
            }
            body.push(SDES_END);
            while body.len() % 4 != 0 {
                body.push(0);
            }
        }
        let mut buf = Vec::with_capacity(4 + body.len());
        write_header(&mut buf, self.chunks.len() as u8, PT_SDES, body.len());
        buf.extend_from_slice(&body);
        buf
    }

    fn parse(count: u8, body: &[u8]) -> Option<Self> {
        let mut chunks = Vec::new();
        let mut offset = 0usize;
        for _ in 0..count {
            if body.len() < offset + 4 {
                return None;
            }
            let ssrc = u32::from_be_bytes([
                body[offset],
                body[offset + 1],
                body[offset + 2],
                body[offset + 3],
            ]);
            offset += 4;
            let mut items = Vec::new();
            loop {
                let item_type = *body.get(offset)?;
                offset += 1;
                if item_type == SDES_END {
                    // Skip chunk padding to the next 32-bit boundary.
                    while offset % 4 != 0 {
                        offset += 1;
                    }
                    break;
                }
                let len = *body.get(offset)? as usize;
                offset += 1;
                let text = body.get(offset..offset + len)?;
                items.push((item_type, String::from_utf8_lossy(text).into_owned()));
                offset += len;
            }
            chunks.push(SdesChunk { ssrc, items });
        }
        Some(Self { chunks })
    }

    /// The CNAME of the first chunk, if present.
    pub fn cname(&self) -> Option<&str> {
        self.chunks.first().and_then(|c| {
            c.items
                .iter()
                .find(|(t, _)| *t == SDES_CNAME)
                .map(|(_, text)| text.as_str())
        })
    }
}

impl Bye {
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for ssrc in &self.ssrcs {
            body.extend_from_slice(&ssrc.to_be_bytes());
        }
        if let Some(reason) = &self.reason
            && !reason.is_empty()
        {
            body.push(reason.len().min(255) as u8);
            body.extend_from_slice(&reason.as_bytes()[..reason.len().min(255)]);
            while body.len() % 4 != 0 {
                body.push(0);
            }
        }
        let mut buf = Vec::with_capacity(4 + body.len());
        write_header(&mut buf, self.ssrcs.len() as u8, PT_BYE, body.len());
        buf.extend_from_slice(&body);
        buf
    }

    fn parse(count: u8, body: &[u8]) -> Option<Self> {
        let ssrc_len = count as usize * 4;
        if body.len() < ssrc_len {
            return None;
        }
        let ssrcs = body[..ssrc_len]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let reason = if body.len() > ssrc_len {
            let len = body[ssrc_len] as usize;
            body.get(ssrc_len + 1..ssrc_len + 1 + len)
                .map(|r| String::from_utf8_lossy(r).into_owned())
        } else {
            None
        };
        Some(Self { ssrcs, reason })
    }
}

/// Parse one RTCP packet; returns the packet and bytes consumed.
pub fn parse_packet(data: &[u8]) -> Option<(RtcpPacket, usize)> {
    if data.len() < 4 {
        return None;
    }
    if data[0] >> 6 != RTCP_VERSION {
        return None;
    }
    let count = data[0] & 0x1F;
    let packet_type = data[1];
    let total = (u16::from_be_bytes([data[2], data[3]]) as usize + 1) * 4;
    if data.len() < total {
        return None;
    }
    let body = &data[4..total];

    let packet = match packet_type {
        PT_SR => RtcpPacket::SenderReport(SenderReport::parse(count, body)?),
        PT_RR => RtcpPacket::ReceiverReport(ReceiverReport::parse(count, body)?),
        PT_SDES => RtcpPacket::SourceDescription(SourceDescription::parse(count, body)?),
        PT_BYE => RtcpPacket::Bye(Bye::parse(count, body)?),
        other => RtcpPacket::Other { packet_type: other },
    };
    Some((packet, total))
}

/// Parse a compound RTCP datagram into its constituent packets.
///
/// Unknown packet types are skipped via their length field; a malformed
/// header stops the walk and the remainder is dropped.
pub fn parse_compound(data: &[u8]) -> Vec<RtcpPacket> {
    let mut packets = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= data.len() {
        match parse_packet(&data[offset..]) {
            Some((packet, consumed)) => {
                packets.push(packet);
                offset += consumed;
            }
            None => {
                tracing::debug!(offset, "malformed RTCP packet, dropping remainder");
                break;
            }
        }
    }
    packets
}
