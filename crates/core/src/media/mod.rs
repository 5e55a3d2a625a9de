//! Media data model and RTP payload formats.
//!
//! This module provides the [`Packetizer`] / [`Depacketizer`] traits and the
//! codec-specific implementations that convert access units to RTP packets
//! and back.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each access unit (one encoded video frame, one audio AU, or a run of TS
//! packets) maps to one or more RTP packets. Every packet carries the fixed
//! header modelled by [`rtp::RtpPacket`]:
//!
//! - **Sequence number** (16-bit, wrapping) — for reordering and loss detection.
//! - **Timestamp** (32-bit) — media clock, 90 kHz for video, sample rate for audio.
//! - **SSRC** (32-bit) — randomly chosen to identify the sender.
//! - **Marker bit** — set on the last packet of an access unit.
//!
//! ## Supported payload formats
//!
//! | Codec | Module | RFC | Fragmentation |
//! |-------|--------|-----|---------------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | Single NAL / FU-A |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) | Single NAL / FU |
//! | AAC | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) | AAC-hbr AU headers |
//! | MPEG-2 TS | [`ts`] | [RFC 2250](https://tools.ietf.org/html/rfc2250) | 188-byte packet runs |

pub mod aac;
pub mod bitstream;
pub mod h264;
pub mod h265;
pub mod rtp;
pub mod ts;

use crate::error::{Result, RtspError};
use rtp::RtpPacket;

/// Default MTU used by packetizers when the caller does not override it.
pub const DEFAULT_MTU: usize = 1400;

/// Codec tag carried by every [`MediaFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    H265,
    Aac,
    /// MPEG-2 transport stream (static payload type 33, RFC 3551).
    Mp2t,
}

impl Codec {
    /// Codec name as it appears in SDP `a=rtpmap` lines.
    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "H264",
            Codec::H265 => "H265",
            Codec::Aac => "mpeg4-generic",
            Codec::Mp2t => "MP2T",
        }
    }

    /// Conventional RTP payload type (RFC 3551 static or common dynamic).
    pub fn default_payload_type(&self) -> u8 {
        match self {
            Codec::H264 => 96,
            Codec::Aac => 97,
            Codec::H265 => 98,
            Codec::Mp2t => 33,
        }
    }

    /// Media kind for the SDP `m=` line.
    pub fn media_kind(&self) -> &'static str {
        match self {
            Codec::H264 | Codec::H265 | Codec::Mp2t => "video",
            Codec::Aac => "audio",
        }
    }

    /// Resolve a codec from an SDP rtpmap encoding name.
    ///
    /// Payload type 33 with no rtpmap defaults to MPEG-2 TS per RFC 3551;
    /// that fallback lives in the SDP parser, not here.
    pub fn from_encoding(name: &str) -> Option<Self> {
        match name {
            "H264" => Some(Codec::H264),
            "H265" | "HEVC" => Some(Codec::H265),
            "mpeg4-generic" | "MP4A-LATM" => Some(Codec::Aac),
            "MP2T" => Some(Codec::Mp2t),
            _ => None,
        }
    }
}

/// Codec-specific frame parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameParams {
    Video {
        key_frame: bool,
        width: u32,
        height: u32,
        frame_rate: u32,
    },
    Audio {
        sample_rate: u32,
        channels: u32,
    },
    /// No codec parameters (e.g. TS pass-through).
    None,
}

/// An access unit awaiting transmission or just reassembled.
///
/// For H.264/H.265 the payload is Annex B with 4-byte start codes before
/// each NAL unit; for AAC a raw AU; for TS an integral number of 188-byte
/// packets. The timestamp is in codec clock units (90 kHz for video).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub data: Vec<u8>,
    pub timestamp: u32,
    pub codec: Codec,
    pub params: FrameParams,
}

impl MediaFrame {
    pub fn new(codec: Codec, data: Vec<u8>, timestamp: u32) -> Self {
        Self {
            data,
            timestamp,
            codec,
            params: FrameParams::None,
        }
    }
}

/// What a server advertises for one stream path, and what a client learns
/// from DESCRIBE.
///
/// Video streams carry resolution/frame-rate and H.264/H.265 parameter
/// sets (used for the SDP `sprop-*` attributes); audio streams carry
/// sample rate and channel count. A container stream (`kind == "multi"`)
/// lists its per-media sub-tracks instead.
#[derive(Debug, Clone, Default)]
pub struct MediaStreamInfo {
    /// Stream path (`/live`), or track control id for sub-tracks.
    pub path: String,
    /// `"video"`, `"audio"`, or `"multi"` for container streams.
    pub kind: String,
    pub codec: Option<Codec>,
    pub payload_type: u8,
    pub clock_rate: u32,

    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,

    pub sample_rate: u32,
    pub channels: u32,

    /// H.264/H.265 sequence parameter set, no start code.
    pub sps: Option<Vec<u8>>,
    /// H.264/H.265 picture parameter set, no start code.
    pub pps: Option<Vec<u8>>,
    /// H.265 video parameter set, no start code.
    pub vps: Option<Vec<u8>>,

    /// Sub-tracks for container streams (e.g. MKV video + audio).
    pub sub_tracks: Vec<MediaStreamInfo>,
}

impl MediaStreamInfo {
    pub fn h264(path: &str, sps: Vec<u8>, pps: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            kind: "video".to_string(),
            codec: Some(Codec::H264),
            payload_type: Codec::H264.default_payload_type(),
            clock_rate: 90000,
            sps: Some(sps),
            pps: Some(pps),
            ..Default::default()
        }
    }

    pub fn h265(path: &str, vps: Vec<u8>, sps: Vec<u8>, pps: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            kind: "video".to_string(),
            codec: Some(Codec::H265),
            payload_type: Codec::H265.default_payload_type(),
            clock_rate: 90000,
            vps: Some(vps),
            sps: Some(sps),
            pps: Some(pps),
            ..Default::default()
        }
    }

    pub fn aac(path: &str, sample_rate: u32, channels: u32) -> Self {
        Self {
            path: path.to_string(),
            kind: "audio".to_string(),
            codec: Some(Codec::Aac),
            payload_type: Codec::Aac.default_payload_type(),
            clock_rate: sample_rate,
            sample_rate,
            channels,
            ..Default::default()
        }
    }

    pub fn mp2t(path: &str) -> Self {
        Self {
            path: path.to_string(),
            kind: "video".to_string(),
            codec: Some(Codec::Mp2t),
            payload_type: Codec::Mp2t.default_payload_type(),
            clock_rate: 90000,
            ..Default::default()
        }
    }

    /// A container stream whose tracks are set up individually.
    pub fn multi(path: &str, sub_tracks: Vec<MediaStreamInfo>) -> Self {
        Self {
            path: path.to_string(),
            kind: "multi".to_string(),
            sub_tracks,
            ..Default::default()
        }
    }

    /// The per-media tracks: the sub-track list for containers, otherwise
    /// the stream itself.
    pub fn tracks(&self) -> Vec<&MediaStreamInfo> {
        if self.sub_tracks.is_empty() {
            vec![self]
        } else {
            self.sub_tracks.iter().collect()
        }
    }
}

/// Codec-specific RTP packetizer.
///
/// A packetizer consumes a whole frame and synchronously yields the RTP
/// packets covering it. It is stateful only through its sequence number
/// (strictly incremented mod 2^16 per emitted packet, random initial value).
pub trait Packetizer: Send {
    /// Split one access unit into RTP packets.
    ///
    /// All packets share the frame's timestamp; the marker bit is set on
    /// the packet carrying the last byte of the access unit.
    fn packetize(&mut self, frame: &MediaFrame) -> Vec<RtpPacket>;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// Synchronization source identifier of this flow.
    fn ssrc(&self) -> u32;

    /// Sequence number the next emitted packet will carry
    /// (for the `RTP-Info` header in PLAY responses).
    fn next_sequence(&self) -> u16;

    /// Timestamp of the most recent frame, or the initial value before the
    /// first frame (for the `RTP-Info` header in PLAY responses).
    fn last_timestamp(&self) -> u32;
}

/// Codec-specific RTP depacketizer.
///
/// A depacketizer consumes packets in arrival order and yields a completed
/// frame when the access unit boundary is reached (marker bit or timestamp
/// change). Reassembly errors are absorbed: a sequence gap inside a
/// fragmentation unit discards the partial frame and the stream continues.
pub trait Depacketizer: Send {
    /// Feed one RTP packet; returns a reassembled frame when complete.
    fn push(&mut self, packet: &RtpPacket) -> Option<MediaFrame>;
}

/// Construct the packetizer for a codec.
///
/// `clock_rate` matters only for AAC, whose RTP clock is the sample rate;
/// the video codecs are fixed at 90 kHz.
pub fn packetizer_for(
    codec: Codec,
    payload_type: u8,
    ssrc: u32,
    clock_rate: u32,
) -> Result<Box<dyn Packetizer>> {
    match codec {
        Codec::H264 => Ok(Box::new(h264::H264Packetizer::new(payload_type, ssrc))),
        Codec::H265 => Ok(Box::new(h265::H265Packetizer::new(payload_type, ssrc))),
        Codec::Aac => Ok(Box::new(
            aac::AacPacketizer::new(payload_type, ssrc).with_clock_rate(clock_rate),
        )),
        Codec::Mp2t => Ok(Box::new(ts::TsPacketizer::new(payload_type, ssrc))),
    }
}

/// Construct the depacketizer for a codec.
pub fn depacketizer_for(codec: Codec) -> Result<Box<dyn Depacketizer>> {
    match codec {
        Codec::H264 => Ok(Box::new(h264::H264Depacketizer::new())),
        Codec::H265 => Ok(Box::new(h265::H265Depacketizer::new())),
        Codec::Aac => Ok(Box::new(aac::AacDepacketizer::new())),
        Codec::Mp2t => Ok(Box::new(ts::TsDepacketizer::new())),
    }
}

/// Resolve a codec from its SDP name, erroring on unknown codecs.
pub fn codec_from_name(name: &str) -> Result<Codec> {
    Codec::from_encoding(name).ok_or_else(|| RtspError::UnsupportedCodec(name.to_string()))
}
