//! Media codecs, RTP packetization and depacketization.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded video frame (access unit) travels as one or more RTP packets.
//! Every packet carries a 12-byte fixed header ([`rtp::RtpHeader`]):
//!
//! - **Sequence number** (16-bit, wrapping): loss and reorder detection.
//! - **Timestamp** (32-bit, wrapping): media clock, 90 kHz for video.
//! - **SSRC** (32-bit): randomly chosen to identify the sender.
//! - **Marker bit**: set on the last packet of an access unit.
//!
//! Outbound, a [`Packetizer`] turns an Annex B access unit into packets.
//! Inbound, a [`Depacketizer`] turns packets back into Annex B access units.
//!
//! | Codec | Module | RFC | Packetize | Depacketize |
//! |-------|--------|-----|-----------|-------------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | yes | yes |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) | no | yes |
//! | audio | [`passthrough`] | RFC 3551 | no | yes (one packet = one unit) |

pub mod assembler;
pub mod h264;
pub mod h265;
pub mod passthrough;
pub mod rtp;

use std::fmt;

use crate::error::DepacketizeError;
use crate::protocol::sdp::{Codec, TrackDescriptor};
use rtp::RtpPacket;

/// Annex B start code prepended to every NAL unit the engine emits.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Which elementary stream a packet or frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Codec-specific RTP packetizer.
///
/// Each supported codec implements this trait, providing:
/// - **Packetization**: splitting encoded data into RTP-sized packets
/// - **SDP attributes**: codec parameters for the DESCRIBE response
/// - **RTP metadata**: payload type, clock rate, sequence/timestamp state
///
/// The generic RTP header is handled by [`rtp::RtpSequencer`]. Packetizers
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Packetize raw encoded data (e.g. Annex B bitstream) into RTP packets.
    ///
    /// Each returned `Vec<u8>` is a complete RTP packet: 12-byte header
    /// (RFC 3550 §5.1) followed by the codec-specific payload.
    ///
    /// `timestamp_increment` advances the RTP timestamp after this frame,
    /// typically `clock_rate / fps` (e.g. 3000 for 30 fps at 90 kHz).
    fn packetize(&mut self, encoded_data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>>;

    /// Codec name for the SDP `a=rtpmap` attribute (e.g. `"H264"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551). Dynamic types use 96–127.
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines for this codec, `a=` prefix included.
    fn sdp_attributes(&self) -> Vec<String>;

    /// Current RTP sequence number (for the `RTP-Info` header in PLAY responses).
    fn next_sequence(&self) -> u16;

    /// Current RTP timestamp as u32 (for the `RTP-Info` header in PLAY responses).
    fn next_rtp_timestamp(&self) -> u32;
}

/// A complete, decodable unit recovered from one or more RTP packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// Annex B bytes for video, raw payload bytes for audio.
    pub data: Vec<u8>,
    /// RTP timestamp shared by every packet of the unit.
    pub rtp_timestamp: u32,
}

/// Codec-specific RTP depacketizer.
///
/// Fed one packet at a time in arrival order. Returns `Ok(Some(unit))` when a
/// packet completes an access unit and `Ok(None)` when more packets are
/// needed. An `Err` means a unit was discarded: the stream continues with
/// the next packet.
pub trait Depacketizer: Send {
    fn push(&mut self, packet: &RtpPacket) -> Result<Option<AccessUnit>, DepacketizeError>;

    /// Drop any partially assembled unit and forget sequence history.
    fn reset(&mut self);
}

/// Pick the depacketizer for a negotiated track.
pub fn depacketizer_for(track: &TrackDescriptor) -> Box<dyn Depacketizer> {
    match (&track.codec, track.media_type) {
        (Codec::H264, _) => Box::new(h264::H264Depacketizer::new()),
        (Codec::H265, _) => Box::new(h265::H265Depacketizer::new()),
        _ => Box::new(passthrough::PassthroughDepacketizer::new()),
    }
}

/// Concatenate NAL units into an Annex B buffer, skipping empty ones.
pub fn annex_b<'a>(nals: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals.into_iter().filter(|n| !n.is_empty()) {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(nal);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annex_b_prefixes_each_nal() {
        let out = annex_b([&[0x67u8, 1][..], &[][..], &[0x68, 2][..]]);
        assert_eq!(out, vec![0, 0, 0, 1, 0x67, 1, 0, 0, 0, 1, 0x68, 2]);
    }
}
