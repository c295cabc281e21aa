//! H.265 (HEVC) RTP depacketizer, RFC 7798.
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header** (vs 1-byte in H.264).
//!   The NAL type is in bits 1..6 of the first byte.
//!
//! - **Aggregation packets** (type 48) carry the 2-byte payload header
//!   followed by `[u16 size][NAL]` entries.
//!
//! - **Fragmentation units** (type 49) carry the 2-byte payload header plus
//!   a 1-byte FU header `[S|E|FuType(6)]`. The original NAL header is the
//!   payload header with its type field replaced by `FuType`.
//!
//! PACI packets (type 50) and DONL fields (`sprop-max-don-diff > 0`) are not
//! supported.

use super::assembler::UnitAssembler;
use super::rtp::RtpPacket;
use super::{AccessUnit, Depacketizer};
use crate::error::DepacketizeError;

pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_AP: u8 = 48;
pub const NAL_FU: u8 = 49;

/// NAL unit type from the first byte of an H.265 NAL header.
pub fn nal_type(first_byte: u8) -> u8 {
    (first_byte >> 1) & 0x3f
}

fn is_parameter_set(nal: &[u8]) -> bool {
    nal.first()
        .is_some_and(|&b| matches!(nal_type(b), NAL_VPS | NAL_SPS | NAL_PPS))
}

#[derive(Debug)]
pub struct H265Depacketizer {
    unit: UnitAssembler,
}

impl Default for H265Depacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl H265Depacketizer {
    pub fn new() -> Self {
        Self {
            unit: UnitAssembler::with_parameter_sets(is_parameter_set),
        }
    }

    fn push_aggregation(&mut self, payload: &[u8]) {
        let mut rest = &payload[2..];
        while !rest.is_empty() {
            if rest.len() < 2 {
                self.unit
                    .corrupt(DepacketizeError::Malformed("truncated AP size"));
                return;
            }
            let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            if size < 2 || rest.len() < 2 + size {
                self.unit
                    .corrupt(DepacketizeError::Malformed("truncated AP NAL unit"));
                return;
            }
            self.unit.push_nal(&rest[2..2 + size]);
            rest = &rest[2 + size..];
        }
    }

    fn push_fragment(&mut self, payload: &[u8]) {
        if payload.len() < 4 {
            self.unit
                .corrupt(DepacketizeError::Malformed("truncated FU packet"));
            return;
        }
        let fu_header = payload[2];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let data = &payload[3..];

        if start {
            let nal_header = [
                (payload[0] & 0x81) | ((fu_header & 0x3f) << 1),
                payload[1],
            ];
            self.unit.start_fragment(&nal_header, data);
            if end {
                self.unit.continue_fragment(&[], true);
            }
        } else {
            self.unit.continue_fragment(data, end);
        }
    }
}

impl Depacketizer for H265Depacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Result<Option<AccessUnit>, DepacketizeError> {
        if !self.unit.begin_packet(&packet.header) {
            return Ok(None);
        }

        let payload = &packet.payload[..];
        if payload.len() < 3 {
            self.unit
                .corrupt(DepacketizeError::Malformed("H.265 payload shorter than header"));
        } else {
            match nal_type(payload[0]) {
                0..=47 => self.unit.push_nal(payload),
                NAL_AP => self.push_aggregation(payload),
                NAL_FU => self.push_fragment(payload),
                other => self
                    .unit
                    .corrupt(DepacketizeError::UnsupportedNalType(other)),
            }
        }

        self.unit.finish(packet.header.marker)
    }

    fn reset(&mut self) {
        self.unit.reset();
    }
}
