//! Depacketizer for payload formats where one RTP packet is one unit.
//!
//! Used for audio tracks (AAC, PCMU, Opus and friends) and for any codec the
//! engine does not parse: the payload is handed to the consumer untouched.

use super::rtp::{RtpPacket, SeqStatus, SequenceChecker};
use super::{AccessUnit, Depacketizer};
use crate::error::DepacketizeError;

#[derive(Debug, Default)]
pub struct PassthroughDepacketizer {
    seq: SequenceChecker,
}

impl PassthroughDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Depacketizer for PassthroughDepacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Result<Option<AccessUnit>, DepacketizeError> {
        if self.seq.observe(packet.header.sequence) == SeqStatus::Stale {
            return Ok(None);
        }
        if packet.payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(AccessUnit {
            data: packet.payload.to_vec(),
            rtp_timestamp: packet.header.timestamp,
        }))
    }

    fn reset(&mut self) {
        self.seq.reset();
    }
}
