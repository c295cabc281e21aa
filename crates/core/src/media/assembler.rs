//! Codec-independent access-unit bookkeeping for NAL-based payload formats.
//!
//! The H.264 and H.265 depacketizers only know how to split a payload into
//! NAL units and fragments; [`UnitAssembler`] owns everything else:
//!
//! - sequence tracking, with stale packets ignored and gaps inside a unit
//!   poisoning it,
//! - timestamp boundaries, so a unit whose marker packet was lost is dropped
//!   when the next timestamp shows up (parameter sets alone are carried
//!   into the next unit instead),
//! - fragment buffering,
//! - emitting the Annex B unit when the marker packet arrives.
//!
//! A poisoned unit is never delivered. The first cause is reported from
//! [`finish`](UnitAssembler::finish) when the terminal packet arrives.

use super::rtp::{RtpHeader, SeqStatus, SequenceChecker};
use super::{AccessUnit, annex_b};
use crate::error::DepacketizeError;

#[derive(Debug, Default)]
pub struct UnitAssembler {
    seq: SequenceChecker,
    timestamp: Option<u32>,
    nals: Vec<Vec<u8>>,
    fragment: Option<Vec<u8>>,
    corruption: Option<DepacketizeError>,
    parameter_set: Option<fn(&[u8]) -> bool>,
}

impl UnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// NAL units matching `is_parameter_set` survive a timestamp change
    /// without a marker and are prepended to the next access unit.
    pub fn with_parameter_sets(is_parameter_set: fn(&[u8]) -> bool) -> Self {
        Self {
            parameter_set: Some(is_parameter_set),
            ..Self::default()
        }
    }

    /// Account for a packet's sequence number and timestamp.
    ///
    /// Returns `false` when the packet is a duplicate or arrived too late and
    /// must be ignored.
    pub fn begin_packet(&mut self, header: &RtpHeader) -> bool {
        match self.seq.observe(header.sequence) {
            SeqStatus::Stale => {
                tracing::trace!(seq = header.sequence, "dropping stale RTP packet");
                return false;
            }
            SeqStatus::Gap { lost } if self.in_progress() => {
                self.corrupt(DepacketizeError::SequenceGap { lost });
            }
            SeqStatus::Gap { lost } => {
                tracing::trace!(seq = header.sequence, lost, "RTP loss between access units");
            }
            SeqStatus::InOrder => {}
        }

        if let Some(ts) = self.timestamp
            && ts != header.timestamp
            && self.in_progress()
        {
            let nal_headers: Vec<u8> = self.nals.iter().filter_map(|n| n.first().copied()).collect();
            if self.holds_only_parameter_sets() {
                tracing::debug!(
                    previous = ts,
                    next = header.timestamp,
                    ?nal_headers,
                    "carrying parameter sets into the next access unit"
                );
            } else {
                tracing::debug!(
                    previous = ts,
                    next = header.timestamp,
                    ?nal_headers,
                    "access unit ended without marker, discarding"
                );
                self.clear_unit();
            }
        }
        self.timestamp = Some(header.timestamp);
        true
    }

    /// Add a complete NAL unit to the current access unit.
    pub fn push_nal(&mut self, nal: &[u8]) {
        if self.fragment.take().is_some() {
            self.corrupt(DepacketizeError::Malformed(
                "NAL unit interrupted a fragmented NAL unit",
            ));
        }
        if nal.is_empty() {
            self.corrupt(DepacketizeError::Malformed("empty NAL unit"));
            return;
        }
        self.nals.push(nal.to_vec());
    }

    /// Begin a fragmented NAL unit with its reconstructed NAL header.
    pub fn start_fragment(&mut self, nal_header: &[u8], data: &[u8]) {
        if self.fragment.is_some() {
            self.corrupt(DepacketizeError::Malformed(
                "fragment start while another fragment is open",
            ));
        }
        let mut buf = Vec::with_capacity(nal_header.len() + data.len());
        buf.extend_from_slice(nal_header);
        buf.extend_from_slice(data);
        self.fragment = Some(buf);
    }

    /// Append to the open fragment; `end` closes it into a NAL unit.
    pub fn continue_fragment(&mut self, data: &[u8], end: bool) {
        match self.fragment.as_mut() {
            Some(buf) => buf.extend_from_slice(data),
            None => {
                self.corrupt(DepacketizeError::Malformed(
                    "fragment continuation without a start",
                ));
                return;
            }
        }
        if end && let Some(nal) = self.fragment.take() {
            self.nals.push(nal);
        }
    }

    /// Poison the current access unit. Only the first cause is kept.
    pub fn corrupt(&mut self, err: DepacketizeError) {
        if self.corruption.is_none() {
            self.corruption = Some(err);
        }
    }

    /// Close the access unit if `marker` is set.
    pub fn finish(&mut self, marker: bool) -> Result<Option<AccessUnit>, DepacketizeError> {
        if !marker {
            return Ok(None);
        }

        if self.fragment.is_some() {
            self.corrupt(DepacketizeError::Malformed(
                "marker packet inside an open fragment",
            ));
        }

        let rtp_timestamp = self.timestamp.unwrap_or(0);
        let nals = std::mem::take(&mut self.nals);
        let corruption = self.corruption.take();
        self.fragment = None;

        if let Some(err) = corruption {
            return Err(err);
        }
        if nals.is_empty() {
            return Ok(None);
        }

        Ok(Some(AccessUnit {
            data: annex_b(nals.iter().map(Vec::as_slice)),
            rtp_timestamp,
        }))
    }

    pub fn reset(&mut self) {
        self.clear_unit();
        self.seq.reset();
        self.timestamp = None;
    }

    fn in_progress(&self) -> bool {
        !self.nals.is_empty() || self.fragment.is_some() || self.corruption.is_some()
    }

    fn holds_only_parameter_sets(&self) -> bool {
        self.fragment.is_none()
            && self.corruption.is_none()
            && !self.nals.is_empty()
            && self
                .parameter_set
                .is_some_and(|is_parameter_set| self.nals.iter().all(|nal| is_parameter_set(nal)))
    }

    fn clear_unit(&mut self) {
        self.nals.clear();
        self.fragment = None;
        self.corruption = None;
    }
}
