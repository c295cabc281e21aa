use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::assembler::UnitAssembler;
use super::rtp::{RTP_HEADER_LEN, RtpPacket, RtpSequencer};
use super::{AccessUnit, Depacketizer, Packetizer};
use crate::error::DepacketizeError;

const DEFAULT_MTU: usize = 1400;

pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_STAP_A: u8 = 24;
pub const NAL_FU_A: u8 = 28;

fn is_parameter_set(nal: &[u8]) -> bool {
    nal.first()
        .is_some_and(|&b| matches!(b & 0x1f, NAL_SPS | NAL_PPS))
}

/// H.264 RTP packetizer (RFC 6184).
///
/// Converts H.264 Annex B access units into RTP packets using two
/// packetization modes:
///
/// - **Single NAL Unit** (§5.6): NALs that fit within the MTU are sent
///   as-is in a single RTP packet (12-byte header + NAL bytes).
///
/// - **FU-A Fragmentation** (§5.8): NALs exceeding the MTU are split
///   across multiple RTP packets. Each fragment carries a 2-byte FU
///   header before the NAL payload:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to MTU - 2 bytes)
///   ```
///
/// SPS/PPS are captured from the first frame that carries them; the SDP
/// `fmtp` line then includes `profile-level-id` and `sprop-parameter-sets`
/// (RFC 6184 §8.1), which is what lets a client build its priming frame.
///
/// The RTP marker bit is set on the last packet of each access unit
/// (RFC 6184 §5.1).
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpSequencer,
    mtu: usize,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Packetizer {
    /// Create with explicit payload type and SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self::from_sequencer(RtpSequencer::new(pt, ssrc))
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::from_sequencer(RtpSequencer::with_random_ssrc(pt))
    }

    fn from_sequencer(header: RtpSequencer) -> Self {
        Self {
            header,
            mtu: DEFAULT_MTU,
            sps: None,
            pps: None,
        }
    }

    /// Provide parameter sets up front instead of waiting for a keyframe.
    pub fn with_parameter_sets(mut self, sps: Vec<u8>, pps: Vec<u8>) -> Self {
        self.sps = Some(sps);
        self.pps = Some(pps);
        self
    }

    /// Override the payload size limit (bytes after the RTP header).
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(3);
        self
    }

    /// Derive profile-level-id from SPS NAL (RFC 6184 §8.1): bytes 1–3 are profile_idc, constraint_set, level_idc.
    fn get_profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        if sps.len() < 4 {
            return None;
        }
        Some(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    fn get_sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    /// Packetize a single NAL unit into one or more RTP packets.
    fn packetize_nal(&mut self, nal_unit: &[u8], is_last_nal: bool) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();

        if nal_unit.is_empty() {
            return packets;
        }

        if nal_unit.len() <= self.mtu {
            // Single NAL Unit mode (RFC 6184 §5.6)
            let hdr = self.header.write(is_last_nal);
            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + nal_unit.len());
            packet.extend_from_slice(&hdr);
            packet.extend_from_slice(nal_unit);
            packets.push(packet);
        } else {
            // FU-A fragmentation (RFC 6184 §5.8)
            let nal_header = nal_unit[0];
            let nal_type = nal_header & 0x1f;
            let nri = nal_header & 0x60;

            let fu_indicator = nri | NAL_FU_A;
            let payload = &nal_unit[1..];

            let max_fragment = self.mtu - 2;
            let mut offset = 0usize;
            let mut first = true;

            while offset < payload.len() {
                let remaining = payload.len() - offset;
                let last_fragment = remaining <= max_fragment;
                let chunk_size = std::cmp::min(max_fragment, remaining);
                let chunk = &payload[offset..offset + chunk_size];

                let start_bit = if first { 0x80 } else { 0x00 };
                let end_bit = if last_fragment { 0x40 } else { 0x00 };
                let fu_header = start_bit | end_bit | nal_type;

                let hdr = self.header.write(is_last_nal && last_fragment);

                let mut packet = Vec::with_capacity(RTP_HEADER_LEN + 2 + chunk.len());
                packet.extend_from_slice(&hdr);
                packet.push(fu_indicator);
                packet.push(fu_header);
                packet.extend_from_slice(chunk);
                packets.push(packet);

                offset += chunk_size;
                first = false;
            }

            tracing::trace!(
                nal_type,
                nal_size = nal_unit.len(),
                fragments = packets.len(),
                "FU-A fragmented NAL unit"
            );
        }

        packets
    }

    /// Extract NAL units from an H.264 Annex B bitstream.
    ///
    /// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte
    /// `00 00 01`) and returns the NAL data between them, excluding
    /// the start codes themselves. The start code length is tracked per
    /// NAL so mixed 3- and 4-byte start codes split correctly.
    pub fn extract_nal_units(data: &[u8]) -> Vec<Vec<u8>> {
        let mut nal_units = Vec::new();
        let mut i = 0usize;

        // (nal_data_start_index, start_code_length)
        let mut start_entries: Vec<(usize, usize)> = Vec::new();

        while i < data.len() {
            if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
                start_entries.push((i + 4, 4));
                i += 4;
            } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
                start_entries.push((i + 3, 3));
                i += 3;
            } else {
                i += 1;
            }
        }

        for (idx, &(start, _)) in start_entries.iter().enumerate() {
            let end = if idx + 1 < start_entries.len() {
                let (next_start, next_sc_len) = start_entries[idx + 1];
                next_start - next_sc_len
            } else {
                data.len()
            };

            if start < end {
                nal_units.push(data[start..end].to_vec());
            }
        }

        nal_units
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, encoded_data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        let nal_units = Self::extract_nal_units(encoded_data);
        let mut packets = Vec::new();

        if self.sps.is_none() || self.pps.is_none() {
            for nal in nal_units.iter().filter(|n| !n.is_empty()) {
                let nal_type = nal[0] & 0x1f;
                if nal_type == NAL_SPS && self.sps.is_none() {
                    tracing::debug!(bytes = nal.len(), "H.264 SPS captured from bitstream");
                    self.sps = Some(nal.clone());
                } else if nal_type == NAL_PPS && self.pps.is_none() {
                    tracing::debug!(bytes = nal.len(), "H.264 PPS captured from bitstream");
                    self.pps = Some(nal.clone());
                }
            }
        }

        for (i, nal) in nal_units.iter().enumerate() {
            let is_last = i == nal_units.len() - 1;
            packets.append(&mut self.packetize_nal(nal, is_last));
        }

        self.header.advance_timestamp(timestamp_increment);

        tracing::trace!(
            nal_count = nal_units.len(),
            rtp_packets = packets.len(),
            frame_bytes = encoded_data.len(),
            seq = self.header.sequence(),
            ts = self.header.timestamp(),
            "frame packetized"
        );

        packets
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    /// 90 kHz clock rate per RFC 6184 §8.1.
    fn clock_rate(&self) -> u32 {
        90000
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    /// SDP attributes per RFC 6184 §8.2.1.
    ///
    /// `a=rtpmap` defines the payload type and must precede the `a=fmtp`
    /// line that references it.
    fn sdp_attributes(&self) -> Vec<String> {
        let mut fmtp = format!("a=fmtp:{} packetization-mode=1", self.header.pt);
        if let Some(pl) = self.get_profile_level_id() {
            fmtp.push_str(&format!(";profile-level-id={}", pl));
        }
        if let Some(sprop) = self.get_sprop_parameter_sets() {
            fmtp.push_str(&format!(";sprop-parameter-sets={}", sprop));
        }

        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type(),
                self.codec_name(),
                self.clock_rate()
            ),
            fmtp,
            "a=control:track1".to_string(),
        ]
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp() as u32
    }
}

/// H.264 RTP depacketizer (RFC 6184, non-interleaved mode).
///
/// Handles Single NAL Unit packets (types 1–23), STAP-A aggregation (24)
/// and FU-A fragmentation (28). STAP-B, MTAP and FU-B only occur in
/// interleaved mode and poison the access unit they appear in.
#[derive(Debug)]
pub struct H264Depacketizer {
    unit: UnitAssembler,
}

impl Default for H264Depacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self {
            unit: UnitAssembler::with_parameter_sets(is_parameter_set),
        }
    }

    fn push_stap_a(&mut self, payload: &[u8]) {
        let mut rest = &payload[1..];
        while !rest.is_empty() {
            if rest.len() < 2 {
                self.unit
                    .corrupt(DepacketizeError::Malformed("truncated STAP-A size"));
                return;
            }
            let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            if size == 0 || rest.len() < 2 + size {
                self.unit
                    .corrupt(DepacketizeError::Malformed("truncated STAP-A NAL unit"));
                return;
            }
            self.unit.push_nal(&rest[2..2 + size]);
            rest = &rest[2 + size..];
        }
    }

    fn push_fu_a(&mut self, payload: &[u8]) {
        if payload.len() < 3 {
            self.unit
                .corrupt(DepacketizeError::Malformed("truncated FU-A packet"));
            return;
        }
        let fu_indicator = payload[0];
        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let data = &payload[2..];

        if start {
            let nal_header = (fu_indicator & 0xe0) | (fu_header & 0x1f);
            self.unit.start_fragment(&[nal_header], data);
            if end {
                self.unit.continue_fragment(&[], true);
            }
        } else {
            self.unit.continue_fragment(data, end);
        }
    }
}

impl Depacketizer for H264Depacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Result<Option<AccessUnit>, DepacketizeError> {
        if !self.unit.begin_packet(&packet.header) {
            return Ok(None);
        }

        let payload = &packet.payload[..];
        match payload.first().map(|b| b & 0x1f) {
            None => self
                .unit
                .corrupt(DepacketizeError::Malformed("empty RTP payload")),
            Some(1..=23) => self.unit.push_nal(payload),
            Some(NAL_STAP_A) => self.push_stap_a(payload),
            Some(NAL_FU_A) => self.push_fu_a(payload),
            Some(other) => self
                .unit
                .corrupt(DepacketizeError::UnsupportedNalType(other)),
        }

        self.unit.finish(packet.header.marker)
    }

    fn reset(&mut self) {
        self.unit.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::annex_b;
    use crate::media::rtp::RtpHeader;

    fn make_packetizer() -> H264Packetizer {
        H264Packetizer::new(96, 0xAABBCCDD)
    }

    fn rtp(seq: u16, ts: u32, marker: bool, payload: &[u8]) -> RtpPacket {
        RtpPacket::new(
            RtpHeader {
                version: 2,
                padding: false,
                extension: false,
                csrc_count: 0,
                marker,
                payload_type: 96,
                sequence: seq,
                timestamp: ts,
                ssrc: 1,
            },
            payload.to_vec(),
        )
    }

    #[test]
    fn unmarked_parameter_sets_join_the_next_unit() {
        let mut d = H264Depacketizer::new();
        let sps = [0x67, 0x42, 0x00, 0x1e];
        let pps = [0x68, 0xce, 0x3c, 0x80];
        let idr = [0x65, 0x88, 0x80];
        assert_eq!(d.push(&rtp(1, 1000, false, &sps)), Ok(None));
        assert_eq!(d.push(&rtp(2, 1000, false, &pps)), Ok(None));
        let unit = d.push(&rtp(3, 4000, true, &idr)).unwrap().unwrap();
        assert_eq!(unit.data, annex_b([&sps[..], &pps[..], &idr[..]]));
        assert_eq!(unit.rtp_timestamp, 4000);
    }

    #[test]
    fn slice_without_marker_is_not_carried() {
        let mut d = H264Depacketizer::new();
        assert_eq!(d.push(&rtp(1, 1000, false, &[0x67, 0x42])), Ok(None));
        assert_eq!(d.push(&rtp(2, 1000, false, &[0x41, 1])), Ok(None));
        let unit = d.push(&rtp(3, 4000, true, &[0x65, 2])).unwrap().unwrap();
        assert_eq!(unit.data, vec![0, 0, 0, 1, 0x65, 2]);
    }

    // --- NAL extraction ---

    #[test]
    fn extract_single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let nals = H264Packetizer::extract_nal_units(&data);
        assert_eq!(nals, vec![vec![0x65, 0xAA, 0xBB]]);
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = H264Packetizer::extract_nal_units(&data);
        assert_eq!(nals, vec![vec![0x67, 0x42], vec![0x68, 0xCE]]);
    }

    #[test]
    fn extract_no_start_code() {
        assert!(H264Packetizer::extract_nal_units(&[0xFF, 0xFE]).is_empty());
        assert!(H264Packetizer::extract_nal_units(&[]).is_empty());
    }

    // --- Packetization ---

    #[test]
    fn small_nal_single_packet() {
        let mut p = make_packetizer();
        let packets = p.packetize_nal(&[0x65, 0xAA, 0xBB, 0xCC], true);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 12 + 4);
        assert_eq!(packets[0][1] & 0x80, 0x80);
    }

    #[test]
    fn large_nal_fragmented() {
        let mut p = make_packetizer();
        let mut nal = vec![0x65];
        nal.extend(vec![0xAA; DEFAULT_MTU + 500]);
        let packets = p.packetize_nal(&nal, true);
        assert!(packets.len() > 1);

        assert_eq!(packets[0][12] & 0x1f, NAL_FU_A);
        assert_eq!(packets[0][13] & 0x80, 0x80);
        assert_eq!(packets[0][1] & 0x80, 0);

        let last = packets.last().unwrap();
        assert_eq!(last[13] & 0x40, 0x40);
        assert_eq!(last[1] & 0x80, 0x80);
    }

    #[test]
    fn auto_capture_sps_pps_from_first_frame() {
        let mut p = make_packetizer();
        let frame = [
            &[0u8, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e][..],
            &[0, 0, 0, 1, 0x68, 0xce, 0x38, 0x80][..],
            &[0, 0, 0, 1, 0x65, 0x88, 0x00][..],
        ]
        .concat();
        p.packetize(&frame, 3000);
        let attrs = p.sdp_attributes();
        assert_eq!(attrs[0], "a=rtpmap:96 H264/90000");
        let fmtp = attrs.iter().find(|a| a.starts_with("a=fmtp:")).unwrap();
        assert!(fmtp.contains("profile-level-id=42001e"));
        assert!(fmtp.contains("sprop-parameter-sets=Z0IAHg==,aM44gA=="));
    }

    // --- Depacketization ---

    #[test]
    fn single_nal_with_marker_is_one_unit() {
        let mut d = H264Depacketizer::new();
        let unit = d.push(&rtp(1, 3000, true, &[0x65, 1, 2])).unwrap().unwrap();
        assert_eq!(unit.data, vec![0, 0, 0, 1, 0x65, 1, 2]);
        assert_eq!(unit.rtp_timestamp, 3000);
    }

    #[test]
    fn fu_a_three_fragments_reassemble() {
        let mut d = H264Depacketizer::new();
        let n = 65534u16;
        assert_eq!(d.push(&rtp(n, 9000, false, &[0x7c, 0x85, 1, 2])), Ok(None));
        assert_eq!(
            d.push(&rtp(n.wrapping_add(1), 9000, false, &[0x7c, 0x05, 3, 4])),
            Ok(None)
        );
        let unit = d
            .push(&rtp(n.wrapping_add(2), 9000, true, &[0x7c, 0x45, 5]))
            .unwrap()
            .unwrap();
        assert_eq!(unit.data, vec![0, 0, 0, 1, 0x65, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn fu_a_gap_discards_unit() {
        let mut d = H264Depacketizer::new();
        assert_eq!(d.push(&rtp(100, 9000, false, &[0x7c, 0x85, 1, 2])), Ok(None));
        let result = d.push(&rtp(102, 9000, true, &[0x7c, 0x45, 5]));
        assert_eq!(result, Err(DepacketizeError::SequenceGap { lost: 1 }));

        // The stream recovers on the next unit.
        let unit = d.push(&rtp(103, 12000, true, &[0x41, 9])).unwrap();
        assert!(unit.is_some());
    }

    #[test]
    fn stap_a_splits_into_nals() {
        let mut d = H264Depacketizer::new();
        let payload = [0x18, 0, 2, 0x67, 0x42, 0, 2, 0x68, 0xce];
        let unit = d.push(&rtp(1, 0, true, &payload)).unwrap().unwrap();
        assert_eq!(unit.data, vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce]);
    }

    #[test]
    fn missing_marker_is_dropped_on_timestamp_change() {
        let mut d = H264Depacketizer::new();
        assert_eq!(d.push(&rtp(1, 3000, false, &[0x41, 1])), Ok(None));
        let unit = d.push(&rtp(2, 6000, true, &[0x41, 2])).unwrap().unwrap();
        assert_eq!(unit.data, vec![0, 0, 0, 1, 0x41, 2]);
    }

    #[test]
    fn packetizer_output_round_trips_through_depacketizer() {
        let mut p = make_packetizer().with_mtu(100);
        let mut frame = vec![0, 0, 0, 1, 0x65];
        frame.extend((0..1000).map(|i| (i % 251) as u8 + 1));
        let packets = p.packetize(&frame, 3000);
        assert!(packets.len() > 5);

        let mut d = H264Depacketizer::new();
        let mut units = Vec::new();
        for raw in &packets {
            if let Some(unit) = d.push(&RtpPacket::parse(raw).unwrap()).unwrap() {
                units.push(unit);
            }
        }
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data, frame);
    }
}
