use bytes::Bytes;
use rand::Rng;

use crate::error::DepacketizeError;

/// Length of the fixed RTP header (RFC 3550 §5.1).
pub const RTP_HEADER_LEN: usize = 12;

/// RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Sequence numbers wrap modulo 2^16 and timestamps modulo 2^32. Compare
/// them with [`seq_is_after`] and [`TimestampUnwrapper`], never with plain
/// subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Serialize the 12-byte fixed header.
    ///
    /// CSRC identifiers and header extensions are never emitted, so the
    /// CC and X fields are written as zero.
    pub fn to_bytes(&self) -> [u8; RTP_HEADER_LEN] {
        let first_byte: u8 = (2 << 6) | ((self.padding as u8) << 5);
        let second_byte: u8 = ((self.marker as u8) << 7) | (self.payload_type & 0x7f);

        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }
}

/// A parsed RTP packet: header plus payload with CSRCs, extension and
/// padding already stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Parse one datagram.
    pub fn parse(data: &[u8]) -> Result<Self, DepacketizeError> {
        if data.len() < RTP_HEADER_LEN {
            return Err(DepacketizeError::TooShort(data.len()));
        }

        let version = data[0] >> 6;
        if version != 2 {
            return Err(DepacketizeError::BadVersion(version));
        }

        let header = RtpHeader {
            version,
            padding: data[0] & 0x20 != 0,
            extension: data[0] & 0x10 != 0,
            csrc_count: data[0] & 0x0f,
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7f,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        };

        let mut offset = RTP_HEADER_LEN + 4 * header.csrc_count as usize;
        if data.len() < offset {
            return Err(DepacketizeError::TooShort(data.len()));
        }

        // RFC 3550 §5.3.1: 16-bit profile id, 16-bit length in 32-bit words.
        if header.extension {
            if data.len() < offset + 4 {
                return Err(DepacketizeError::TooShort(data.len()));
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + 4 * words;
            if data.len() < offset {
                return Err(DepacketizeError::TooShort(data.len()));
            }
        }

        let mut end = data.len();
        if header.padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || pad > end - offset {
                return Err(DepacketizeError::Malformed("invalid RTP padding"));
            }
            end -= pad;
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&data[offset..end]),
        })
    }

    /// Serialize to wire format (fixed header followed by the payload).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RTP_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Outbound RTP header state shared by all packetizers.
///
/// It manages:
/// - **Sequence number**: 16-bit, wrapping. Incremented on every packet.
/// - **Timestamp**: stored as u64 internally to avoid wrapping arithmetic
///   during duration calculations. The lower 32 bits go on the wire.
/// - **SSRC**: randomly generated per RFC 3550 §8.1 to avoid collisions.
#[derive(Debug)]
pub struct RtpSequencer {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpSequencer {
    /// Create a new RTP header state with explicit SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP sequencer created"
        );
        Self {
            pt,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC and a random initial sequence number
    /// (RFC 3550 §5.1 recommends both be unpredictable).
    pub fn with_random_ssrc(pt: u8) -> Self {
        let mut rng = rand::rng();
        let mut sequencer = Self::new(pt, rng.random::<u32>());
        sequencer.sequence = rng.random::<u16>();
        sequencer
    }

    /// Sequence number the next [`write`](Self::write) call will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Current timestamp (internal u64 representation).
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Produce the header for the next packet and advance the sequence number.
    pub fn next_header(&mut self, marker: bool) -> RtpHeader {
        let header = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type: self.pt,
            sequence: self.sequence,
            timestamp: self.timestamp as u32,
            ssrc: self.ssrc,
        };
        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Serialize the next 12-byte header.
    ///
    /// The `marker` bit signals the last packet of a frame. For H.264 it is
    /// set on the last RTP packet of an access unit (RFC 6184 §5.1).
    pub fn write(&mut self, marker: bool) -> [u8; RTP_HEADER_LEN] {
        self.next_header(marker).to_bytes()
    }

    /// Advance the RTP timestamp by the given increment.
    ///
    /// For video at 90 kHz clock rate, the increment per frame is
    /// `90000 / fps` (e.g. 3000 for 30 fps, 3600 for 25 fps).
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }
}

/// Whether sequence number `a` comes after `b` in the circular 16-bit space.
///
/// `a` is after `b` when the forward distance from `b` to `a` is non-zero
/// and less than half the space, so 3 is after 65534.
pub fn seq_is_after(a: u16, b: u16) -> bool {
    let forward = a.wrapping_sub(b);
    forward != 0 && forward < 0x8000
}

/// Outcome of feeding a sequence number to a [`SequenceChecker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqStatus {
    /// First packet, or exactly the successor of the previous one.
    InOrder,
    /// Newer than expected; `lost` packets were skipped.
    Gap { lost: u16 },
    /// Duplicate or older than the last accepted packet.
    Stale,
}

/// Tracks the highest sequence number seen on one stream.
#[derive(Debug, Default, Clone)]
pub struct SequenceChecker {
    last: Option<u16>,
}

impl SequenceChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, seq: u16) -> SeqStatus {
        let Some(last) = self.last else {
            self.last = Some(seq);
            return SeqStatus::InOrder;
        };

        if !seq_is_after(seq, last) {
            return SeqStatus::Stale;
        }

        self.last = Some(seq);
        let lost = seq.wrapping_sub(last).wrapping_sub(1);
        if lost == 0 {
            SeqStatus::InOrder
        } else {
            SeqStatus::Gap { lost }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Extends 32-bit RTP timestamps to a monotonic 64-bit timeline.
///
/// Small backwards steps (B-frames, reordering) are kept as negative deltas;
/// a forward jump across 2^32 increments the wrap count.
#[derive(Debug, Default, Clone)]
pub struct TimestampUnwrapper {
    last: Option<u32>,
    extended: i64,
}

impl TimestampUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unwrap(&mut self, ts: u32) -> i64 {
        match self.last {
            None => self.extended = ts as i64,
            Some(last) => self.extended += ts.wrapping_sub(last) as i32 as i64,
        }
        self.last = Some(ts);
        self.extended
    }
}
