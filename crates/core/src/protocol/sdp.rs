//! SDP (Session Description Protocol, RFC 4566 / RFC 8866).
//!
//! Two directions:
//!
//! - [`generate_sdp`] produces the body the server returns to DESCRIBE.
//! - [`parse_sdp`] turns a DESCRIBE body received by the client into
//!   [`TrackDescriptor`]s.
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                              ← session name
//! c=IN IP4 <addr>                               ← connection address
//! t=0 0                                         ← timing (live stream)
//! a=tool:rtsp-engine                            ← server software (§6)
//! a=sendonly                                    ← direction (§6)
//! m=video 0 RTP/AVP 96                          ← media description
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1                ← codec parameters
//! a=control:track1                              ← track control URL
//! ```

use crate::error::{ProtocolError, Result};
use crate::media::{MediaKind, Packetizer, annex_b};
use crate::protocol::auth::decode_base64;

/// Generate an SDP session description for the published stream.
///
/// All session/origin fields come from [`ServerConfig`](crate::ServerConfig)
/// so nothing is hardcoded.
pub fn generate_sdp(
    packetizer: &dyn Packetizer,
    ip: &str,
    session_id: &str,
    session_version: &str,
    username: &str,
    session_name: &str,
) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {} {} IN IP4 {}",
        username, session_id, session_version, ip
    ));
    sdp.push(format!("s={}", session_name));
    sdp.push(format!("c=IN IP4 {}", ip));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:rtsp-engine".to_string());
    sdp.push("a=sendonly".to_string());
    sdp.push(format!("m=video 0 RTP/AVP {}", packetizer.payload_type()));
    sdp.extend(packetizer.sdp_attributes());

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

/// Codec carried by a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
    /// Anything else, by its rtpmap encoding name (upper-cased).
    Other(String),
}

impl Codec {
    fn from_encoding_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "H264" => Self::H264,
            "H265" | "HEVC" => Self::H265,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Out-of-band parameter sets from `a=fmtp`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecParams {
    pub vps: Option<Vec<u8>>,
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
}

/// One negotiated media track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub media_type: MediaKind,
    pub codec: Codec,
    pub payload_type: u8,
    pub clock_rate_hz: u32,
    pub codec_params: CodecParams,
    /// `a=control` value, relative or absolute.
    pub control: Option<String>,
}

impl TrackDescriptor {
    /// Parameter sets as one Annex B buffer, in decoder order (VPS, SPS, PPS).
    ///
    /// `None` when the SDP carried none, or for non-video codecs.
    pub fn parameter_sets_annex_b(&self) -> Option<Vec<u8>> {
        let p = &self.codec_params;
        let sets: Vec<&[u8]> = match self.codec {
            Codec::H264 => [&p.sps, &p.pps].into_iter().flatten().map(Vec::as_slice).collect(),
            Codec::H265 => [&p.vps, &p.sps, &p.pps]
                .into_iter()
                .flatten()
                .map(Vec::as_slice)
                .collect(),
            Codec::Other(_) => return None,
        };
        if sets.is_empty() {
            return None;
        }
        Some(annex_b(sets))
    }

    /// Absolute URL to use in this track's SETUP request.
    ///
    /// Relative controls are appended to `base` (the `Content-Base`, or the
    /// DESCRIBE URL), which is treated as a directory.
    pub fn control_url(&self, base: &str) -> String {
        resolve_control(base, self.control.as_deref())
    }
}

/// Resolve an `a=control` value against the session base URL.
///
/// Absent or `*` means the base itself; absolute URLs are kept.
pub fn resolve_control(base: &str, control: Option<&str>) -> String {
    match control {
        None | Some("*") | Some("") => base.to_string(),
        Some(c) if c.contains("://") => c.to_string(),
        Some(c) => {
            let c = c.trim_start_matches('/');
            if base.ends_with('/') {
                format!("{}{}", base, c)
            } else {
                format!("{}/{}", base, c)
            }
        }
    }
}

/// Parsed session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpInfo {
    pub session_name: Option<String>,
    /// Session-level `a=control`, used as the aggregate PLAY URL when absolute.
    pub control: Option<String>,
    pub tracks: Vec<TrackDescriptor>,
}

impl SdpInfo {
    pub fn video_track(&self) -> Option<&TrackDescriptor> {
        self.tracks.iter().find(|t| t.media_type == MediaKind::Video)
    }

    pub fn audio_track(&self) -> Option<&TrackDescriptor> {
        self.tracks.iter().find(|t| t.media_type == MediaKind::Audio)
    }
}

/// Encoding name and clock rate for RFC 3551 static payload types.
fn static_payload_type(pt: u8) -> Option<(&'static str, u32)> {
    Some(match pt {
        0 => ("PCMU", 8000),
        8 => ("PCMA", 8000),
        14 => ("MPA", 90000),
        26 => ("JPEG", 90000),
        32 => ("MPV", 90000),
        33 => ("MP2T", 90000),
        _ => return None,
    })
}

/// A media section while its attribute lines are being read.
#[derive(Debug)]
struct PendingTrack {
    media_type: Option<MediaKind>,
    payload_type: Option<u8>,
    rtpmap: Option<(String, u32)>,
    fmtp: Option<String>,
    control: Option<String>,
}

impl PendingTrack {
    fn from_media_line(value: &str) -> Self {
        let mut fields = value.split_whitespace();
        let media_type = match fields.next() {
            Some("video") => Some(MediaKind::Video),
            Some("audio") => Some(MediaKind::Audio),
            _ => None,
        };
        let _port = fields.next();
        let proto_ok = fields
            .next()
            .is_some_and(|p| p.starts_with("RTP/AVP"));
        let payload_type = fields
            .next()
            .and_then(|f| f.parse::<u8>().ok())
            .filter(|pt| *pt < 128);

        Self {
            media_type,
            payload_type: if proto_ok { payload_type } else { None },
            rtpmap: None,
            fmtp: None,
            control: None,
        }
    }

    fn attribute(&mut self, attr: &str) {
        let (name, value) = attr.split_once(':').unwrap_or((attr, ""));
        match name {
            "rtpmap" => {
                if let Some((pt, rest)) = value.split_once(' ')
                    && pt.trim().parse::<u8>().ok() == self.payload_type
                {
                    let mut parts = rest.trim().split('/');
                    let encoding = parts.next().unwrap_or_default().to_string();
                    let clock = parts.next().and_then(|c| c.trim().parse::<u32>().ok());
                    if let Some(clock) = clock.filter(|c| *c > 0) {
                        self.rtpmap = Some((encoding, clock));
                    }
                }
            }
            "fmtp" => {
                if let Some((pt, params)) = value.split_once(' ')
                    && pt.trim().parse::<u8>().ok() == self.payload_type
                {
                    self.fmtp = Some(params.trim().to_string());
                }
            }
            "control" => self.control = Some(value.trim().to_string()),
            _ => {}
        }
    }

    fn finish(self) -> Option<TrackDescriptor> {
        let media_type = self.media_type?;
        let payload_type = self.payload_type?;
        let (encoding, clock_rate_hz) = match self.rtpmap {
            Some((encoding, clock)) => (encoding, clock),
            None => {
                let (name, clock) = static_payload_type(payload_type)?;
                (name.to_string(), clock)
            }
        };
        let codec = Codec::from_encoding_name(&encoding);
        let codec_params = self
            .fmtp
            .as_deref()
            .map(|f| parse_fmtp(&codec, f))
            .unwrap_or_default();

        Some(TrackDescriptor {
            media_type,
            codec,
            payload_type,
            clock_rate_hz,
            codec_params,
            control: self.control,
        })
    }
}

fn parse_fmtp(codec: &Codec, fmtp: &str) -> CodecParams {
    let mut params = CodecParams::default();
    for param in fmtp.split(';') {
        let Some((key, value)) = param.trim().split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match (codec, key.as_str()) {
            (Codec::H264, "sprop-parameter-sets") => {
                for set in value.split(',').filter_map(decode_base64) {
                    match set.first().map(|b| b & 0x1f) {
                        Some(7) => params.sps = Some(set),
                        Some(8) => params.pps = Some(set),
                        _ => {}
                    }
                }
            }
            (Codec::H265, "sprop-vps") => params.vps = decode_base64(value),
            (Codec::H265, "sprop-sps") => params.sps = decode_base64(value),
            (Codec::H265, "sprop-pps") => params.pps = decode_base64(value),
            _ => {}
        }
    }
    params
}

/// Parse a session description into its usable tracks.
///
/// Media sections that are not audio or video, use a non-RTP profile, or
/// carry a dynamic payload type without `a=rtpmap` are skipped. Zero usable
/// tracks is [`ProtocolError::NoUsableTracks`].
pub fn parse_sdp(text: &str) -> Result<SdpInfo> {
    let mut session_name = None;
    let mut session_control = None;
    let mut tracks = Vec::new();
    let mut current: Option<PendingTrack> = None;

    for line in text.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key == "m" {
            if let Some(done) = current.take() {
                tracks.extend(done.finish());
            }
            current = Some(PendingTrack::from_media_line(value));
            continue;
        }
        match (key, current.as_mut()) {
            ("a", Some(track)) => track.attribute(value),
            ("a", None) => {
                if let Some(control) = value.strip_prefix("control:") {
                    session_control = Some(control.trim().to_string());
                }
            }
            ("s", None) => session_name = Some(value.to_string()),
            _ => {}
        }
    }
    if let Some(done) = current.take() {
        tracks.extend(done.finish());
    }

    if tracks.is_empty() {
        return Err(ProtocolError::NoUsableTracks.into());
    }

    tracing::debug!(tracks = tracks.len(), "parsed session description");
    Ok(SdpInfo {
        session_name,
        control: session_control,
        tracks,
    })
}
