use std::fmt;
use std::net::SocketAddr;

/// Negotiated RTP/RTCP transport parameters for a session (RFC 2326 §12.39).
///
/// Created during SETUP from the client's `Transport` header and the port of
/// the session's own [`RtpTransport`](crate::transport::RtpTransport).
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
/// ```
#[derive(Debug, Clone)]
pub struct Transport {
    /// Client's RTP receive port.
    pub client_rtp_port: u16,
    /// Client's RTCP receive port (typically `client_rtp_port + 1`).
    pub client_rtcp_port: u16,
    /// Port of the server socket RTP is sent from.
    pub server_rtp_port: u16,
    /// Advertised RTCP port (`server_rtp_port + 1`, not bound).
    pub server_rtcp_port: u16,
    /// Full socket address for RTP delivery (`client_ip:client_rtp_port`).
    pub client_addr: SocketAddr,
}

/// An RTP/RTCP port pair, `rtp-rtcp` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub rtp: u16,
    pub rtcp: u16,
}

impl PortPair {
    /// The conventional pair: RTCP on the next port up.
    pub fn from_rtp(rtp: u16) -> Self {
        Self {
            rtp,
            rtcp: rtp.wrapping_add(1),
        }
    }

    /// Parse `8000-8001`, or a bare `8000` meaning `8000-8001`.
    fn parse(value: &str) -> Option<Self> {
        match value.split_once('-') {
            Some((rtp, rtcp)) => Some(Self {
                rtp: rtp.trim().parse().ok()?,
                rtcp: rtcp.trim().parse().ok()?,
            }),
            None => Some(Self::from_rtp(value.trim().parse().ok()?)),
        }
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.rtp, self.rtcp)
    }
}

/// A parsed `Transport` header value (RFC 2326 §12.39).
///
/// Both directions use this type: the server parses the client's request
/// for `client_port`, the client parses the server's reply for
/// `server_port` and `ssrc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeader {
    /// Transport spec, e.g. `RTP/AVP` or `RTP/AVP/TCP`.
    pub profile: String,
    pub multicast: bool,
    pub interleaved: bool,
    pub client_port: Option<PortPair>,
    pub server_port: Option<PortPair>,
    pub ssrc: Option<u32>,
    pub destination: Option<String>,
    pub ttl: Option<u32>,
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// Only the first transport of a comma-separated list is considered.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// let ports = th.client_port.unwrap();
    /// assert_eq!((ports.rtp, ports.rtcp), (8000, 8001));
    ///
    /// assert!(TransportHeader::parse("").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let first = header.split(',').next()?.trim();
        let mut parts = first.split(';').map(str::trim);
        let profile = parts.next().filter(|p| !p.is_empty())?.to_string();

        let mut th = TransportHeader {
            interleaved: profile.ends_with("/TCP"),
            profile,
            ..Default::default()
        };

        for part in parts {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            match key.to_ascii_lowercase().as_str() {
                "multicast" => th.multicast = true,
                "unicast" => th.multicast = false,
                "interleaved" => th.interleaved = true,
                "client_port" => th.client_port = Some(PortPair::parse(value)?),
                "server_port" => th.server_port = Some(PortPair::parse(value)?),
                "ssrc" => th.ssrc = u32::from_str_radix(value.trim(), 16).ok(),
                "destination" => th.destination = Some(value.trim().to_string()),
                "ttl" => th.ttl = value.trim().parse().ok(),
                _ => {}
            }
        }
        Some(th)
    }

    /// The request value a client sends in SETUP.
    pub fn client_request(client_port: PortPair) -> String {
        format!("RTP/AVP;unicast;client_port={}", client_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_transport() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(th.client_port, Some(PortPair { rtp: 5000, rtcp: 5001 }));
        assert!(!th.multicast);
        assert!(!th.interleaved);
    }

    #[test]
    fn parse_no_client_port() {
        let th = TransportHeader::parse("RTP/AVP;unicast").unwrap();
        assert!(th.client_port.is_none());
    }

    #[test]
    fn parse_server_reply() {
        let th = TransportHeader::parse(
            "RTP/AVP;unicast;client_port=6000-6001;server_port=7000-7001;ssrc=1A2B3C4D",
        )
        .unwrap();
        assert_eq!(th.server_port, Some(PortPair { rtp: 7000, rtcp: 7001 }));
        assert_eq!(th.ssrc, Some(0x1A2B3C4D));
    }

    #[test]
    fn parse_interleaved_and_multicast() {
        assert!(
            TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=0-1")
                .unwrap()
                .interleaved
        );
        let th =
            TransportHeader::parse("RTP/AVP;multicast;destination=239.0.0.1;ttl=16").unwrap();
        assert!(th.multicast);
        assert_eq!(th.destination.as_deref(), Some("239.0.0.1"));
        assert_eq!(th.ttl, Some(16));
    }

    #[test]
    fn bare_port_implies_pair() {
        let th = TransportHeader::parse("RTP/AVP;client_port=9000").unwrap();
        assert_eq!(th.client_port, Some(PortPair { rtp: 9000, rtcp: 9001 }));
        assert!(TransportHeader::parse("RTP/AVP;client_port=abc").is_none());
    }

    #[test]
    fn client_request_format() {
        assert_eq!(
            TransportHeader::client_request(PortPair::from_rtp(6000)),
            "RTP/AVP;unicast;client_port=6000-6001"
        );
    }
}
