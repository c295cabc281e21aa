//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling. The server
//!   runs one accept thread and a thread per connection.
//!
//! - **UDP** ([`udp`]): carries RTP media packets. Every session owns an
//!   [`RtpTransport`] with one socket per media kind.
//!
//! Interleaved TCP transport (RFC 2326 §10.12) is not supported; SETUP
//! requests asking for it get `461 Unsupported Transport`.

pub mod tcp;
pub mod udp;

pub use udp::{DEFAULT_MULTICAST_TTL, RtpTransport, RtpTransportConfig};
