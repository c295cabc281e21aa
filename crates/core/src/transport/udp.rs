use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, RtspError};
use crate::media::MediaKind;
use crate::media::rtp::RtpPacket;

/// Multicast TTL applied to every RTP socket unless configured otherwise.
pub const DEFAULT_MULTICAST_TTL: u32 = 64;

/// One sampled log line per this many video packets.
pub const VIDEO_LOG_INTERVAL: u64 = 500;
/// One sampled log line per this many audio packets.
pub const AUDIO_LOG_INTERVAL: u64 = 1000;

/// Receive poll interval: how long a `recv` blocks before returning `None`.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Socket layout for an [`RtpTransport`].
///
/// A `None` port disables that media kind. `Some(0)` binds an ephemeral
/// port.
#[derive(Debug, Clone)]
pub struct RtpTransportConfig {
    pub video_port: Option<u16>,
    pub audio_port: Option<u16>,
    pub bind_ip: IpAddr,
    pub multicast_ttl: u32,
    pub read_timeout: Duration,
    /// Emit the sampled per-packet-count log lines.
    pub log_packets: bool,
}

impl Default for RtpTransportConfig {
    fn default() -> Self {
        Self {
            video_port: Some(0),
            audio_port: None,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            log_packets: false,
        }
    }
}

#[derive(Debug, Default)]
struct StreamCounters {
    packets: u64,
    bytes: u64,
}

#[derive(Debug, Default)]
struct SendState {
    video_dest: Option<SocketAddr>,
    audio_dest: Option<SocketAddr>,
    video: StreamCounters,
    audio: StreamCounters,
}

impl SendState {
    fn dest(&self, kind: MediaKind) -> Option<SocketAddr> {
        match kind {
            MediaKind::Video => self.video_dest,
            MediaKind::Audio => self.audio_dest,
        }
    }

    fn counters(&mut self, kind: MediaKind) -> &mut StreamCounters {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        }
    }
}

/// RTP over UDP: one datagram socket per media kind.
///
/// Used in both directions. A client binds sockets, advertises their ports
/// in SETUP and polls [`recv`](Self::recv). A server binds one per session,
/// points it at the client's port with
/// [`set_destination_addr`](Self::set_destination_addr) and calls
/// [`send_raw`](Self::send_raw).
///
/// Sends and the diagnostic counters share one lock, so concurrent senders
/// never interleave a datagram with a counter update.
/// [`close`](Self::close) is idempotent; afterwards every operation fails
/// with [`RtspError::TransportClosed`].
#[derive(Debug)]
pub struct RtpTransport {
    video: RwLock<Option<Arc<UdpSocket>>>,
    audio: RwLock<Option<Arc<UdpSocket>>>,
    send: Mutex<SendState>,
    closed: AtomicBool,
    log_packets: bool,
}

impl RtpTransport {
    /// Bind the sockets the config enables.
    pub fn bind(config: &RtpTransportConfig) -> Result<Self> {
        let video = config
            .video_port
            .map(|port| Self::bind_socket(config, port))
            .transpose()?;
        let audio = config
            .audio_port
            .map(|port| Self::bind_socket(config, port))
            .transpose()?;

        let transport = Self {
            video: RwLock::new(video.map(Arc::new)),
            audio: RwLock::new(audio.map(Arc::new)),
            send: Mutex::new(SendState::default()),
            closed: AtomicBool::new(false),
            log_packets: config.log_packets,
        };
        tracing::debug!(
            video_port = ?transport.local_port(MediaKind::Video),
            audio_port = ?transport.local_port(MediaKind::Audio),
            ttl = config.multicast_ttl,
            "RTP transport bound"
        );
        Ok(transport)
    }

    fn bind_socket(config: &RtpTransportConfig, port: u16) -> Result<UdpSocket> {
        let socket = UdpSocket::bind(SocketAddr::new(config.bind_ip, port))?;
        socket.set_read_timeout(Some(config.read_timeout))?;
        if config.bind_ip.is_ipv4() {
            socket.set_multicast_ttl_v4(config.multicast_ttl)?;
        }
        Ok(socket)
    }

    fn slot(&self, kind: MediaKind) -> &RwLock<Option<Arc<UdpSocket>>> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    fn socket(&self, kind: MediaKind) -> Result<Arc<UdpSocket>> {
        if self.is_closed() {
            return Err(RtspError::TransportClosed);
        }
        self.slot(kind)
            .read()
            .clone()
            .ok_or_else(|| RtspError::TransportNotConfigured(format!("{} socket", kind)))
    }

    /// Local port of the socket for `kind`, if bound.
    pub fn local_port(&self, kind: MediaKind) -> Option<u16> {
        self.slot(kind)
            .read()
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .map(|a| a.port())
    }

    /// Resolve `host` and send `kind` packets to `host:port` from now on.
    ///
    /// An unresolvable host is [`RtspError::Resolve`]; the previous
    /// destination is kept.
    pub fn set_destination(&self, kind: MediaKind, host: &str, port: u16) -> Result<SocketAddr> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| RtspError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| RtspError::Resolve {
                host: host.to_string(),
                reason: "no addresses".to_string(),
            })?;
        self.set_destination_addr(kind, addr)?;
        Ok(addr)
    }

    pub fn set_destination_addr(&self, kind: MediaKind, addr: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(RtspError::TransportClosed);
        }
        let mut state = self.send.lock();
        match kind {
            MediaKind::Video => state.video_dest = Some(addr),
            MediaKind::Audio => state.audio_dest = Some(addr),
        }
        tracing::debug!(%kind, %addr, "RTP destination set");
        Ok(())
    }

    /// Serialize and send one packet as a single datagram.
    pub fn send_frame(&self, packet: &RtpPacket, kind: MediaKind) -> Result<usize> {
        self.send_raw(&packet.to_bytes(), kind)
    }

    /// Send an already-serialized RTP packet.
    pub fn send_raw(&self, data: &[u8], kind: MediaKind) -> Result<usize> {
        let socket = self.socket(kind)?;
        let mut state = self.send.lock();
        let dest = state
            .dest(kind)
            .ok_or_else(|| RtspError::TransportNotConfigured(format!("{} destination", kind)))?;

        let sent = socket.send_to(data, dest)?;

        let log_packets = self.log_packets;
        let counters = state.counters(kind);
        counters.packets += 1;
        counters.bytes += sent as u64;
        let interval = match kind {
            MediaKind::Video => VIDEO_LOG_INTERVAL,
            MediaKind::Audio => AUDIO_LOG_INTERVAL,
        };
        if log_packets && counters.packets % interval == 0 {
            tracing::info!(
                %kind,
                packets = counters.packets,
                bytes = counters.bytes,
                %dest,
                "wrote RTP packets"
            );
        }
        Ok(sent)
    }

    /// Receive one datagram on the `kind` socket.
    ///
    /// Blocks for at most the configured read timeout; a timeout is
    /// `Ok(None)`.
    pub fn recv(&self, kind: MediaKind, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        let socket = self.socket(kind)?;
        match socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if crate::protocol::reader::is_timeout(&e) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                if self.is_closed() {
                    Err(RtspError::TransportClosed)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Packets and bytes sent for `kind`.
    pub fn sent(&self, kind: MediaKind) -> (u64, u64) {
        let mut state = self.send.lock();
        let c = state.counters(kind);
        (c.packets, c.bytes)
    }

    /// Release the sockets. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.video.write().take();
        self.audio.write().take();
        let state = self.send.lock();
        tracing::debug!(
            video_packets = state.video.packets,
            audio_packets = state.audio.packets,
            "RTP transport closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for RtpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpSequencer;

    fn loopback(video: bool, audio: bool) -> RtpTransport {
        RtpTransport::bind(&RtpTransportConfig {
            video_port: video.then_some(0),
            audio_port: audio.then_some(0),
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn send_and_receive_one_packet() {
        let sender = loopback(true, false);
        let receiver = loopback(true, false);
        let port = receiver.local_port(MediaKind::Video).unwrap();
        sender
            .set_destination(MediaKind::Video, "127.0.0.1", port)
            .unwrap();

        let mut seq = RtpSequencer::new(96, 42);
        let packet = RtpPacket::new(seq.next_header(true), vec![0x65, 1, 2]);
        sender.send_frame(&packet, MediaKind::Video).unwrap();

        let mut buf = [0u8; 2048];
        let mut got = None;
        for _ in 0..20 {
            if let Some((n, _)) = receiver.recv(MediaKind::Video, &mut buf).unwrap() {
                got = Some(RtpPacket::parse(&buf[..n]).unwrap());
                break;
            }
        }
        assert_eq!(got.unwrap(), packet);
        assert_eq!(sender.sent(MediaKind::Video).0, 1);
    }

    #[test]
    fn recv_times_out_with_none() {
        let t = loopback(true, false);
        let mut buf = [0u8; 64];
        assert!(t.recv(MediaKind::Video, &mut buf).unwrap().is_none());
    }

    #[test]
    fn unresolvable_host_is_an_error() {
        let t = loopback(true, false);
        let err = t
            .set_destination(MediaKind::Video, "no-such-host.invalid", 5000)
            .unwrap_err();
        assert!(matches!(err, RtspError::Resolve { .. }));
    }

    #[test]
    fn disabled_kind_and_missing_destination() {
        let t = loopback(true, false);
        assert!(t.local_port(MediaKind::Audio).is_none());
        assert!(matches!(
            t.send_raw(&[0; 12], MediaKind::Audio),
            Err(RtspError::TransportNotConfigured(_))
        ));
        assert!(matches!(
            t.send_raw(&[0; 12], MediaKind::Video),
            Err(RtspError::TransportNotConfigured(_))
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let t = loopback(true, true);
        t.close();
        t.close();
        assert!(t.is_closed());
        let mut buf = [0u8; 64];
        assert!(matches!(
            t.recv(MediaKind::Video, &mut buf),
            Err(RtspError::TransportClosed)
        ));
        assert!(matches!(
            t.send_raw(&[0; 12], MediaKind::Video),
            Err(RtspError::TransportClosed)
        ));
    }
}
