use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::protocol::auth::Credentials;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::transport::DEFAULT_MULTICAST_TTL;

/// `User-Agent` sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("rtsp-engine/", env!("CARGO_PKG_VERSION"));

/// How long to wait for each RTSP reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on any single blocking socket read.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Session timeout assumed when the server's `Session` header has none.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for one [`RtspClient`](super::RtspClient) session.
///
/// ```
/// use rtsp::client::ClientConfig;
///
/// let config = ClientConfig::new("rtsp://192.168.1.20:554/live")
///     .with_audio(true)
///     .with_user_agent("my-viewer/1.0");
/// assert!(config.request_video);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `rtsp://[user:pass@]host[:port]/path`. Credentials in the URL are used
    /// when [`credentials`](Self::credentials) is `None`.
    pub url: String,
    pub request_video: bool,
    pub request_audio: bool,
    pub credentials: Option<Credentials>,
    pub user_agent: String,
    /// Log every request and response, plus sampled RTP counters.
    pub debug: bool,
    pub multicast_ttl: u32,
    /// Local RTP port for video; 0 picks an ephemeral port.
    pub video_rtp_port: u16,
    /// Local RTP port for audio; 0 picks an ephemeral port.
    pub audio_rtp_port: u16,
    pub rtp_bind_ip: IpAddr,
    pub response_timeout: Duration,
    pub poll_interval: Duration,
    /// Capacity for queues created by [`QueueListener::from_config`](super::QueueListener::from_config).
    pub queue_capacity: usize,
    /// Send GET_PARAMETER/OPTIONS every half session timeout while playing.
    pub keepalive: bool,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_video: true,
            request_audio: false,
            credentials: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            debug: false,
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            video_rtp_port: 0,
            audio_rtp_port: 0,
            rtp_bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            keepalive: true,
        }
    }

    pub fn with_video(mut self, enabled: bool) -> Self {
        self.request_video = enabled;
        self
    }

    pub fn with_audio(mut self, enabled: bool) -> Self {
        self.request_audio = enabled;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_multicast_ttl(mut self, ttl: u32) -> Self {
        self.multicast_ttl = ttl;
        self
    }

    pub fn with_rtp_ports(mut self, video: u16, audio: u16) -> Self {
        self.video_rtp_port = video;
        self.audio_rtp_port = audio;
        self
    }

    pub fn with_rtp_bind_ip(mut self, ip: IpAddr) -> Self {
        self.rtp_bind_ip = ip;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Clamped to at least one millisecond.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }
}
