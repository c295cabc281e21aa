use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::media::h264::H264Packetizer;
use crate::media::{MediaKind, Packetizer};
use crate::protocol::auth::Credentials;
use crate::session::SessionManager;
use crate::transport::{DEFAULT_MULTICAST_TTL, tcp};

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, host is inferred from request URI/client address.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    /// When set, every request except OPTIONS needs matching Basic credentials.
    pub credentials: Option<Credentials>,
    /// Realm sent in the `WWW-Authenticate` challenge.
    pub auth_realm: String,
    /// Address per-session RTP sockets bind to.
    pub rtp_bind_ip: IpAddr,
    pub multicast_ttl: u32,
    /// Verbose request dumps and sampled RTP send logs.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Stream".to_string(),
            credentials: None,
            auth_realm: "rtsp-engine".to_string(),
            rtp_bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            debug: false,
        }
    }
}

impl ServerConfig {
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Connection status callbacks for the embedding application.
///
/// Every method has a no-op default. Callbacks run on connection threads
/// and must not block.
pub trait ServerObserver: Send + Sync {
    /// A client opened a control connection.
    fn on_connection_started(&self, _peer: SocketAddr) {}
    /// A session entered Playing.
    fn on_connection_success(&self, _peer: SocketAddr, _session_id: &str) {}
    /// A request could not be served (bad transport, socket failure, ...).
    fn on_connection_failed(&self, _peer: SocketAddr, _reason: &str) {}
    /// The control connection closed.
    fn on_disconnect(&self, _peer: SocketAddr) {}
    /// A request carried missing or wrong credentials.
    fn on_auth_error(&self, _peer: SocketAddr) {}
    /// The first request on a connection authenticated successfully.
    fn on_auth_success(&self, _peer: SocketAddr) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl ServerObserver for NoopObserver {}

/// State shared by the accept loop, every connection and [`Server`].
pub struct ServerContext {
    pub sessions: SessionManager,
    pub packetizer: Arc<Mutex<Box<dyn Packetizer>>>,
    pub config: Arc<ServerConfig>,
    pub observer: Arc<dyn ServerObserver>,
}

/// High-level RTSP server orchestrator.
///
/// Owns the session manager and the packetizer for the single published
/// stream. Delegates TCP connection handling to [`transport::tcp`](crate::transport::tcp);
/// each session's RTP goes out through its own
/// [`RtpTransport`](crate::transport::RtpTransport).
pub struct Server {
    ctx: Arc<ServerContext>,
    running: Arc<AtomicBool>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    /// Create a server with custom protocol/SDP configuration.
    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Self {
        Self::with_packetizer_and_config(
            bind_addr,
            Box::new(H264Packetizer::with_random_ssrc(96)),
            config,
        )
    }

    /// Create a server with a custom packetizer.
    pub fn with_packetizer(bind_addr: &str, packetizer: Box<dyn Packetizer>) -> Self {
        Self::with_packetizer_and_config(bind_addr, packetizer, ServerConfig::default())
    }

    /// Create a server with a custom packetizer and protocol/SDP configuration.
    pub fn with_packetizer_and_config(
        bind_addr: &str,
        packetizer: Box<dyn Packetizer>,
        config: ServerConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(ServerContext {
                sessions: SessionManager::new(),
                packetizer: Arc::new(Mutex::new(packetizer)),
                config: Arc::new(config),
                observer: Arc::new(NoopObserver),
            }),
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            accept_thread: None,
        }
    }

    /// Install a status observer. Must be called before [`start`](Self::start).
    pub fn with_observer(mut self, observer: Arc<dyn ServerObserver>) -> Self {
        if let Some(ctx) = Arc::get_mut(&mut self.ctx) {
            ctx.observer = observer;
        } else {
            tracing::warn!("observer ignored: server already started");
        }
        self
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let ctx = self.ctx.clone();

        tracing::info!(addr = %local_addr, "RTSP server listening");

        self.accept_thread = Some(thread::spawn(move || {
            tcp::accept_loop(listener, ctx, running);
        }));

        Ok(())
    }

    /// Stop accepting, close every session and wait for the accept thread.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("server stopping");
        if let Some(handle) = self.accept_thread.take()
            && handle.join().is_err()
        {
            tracing::warn!("accept thread panicked");
        }
        let closed = self.ctx.sessions.clear();
        tracing::debug!(closed, "sessions closed on shutdown");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound control address, available once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Packetize one Annex B access unit and send it to every playing
    /// session.
    ///
    /// Returns the number of sessions the frame reached. The RTP timestamp
    /// advances by `timestamp_increment` even when nobody is watching.
    pub fn publish(&self, frame: &[u8], timestamp_increment: u32) -> Result<usize> {
        if !self.is_running() {
            return Err(RtspError::NotStarted);
        }

        let mut packetizer = self.ctx.packetizer.lock();
        let packets = packetizer.packetize(frame, timestamp_increment);

        let mut delivered = 0;
        for session in self.ctx.sessions.get_playing_sessions() {
            let Some(rtp) = session.rtp_transport() else {
                continue;
            };
            let result = packets
                .iter()
                .try_for_each(|p| rtp.send_raw(p, MediaKind::Video).map(|_| ()));
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "RTP send failed");
                }
            }
        }

        tracing::trace!(
            packets = packets.len(),
            sessions = delivered,
            "frame published"
        );
        Ok(delivered)
    }

    /// Send one pre-built RTP packet to a single playing session.
    pub fn send_rtp_packet(&self, session_id: &str, payload: &[u8]) -> Result<usize> {
        if !self.is_running() {
            return Err(RtspError::NotStarted);
        }
        let session = self
            .ctx
            .sessions
            .get_session(session_id)
            .ok_or_else(|| RtspError::SessionNotFound(session_id.to_string()))?;
        if !session.is_playing() {
            return Err(RtspError::SessionNotPlaying(session_id.to_string()));
        }
        let rtp = session
            .rtp_transport()
            .ok_or_else(|| RtspError::TransportNotConfigured(session_id.to_string()))?;
        rtp.send_raw(payload, MediaKind::Video)
    }

    /// Send one pre-built RTP packet to every playing session. Returns how
    /// many sessions it reached.
    pub fn broadcast_rtp_packet(&self, payload: &[u8]) -> Result<usize> {
        if !self.is_running() {
            return Err(RtspError::NotStarted);
        }
        let mut sent = 0;
        for session in self.ctx.sessions.get_playing_sessions() {
            if let Some(rtp) = session.rtp_transport() {
                match rtp.send_raw(payload, MediaKind::Video) {
                    Ok(_) => sent += 1,
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, error = %e, "RTP send failed")
                    }
                }
            }
        }
        Ok(sent)
    }

    pub fn get_viewers(&self) -> Vec<Viewer> {
        self.ctx
            .sessions
            .get_playing_sessions()
            .iter()
            .filter_map(|session| {
                session.get_transport().map(|transport| Viewer {
                    session_id: session.id.clone(),
                    uri: session.uri.clone(),
                    client_addr: transport.client_addr.to_string(),
                    client_rtp_port: transport.client_rtp_port,
                })
            })
            .collect()
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.ctx.sessions
    }

    /// Returns a shared reference to the server's packetizer.
    pub fn packetizer(&self) -> Arc<Mutex<Box<dyn Packetizer>>> {
        self.ctx.packetizer.clone()
    }

    /// Returns the server's protocol configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.ctx.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Information about a connected viewer (client in PLAY state).
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub uri: String,
    pub client_addr: String,
    pub client_rtp_port: u16,
}
