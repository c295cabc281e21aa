use std::net::SocketAddr;
use std::sync::Arc;

use crate::media::MediaKind;
use crate::protocol::auth::verify_basic;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::ServerContext;
use crate::session::transport::TransportHeader;
use crate::session::{PlaybackState, Transport};
use crate::transport::{RtpTransport, RtpTransportConfig};

/// Handles RTSP method requests for a single TCP connection.
///
/// Tracks which sessions were created on this connection so they
/// can be cleaned up when the connection drops.
pub struct MethodHandler {
    ctx: Arc<ServerContext>,
    client_addr: SocketAddr,
    /// Session IDs created during this connection, for cleanup on disconnect.
    session_ids: Vec<String>,
    authenticated: bool,
}

impl MethodHandler {
    pub fn new(ctx: Arc<ServerContext>, client_addr: SocketAddr) -> Self {
        MethodHandler {
            ctx,
            client_addr,
            session_ids: Vec::new(),
            authenticated: false,
        }
    }

    /// Returns session IDs owned by this connection (for cleanup on disconnect).
    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        if request.method != "OPTIONS"
            && let Some(rejection) = self.check_auth(cseq, request)
        {
            return rejection;
        }

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(cseq),
            "DESCRIBE" => self.handle_describe(cseq, &request.uri),
            "SETUP" => self.handle_setup(cseq, request),
            "PLAY" => self.handle_play(cseq, request),
            "PAUSE" => self.handle_pause(cseq, request),
            "TEARDOWN" => self.handle_teardown(cseq, request),
            "GET_PARAMETER" => self.handle_get_parameter(cseq, request),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::new(501, "Not Implemented").add_header("CSeq", cseq)
            }
        }
    }

    /// Basic auth gate. Returns the 401 to send when the request is rejected.
    fn check_auth(&mut self, cseq: &str, request: &RtspRequest) -> Option<RtspResponse> {
        let expected = self.ctx.config.credentials.as_ref()?;
        if verify_basic(request.get_header("Authorization"), expected) {
            if !self.authenticated {
                self.authenticated = true;
                tracing::info!(peer = %self.client_addr, "client authenticated");
                self.ctx.observer.on_auth_success(self.client_addr);
            }
            return None;
        }

        tracing::warn!(peer = %self.client_addr, method = %request.method, "rejecting unauthenticated request");
        self.ctx.observer.on_auth_error(self.client_addr);
        Some(RtspResponse::unauthorized(&self.ctx.config.auth_realm).add_header("CSeq", cseq))
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok().add_header("CSeq", cseq).add_header(
            "Public",
            "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER",
        )
    }

    /// Parses host from an RTSP URI (e.g. rtsp://host:8554/path -> host). Falls back to client IP if invalid.
    fn host_from_uri_or_client(&self, uri: &str) -> String {
        if let Some(host) = &self.ctx.config.public_host {
            return host.clone();
        }

        if let Ok(url) = url::Url::parse(uri)
            && let Some(host) = url.host_str()
            && !host.is_empty()
        {
            return host.to_string();
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> RtspResponse {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        let host = self.host_from_uri_or_client(uri);
        let config = &self.ctx.config;
        let sdp = {
            let packetizer = self.ctx.packetizer.lock();
            sdp::generate_sdp(
                &**packetizer,
                &host,
                &config.sdp_session_id,
                &config.sdp_session_version,
                &config.sdp_username,
                &config.sdp_session_name,
            )
        };

        let base = if uri.ends_with('/') {
            uri.to_string()
        } else {
            format!("{}/", uri)
        };

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &base)
            .with_body(sdp)
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let transport_header = match request.get_header("Transport") {
            Some(t) => t,
            None => {
                tracing::warn!(%cseq, "SETUP missing Transport header");
                return RtspResponse::bad_request().add_header("CSeq", cseq);
            }
        };

        let client_transport = match TransportHeader::parse(transport_header) {
            Some(t) => t,
            None => {
                tracing::warn!(%cseq, transport_header, "SETUP invalid Transport header");
                return RtspResponse::bad_request().add_header("CSeq", cseq);
            }
        };

        // Only unicast RTP/AVP over UDP is implemented; not TCP interleaved
        // (RFC 2326 §10.12) and not server-chosen multicast.
        if client_transport.interleaved || client_transport.multicast {
            tracing::warn!(%cseq, transport = %transport_header, "client requested unsupported transport");
            self.ctx
                .observer
                .on_connection_failed(self.client_addr, "unsupported transport");
            return RtspResponse::new(461, "Unsupported Transport")
                .add_header("CSeq", cseq)
                .add_header(
                    "Unsupported",
                    "only unicast RTP/AVP over UDP is supported, e.g. ffplay -rtsp_transport udp <url>",
                );
        }

        let Some(client_port) = client_transport.client_port else {
            tracing::warn!(%cseq, transport_header, "SETUP without client_port");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };

        let config = &self.ctx.config;
        let rtp = match RtpTransport::bind(&RtpTransportConfig {
            video_port: Some(0),
            audio_port: None,
            bind_ip: config.rtp_bind_ip,
            multicast_ttl: config.multicast_ttl,
            log_packets: config.debug,
            ..Default::default()
        }) {
            Ok(rtp) => Arc::new(rtp),
            Err(e) => {
                tracing::error!(error = %e, "failed to bind RTP socket");
                self.ctx
                    .observer
                    .on_connection_failed(self.client_addr, "RTP socket bind failed");
                return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
            }
        };

        let client_rtp_addr = SocketAddr::new(self.client_addr.ip(), client_port.rtp);
        let Some(server_rtp_port) = rtp.local_port(MediaKind::Video) else {
            return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
        };
        if let Err(e) = rtp.set_destination_addr(MediaKind::Video, client_rtp_addr) {
            tracing::error!(error = %e, "failed to set RTP destination");
            return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
        }

        let session = self.ctx.sessions.create_session(&request.uri);
        let session_id = session.id.clone();
        let server_rtcp_port = server_rtp_port.wrapping_add(1);

        session.set_transport(
            Transport {
                client_rtp_port: client_port.rtp,
                client_rtcp_port: client_port.rtcp,
                server_rtp_port,
                server_rtcp_port,
                client_addr: client_rtp_addr,
            },
            rtp,
        );

        self.session_ids.push(session_id.clone());

        tracing::info!(
            session_id,
            uri = %request.uri,
            client_rtp = %client_rtp_addr,
            server_rtp_port,
            "session created via SETUP"
        );

        let transport_response = format!(
            "RTP/AVP;unicast;client_port={};server_port={}-{}",
            client_port, server_rtp_port, server_rtcp_port
        );

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport_response)
            .add_header("Session", &session.session_header_value())
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session_id = match self.extract_session_id(request) {
            Some(id) => id,
            None => {
                tracing::warn!(%cseq, "PLAY missing Session header");
                return RtspResponse::session_not_found().add_header("CSeq", cseq);
            }
        };

        match self.ctx.sessions.get_session(&session_id) {
            Some(session) => {
                session.set_state(PlaybackState::Playing);
                tracing::info!(session_id, "session started playing");
                self.ctx
                    .observer
                    .on_connection_success(self.client_addr, &session_id);

                let rtp_info = {
                    let packetizer = self.ctx.packetizer.lock();
                    format!(
                        "url={};seq={};rtptime={}",
                        session.uri,
                        packetizer.next_sequence(),
                        packetizer.next_rtp_timestamp()
                    )
                };

                RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header("Session", &session.session_header_value())
                    .add_header("Range", "npt=0.000-")
                    .add_header("RTP-Info", &rtp_info)
            }
            None => {
                tracing::warn!(session_id, "PLAY for unknown session");
                RtspResponse::session_not_found().add_header("CSeq", cseq)
            }
        }
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session_id = match self.extract_session_id(request) {
            Some(id) => id,
            None => {
                tracing::warn!(%cseq, "PAUSE missing Session header");
                return RtspResponse::session_not_found().add_header("CSeq", cseq);
            }
        };

        match self.ctx.sessions.get_session(&session_id) {
            Some(session) => {
                session.set_state(PlaybackState::Paused);
                tracing::info!(session_id, "session paused");
                RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header("Session", &session.session_header_value())
            }
            None => {
                tracing::warn!(session_id, "PAUSE for unknown session");
                RtspResponse::session_not_found().add_header("CSeq", cseq)
            }
        }
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session_id = match self.extract_session_id(request) {
            Some(id) => id,
            None => {
                tracing::warn!(%cseq, "TEARDOWN missing Session header");
                return RtspResponse::session_not_found().add_header("CSeq", cseq);
            }
        };

        match self.ctx.sessions.remove_session(&session_id) {
            Some(_) => {
                self.session_ids.retain(|id| id != &session_id);
                tracing::info!(session_id, "session terminated via TEARDOWN");
                RtspResponse::ok().add_header("CSeq", cseq)
            }
            None => {
                tracing::warn!(session_id, "TEARDOWN for unknown session");
                RtspResponse::session_not_found().add_header("CSeq", cseq)
            }
        }
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        let mut resp = RtspResponse::ok().add_header("CSeq", cseq);

        if let Some(id) = self.extract_session_id(request)
            && self.ctx.sessions.get_session(&id).is_some()
        {
            resp = resp.add_header("Session", &id);
        }

        resp
    }

    /// Extract session ID from the Session header.
    /// Handles timeout suffix: "SESSIONID;timeout=60" -> "SESSIONID"
    fn extract_session_id(&self, request: &RtspRequest) -> Option<String> {
        request
            .get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
    }
}
