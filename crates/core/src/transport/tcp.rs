use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{ProtocolError, RtspError};
use crate::protocol::reader::MessageReader;
use crate::protocol::{MethodHandler, RtspRequest, RtspResponse};
use crate::server::ServerContext;

/// How long a connection blocks in `read` before re-checking `running`.
const READ_POLL: Duration = Duration::from_millis(100);

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let c = ctx.clone();
                let r = running.clone();
                thread::spawn(move || {
                    Connection::handle(stream, c, r);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    stream: TcpStream,
    reader: MessageReader,
    handler: MethodHandler,
    peer_addr: SocketAddr,
    debug: bool,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    pub fn handle(stream: TcpStream, ctx: Arc<ServerContext>, running: Arc<AtomicBool>) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };
        if let Err(e) = stream.set_read_timeout(Some(READ_POLL)) {
            tracing::warn!(%peer_addr, error = %e, "cannot set read timeout");
            return;
        }

        tracing::info!(%peer_addr, "client connected");
        ctx.observer.on_connection_started(peer_addr);

        let mut conn = Connection {
            stream,
            reader: MessageReader::new(),
            handler: MethodHandler::new(ctx.clone(), peer_addr),
            peer_addr,
            debug: ctx.config.debug,
        };

        let reason = conn.run(&running);
        conn.cleanup(&ctx);

        tracing::info!(%peer_addr, reason, "client disconnected");
        ctx.observer.on_disconnect(peer_addr);
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let raw = match self.reader.read_from(&mut self.stream) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(RtspError::Protocol(ProtocolError::ConnectionClosed)) => {
                    return "connection closed by client";
                }
                Err(RtspError::Parse { kind }) => {
                    tracing::warn!(peer = %self.peer_addr, error = %kind, "unframeable request");
                    let _ = self.send(&RtspResponse::bad_request());
                    return "protocol error";
                }
                Err(_) => return "read error",
            };

            if self.debug {
                tracing::debug!(peer = %self.peer_addr, "<< {}", raw.head);
            }

            let response = match RtspRequest::from_raw(raw) {
                Ok(request) => {
                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = %request.method,
                        uri = %request.uri,
                        version = %request.version,
                        "request"
                    );
                    self.handler.handle(&request)
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    RtspResponse::bad_request()
                }
            };

            tracing::debug!(
                peer = %self.peer_addr,
                status = response.status_code,
                "response"
            );

            if self.send(&response).is_err() {
                return "write error";
            }
        }

        "server shutting down"
    }

    fn send(&mut self, response: &RtspResponse) -> std::io::Result<()> {
        let text = response.serialize();
        if self.debug {
            tracing::debug!(peer = %self.peer_addr, ">> {}", text.trim_end());
        }
        self.stream.write_all(text.as_bytes())
    }

    /// Clean up sessions owned by this connection.
    fn cleanup(&self, ctx: &ServerContext) {
        let orphaned = self.handler.session_ids();
        if !orphaned.is_empty() {
            let removed = ctx.sessions.remove_sessions(orphaned);
            tracing::info!(peer = %self.peer_addr, removed, "cleaned up sessions on disconnect");
        }
    }
}
