//! Error types for the RTSP engine.

use std::fmt;

/// Errors that can occur anywhere in the engine.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Network**: [`Io`](Self::Io), [`Resolve`](Self::Resolve),
///   [`Timeout`](Self::Timeout), [`TransportClosed`](Self::TransportClosed).
/// - **Protocol**: [`Parse`](Self::Parse) for malformed RTSP messages,
///   [`Protocol`](Self::Protocol) for well-formed but unacceptable ones,
///   [`InvalidUrl`](Self::InvalidUrl).
/// - **Auth**: [`Unauthorized`](Self::Unauthorized).
/// - **Depacketization**: [`Depacketize`](Self::Depacketize). Recovered
///   locally by dropping the partial access unit.
/// - **Server**: [`SessionNotFound`](Self::SessionNotFound),
///   [`SessionNotPlaying`](Self::SessionNotPlaying),
///   [`TransportNotConfigured`](Self::TransportNotConfigured),
///   [`NotStarted`](Self::NotStarted), [`AlreadyRunning`](Self::AlreadyRunning).
///
/// [`category`](Self::category) collapses these into the coarse classes the
/// client state machine acts on.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP message (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The peer answered with something the handshake cannot accept.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Authentication was required and could not be satisfied.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An RTP packet or payload could not be turned into an access unit.
    #[error("depacketization error: {0}")]
    Depacketize(#[from] DepacketizeError),

    /// Host name resolution failed for a destination address.
    #[error("cannot resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    /// The target URL is not a usable `rtsp://` URL.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// No reply arrived before the configured deadline.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The RTP transport was closed before or during the operation.
    #[error("RTP transport closed")]
    TransportClosed,

    /// The session was stopped through its [`StopHandle`](crate::client::StopHandle).
    #[error("session cancelled")]
    Cancelled,

    /// No session with the given ID exists in the [`SessionManager`](crate::session::SessionManager).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// SETUP has not been completed for this session (no UDP ports negotiated).
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// Attempted to send media to a session that is not in the Playing state.
    #[error("session not in playing state: {0}")]
    SessionNotPlaying(String),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl RtspError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_)
            | Self::Resolve { .. }
            | Self::Timeout(_)
            | Self::TransportClosed => ErrorCategory::Network,
            Self::Parse { .. } | Self::Protocol(_) | Self::InvalidUrl { .. } => {
                ErrorCategory::Protocol
            }
            Self::Unauthorized(_) => ErrorCategory::Auth,
            Self::Depacketize(_) => ErrorCategory::Depacketization,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::SessionNotFound(_)
            | Self::TransportNotConfigured(_)
            | Self::SessionNotPlaying(_)
            | Self::NotStarted
            | Self::AlreadyRunning => ErrorCategory::Usage,
        }
    }

    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }
}

/// Coarse error classes.
///
/// `Network`, `Protocol` and `Auth` are fatal to a client session.
/// `Depacketization` is recovered locally. `Cancelled` ends the session as
/// torn down rather than failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Protocol,
    Auth,
    Depacketization,
    Cancelled,
    Usage,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was present but not a number.
    InvalidContentLength,
    /// Headers grew past the reader's size limit without a terminating blank line.
    MessageTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
            Self::MessageTooLarge => write!(f, "message too large"),
        }
    }
}

/// A well-formed RTSP exchange that cannot continue the handshake.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("{method} answered {status} {reason}")]
    UnexpectedStatus {
        method: String,
        status: u16,
        reason: String,
    },

    #[error("{method} response is missing the {header} header")]
    MissingHeader {
        method: String,
        header: &'static str,
    },

    #[error("response CSeq {got} does not match request CSeq {expected}")]
    CSeqMismatch { expected: u32, got: String },

    #[error("invalid Transport header: {0}")]
    InvalidTransport(String),

    #[error("session description has no usable media tracks")]
    NoUsableTracks,

    #[error("control connection closed by server")]
    ConnectionClosed,
}

/// Why an RTP packet did not produce an access unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DepacketizeError {
    #[error("packet too short ({0} bytes)")]
    TooShort(usize),

    #[error("unsupported RTP version {0}")]
    BadVersion(u8),

    #[error("payload type {got} does not match negotiated {expected}")]
    PayloadTypeMismatch { expected: u8, got: u8 },

    #[error("{lost} packet(s) lost inside an access unit")]
    SequenceGap { lost: u16 },

    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    #[error("unsupported NAL unit type {0}")]
    UnsupportedNalType(u8),
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
