use crate::error::{ParseErrorKind, RtspError};

use super::reader::{RawMessage, parse_header_lines};

/// Protocol version written on every outgoing request.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// An RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The server parses
/// requests with [`parse`](Self::parse); the client builds them with
/// [`new`](Self::new) and [`add_header`](Self::add_header).
#[derive(Debug, Clone)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/track1`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspRequest {
    /// Start building an outgoing request.
    pub fn new(method: &str, uri: &str) -> Self {
        RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: RTSP_VERSION.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Parse an RTSP request from its text representation.
    ///
    /// Expects a request line, headers and a trailing blank line. Anything
    /// after the blank line is taken as the body. Returns
    /// [`RtspError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let (head, body) = match raw.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body),
            None => (raw, ""),
        };
        let mut request = Self::parse_head(head)?;
        if !body.is_empty() {
            request.body = Some(body.to_string());
        }
        Ok(request)
    }

    /// Build a request from a message framed by
    /// [`MessageReader`](super::reader::MessageReader).
    pub fn from_raw(raw: RawMessage) -> crate::error::Result<Self> {
        let mut request = Self::parse_head(&raw.head)?;
        if !raw.body.is_empty() {
            request.body = Some(String::from_utf8_lossy(&raw.body).into_owned());
        }
        Ok(request)
    }

    fn parse_head(head: &str) -> crate::error::Result<Self> {
        let mut lines = head.lines();

        let request_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(RtspError::parse(ParseErrorKind::EmptyMessage))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(RtspError::parse(ParseErrorKind::InvalidRequestLine));
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != RTSP_VERSION {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers: parse_header_lines(lines)?,
            body: None,
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    ///
    /// Every RTSP request must include a CSeq, and the response must echo it.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Serialize to the RTSP text wire format, adding `Content-Length`
    /// when a body is present.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} {}\r\n", self.method, self.uri, self.version);

        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            request.push_str(&format!("Content-Length: {}\r\n", body.len()));
            request.push_str("\r\n");
            request.push_str(body);
        } else {
            request.push_str("\r\n");
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/test RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:8554/test");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
        assert!(req.body.is_none());
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/test/track1 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(req.cseq(), Some("3"));
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn parse_empty_request() {
        assert!(RtspRequest::parse("").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("cseq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn built_request_serializes_and_parses_back() {
        let req = RtspRequest::new("DESCRIBE", "rtsp://cam.local/live")
            .add_header("CSeq", "2")
            .add_header("Accept", "application/sdp");
        let wire = req.serialize();
        assert_eq!(
            wire,
            "DESCRIBE rtsp://cam.local/live RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n"
        );
        let parsed = RtspRequest::parse(&wire).unwrap();
        assert_eq!(parsed.method, "DESCRIBE");
        assert_eq!(parsed.get_header("accept"), Some("application/sdp"));
    }
}
