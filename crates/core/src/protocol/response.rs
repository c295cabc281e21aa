use crate::error::{ParseErrorKind, RtspError};

use super::reader::{RawMessage, parse_header_lines};

/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// The server side uses a builder pattern: chain
/// [`add_header`](Self::add_header) and [`with_body`](Self::with_body), then
/// call [`serialize`](Self::serialize). `Content-Length` is computed
/// automatically when a body is present. The client side parses replies
/// with [`from_raw`](Self::from_raw).
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = concat!("rtsp-engine/", env!("CARGO_PKG_VERSION"));

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK: success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 404 Not Found: the requested resource does not exist.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 400 Bad Request: malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 401 Unauthorized with a Basic challenge (RFC 2617 §2).
    pub fn unauthorized(realm: &str) -> Self {
        Self::new(401, "Unauthorized")
            .add_header("WWW-Authenticate", &format!("Basic realm=\"{}\"", realm))
    }

    /// 454 Session Not Found (RFC 2326 §11.3.9).
    pub fn session_not_found() -> Self {
        Self::new(454, "Session Not Found")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Parse a complete response from text (status line, headers, blank
    /// line, body).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let (head, body) = match raw.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body),
            None => (raw, ""),
        };
        let mut response = Self::parse_head(head)?;
        if !body.is_empty() {
            response.body = Some(body.to_string());
        }
        Ok(response)
    }

    /// Build a response from a message framed by
    /// [`MessageReader`](super::reader::MessageReader).
    pub fn from_raw(raw: RawMessage) -> crate::error::Result<Self> {
        let mut response = Self::parse_head(&raw.head)?;
        if !raw.body.is_empty() {
            response.body = Some(String::from_utf8_lossy(&raw.body).into_owned());
        }
        Ok(response)
    }

    fn parse_head(head: &str) -> crate::error::Result<Self> {
        let mut lines = head.lines();
        let status_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(RtspError::parse(ParseErrorKind::EmptyMessage))?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("RTSP/") {
            return Err(RtspError::parse(ParseErrorKind::InvalidStatusLine));
        }
        let status_code = parts
            .next()
            .and_then(|code| code.trim().parse::<u16>().ok())
            .ok_or(RtspError::parse(ParseErrorKind::InvalidStatusLine))?;
        let status_text = parts.next().unwrap_or_default().trim().to_string();

        Ok(RtspResponse {
            status_code,
            status_text,
            headers: parse_header_lines(lines)?,
            body: None,
        })
    }

    /// First header value with the given name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.get_headers(name).next()
    }

    /// Every value of a header that may repeat, such as `WWW-Authenticate`.
    pub fn get_headers<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_no_body() {
        let resp = RtspResponse::ok()
            .add_header("CSeq", "1")
            .add_header("Public", "OPTIONS");
        let s = resp.serialize();
        assert!(s.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(s.contains(&format!("Server: {}\r\n", SERVER_AGENT)));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.contains("Public: OPTIONS\r\n"));
        assert!(s.ends_with("\r\n"));
    }

    #[test]
    fn serialize_with_body() {
        let resp = RtspResponse::ok()
            .add_header("CSeq", "2")
            .with_body("v=0\r\n".to_string());
        let s = resp.serialize();
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("v=0\r\n"));
    }

    #[test]
    fn parse_response_with_body() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Base: rtsp://h/s/\r\n\
                   Content-Length: 5\r\n\r\nv=0\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.status_text, "OK");
        assert!(resp.is_success());
        assert_eq!(resp.cseq(), Some("2"));
        assert_eq!(resp.get_header("content-base"), Some("rtsp://h/s/"));
        assert_eq!(resp.body.as_deref(), Some("v=0\r\n"));
    }

    #[test]
    fn repeated_challenges_are_all_visible() {
        let raw = "RTSP/1.0 401 Unauthorized\r\nCSeq: 3\r\n\
                   WWW-Authenticate: Digest realm=\"cam\", nonce=\"abc\"\r\n\
                   WWW-Authenticate: Basic realm=\"cam\"\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert!(!resp.is_success());
        let challenges: Vec<&str> = resp.get_headers("WWW-Authenticate").collect();
        assert_eq!(challenges.len(), 2);
        assert!(challenges[1].starts_with("Basic"));
    }

    #[test]
    fn header_values_outlive_the_lookup_name() {
        let resp = RtspResponse::ok()
            .add_header("WWW-Authenticate", "Digest realm=\"cam\"")
            .add_header("WWW-Authenticate", "Basic realm=\"cam\"");
        let (first, all): (Option<&str>, Vec<&str>) = {
            let name = String::from("www-authenticate");
            (resp.get_header(&name), resp.get_headers(&name).collect())
        };
        assert_eq!(first, Some("Digest realm=\"cam\""));
        assert_eq!(all, ["Digest realm=\"cam\"", "Basic realm=\"cam\""]);
    }

    #[test]
    fn rejects_garbage_status_line() {
        assert!(RtspResponse::parse("HTTP/1.1 200 OK\r\n\r\n").is_err());
        assert!(RtspResponse::parse("RTSP/1.0 abc OK\r\n\r\n").is_err());
        assert!(RtspResponse::parse("").is_err());
    }

    #[test]
    fn unauthorized_carries_basic_challenge() {
        let s = RtspResponse::unauthorized("rtsp-engine").serialize();
        assert!(s.starts_with("RTSP/1.0 401 Unauthorized\r\n"));
        assert!(s.contains("WWW-Authenticate: Basic realm=\"rtsp-engine\"\r\n"));
    }
}
