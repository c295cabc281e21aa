//! RTSP authentication (RFC 2326 §D.1, RFC 2617).
//!
//! Client side: [`Authenticator::from_challenges`] picks a scheme from the
//! `WWW-Authenticate` headers of a 401 reply. Digest is preferred when the
//! server offers it, otherwise Basic. The authenticator then produces an
//! `Authorization` value for each following request.
//!
//! Server side: [`verify_basic`] checks a Basic `Authorization` header
//! against the configured credentials.

use std::borrow::Cow;
use std::fmt;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{Result, RtspError};

/// Decodes with or without trailing `=` padding; some cameras omit it.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode standard base64, tolerating missing padding.
pub fn decode_base64(input: &str) -> Option<Vec<u8>> {
    LENIENT_BASE64.decode(input.trim()).ok()
}

/// Username and password for an RTSP server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// `Authorization` value for HTTP Basic (RFC 2617 §2).
pub fn basic_authorization(credentials: &Credentials) -> String {
    let token = format!("{}:{}", credentials.username, credentials.password);
    format!("Basic {}", BASE64_STANDARD.encode(token))
}

/// Whether a request's `Authorization` header carries the expected Basic
/// credentials.
pub fn verify_basic(authorization: Option<&str>, expected: &Credentials) -> bool {
    let Some(value) = authorization else {
        return false;
    };
    let Some((scheme, token)) = value.trim().split_once(' ') else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("Basic") {
        return false;
    }
    let Some(decoded) = decode_base64(token) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    match decoded.split_once(':') {
        Some((user, pass)) => user == expected.username && pass == expected.password,
        None => false,
    }
}

/// Authentication scheme negotiated from a 401 challenge.
#[derive(Debug)]
pub enum Authenticator {
    Basic,
    /// Keeps the parsed challenge; `digest_auth` tracks the nonce count.
    Digest(Box<digest_auth::WwwAuthenticateHeader>),
}

impl Authenticator {
    /// Choose a scheme from every `WWW-Authenticate` value of a response.
    pub fn from_challenges<'a>(challenges: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut basic = false;
        let mut seen = Vec::new();
        for challenge in challenges {
            let challenge = challenge.trim();
            seen.push(challenge.to_string());
            if starts_with_scheme(challenge, "Digest") {
                match digest_auth::WwwAuthenticateHeader::parse(challenge) {
                    Ok(header) => return Ok(Self::Digest(Box::new(header))),
                    Err(e) => {
                        tracing::warn!(challenge, error = %e, "ignoring malformed Digest challenge");
                    }
                }
            } else if starts_with_scheme(challenge, "Basic") {
                basic = true;
            }
        }

        if basic {
            return Ok(Self::Basic);
        }
        Err(RtspError::Unauthorized(if seen.is_empty() {
            "401 without WWW-Authenticate header".to_string()
        } else {
            format!("no supported authentication scheme in {:?}", seen)
        }))
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Digest(_) => "Digest",
        }
    }

    /// `Authorization` header value for one request.
    pub fn authorization(
        &mut self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
    ) -> Result<String> {
        match self {
            Self::Basic => Ok(basic_authorization(credentials)),
            Self::Digest(challenge) => {
                let ctx = digest_auth::AuthContext::new_with_method(
                    &credentials.username,
                    &credentials.password,
                    uri,
                    Option::<&'static [u8]>::None,
                    digest_auth::HttpMethod(Cow::Borrowed(method)),
                );
                let header = challenge
                    .respond(&ctx)
                    .map_err(|e| RtspError::Unauthorized(format!("digest response failed: {}", e)))?;
                Ok(header.to_string())
            }
        }
    }
}

fn starts_with_scheme(challenge: &str, scheme: &str) -> bool {
    challenge
        .get(..scheme.len())
        .is_some_and(|s| s.eq_ignore_ascii_case(scheme))
        && challenge[scheme.len()..].starts_with([' ', '\t'])
}
