//! Solver-agnostic challenge response model.
//!
//! Every solving strategy, whatever capability it delegates to, reports its
//! outcome through [`ChallengeResponse`]. Failure is a dedicated sentinel
//! value rather than an error: "the challenge was not beaten" is an expected
//! outcome, while infrastructure problems surface as typed errors from the
//! solver itself.

use std::collections::HashMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::service::WireResponse;

/// Single cookie as exchanged with the delegated service and browser stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Expiry as a unix timestamp; the delegated service reports fractional seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            http_only: false,
            secure: false,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// `name=value` form usable in a `Cookie` request header.
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Body payload carried in its transport encoding, decoded on first access.
#[derive(Clone)]
pub struct LazyBody {
    encoded: String,
    decoded: OnceCell<Bytes>,
}

impl LazyBody {
    pub fn from_base64(encoded: impl Into<String>) -> Self {
        Self {
            encoded: encoded.into(),
            decoded: OnceCell::new(),
        }
    }

    /// Decode the transport base64. The decoded buffer is cached, so repeated
    /// access does not re-decode.
    pub fn bytes(&self) -> Result<&Bytes, BodyDecodeError> {
        self.decoded.get_or_try_init(|| {
            BASE64
                .decode(self.encoded.as_bytes())
                .map(Bytes::from)
                .map_err(|err| BodyDecodeError(err.to_string()))
        })
    }
}

impl fmt::Debug for LazyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyBody")
            .field("encoded_len", &self.encoded.len())
            .field("decoded", &self.decoded.get().map(Bytes::len))
            .finish()
    }
}

#[derive(Debug, Error)]
#[error("failed to decode response body: {0}")]
pub struct BodyDecodeError(String);

static FAILED: Lazy<ChallengeResponse> = Lazy::new(|| ChallengeResponse {
    success: false,
    cookies: Vec::new(),
    headers: HeaderMap::new(),
    response_url: None,
    status: None,
    user_agent: None,
    body: None,
});

/// Uniform result produced by any solving strategy.
///
/// When `success` is false all other fields are empty; use
/// [`ChallengeResponse::failed`] to obtain that sentinel.
#[derive(Debug, Clone)]
pub struct ChallengeResponse {
    success: bool,
    cookies: Vec<Cookie>,
    headers: HeaderMap,
    response_url: Option<Url>,
    status: Option<StatusCode>,
    user_agent: Option<String>,
    body: Option<LazyBody>,
}

impl ChallengeResponse {
    /// Shared sentinel for "the challenge was not beaten".
    pub fn failed() -> Self {
        FAILED.clone()
    }

    /// Successful response carrying the harvested clearance cookies.
    pub fn solved(cookies: Vec<Cookie>) -> Self {
        Self {
            success: true,
            cookies,
            headers: HeaderMap::new(),
            response_url: None,
            status: None,
            user_agent: None,
            body: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        let user_agent = user_agent.into();
        self.user_agent = (!user_agent.is_empty()).then_some(user_agent);
        self
    }

    pub fn with_response_url(mut self, url: Url) -> Self {
        self.response_url = Some(url);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: LazyBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Normalize a wire response from the delegated service.
    ///
    /// Success is decided solely by the service's own `status` field,
    /// compared case-insensitively against `"ok"`. The HTTP status of the
    /// solved page is deliberately ignored here: a successful bypass can
    /// still carry a non-200 page status.
    pub fn from_wire(wire: WireResponse) -> Self {
        if !wire.is_ok() {
            return Self::failed();
        }

        let Some(solution) = wire.solution else {
            return Self::failed();
        };

        let mut response = Self {
            success: true,
            cookies: solution.cookies,
            headers: rebuild_headers(&solution.headers),
            response_url: solution.url,
            status: StatusCode::from_u16(solution.status).ok(),
            user_agent: None,
            body: solution.response.map(LazyBody::from_base64),
        };
        response = response.with_user_agent(solution.user_agent);
        response
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn response_url(&self) -> Option<&Url> {
        self.response_url.as_ref()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Decoded body bytes, if the solving strategy captured a body.
    pub fn body_bytes(&self) -> Option<Result<&Bytes, BodyDecodeError>> {
        self.body.as_ref().map(LazyBody::bytes)
    }
}

/// Rebuild a proper header map from the wire representation.
///
/// The delegated service folds repeated header instances into one
/// newline-joined value, which matters for `set-cookie`; every line becomes
/// its own entry, in the original order. Other keys are copied verbatim.
/// Entries that do not form valid header names or values are dropped.
fn rebuild_headers(wire: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (key, value) in wire {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            log::warn!("dropping unrepresentable header name {key:?}");
            continue;
        };

        if name == http::header::SET_COOKIE {
            for line in value.split('\n') {
                if let Ok(value) = HeaderValue::from_str(line) {
                    headers.append(&name, value);
                }
            }
        } else if let Ok(value) = HeaderValue::from_str(value) {
            headers.append(&name, value);
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    use crate::service::WireSolution;

    fn wire_response(status: &str, solution: Option<WireSolution>) -> WireResponse {
        WireResponse {
            status: Some(status.to_string()),
            message: None,
            solution,
        }
    }

    fn solution() -> WireSolution {
        WireSolution {
            url: Some(Url::parse("https://example.com/protected").unwrap()),
            status: 503,
            headers: HashMap::from([
                ("set-cookie".to_string(), "a=1\nb=2".to_string()),
                ("content-type".to_string(), "text/html".to_string()),
            ]),
            cookies: vec![Cookie::new("cf_clearance", "token")],
            user_agent: "Mozilla/5.0".to_string(),
            response: Some(BASE64.encode("<html>cleared</html>")),
        }
    }

    #[test]
    fn ok_status_yields_success_regardless_of_page_status() {
        let response = ChallengeResponse::from_wire(wire_response("ok", Some(solution())));

        assert!(response.success());
        assert_eq!(response.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(response.user_agent(), Some("Mozilla/5.0"));
        assert_eq!(response.cookies().len(), 1);
    }

    #[test]
    fn ok_status_is_case_insensitive() {
        let response = ChallengeResponse::from_wire(wire_response("OK", Some(solution())));
        assert!(response.success());
    }

    #[test]
    fn non_ok_status_yields_failed_sentinel() {
        let response = ChallengeResponse::from_wire(wire_response("error", Some(solution())));

        assert!(!response.success());
        assert!(response.cookies().is_empty());
        assert!(response.headers().is_empty());
        assert!(!response.has_body());
    }

    #[test]
    fn missing_solution_yields_failed_sentinel() {
        let response = ChallengeResponse::from_wire(wire_response("ok", None));
        assert!(!response.success());
    }

    #[test]
    fn body_decodes_to_original_bytes() {
        let response = ChallengeResponse::from_wire(wire_response("ok", Some(solution())));

        let bytes = response.body_bytes().expect("body present").expect("decodes");
        assert_eq!(bytes.as_ref(), b"<html>cleared</html>");

        // Second access reuses the cached decode.
        let again = response.body_bytes().unwrap().unwrap();
        assert_eq!(again.as_ref(), b"<html>cleared</html>");
    }

    #[test]
    fn newline_joined_set_cookie_is_split_in_order() {
        let response = ChallengeResponse::from_wire(wire_response("ok", Some(solution())));

        let set_cookie: Vec<_> = response
            .headers()
            .get_all(http::header::SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap().to_string())
            .collect();
        assert_eq!(set_cookie, vec!["a=1", "b=2"]);

        let content_type: Vec<_> = response
            .headers()
            .get_all(http::header::CONTENT_TYPE)
            .iter()
            .collect();
        assert_eq!(content_type.len(), 1);
    }

    #[test]
    fn invalid_body_surfaces_decode_error() {
        let body = LazyBody::from_base64("not base64 at all!!");
        assert!(body.bytes().is_err());
    }

    #[test]
    fn cookie_pair_formats_for_request_header() {
        let cookie = Cookie::new("cf_clearance", "abc").with_domain(".example.com");
        assert_eq!(cookie.pair(), "cf_clearance=abc");
    }
}
