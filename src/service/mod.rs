//! Wire protocol spoken by the companion solving service.
//!
//! The service is a FlareSolverr-compatible process listening on a fixed
//! local port and accepting JSON commands over HTTP. This module carries the
//! command and response shapes; process lifecycle lives in [`supervisor`].

pub mod supervisor;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use crate::response::Cookie;

/// Port the companion service listens on by default.
pub const DEFAULT_PORT: u16 = 8191;

/// Command endpoint for a service on the default port.
pub fn default_endpoint() -> Url {
    Url::parse(&format!("http://127.0.0.1:{DEFAULT_PORT}/v1"))
        .expect("default endpoint url is valid")
}

/// JSON command sent to the solving service.
///
/// Field names on the wire are fixed by the service's protocol; the
/// `maxTimeout` duration is encoded in whole milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct SolverCommand {
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(rename = "userAgent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(
        rename = "maxTimeout",
        serialize_with = "serialize_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<Cookie>,
    #[serde(rename = "returnOnlyCookies")]
    pub return_only_cookies: bool,
}

impl SolverCommand {
    fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            url: None,
            session: None,
            user_agent: None,
            max_timeout: None,
            headers: HashMap::new(),
            cookies: Vec::new(),
            return_only_cookies: false,
        }
    }

    /// Full page fetch with body capture.
    pub fn get(url: Url) -> Self {
        let mut command = Self::new("request.get");
        command.url = Some(url);
        command
    }

    /// Create a persistent browser session inside the service.
    pub fn create_session(session: impl Into<String>) -> Self {
        let mut command = Self::new("sessions.create");
        command.session = Some(session.into());
        command
    }

    /// Destroy a previously created session.
    pub fn destroy_session(session: impl Into<String>) -> Self {
        let mut command = Self::new("sessions.destroy");
        command.session = Some(session.into());
        command
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cookies(mut self, cookies: Vec<Cookie>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn cookies_only(mut self) -> Self {
        self.return_only_cookies = true;
        self
    }
}

fn serialize_millis<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => serializer.serialize_u64(duration.as_millis() as u64),
        None => serializer.serialize_none(),
    }
}

/// Envelope returned by the service for every command.
#[derive(Debug, Clone, Deserialize)]
pub struct WireResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub solution: Option<WireSolution>,
}

impl WireResponse {
    /// The service reports success with `status: "ok"`, compared
    /// case-insensitively.
    pub fn is_ok(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("ok"))
    }
}

/// Solved-page payload inside a successful envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WireSolution {
    #[serde(default)]
    pub url: Option<Url>,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default, rename = "userAgent")]
    pub user_agent: String,
    /// Page body in its transport encoding (base64).
    #[serde(default)]
    pub response: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_command_serializes_protocol_field_names() {
        let command = SolverCommand::get(Url::parse("https://example.com/").unwrap())
            .with_user_agent("agent")
            .with_max_timeout(Duration::from_secs(60));

        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["cmd"], "request.get");
        assert_eq!(json["url"], "https://example.com/");
        assert_eq!(json["userAgent"], "agent");
        assert_eq!(json["maxTimeout"], 60_000);
        assert_eq!(json["returnOnlyCookies"], false);
        assert!(json.get("session").is_none());
        assert!(json.get("headers").is_none());
        assert!(json.get("cookies").is_none());
    }

    #[test]
    fn session_commands_carry_only_the_session_id() {
        let command = SolverCommand::create_session("persistent");
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["cmd"], "sessions.create");
        assert_eq!(json["session"], "persistent");
        assert!(json.get("url").is_none());
    }

    #[test]
    fn wire_status_check_is_case_insensitive() {
        let ok: WireResponse = serde_json::from_str(r#"{"status": "OK"}"#).unwrap();
        assert!(ok.is_ok());

        let error: WireResponse =
            serde_json::from_str(r#"{"status": "error", "message": "boom"}"#).unwrap();
        assert!(!error.is_ok());

        let missing: WireResponse = serde_json::from_str("{}").unwrap();
        assert!(!missing.is_ok());
    }

    #[test]
    fn solution_deserializes_service_payload() {
        let raw = r#"{
            "status": "ok",
            "solution": {
                "url": "https://example.com/protected",
                "status": 200,
                "headers": {"content-type": "text/html"},
                "cookies": [
                    {"name": "cf_clearance", "value": "token", "domain": ".example.com",
                     "path": "/", "expires": 1700000000.5, "httpOnly": true, "secure": true}
                ],
                "userAgent": "Mozilla/5.0",
                "response": "PGh0bWw+"
            }
        }"#;

        let wire: WireResponse = serde_json::from_str(raw).unwrap();
        assert!(wire.is_ok());
        let solution = wire.solution.unwrap();
        assert_eq!(solution.status, 200);
        assert_eq!(solution.cookies[0].name, "cf_clearance");
        assert!(solution.cookies[0].http_only);
        assert_eq!(solution.user_agent, "Mozilla/5.0");
    }
}
