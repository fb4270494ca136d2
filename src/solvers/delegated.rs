//! Solver that delegates to the companion service over its JSON protocol.
//!
//! Assumes the service is already running (usually under the
//! [`ServiceSupervisor`](crate::service::supervisor::ServiceSupervisor)) on
//! its well-known port and normalizes whatever the service answers.

use async_trait::async_trait;
use url::Url;

use crate::response::ChallengeResponse;
use crate::service::{DEFAULT_PORT, SolverCommand, WireResponse, default_endpoint};

use super::{ChallengeSolver, SolverError, SolverOptions, SolverResult};

/// Executes challenges through the supervised solving service.
pub struct DelegatedSolver {
    client: reqwest::Client,
    endpoint: Url,
    options: SolverOptions,
    session: Option<String>,
}

impl DelegatedSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: default_endpoint(),
            options,
            session: None,
        }
    }

    /// Target a service that is not on the default endpoint.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Reuse a persistent session inside the service.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    fn port(&self) -> u16 {
        self.endpoint.port().unwrap_or(DEFAULT_PORT)
    }

    async fn execute(&self, command: &SolverCommand) -> Result<WireResponse, SolverError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(command)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() {
                    SolverError::ServiceUnreachable {
                        port: self.port(),
                        source: err,
                    }
                } else {
                    SolverError::Command(err)
                }
            })?;

        // Command failures are reported inside the JSON envelope; the HTTP
        // status of the service reply itself does not decide the outcome.
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ChallengeSolver for DelegatedSolver {
    fn name(&self) -> &'static str {
        "delegated service solver"
    }

    async fn get_response(&self, url: &Url) -> SolverResult {
        let mut command =
            SolverCommand::get(url.clone()).with_max_timeout(self.options.timeout);

        if let Some(user_agent) = &self.options.user_agent {
            command = command.with_user_agent(user_agent.clone());
        }
        if let Some(session) = &self.session {
            command = command.with_session(session.clone());
        }

        let wire = self.execute(&command).await?;
        log::info!("solver service answered with status {:?}", wire.status);

        Ok(ChallengeResponse::from_wire(wire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target() -> Url {
        Url::parse("https://example.com/protected").unwrap()
    }

    async fn solver_for(server: &MockServer) -> DelegatedSolver {
        let endpoint = Url::parse(&format!("{}/v1", server.uri())).unwrap();
        DelegatedSolver::new(SolverOptions::default().with_user_agent("test-agent"))
            .with_endpoint(endpoint)
    }

    #[tokio::test]
    async fn solved_challenge_normalizes_into_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1"))
            .and(body_partial_json(json!({
                "cmd": "request.get",
                "url": "https://example.com/protected",
                "userAgent": "test-agent",
                "maxTimeout": 60_000,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "solution": {
                    "url": "https://example.com/protected",
                    "status": 503,
                    "headers": {"set-cookie": "a=1\nb=2"},
                    "cookies": [{"name": "cf_clearance", "value": "token"}],
                    "userAgent": "Mozilla/5.0",
                    "response": "Y2xlYXJlZA=="
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let solver = solver_for(&server).await;
        let response = solver.get_response(&target()).await.unwrap();

        assert!(response.success());
        assert_eq!(response.cookies()[0].name, "cf_clearance");
        assert_eq!(
            response
                .headers()
                .get_all(http::header::SET_COOKIE)
                .iter()
                .count(),
            2
        );
        assert_eq!(
            response.body_bytes().unwrap().unwrap().as_ref(),
            b"cleared"
        );
    }

    #[tokio::test]
    async fn non_ok_status_is_failed_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "status": "error",
                "message": "challenge not solved"
            })))
            .mount(&server)
            .await;

        let solver = solver_for(&server).await;
        let response = solver.get_response(&target()).await.unwrap();
        assert!(!response.success());
    }

    #[tokio::test]
    async fn refused_connection_surfaces_service_unreachable() {
        // Bind and drop a listener so the port is valid but closed.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = Url::parse(&format!("http://127.0.0.1:{port}/v1")).unwrap();

        let solver = DelegatedSolver::new(SolverOptions::default()).with_endpoint(endpoint);
        let err = solver.get_response(&target()).await.unwrap_err();

        match err {
            SolverError::ServiceUnreachable { port: reported, .. } => {
                assert_eq!(reported, port);
            }
            other => panic!("expected ServiceUnreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_envelope_is_a_command_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let solver = solver_for(&server).await;
        let err = solver.get_response(&target()).await.unwrap_err();
        assert!(matches!(err, SolverError::Command(_)));
    }
}
