//! Challenge solver strategies.
//!
//! Each submodule implements one way of obtaining a cleared session behind
//! the same [`ChallengeSolver`] contract, so callers can compose them into a
//! fallback chain. A solver distinguishes three outcomes: a populated
//! success, the failed sentinel ("the challenge was not beaten"), and a
//! typed error ("the solving infrastructure itself is broken").

pub mod delegated;
pub mod engine;
pub mod manual;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::response::ChallengeResponse;

pub use engine::EngineError;
pub use manual::BrowserError;

pub type SolverResult = Result<ChallengeResponse, SolverError>;

/// Common contract implemented by every solving strategy.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Obtain a cleared session for `url`.
    ///
    /// An unsolved challenge is reported through
    /// [`ChallengeResponse::failed`], not through the error type.
    async fn get_response(&self, url: &Url) -> SolverResult;
}

/// Infrastructure and execution faults surfaced by solver strategies.
#[derive(Debug, Error)]
pub enum SolverError {
    /// The companion service could not be reached at all. This signals
    /// "retry with a different strategy" rather than "challenge unsolved".
    #[error("could not connect to the solver service on port {port}")]
    ServiceUnreachable {
        port: u16,
        #[source]
        source: reqwest::Error,
    },
    /// Transport or protocol fault while executing a service command.
    #[error("solver command failed: {0}")]
    Command(#[from] reqwest::Error),
    #[error("browser engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("interactive browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Per-strategy configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Upper bound for every wait a solver performs.
    pub timeout: Duration,
    /// User-agent presented on probes and forwarded to the service.
    pub user_agent: Option<String>,
    /// Interval between cookie-store polls in the manual phase.
    pub poll_interval: Duration,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl SolverOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
