//! Solver driving an embedded browser engine.
//!
//! The engine itself (rendering, script execution, cookie store) is an
//! opaque capability behind [`BrowserEngine`]; this module owns the solve
//! protocol around it: single-flighting, the two-phase bounded wait, and the
//! teardown guarantee.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use url::Url;

use crate::detect::{self, ChallengeKind};
use crate::response::{ChallengeResponse, Cookie};

use super::{ChallengeSolver, SolverOptions, SolverResult};

/// The engine does not support concurrent sessions: at most one solve may
/// hold it per process, for the full duration of the solve.
static ENGINE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine initialization failed: {0}")]
    Initialization(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
    #[error("cookie read failed: {0}")]
    Cookies(String),
}

/// Opaque embedded browser capability driven by the solver.
///
/// Implementations wrap a real engine binding and surface its callbacks as
/// awaitable signals. Late signals from a completed phase must not leak into
/// the next one.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Resolves once the engine reports that initialization is complete.
    async fn ready(&self) -> Result<(), EngineError>;

    /// Begin navigating the main frame to `url`.
    async fn navigate(&self, url: &Url) -> Result<(), EngineError>;

    /// Resolves on the next main-frame load completion with the freshly
    /// fetched page source.
    async fn main_frame_loaded(&self) -> Result<String, EngineError>;

    /// Current `navigator.userAgent`.
    async fn user_agent(&self) -> Result<String, EngineError>;

    /// All cookies visible for `url` in the engine's cookie store.
    async fn cookies_for(&self, url: &Url) -> Result<Vec<Cookie>, EngineError>;

    /// Tear the engine down. Must be safe to call on a partially
    /// initialized engine and more than once.
    async fn shutdown(&self);
}

/// Creates one engine per solve call.
#[async_trait]
pub trait BrowserEngineFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn BrowserEngine>, EngineError>;
}

/// Clears challenges by loading the page in an embedded engine and waiting
/// for the interstitial to resolve itself.
pub struct EngineSolver {
    factory: Arc<dyn BrowserEngineFactory>,
    options: SolverOptions,
}

impl EngineSolver {
    pub fn new(factory: Arc<dyn BrowserEngineFactory>, options: SolverOptions) -> Self {
        Self { factory, options }
    }

    async fn solve(&self, engine: &dyn BrowserEngine, url: &Url) -> SolverResult {
        // Phase one: wait for the engine to finish initializing before any
        // navigation is issued.
        match timeout(self.options.timeout, engine.ready()).await {
            Ok(ready) => ready?,
            Err(_) => {
                log::warn!("engine did not initialize within {:?}", self.options.timeout);
                return Ok(ChallengeResponse::failed());
            }
        }

        engine.navigate(url).await?;

        // Phase two: wait until a main-frame load yields content that no
        // longer classifies as a challenge.
        let deadline = Instant::now() + self.options.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::warn!("challenge was not cleared within {:?}", self.options.timeout);
                return Ok(ChallengeResponse::failed());
            }

            match timeout(remaining, engine.main_frame_loaded()).await {
                Ok(Ok(source)) => {
                    if detect::classify(&source) == ChallengeKind::None {
                        break;
                    }
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    log::warn!("challenge was not cleared within {:?}", self.options.timeout);
                    return Ok(ChallengeResponse::failed());
                }
            }
        }

        // The page loaded cleanly; extract the session.
        let user_agent = engine.user_agent().await?;
        let cookies = engine.cookies_for(url).await?;

        Ok(ChallengeResponse::solved(cookies)
            .with_user_agent(user_agent)
            .with_response_url(url.clone()))
    }
}

#[async_trait]
impl ChallengeSolver for EngineSolver {
    fn name(&self) -> &'static str {
        "embedded engine solver"
    }

    async fn get_response(&self, url: &Url) -> SolverResult {
        let _guard = ENGINE_LOCK.lock().await;

        let engine = self.factory.create().await?;
        let result = self.solve(engine.as_ref(), url).await;

        // The engine may be only partially initialized at this point;
        // shutdown must still run on every exit path before the result
        // propagates.
        engine.shutdown().await;

        result
    }
}
