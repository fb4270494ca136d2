//! # clearance-rs
//!
//! Obtain a valid session (cookies, user-agent, full response) for a
//! resource behind an anti-automation interstitial, without implementing the
//! challenge logic itself. The crate orchestrates interchangeable solving
//! strategies that delegate the actual challenge execution to an external
//! capability: a supervised FlareSolverr-compatible companion service, an
//! embedded browser engine, or the user's own browser.
//!
//! ## Features
//!
//! - Uniform [`ChallengeSolver`] contract across all strategies, so callers
//!   can compose them into a fallback chain
//! - Normalization of the companion service's wire protocol into one
//!   solver-agnostic [`ChallengeResponse`]
//! - Process supervision for the companion service: install, build, start,
//!   health-check, stop
//! - Silent clearance-cookie reuse with a human-in-the-loop manual fallback
//!
//! ## Example
//!
//! ```no_run
//! use clearance_rs::{ChallengeSolver, DelegatedSolver, SolverOptions};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let solver = DelegatedSolver::new(SolverOptions::default());
//!     let response = solver
//!         .get_response(&Url::parse("https://example.com/protected")?)
//!         .await?;
//!     println!("solved: {}", response.success());
//!     Ok(())
//! }
//! ```

pub mod detect;
pub mod response;
pub mod service;
pub mod solvers;

pub use crate::detect::{ChallengeKind, classify};

pub use crate::response::{BodyDecodeError, ChallengeResponse, Cookie, LazyBody};

pub use crate::service::{
    DEFAULT_PORT,
    SolverCommand,
    WireResponse,
    WireSolution,
    default_endpoint,
};

pub use crate::service::supervisor::{
    ArtifactFetcher,
    ServiceState,
    ServiceSupervisor,
    SupervisorConfig,
};

pub use crate::solvers::{
    ChallengeSolver,
    SolverError,
    SolverOptions,
    SolverResult,
};

pub use crate::solvers::delegated::DelegatedSolver;

pub use crate::solvers::engine::{
    BrowserEngine,
    BrowserEngineFactory,
    EngineError,
    EngineSolver,
};

pub use crate::solvers::manual::{
    BrowserError,
    CLEARANCE_COOKIES,
    ConfirmManualSolve,
    CookieStoreReader,
    HttpProbe,
    InteractiveBrowser,
    ManualSolver,
    ProbeError,
    ProbeTransport,
    SystemBrowser,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
