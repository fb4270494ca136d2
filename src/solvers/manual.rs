//! Silent cookie reuse with a manual browser fallback.
//!
//! The cheap path first: clearance cookies captured by the user's own
//! browser are probed against the target, and only when that fails (and the
//! caller's confirmation gate approves) is the user's browser opened so a
//! human can pass the challenge. The cookie-store reader, the probe
//! transport, and the browser launcher are injected capabilities, which
//! keeps the phase logic in one place regardless of where cookies come from.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::header::{COOKIE, USER_AGENT};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::sleep;
use url::Url;

use crate::detect::{self, ChallengeKind};
use crate::response::{ChallengeResponse, Cookie};

use super::{ChallengeSolver, SolverOptions, SolverResult};

/// Cookies whose joint presence proves a challenge was already passed.
pub const CLEARANCE_COOKIES: [&str; 2] = ["__cfduid", "cf_clearance"];

/// Reads cookies from a locally installed browser's cookie store.
pub trait CookieStoreReader: Send + Sync {
    fn cookies_for(&self, url: &Url) -> Vec<Cookie>;
}

#[derive(Debug, Error)]
#[error("probe failed: {0}")]
pub struct ProbeError(pub String);

/// Issues the silent-phase probe request.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn fetch(
        &self,
        url: &Url,
        cookies: &[Cookie],
        user_agent: Option<&str>,
    ) -> Result<String, ProbeError>;
}

/// Reqwest-backed probe transport.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeTransport for HttpProbe {
    async fn fetch(
        &self,
        url: &Url,
        cookies: &[Cookie],
        user_agent: Option<&str>,
    ) -> Result<String, ProbeError> {
        let pairs: Vec<String> = cookies.iter().map(Cookie::pair).collect();
        let mut request = self
            .client
            .get(url.clone())
            .header(COOKIE, pairs.join("; "));

        if let Some(user_agent) = user_agent {
            request = request.header(USER_AGENT, user_agent);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ProbeError(err.to_string()))?;
        response.text().await.map_err(|err| ProbeError(err.to_string()))
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct BrowserError(pub String);

/// Opens the operator's own browser on a page and reports the user-agent
/// the browser presented while fetching it.
#[async_trait]
pub trait InteractiveBrowser: Send + Sync {
    async fn open(&self, page: &str, timeout: Duration) -> Result<String, BrowserError>;
}

/// Human-in-the-loop authorization point for the manual phase.
pub type ConfirmManualSolve = Arc<dyn Fn() -> bool + Send + Sync>;

/// Two-phase solver: silent clearance-cookie reuse, then a gated manual
/// solve in the user's own browser.
///
/// This strategy never touches the embedded engine's single-flight lock;
/// the user's browser is a separate, caller-owned resource.
pub struct ManualSolver {
    cookie_store: Arc<dyn CookieStoreReader>,
    browser: Arc<dyn InteractiveBrowser>,
    probe: Option<Arc<dyn ProbeTransport>>,
    confirm: ConfirmManualSolve,
    options: SolverOptions,
}

impl ManualSolver {
    pub fn new(
        cookie_store: Arc<dyn CookieStoreReader>,
        browser: Arc<dyn InteractiveBrowser>,
        options: SolverOptions,
    ) -> Self {
        Self {
            cookie_store,
            browser,
            probe: None,
            confirm: Arc::new(|| true),
            options,
        }
    }

    /// Enable the silent phase. Without a probe transport the silent phase
    /// always fails and the solver goes straight to the confirmation gate.
    pub fn with_probe(mut self, probe: Arc<dyn ProbeTransport>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_confirmation(mut self, confirm: ConfirmManualSolve) -> Self {
        self.confirm = confirm;
        self
    }

    /// Marker cookies for `url`, or empty when any of them is missing.
    fn clearance_cookies(&self, url: &Url) -> Vec<Cookie> {
        let cookies = self.cookie_store.cookies_for(url);
        let markers: Vec<Cookie> = CLEARANCE_COOKIES
            .iter()
            .filter_map(|name| cookies.iter().find(|cookie| cookie.name == *name).cloned())
            .collect();

        if markers.len() == CLEARANCE_COOKIES.len() {
            markers
        } else {
            Vec::new()
        }
    }

    /// Attempt to reuse existing clearance cookies without opening anything
    /// user-visible. A probe transport fault only means this phase failed.
    async fn solve_silently(&self, url: &Url) -> ChallengeResponse {
        let Some(probe) = &self.probe else {
            return ChallengeResponse::failed();
        };

        let cookies = self.clearance_cookies(url);
        if cookies.is_empty() {
            return ChallengeResponse::failed();
        }

        let body = match probe
            .fetch(url, &cookies, self.options.user_agent.as_deref())
            .await
        {
            Ok(body) => body,
            Err(err) => {
                log::debug!("silent probe failed: {err}");
                return ChallengeResponse::failed();
            }
        };

        if detect::classify(&body) != ChallengeKind::None {
            return ChallengeResponse::failed();
        }

        let mut response = ChallengeResponse::solved(cookies).with_response_url(url.clone());
        if let Some(user_agent) = &self.options.user_agent {
            response = response.with_user_agent(user_agent.clone());
        }
        response
    }

    /// Let the user pass the challenge in their own browser, then wait for
    /// the clearance cookies to become available.
    async fn solve_manually(&self, url: &Url) -> SolverResult {
        let user_agent = self
            .browser
            .open(&redirect_page(url), self.options.timeout)
            .await?;

        let deadline = Instant::now() + self.options.timeout;
        while Instant::now() < deadline {
            let cookies = self.clearance_cookies(url);
            if !cookies.is_empty() {
                return Ok(ChallengeResponse::solved(cookies)
                    .with_user_agent(user_agent)
                    .with_response_url(url.clone()));
            }

            sleep(self.options.poll_interval).await;
        }

        log::warn!("clearance cookies did not appear within {:?}", self.options.timeout);
        Ok(ChallengeResponse::failed())
    }
}

#[async_trait]
impl ChallengeSolver for ManualSolver {
    fn name(&self) -> &'static str {
        "manual browser solver"
    }

    async fn get_response(&self, url: &Url) -> SolverResult {
        let response = self.solve_silently(url).await;
        if response.success() {
            return Ok(response);
        }

        if !(self.confirm)() {
            return Ok(response);
        }

        self.solve_manually(url).await
    }
}

fn redirect_page(url: &Url) -> String {
    format!("Redirecting to {url}...<script>window.location.href=\"{url}\";</script>")
}

/// [`InteractiveBrowser`] backed by the system default browser.
///
/// Binds a loopback listener, points the browser at it, serves the page
/// exactly once, and reports the `User-Agent` header the browser sent.
pub struct SystemBrowser;

#[async_trait]
impl InteractiveBrowser for SystemBrowser {
    async fn open(&self, page: &str, timeout: Duration) -> Result<String, BrowserError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|err| BrowserError(format!("failed to bind loopback listener: {err}")))?;
        let address = listener
            .local_addr()
            .map_err(|err| BrowserError(err.to_string()))?;

        launch_system_browser(&format!("http://{address}/"))?;

        tokio::time::timeout(timeout, serve_once(&listener, page))
            .await
            .map_err(|_| BrowserError("timed out waiting for the browser to connect".into()))?
    }
}

async fn serve_once(listener: &TcpListener, page: &str) -> Result<String, BrowserError> {
    let (mut stream, _) = listener
        .accept()
        .await
        .map_err(|err| BrowserError(format!("failed to accept browser connection: {err}")))?;

    // Read the request head; browsers send it in full before waiting on us.
    let mut head = Vec::new();
    let mut buf = [0u8; 2048];
    loop {
        let read = stream
            .read(&mut buf)
            .await
            .map_err(|err| BrowserError(format!("failed to read browser request: {err}")))?;
        if read == 0 {
            break;
        }
        head.extend_from_slice(&buf[..read]);
        if head.windows(4).any(|window| window == b"\r\n\r\n") {
            break;
        }
    }

    let user_agent = extract_user_agent(&String::from_utf8_lossy(&head));

    let reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        page.len(),
        page
    );
    stream
        .write_all(reply.as_bytes())
        .await
        .map_err(|err| BrowserError(format!("failed to answer browser request: {err}")))?;
    let _ = stream.shutdown().await;

    Ok(user_agent)
}

fn extract_user_agent(head: &str) -> String {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("user-agent"))
        .map(|(_, value)| value.trim().to_string())
        .unwrap_or_default()
}

fn launch_system_browser(url: &str) -> Result<(), BrowserError> {
    #[cfg(target_os = "macos")]
    let mut command = {
        let mut command = tokio::process::Command::new("open");
        command.arg(url);
        command
    };

    #[cfg(target_os = "windows")]
    let mut command = {
        let mut command = tokio::process::Command::new("cmd");
        command.args(["/C", "start", "", url]);
        command
    };

    #[cfg(all(unix, not(target_os = "macos")))]
    let mut command = {
        let mut command = tokio::process::Command::new("xdg-open");
        command.arg(url);
        command
    };

    command
        .spawn()
        .map(drop)
        .map_err(|err| BrowserError(format!("failed to launch browser: {err}")))
}
