//! Lifecycle management for the companion solving service.
//!
//! The supervisor installs, starts, health-checks, and stops the service as
//! a local child process. Install and build failures are an expected,
//! recoverable configuration state and are reported as `false` rather than
//! errors, so callers can fall back to another solving strategy.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::DEFAULT_PORT;

/// Manifest file that ships with the service sources.
const MANIFEST_FILE: &str = "package.json";
/// Marker written only after a successful install and build.
const INSTALL_SENTINEL: &str = "INSTALL_OK";

/// Lifecycle of the supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotInstalled,
    Installed,
    Running,
    Stopped,
}

/// Retrieves the service sources/runtime into the target directory.
///
/// Fetching is delegated and best-effort: a fetcher failure only matters if
/// the install check still fails afterwards.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, target_dir: &Path) -> bool;
}

/// Supervisor configuration, immutable once the supervisor is constructed.
#[derive(Clone)]
pub struct SupervisorConfig {
    /// Directory holding the service sources and the install sentinel.
    pub solver_dir: PathBuf,
    /// Optional directory containing the runtime (e.g. a bundled node).
    pub runtime_dir: Option<PathBuf>,
    pub auto_download: bool,
    pub auto_install: bool,
    pub install_command: Vec<String>,
    pub build_command: Vec<String>,
    pub serve_command: Vec<String>,
    pub fetcher: Option<Arc<dyn ArtifactFetcher>>,
    /// How long to wait after spawning before checking for an early exit.
    pub startup_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            solver_dir: PathBuf::from("FlareSolverr"),
            runtime_dir: None,
            auto_download: false,
            auto_install: true,
            install_command: command_line(&["npm", "install"]),
            build_command: command_line(&["npm", "run", "build"]),
            serve_command: command_line(&["node", "./dist/index.js"]),
            fetcher: None,
            startup_grace: Duration::from_secs(1),
        }
    }
}

impl SupervisorConfig {
    pub fn with_solver_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.solver_dir = dir.into();
        self
    }

    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    pub fn with_auto_download(mut self, enabled: bool) -> Self {
        self.auto_download = enabled;
        self
    }

    pub fn with_auto_install(mut self, enabled: bool) -> Self {
        self.auto_install = enabled;
        self
    }

    pub fn with_install_command(mut self, argv: &[&str]) -> Self {
        self.install_command = command_line(argv);
        self
    }

    pub fn with_build_command(mut self, argv: &[&str]) -> Self {
        self.build_command = command_line(argv);
        self
    }

    pub fn with_serve_command(mut self, argv: &[&str]) -> Self {
        self.serve_command = command_line(argv);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }
}

fn command_line(argv: &[&str]) -> Vec<String> {
    argv.iter().map(|arg| arg.to_string()).collect()
}

struct SupervisorInner {
    state: ServiceState,
    child: Option<Child>,
}

/// Supervises the solving service as a local child process.
///
/// All state transitions happen under one mutex: concurrent `start` calls
/// spawn at most one process, and `start` racing `stop` resolves to a single
/// consistent final state. The child handle never leaves the supervisor.
pub struct ServiceSupervisor {
    config: SupervisorConfig,
    inner: Mutex<SupervisorInner>,
}

impl ServiceSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let state = if is_installed(&config.solver_dir) {
            ServiceState::Installed
        } else {
            ServiceState::NotInstalled
        };

        Self {
            config,
            inner: Mutex::new(SupervisorInner { state, child: None }),
        }
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.lock().await.state
    }

    /// Process id of the running service, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.child.as_ref().and_then(Child::id)
    }

    /// Start the service, installing it first when configured to do so.
    ///
    /// Idempotent: if the service is already running this returns `true`
    /// without side effects. Install, build, and download failures are
    /// logged and reported as `false`, never raised.
    pub async fn start(&self) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.state == ServiceState::Running {
            return true;
        }

        log::info!("starting solver service");

        let child_path = self.child_path();

        if !is_installed(&self.config.solver_dir) && !self.ensure_installed(&child_path).await {
            log::error!("solver service could not be started");
            inner.state = ServiceState::NotInstalled;
            return false;
        }

        inner.state = ServiceState::Installed;

        match self.spawn_service(&child_path).await {
            Some(child) => {
                inner.child = Some(child);
                inner.state = ServiceState::Running;
                log::info!("solver service is now listening on port {DEFAULT_PORT}");
                true
            }
            None => {
                log::error!("solver service could not be started");
                false
            }
        }
    }

    /// Stop the service. No-op when nothing is running; safe to call
    /// repeatedly and on teardown. Returns `true` when a process was
    /// actually terminated.
    pub async fn stop(&self) -> bool {
        let mut inner = self.inner.lock().await;

        let Some(mut child) = inner.child.take() else {
            return false;
        };

        log::info!("stopping solver service");

        if let Err(err) = child.kill().await {
            log::warn!("failed to kill solver service process: {err}");
        }

        inner.state = ServiceState::Stopped;
        true
    }

    async fn ensure_installed(&self, child_path: &OsString) -> bool {
        if self.config.auto_download
            && let Some(fetcher) = &self.config.fetcher
        {
            log::info!("downloading solver service");
            if !fetcher.fetch(&self.config.solver_dir).await {
                // Not fatal on its own; the install check below decides.
                log::warn!("solver service download failed");
            }
        }

        if is_installed(&self.config.solver_dir) {
            return true;
        }

        if !self.config.auto_install {
            log::error!("solver service is not installed and auto-install is disabled");
            return false;
        }

        log::info!("installing solver service");
        if self.run_step(&self.config.install_command, child_path).await != Some(0) {
            log::error!("failed to install solver service");
            return false;
        }

        log::info!("building solver service");
        if self.run_step(&self.config.build_command, child_path).await != Some(0) {
            log::error!("failed to build solver service");
            return false;
        }

        // Future starts skip the reinstall once the sentinel exists.
        let sentinel = self.config.solver_dir.join(INSTALL_SENTINEL);
        if let Err(err) = std::fs::File::create(&sentinel) {
            log::error!("failed to write install sentinel {}: {err}", sentinel.display());
            return false;
        }

        true
    }

    /// Run an install/build step to completion, returning its exit code.
    async fn run_step(&self, argv: &[String], child_path: &OsString) -> Option<i32> {
        let mut command = self.command(argv, child_path)?;

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                log::error!("failed to spawn `{}`: {err}", argv.join(" "));
                return None;
            }
        };

        pump_output(&mut child);

        match child.wait().await {
            Ok(status) => status.code(),
            Err(err) => {
                log::error!("failed to wait for `{}`: {err}", argv.join(" "));
                None
            }
        }
    }

    async fn spawn_service(&self, child_path: &OsString) -> Option<Child> {
        if !is_installed(&self.config.solver_dir) {
            log::error!("solver service is not installed");
            return None;
        }

        log::info!("spawning solver service process");

        let mut child = match self.command(&self.config.serve_command, child_path)?.spawn() {
            Ok(child) => child,
            Err(err) => {
                log::error!("failed to spawn solver service: {err}");
                return None;
            }
        };

        pump_output(&mut child);

        // Give the process some time to fail so an immediately-exiting
        // service is distinguished from a running daemon.
        tokio::time::sleep(self.config.startup_grace).await;

        match child.try_wait() {
            Ok(None) => Some(child),
            Ok(Some(status)) => {
                log::error!("solver service exited during startup with {status}");
                None
            }
            Err(err) => {
                log::error!("failed to poll solver service process: {err}");
                None
            }
        }
    }

    fn command(&self, argv: &[String], child_path: &OsString) -> Option<Command> {
        let (program, args) = argv.split_first()?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.config.solver_dir)
            .env("PATH", child_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Some(command)
    }

    /// Executable search path for child processes: the current PATH extended
    /// (never replaced) with the configured tool directories, deduplicated.
    fn child_path(&self) -> OsString {
        let mut entries: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|value| std::env::split_paths(&value).collect())
            .unwrap_or_default();

        entries.push(self.config.solver_dir.clone());
        if let Some(runtime_dir) = &self.config.runtime_dir {
            entries.push(runtime_dir.clone());
        }

        let mut seen = HashSet::new();
        let unique: Vec<PathBuf> = entries
            .into_iter()
            .filter(|path| !path.as_os_str().is_empty() && seen.insert(path.clone()))
            .collect();

        std::env::join_paths(unique).unwrap_or_default()
    }
}

fn is_installed(solver_dir: &Path) -> bool {
    solver_dir.join(MANIFEST_FILE).is_file() && solver_dir.join(INSTALL_SENTINEL).is_file()
}

/// Forward child stdout/stderr line-by-line into the log without blocking
/// the supervisor.
fn pump_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, true));
    }
}

async fn forward_lines<R>(reader: R, is_err: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_err {
            log::error!("solver service: {line}");
        } else {
            log::info!("solver service: {line}");
        }
    }
}
