#![warn(missing_docs)]
//! # weblease-app
//!
//! ## Purpose
//! Wires configuration, the single-instance lease, and the session run for
//! the `weblease` desktop shell.
//!
//! ## Responsibilities
//! - Resolve the effective expiry policy from compiled defaults and
//!   startup-time environment overrides.
//! - Hold the single-instance lease for the lifetime of the process.
//! - Assemble the lifecycle configuration from OS facts and run one
//!   session to completion.
//!
//! ## Data flow
//! Defaults + env -> [`SessionSettings`] -> [`run_session`] ->
//! [`weblease_lifecycle::SessionEnd`].
//!
//! ## Error model
//! Startup failures are wrapped in [`AppError`]. Configuration overrides
//! never fail the process: unparseable values are recovered with compiled
//! defaults and reported as notes for the caller to log.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::datetime;
use weblease_cleanup::{CleanupError, JobRunner, host_os_family, resolve_install_dir};
use weblease_core::ExpiryPolicy;
use weblease_lifecycle::{
    LifecycleConfig, LifecycleController, LifecycleError, Presenter, ProbeWorker, SessionEnd,
    ShutdownFlag, StartOutcome, run_refresh_loop,
};
use weblease_probe::ConnectivityProbe;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("WEBLEASE_VERSION");

/// Compiled-in lease deadline used when no override is present.
pub const DEFAULT_DEADLINE: OffsetDateTime = datetime!(2025-12-31 0:00 UTC);

/// Compiled-in destructive-behavior toggle.
pub const DEFAULT_SELF_DESTRUCT: bool = true;

/// Default refresh tick period.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(5);

/// Fixed external target for the best-effort latency probe.
pub const LATENCY_TARGET: &str = "www.baidu.com:80";

/// Upper bound for one latency round trip.
pub const LATENCY_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline override variable, RFC 3339.
pub const ENV_EXPIRES_AT: &str = "WEBLEASE_EXPIRES_AT";

/// Destructive-behavior override variable.
pub const ENV_SELF_DESTRUCT: &str = "WEBLEASE_SELF_DESTRUCT";

/// Refresh period override variable, whole seconds.
pub const ENV_REFRESH_SECONDS: &str = "WEBLEASE_REFRESH_SECONDS";

/// File name of the single-instance lease.
pub const INSTANCE_LEASE_FILE: &str = "weblease.lock";

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Checks the destructive-behavior override.
///
/// Semantics:
/// - Unset => `default`.
/// - `0`, `false`, `off` (case-insensitive) => destruction disabled.
/// - Any other value => destruction enabled.
pub fn destruct_enabled_from_env(default: bool) -> bool {
    match std::env::var(ENV_SELF_DESTRUCT) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            !(normalized == "0" || normalized == "false" || normalized == "off")
        }
        Err(_) => default,
    }
}

/// Reads the deadline override, recovering to `default` on failure.
///
/// # Returns
/// The effective deadline plus an optional note describing a recovered
/// configuration failure, for the caller to log.
pub fn expiry_deadline_from_env(default: OffsetDateTime) -> (OffsetDateTime, Option<String>) {
    match std::env::var(ENV_EXPIRES_AT) {
        Ok(raw) => match OffsetDateTime::parse(raw.trim(), &Rfc3339) {
            Ok(deadline) => (deadline, None),
            Err(error) => (
                default,
                Some(format!(
                    "ignoring {ENV_EXPIRES_AT}={raw:?}: {error}; using compiled deadline"
                )),
            ),
        },
        Err(_) => (default, None),
    }
}

/// Reads the refresh period override; invalid or zero values fall back to
/// the default.
pub fn refresh_period_from_env(default: Duration) -> Duration {
    std::env::var(ENV_REFRESH_SECONDS)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|seconds| *seconds > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Effective session configuration plus recovered-configuration notes.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Lifecycle configuration handed to the controller.
    pub config: LifecycleConfig,
    /// Human-readable notes about recovered configuration failures.
    pub notes: Vec<String>,
}

/// Assembles the session configuration from defaults, environment
/// overrides, and OS facts.
///
/// # Errors
/// Returns [`AppError::Cleanup`] when the install directory cannot be
/// resolved from the running executable.
pub fn session_settings() -> Result<SessionSettings, AppError> {
    let mut notes = Vec::new();

    let (deadline, deadline_note) = expiry_deadline_from_env(DEFAULT_DEADLINE);
    if let Some(note) = deadline_note {
        notes.push(note);
    }

    let policy = ExpiryPolicy::new(deadline, destruct_enabled_from_env(DEFAULT_SELF_DESTRUCT));
    let config = LifecycleConfig {
        policy,
        refresh_period: refresh_period_from_env(DEFAULT_REFRESH_PERIOD),
        install_dir: resolve_install_dir()?,
        temp_dir: std::env::temp_dir(),
        os_family: host_os_family(),
    };

    Ok(SessionSettings { config, notes })
}

/// Exclusive single-instance lease held for the process lifetime.
///
/// The lease file records the owning pid and is removed on drop. A second
/// instance observing the file refuses to start.
#[derive(Debug)]
pub struct InstanceLease {
    path: PathBuf,
}

impl InstanceLease {
    /// Acquires the lease inside `dir`.
    ///
    /// # Errors
    /// Returns [`AppError::AlreadyRunning`] when the lease file already
    /// exists, [`AppError::Lease`] for other I/O failures.
    // TODO: recover stale leases by checking the recorded pid's liveness
    // before refusing startup.
    pub fn acquire(dir: &Path) -> Result<Self, AppError> {
        let path = dir.join(INSTANCE_LEASE_FILE);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|error| {
                if error.kind() == std::io::ErrorKind::AlreadyExists {
                    AppError::AlreadyRunning(path.clone())
                } else {
                    AppError::Lease(error)
                }
            })?;

        let _ = writeln!(file, "pid={}", std::process::id());
        Ok(Self { path })
    }

    /// Returns the lease file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Runs one complete session: startup gate, refresh loop, teardown.
///
/// Blocks until the lease expires or `shutdown` is set. The probe worker
/// is always joined before returning; a probe result arriving after
/// cancellation is discarded, never published.
///
/// # Errors
/// Returns [`AppError::Lifecycle`] for phase violations and worker
/// channel failures.
pub fn run_session(
    config: LifecycleConfig,
    probe: Arc<dyn ConnectivityProbe>,
    runner: Arc<dyn JobRunner>,
    presenter: Box<dyn Presenter>,
    shutdown: &ShutdownFlag,
) -> Result<SessionEnd, AppError> {
    let mut controller = LifecycleController::new(config, runner, presenter);
    if controller.start(OffsetDateTime::now_utc())? == StartOutcome::Expired {
        return Ok(SessionEnd::Expired);
    }

    let worker = ProbeWorker::spawn(probe)?;
    let end = run_refresh_loop(&mut controller, &worker, shutdown);

    // Drain-free teardown: the worker is joined and any event still queued
    // dies with the channel.
    worker.shutdown();
    Ok(end?)
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Another live instance holds the lease.
    #[error("another instance appears to be running (lease at {})", .0.display())]
    AlreadyRunning(PathBuf),
    /// Lease file could not be created for a reason other than existence.
    #[error("instance lease failed: {0}")]
    Lease(std::io::Error),
    /// Cleanup subsystem error.
    #[error("cleanup error: {0}")]
    Cleanup(#[from] CleanupError),
    /// Lifecycle subsystem error.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}
