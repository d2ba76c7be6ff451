#![warn(missing_docs)]
//! # weblease-cleanup
//!
//! ## Purpose
//! Synthesizes and launches the self-deleting cleanup script that removes
//! the application's install directory after lease expiry.
//!
//! ## Responsibilities
//! - Build deterministic, platform-specific script bodies and launch
//!   commands as a pure function of the inputs.
//! - Resolve the install directory from the running executable only.
//! - Execute a job behind a runner seam: write the script, mark it
//!   executable on non-Windows hosts, launch it detached, relinquish
//!   ownership.
//!
//! ## Data flow
//! The lifecycle controller resolves the install directory, asks
//! [`build_cleanup_job`] for a [`weblease_core::CleanupJob`], and hands it
//! to a [`JobRunner`] exactly once.
//!
//! ## Error model
//! Script synthesis refuses unsafe targets; write/permission/launch
//! failures are distinguishable [`CleanupError`] variants so the controller
//! can surface a fatal notice while still terminating.
//!
//! ## Security and privacy notes
//! The target directory is never taken from user input. Roots and relative
//! paths are rejected outright.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use thiserror::Error;
use weblease_core::{CleanupJob, LaunchCommand, OsFamily};

/// Grace period the script waits before removal, letting the parent process
/// exit and release file locks.
pub const CLEANUP_GRACE_SECONDS: u32 = 3;

/// Returns the OS family of the running host.
pub fn host_os_family() -> OsFamily {
    if cfg!(target_os = "windows") {
        OsFamily::Windows
    } else if cfg!(target_os = "macos") {
        OsFamily::MacOs
    } else {
        OsFamily::Linux
    }
}

/// Returns the deterministic script file name for an OS family.
pub fn script_file_name(os_family: OsFamily) -> &'static str {
    match os_family {
        OsFamily::Windows => "cleanup.bat",
        OsFamily::MacOs => "cleanup.command",
        OsFamily::Linux => "cleanup.sh",
    }
}

/// Resolves the install directory from the running executable's location.
///
/// This is the only sanctioned source for a cleanup target.
///
/// # Errors
/// Returns [`CleanupError::InstallDirResolution`] when the executable path
/// or its parent directory cannot be determined.
pub fn resolve_install_dir() -> Result<PathBuf, CleanupError> {
    let exe_path = std::env::current_exe().map_err(|error| {
        CleanupError::InstallDirResolution(format!("unable to resolve executable path: {error}"))
    })?;
    let install_dir = exe_path.parent().ok_or_else(|| {
        CleanupError::InstallDirResolution("executable parent directory is missing".to_string())
    })?;

    Ok(install_dir.to_path_buf())
}

/// Builds the one-shot cleanup job for the given platform and directories.
///
/// # Semantics
/// Deterministic: identical inputs always yield byte-identical script
/// bodies. The script sleeps [`CLEANUP_GRACE_SECONDS`], force-removes the
/// install directory recursively, and removes itself.
///
/// # Errors
/// Returns [`CleanupError::UnsafeTarget`] for relative paths and
/// filesystem roots.
pub fn build_cleanup_job(
    os_family: OsFamily,
    install_dir: &Path,
    temp_dir: &Path,
) -> Result<CleanupJob, CleanupError> {
    if !install_dir.is_absolute() || install_dir.parent().is_none() {
        return Err(CleanupError::UnsafeTarget(install_dir.to_path_buf()));
    }

    let script_path = temp_dir.join(script_file_name(os_family));
    let script_body = match os_family {
        OsFamily::Windows => format!(
            "@echo off\r\ntimeout /t {grace} /nobreak >nul\r\nrmdir /s /q \"{install}\"\r\ndel \"{script}\"\r\n",
            grace = CLEANUP_GRACE_SECONDS,
            install = install_dir.display(),
            script = script_path.display(),
        ),
        OsFamily::MacOs | OsFamily::Linux => format!(
            "#!/bin/sh\nsleep {grace}\nrm -rf \"{install}\"\nrm -- \"$0\"\n",
            grace = CLEANUP_GRACE_SECONDS,
            install = install_dir.display(),
        ),
    };

    let launch_command = match os_family {
        OsFamily::Windows => LaunchCommand {
            program: "cmd".to_string(),
            args: vec![
                "/c".to_string(),
                "start".to_string(),
                String::new(),
                "cmd".to_string(),
                "/c".to_string(),
                script_path.display().to_string(),
            ],
        },
        OsFamily::MacOs => LaunchCommand {
            program: "open".to_string(),
            args: vec![
                "-a".to_string(),
                "Terminal".to_string(),
                script_path.display().to_string(),
            ],
        },
        // Direct shell launch; destruction must not depend on a display
        // server or an installed terminal emulator.
        OsFamily::Linux => LaunchCommand {
            program: "/bin/sh".to_string(),
            args: vec![script_path.display().to_string()],
        },
    };

    Ok(CleanupJob {
        target_directory: install_dir.to_path_buf(),
        script_path,
        script_body,
        launch_command,
        os_family,
    })
}

/// Trait implemented by cleanup job executors.
pub trait JobRunner: Send + Sync {
    /// Consumes one job: writes the script, prepares permissions, launches
    /// it detached.
    ///
    /// # Errors
    /// Returns a distinguishable [`CleanupError`] variant for write,
    /// permission, and launch failures.
    fn run(&self, job: &CleanupJob) -> Result<(), CleanupError>;
}

/// Runner that writes the script and spawns it fire-and-forget.
///
/// The spawned child handle is dropped immediately; the script is expected
/// to outlive the parent process and remove its files after exit.
#[derive(Debug, Default)]
pub struct DetachedJobRunner;

impl JobRunner for DetachedJobRunner {
    fn run(&self, job: &CleanupJob) -> Result<(), CleanupError> {
        fs::write(&job.script_path, &job.script_body).map_err(CleanupError::ScriptWrite)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let permissions = fs::Permissions::from_mode(0o755);
            fs::set_permissions(&job.script_path, permissions)
                .map_err(CleanupError::ScriptPermissions)?;
        }

        let mut command = Command::new(&job.launch_command.program);
        command
            .args(&job.launch_command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            use windows_sys::Win32::System::Threading::{
                CREATE_NEW_PROCESS_GROUP, DETACHED_PROCESS,
            };

            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = command.spawn().map_err(CleanupError::Launch)?;
        // Relinquish ownership: the job is not supervised or retried.
        drop(child);
        Ok(())
    }
}

/// Fixture runner recording every job it receives.
#[derive(Debug, Default)]
pub struct RecordingJobRunner {
    jobs: Mutex<Vec<CleanupJob>>,
    fail: bool,
}

impl RecordingJobRunner {
    /// Runner that accepts every job.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner that fails every job as if the script write failed.
    pub fn failing() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Returns the jobs received so far.
    pub fn jobs(&self) -> Vec<CleanupJob> {
        self.jobs
            .lock()
            .map(|jobs| jobs.clone())
            .unwrap_or_default()
    }
}

impl JobRunner for RecordingJobRunner {
    fn run(&self, job: &CleanupJob) -> Result<(), CleanupError> {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(job.clone());
        }

        if self.fail {
            return Err(CleanupError::ScriptWrite(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "recording runner configured to fail",
            )));
        }

        Ok(())
    }
}

/// Cleanup layer error type.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// Executable path or parent directory could not be determined.
    #[error("install directory resolution failed: {0}")]
    InstallDirResolution(String),
    /// Target directory is relative or a filesystem root.
    #[error("refusing unsafe cleanup target: {}", .0.display())]
    UnsafeTarget(PathBuf),
    /// Script file could not be written.
    #[error("cleanup script write failed: {0}")]
    ScriptWrite(std::io::Error),
    /// Executable bit could not be set.
    #[error("cleanup script permission update failed: {0}")]
    ScriptPermissions(std::io::Error),
    /// Detached launch failed.
    #[error("cleanup script launch failed: {0}")]
    Launch(std::io::Error),
}

#[cfg(test)]
mod tests {
    //! Unit tests for script synthesis.

    use super::*;

    fn linux_fixture() -> CleanupJob {
        build_cleanup_job(
            OsFamily::Linux,
            Path::new("/opt/weblease"),
            Path::new("/tmp"),
        )
        .expect("job should build")
    }

    #[test]
    fn synthesis_is_deterministic() {
        let first = linux_fixture();
        let second = linux_fixture();
        assert_eq!(first.script_body, second.script_body);
        assert_eq!(first, second);
    }

    #[test]
    fn unix_script_sleeps_removes_and_self_deletes() {
        let job = linux_fixture();
        assert_eq!(job.script_path, PathBuf::from("/tmp/cleanup.sh"));
        assert!(job.script_body.starts_with("#!/bin/sh\n"));
        assert!(job.script_body.contains("sleep 3\n"));
        assert!(job.script_body.contains("rm -rf \"/opt/weblease\"\n"));
        assert!(job.script_body.contains("rm -- \"$0\"\n"));
    }

    #[test]
    fn windows_script_uses_batch_idioms() {
        let job = build_cleanup_job(
            OsFamily::Windows,
            Path::new("/opt/weblease"),
            Path::new("/tmp"),
        )
        .expect("job should build");

        assert!(job.script_body.starts_with("@echo off\r\n"));
        assert!(job.script_body.contains("timeout /t 3 /nobreak >nul"));
        assert!(job.script_body.contains("rmdir /s /q"));
        assert!(job.script_body.contains("del "));
        assert_eq!(job.launch_command.program, "cmd");
    }

    #[test]
    fn macos_launches_through_terminal() {
        let job = build_cleanup_job(
            OsFamily::MacOs,
            Path::new("/opt/weblease"),
            Path::new("/tmp"),
        )
        .expect("job should build");

        assert_eq!(job.script_path, PathBuf::from("/tmp/cleanup.command"));
        assert_eq!(job.launch_command.program, "open");
        assert_eq!(
            job.launch_command.args,
            vec!["-a", "Terminal", "/tmp/cleanup.command"]
        );
    }

    #[test]
    fn linux_launches_directly_through_sh() {
        let job = linux_fixture();
        assert_eq!(job.launch_command.program, "/bin/sh");
        assert_eq!(job.launch_command.args, vec!["/tmp/cleanup.sh"]);
    }

    #[test]
    fn roots_and_relative_targets_are_refused() {
        let root = build_cleanup_job(OsFamily::Linux, Path::new("/"), Path::new("/tmp"));
        assert!(matches!(root, Err(CleanupError::UnsafeTarget(_))));

        let relative =
            build_cleanup_job(OsFamily::Linux, Path::new("opt/weblease"), Path::new("/tmp"));
        assert!(matches!(relative, Err(CleanupError::UnsafeTarget(_))));
    }

    #[test]
    fn write_failure_is_distinguishable() {
        let mut job = linux_fixture();
        job.script_path = PathBuf::from("/nonexistent-weblease-dir/cleanup.sh");

        let result = DetachedJobRunner.run(&job);
        assert!(matches!(result, Err(CleanupError::ScriptWrite(_))));
    }
}
