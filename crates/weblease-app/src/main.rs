#![warn(missing_docs)]
//! # weblease-app binary
//!
//! Desktop entry point for weblease: acquires the single-instance lease,
//! assembles the session from configuration, and runs the refresh loop
//! until the lease expires or the shell closes.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use weblease_app::{
    AppError, DEFAULT_SELF_DESTRUCT, InstanceLease, LATENCY_TARGET, LATENCY_TIMEOUT, app_version,
    destruct_enabled_from_env, run_session, session_settings,
};
use weblease_cleanup::DetachedJobRunner;
use weblease_core::StatusSnapshot;
use weblease_lifecycle::{Presenter, SessionEnd, ShutdownFlag};
use weblease_probe::{EnvironmentProbe, LatencyProbe, SysinfoInterfaceSource, TcpLatencyProbe};
use weblease_ui::{MenuModel, ShortcutRegistry, shortcuts};

/// CLI entry point.
fn main() {
    let logger = Arc::new(RunLogger::new());
    if let Err(error) = run(&logger) {
        logger.write_line("ERROR", "bootstrap", "fatal", &error.to_string());
        eprintln!("weblease failed: {error}");
        std::process::exit(1);
    }
}

fn run(logger: &Arc<RunLogger>) -> Result<(), AppError> {
    logger.write_line(
        "INFO",
        "bootstrap",
        "startup",
        &format!(
            "version={} destruct_enabled={}",
            app_version(),
            destruct_enabled_from_env(DEFAULT_SELF_DESTRUCT)
        ),
    );

    let _lease = InstanceLease::acquire(&std::env::temp_dir())?;

    let settings = session_settings()?;
    for note in &settings.notes {
        logger.write_line("WARN", "config", "recovered", note);
    }

    let latency = match TcpLatencyProbe::new(LATENCY_TARGET, LATENCY_TIMEOUT) {
        Ok(probe) => Some(Arc::new(probe) as Arc<dyn LatencyProbe>),
        Err(error) => {
            logger.write_line("WARN", "probe", "latency_disabled", &error.to_string());
            None
        }
    };
    let probe = EnvironmentProbe::new(Arc::new(SysinfoInterfaceSource), latency);

    let shutdown = ShutdownFlag::new();
    let presenter = MenuPresenter::new(app_version(), Arc::clone(logger), shutdown.clone());

    let end = run_session(
        settings.config,
        Arc::new(probe),
        Arc::new(DetachedJobRunner),
        Box::new(presenter),
        &shutdown,
    )?;

    match end {
        SessionEnd::Expired => {
            logger.write_line("INFO", "session", "expired", "destruction launched; exiting")
        }
        SessionEnd::Closed => {
            logger.write_line("INFO", "session", "closed", "session closed by shell")
        }
    }

    Ok(())
}

/// Presenter rendering menu lines and snapshots into the run log.
struct MenuPresenter {
    menu: MenuModel,
    shortcuts: ShortcutRegistry,
    logger: Arc<RunLogger>,
    shutdown: ShutdownFlag,
}

impl MenuPresenter {
    fn new(version: &str, logger: Arc<RunLogger>, shutdown: ShutdownFlag) -> Self {
        let mut registry = ShortcutRegistry::new();
        for accelerator in [
            shortcuts::REFRESH,
            shortcuts::DEV_TOOLS,
            shortcuts::ZOOM_IN,
            shortcuts::ZOOM_OUT,
            shortcuts::ZOOM_RESET,
            shortcuts::QUIT,
        ] {
            registry.register(accelerator);
        }

        Self {
            menu: MenuModel::new(version),
            shortcuts: registry,
            logger,
            shutdown,
        }
    }
}

impl Presenter for MenuPresenter {
    fn on_snapshot_update(&mut self, snapshot: &StatusSnapshot) {
        self.menu.apply_snapshot(snapshot);
        self.logger.write_line(
            "INFO",
            "menu",
            "refresh",
            &format!(
                "{} | {} | {}",
                self.menu.network_line(),
                self.menu.version_line(),
                self.menu.countdown_line()
            ),
        );

        match snapshot.to_json_bytes() {
            Ok(bytes) => {
                self.logger.write_line(
                    "INFO",
                    "menu",
                    "snapshot",
                    &String::from_utf8_lossy(&bytes),
                );
            }
            Err(error) => {
                self.logger
                    .write_line("ERROR", "menu", "snapshot_encode", &error.to_string());
            }
        }
    }

    fn on_fatal_notice(&mut self, title: &str, message: &str) {
        self.logger
            .write_line("ERROR", "lifecycle", "fatal_notice", &format!("{title}: {message}"));
        eprintln!("{title}: {message}");
    }

    fn request_exit(&mut self) {
        self.shortcuts.release_all();
        self.shutdown.set();
    }
}

impl Drop for MenuPresenter {
    fn drop(&mut self) {
        // Registered shortcuts must not outlive the window they serve.
        self.shortcuts.release_all();
    }
}

/// Per-run append-only logger with stderr fallback.
struct RunLogger {
    sink: Mutex<LogSink>,
}

enum LogSink {
    File(File),
    Stderr,
}

impl RunLogger {
    fn new() -> Self {
        let sink = match Self::open_run_file() {
            Ok(file) => LogSink::File(file),
            Err(_) => LogSink::Stderr,
        };

        Self {
            sink: Mutex::new(sink),
        }
    }

    fn open_run_file() -> Result<File, String> {
        let exe_path = std::env::current_exe()
            .map_err(|error| format!("unable to resolve executable path: {error}"))?;
        let exe_dir = exe_path
            .parent()
            .ok_or_else(|| "executable parent directory is missing".to_string())?;

        let path = exe_dir.join(format!("{}_log.txt", timestamp_compact_utc()));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|error| format!("unable to create log file '{}': {error}", path.display()))
    }

    fn write_line(&self, level: &str, stage: &str, action: &str, detail: &str) {
        let timestamp = timestamp_compact_utc();
        let line = format!("{timestamp} | {level} | {stage} | {action} | {detail}\n");

        if let Ok(mut sink) = self.sink.lock() {
            match &mut *sink {
                LogSink::File(file) => {
                    let _ = file.write_all(line.as_bytes());
                    if level == "ERROR" {
                        let _ = file.flush();
                    }
                }
                LogSink::Stderr => {
                    let _ = std::io::stderr().write_all(line.as_bytes());
                }
            }
        }
    }
}

fn timestamp_compact_utc() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}
