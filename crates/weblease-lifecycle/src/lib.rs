#![warn(missing_docs)]
//! # weblease-lifecycle
//!
//! ## Purpose
//! Orchestrates expiry gating, destruction, and the recurring refresh loop
//! for `weblease`.
//!
//! ## Responsibilities
//! - Drive the lifecycle state machine from explicit `now` values.
//! - Gate session startup on the expiry oracle.
//! - Run the destruction path exactly once per process lifetime.
//! - Dispatch connectivity probes to a worker thread and publish combined
//!   status snapshots to the presenter.
//! - Discard probe results that arrive after cancellation.
//!
//! ## Data flow
//! Oracle/Probe -> [`LifecycleController`] -> [`Presenter`]. The controller
//! never polls the presentation layer and the presentation layer never
//! polls the controller.
//!
//! ## Ownership and lifetimes
//! The controller owns all mutable session state (phase, probe generation,
//! in-flight flag, latched expiry) as instance fields; nothing here is
//! process-global. The probe worker owns its backend behind `Arc`.
//!
//! ## Error model
//! Steady-state refresh failures degrade and retry next tick.
//! Destruction-path failures surface through [`Presenter::on_fatal_notice`]
//! without blocking termination. Channel and spawn failures are
//! [`LifecycleError`] values.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use time::OffsetDateTime;
use weblease_cleanup::{JobRunner, build_cleanup_job};
use weblease_core::{
    ConnectivitySnapshot, ExpiryPolicy, OsFamily, RemainingTime, StatusSnapshot, evaluate,
};
use weblease_probe::ConnectivityProbe;

/// Presentation-layer seam consumed by the controller.
///
/// Implementations render snapshots, show fatal notices, and honor exit
/// requests; they must not block the session loop.
pub trait Presenter {
    /// Applies the latest combined status snapshot, superseding the prior
    /// one. Called synchronously from the session loop.
    fn on_snapshot_update(&mut self, snapshot: &StatusSnapshot);

    /// Shows a user-visible fatal notice.
    fn on_fatal_notice(&mut self, title: &str, message: &str);

    /// Asks the host to terminate the process.
    fn request_exit(&mut self);
}

/// Lifecycle phase of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Process started, expiry not yet checked.
    Starting,
    /// Normal operation with the refresh loop active.
    Running,
    /// Expiry observed; destruction pending.
    Expired,
    /// Cleanup job being written and launched.
    Destructing,
    /// Session cancelled by the presentation layer.
    Terminating,
    /// Terminal state after destruction or cancellation.
    Terminated,
}

impl LifecyclePhase {
    /// Returns `true` for phases that accept no further ticks.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecyclePhase::Terminating | LifecyclePhase::Terminated
        )
    }
}

/// Configuration fixed for the lifetime of one controller.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Immutable expiry policy.
    pub policy: ExpiryPolicy,
    /// Refresh tick period.
    pub refresh_period: Duration,
    /// Install directory targeted by the destruction path.
    ///
    /// # Invariant
    /// Must be derived from the running executable's location (see
    /// `weblease_cleanup::resolve_install_dir`), never from user input.
    pub install_dir: PathBuf,
    /// Writable temp directory for the cleanup script.
    pub temp_dir: PathBuf,
    /// Host OS family for script synthesis.
    pub os_family: OsFamily,
}

/// Outcome of the startup gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Lease valid (or destruction disabled); session may run.
    Running,
    /// Lease expired; destruction ran and the process must exit.
    Expired,
}

/// Outcome of one refresh tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Controller is not running; tick ignored.
    Idle,
    /// Previous probe still in flight; no new dispatch.
    AwaitingProbe,
    /// Caller should dispatch a probe tagged with this generation.
    DispatchProbe {
        /// Generation the result must carry to be accepted.
        generation: u64,
    },
    /// Expiry observed mid-session; destruction ran.
    Expired,
}

/// Why a session loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Lease expired; destruction path completed.
    Expired,
    /// Presentation layer closed the session.
    Closed,
}

/// Orchestrating state machine tying expiry, destruction, and refresh
/// together.
pub struct LifecycleController {
    config: LifecycleConfig,
    runner: Arc<dyn JobRunner>,
    presenter: Box<dyn Presenter>,
    phase: LifecyclePhase,
    generation: u64,
    probe_in_flight: bool,
    expired_latched: bool,
    destructed: bool,
    remaining: RemainingTime,
}

impl LifecycleController {
    /// Creates a controller in the `Starting` phase.
    pub fn new(
        config: LifecycleConfig,
        runner: Arc<dyn JobRunner>,
        presenter: Box<dyn Presenter>,
    ) -> Self {
        Self {
            config,
            runner,
            presenter,
            phase: LifecyclePhase::Starting,
            generation: 0,
            probe_in_flight: false,
            expired_latched: false,
            destructed: false,
            remaining: RemainingTime::Expired,
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Returns the configured refresh period.
    pub fn refresh_period(&self) -> Duration {
        self.config.refresh_period
    }

    /// Runs the startup gate.
    ///
    /// Expired deadline with destruction enabled runs the destruction path
    /// and ends the session; otherwise the controller enters `Running`.
    ///
    /// # Errors
    /// Returns [`LifecycleError::PhaseMismatch`] unless called in
    /// `Starting`.
    pub fn start(&mut self, now: OffsetDateTime) -> Result<StartOutcome, LifecycleError> {
        if self.phase != LifecyclePhase::Starting {
            return Err(LifecycleError::PhaseMismatch {
                expected: LifecyclePhase::Starting,
                actual: self.phase,
            });
        }

        self.remaining = self.evaluate_latched(now);
        if self.expired_latched && self.config.policy.destruct_enabled {
            self.destruct();
            return Ok(StartOutcome::Expired);
        }

        self.phase = LifecyclePhase::Running;
        Ok(StartOutcome::Running)
    }

    /// Processes one refresh tick.
    ///
    /// Re-evaluates the oracle first; mid-session expiry transitions
    /// immediately to the destruction path. Otherwise asks the caller to
    /// dispatch a probe unless one is already in flight.
    pub fn on_tick(&mut self, now: OffsetDateTime) -> TickOutcome {
        if self.phase != LifecyclePhase::Running {
            return TickOutcome::Idle;
        }

        self.remaining = self.evaluate_latched(now);
        if self.expired_latched && self.config.policy.destruct_enabled {
            self.destruct();
            return TickOutcome::Expired;
        }

        if self.probe_in_flight {
            return TickOutcome::AwaitingProbe;
        }

        self.probe_in_flight = true;
        TickOutcome::DispatchProbe {
            generation: self.generation,
        }
    }

    /// Applies one probe result.
    ///
    /// Results from a cancelled or superseded generation are discarded;
    /// accepted results are published to the presenter synchronously,
    /// combined with the remaining time evaluated on the dispatching tick.
    pub fn on_probe_result(&mut self, generation: u64, connectivity: ConnectivitySnapshot) {
        if self.phase != LifecyclePhase::Running
            || generation != self.generation
            || !self.probe_in_flight
        {
            return;
        }

        self.probe_in_flight = false;
        let snapshot = StatusSnapshot {
            connectivity,
            remaining: self.remaining,
        };
        self.presenter.on_snapshot_update(&snapshot);
    }

    /// Cancels the refresh loop when the owning window goes away.
    ///
    /// Guarantees no further snapshot updates: the generation is bumped so
    /// an in-flight probe result is discarded on arrival.
    pub fn cancel(&mut self) {
        if self.phase.is_terminal() {
            return;
        }

        self.generation = self.generation.wrapping_add(1);
        self.probe_in_flight = false;
        self.phase = LifecyclePhase::Terminating;
    }

    fn evaluate_latched(&mut self, now: OffsetDateTime) -> RemainingTime {
        // Invariant:
        // - Once expired, remaining time never recovers within this process.
        if self.expired_latched {
            return RemainingTime::Expired;
        }

        let remaining = evaluate(now, self.config.policy.deadline);
        if remaining.is_expired() {
            self.expired_latched = true;
        }
        remaining
    }

    fn destruct(&mut self) {
        if self.destructed {
            self.phase = LifecyclePhase::Terminated;
            return;
        }

        self.destructed = true;
        self.phase = LifecyclePhase::Expired;
        self.presenter.on_fatal_notice(
            "Application expired",
            "The lease deadline has passed; the application will now remove itself.",
        );

        self.phase = LifecyclePhase::Destructing;
        let job = build_cleanup_job(
            self.config.os_family,
            &self.config.install_dir,
            &self.config.temp_dir,
        );
        let launched = job.and_then(|job| self.runner.run(&job));
        if let Err(error) = launched {
            self.presenter.on_fatal_notice(
                "Self-removal failed",
                &format!("{error}; please remove the install directory manually"),
            );
        }

        // Exit is requested regardless of the cleanup job outcome; the
        // process must not stay alive in an expired state.
        self.phase = LifecyclePhase::Terminated;
        self.presenter.request_exit();
    }
}

/// Command accepted by the probe worker thread.
enum ProbeCommand {
    Probe { generation: u64 },
    Shutdown,
}

/// Event emitted by the probe worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    /// A snapshot computed for the tagged generation.
    Snapshot {
        /// Generation copied from the dispatching tick.
        generation: u64,
        /// Connectivity facts computed on the worker.
        connectivity: ConnectivitySnapshot,
    },
}

/// Worker thread running connectivity probes off the session loop.
///
/// One probe is in flight at a time; completions re-enter the loop as
/// [`ProbeEvent`] values rather than blocking it.
pub struct ProbeWorker {
    command_tx: Sender<ProbeCommand>,
    event_rx: Receiver<ProbeEvent>,
    join: Option<JoinHandle<()>>,
}

impl ProbeWorker {
    /// Spawns the worker thread over the given probe backend.
    ///
    /// # Errors
    /// Returns [`LifecycleError::WorkerSpawn`] when the thread cannot be
    /// created.
    pub fn spawn(probe: Arc<dyn ConnectivityProbe>) -> Result<Self, LifecycleError> {
        let (command_tx, command_rx) = mpsc::channel::<ProbeCommand>();
        let (event_tx, event_rx) = mpsc::channel::<ProbeEvent>();

        let join = std::thread::Builder::new()
            .name("weblease-probe-worker".to_string())
            .spawn(move || {
                while let Ok(command) = command_rx.recv() {
                    match command {
                        ProbeCommand::Probe { generation } => {
                            let connectivity = probe.snapshot();
                            if event_tx
                                .send(ProbeEvent::Snapshot {
                                    generation,
                                    connectivity,
                                })
                                .is_err()
                            {
                                break;
                            }
                        }
                        ProbeCommand::Shutdown => break,
                    }
                }
            })
            .map_err(LifecycleError::WorkerSpawn)?;

        Ok(Self {
            command_tx,
            event_rx,
            join: Some(join),
        })
    }

    /// Requests one probe tagged with `generation`.
    ///
    /// # Errors
    /// Returns [`LifecycleError::WorkerChannel`] when the worker is gone.
    pub fn request(&self, generation: u64) -> Result<(), LifecycleError> {
        self.command_tx
            .send(ProbeCommand::Probe { generation })
            .map_err(|_| LifecycleError::WorkerChannel)
    }

    /// Waits up to `timeout` for the next event.
    ///
    /// # Errors
    /// Returns [`LifecycleError::WorkerChannel`] when the worker is gone.
    pub fn poll_event(&self, timeout: Duration) -> Result<Option<ProbeEvent>, LifecycleError> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LifecycleError::WorkerChannel),
        }
    }

    /// Stops the worker and joins its thread.
    pub fn shutdown(mut self) {
        let _ = self.command_tx.send(ProbeCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Cooperative shutdown signal shared with the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<std::sync::atomic::AtomicBool>);

impl ShutdownFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the session for shutdown.
    pub fn set(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Returns `true` once shutdown has been requested.
    pub fn is_set(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Runs the fixed-cadence refresh loop until expiry or shutdown.
///
/// The first tick fires immediately, matching the original one-shot menu
/// refresh before the recurring timer. Probe completions are applied
/// between ticks; the loop thread is never blocked longer than the time to
/// the next tick.
///
/// # Errors
/// Returns [`LifecycleError::PhaseMismatch`] unless the controller is
/// `Running`, and [`LifecycleError::WorkerChannel`] when the probe worker
/// dies unexpectedly.
pub fn run_refresh_loop(
    controller: &mut LifecycleController,
    worker: &ProbeWorker,
    shutdown: &ShutdownFlag,
) -> Result<SessionEnd, LifecycleError> {
    if controller.phase() != LifecyclePhase::Running {
        return Err(LifecycleError::PhaseMismatch {
            expected: LifecyclePhase::Running,
            actual: controller.phase(),
        });
    }

    let period = controller.refresh_period();
    let mut next_tick = Instant::now();

    loop {
        if shutdown.is_set() {
            controller.cancel();
            return Ok(SessionEnd::Closed);
        }

        let now_instant = Instant::now();
        if now_instant >= next_tick {
            match controller.on_tick(OffsetDateTime::now_utc()) {
                TickOutcome::Expired => return Ok(SessionEnd::Expired),
                TickOutcome::DispatchProbe { generation } => worker.request(generation)?,
                TickOutcome::AwaitingProbe | TickOutcome::Idle => {}
            }
            next_tick += period;
            continue;
        }

        if let Some(ProbeEvent::Snapshot {
            generation,
            connectivity,
        }) = worker.poll_event(next_tick - now_instant)?
        {
            controller.on_probe_result(generation, connectivity);
        }
    }
}

/// Lifecycle layer error type.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Operation called in the wrong phase.
    #[error("operation requires phase {expected:?}, current phase is {actual:?}")]
    PhaseMismatch {
        /// Phase the operation requires.
        expected: LifecyclePhase,
        /// Phase the controller was in.
        actual: LifecyclePhase,
    },
    /// Probe worker thread could not be created.
    #[error("probe worker thread failed to start: {0}")]
    WorkerSpawn(std::io::Error),
    /// Probe worker channel closed unexpectedly.
    #[error("probe worker channel closed unexpectedly")]
    WorkerChannel,
}

#[cfg(test)]
mod tests {
    //! Unit tests for controller transitions and result discarding.

    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;

    use time::macros::datetime;
    use weblease_cleanup::RecordingJobRunner;
    use weblease_core::LatencyReading;
    use weblease_probe::{EnvironmentProbe, StaticInterfaceSource};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum PresenterEvent {
        Snapshot(StatusSnapshot),
        Fatal(String),
        Exit,
    }

    #[derive(Default)]
    struct RecordingPresenter {
        events: Rc<RefCell<Vec<PresenterEvent>>>,
    }

    impl RecordingPresenter {
        fn shared() -> (Self, Rc<RefCell<Vec<PresenterEvent>>>) {
            let events = Rc::new(RefCell::new(Vec::new()));
            (
                Self {
                    events: Rc::clone(&events),
                },
                events,
            )
        }
    }

    impl Presenter for RecordingPresenter {
        fn on_snapshot_update(&mut self, snapshot: &StatusSnapshot) {
            self.events
                .borrow_mut()
                .push(PresenterEvent::Snapshot(snapshot.clone()));
        }

        fn on_fatal_notice(&mut self, title: &str, _message: &str) {
            self.events
                .borrow_mut()
                .push(PresenterEvent::Fatal(title.to_string()));
        }

        fn request_exit(&mut self) {
            self.events.borrow_mut().push(PresenterEvent::Exit);
        }
    }

    fn config(deadline: OffsetDateTime, destruct_enabled: bool) -> LifecycleConfig {
        LifecycleConfig {
            policy: ExpiryPolicy::new(deadline, destruct_enabled),
            refresh_period: Duration::from_secs(5),
            install_dir: Path::new("/opt/weblease").to_path_buf(),
            temp_dir: Path::new("/tmp").to_path_buf(),
            os_family: OsFamily::Linux,
        }
    }

    fn controller(
        deadline: OffsetDateTime,
        destruct_enabled: bool,
    ) -> (
        LifecycleController,
        Arc<RecordingJobRunner>,
        Rc<RefCell<Vec<PresenterEvent>>>,
    ) {
        let runner = Arc::new(RecordingJobRunner::new());
        let (presenter, events) = RecordingPresenter::shared();
        let controller = LifecycleController::new(
            config(deadline, destruct_enabled),
            Arc::clone(&runner) as Arc<dyn JobRunner>,
            Box::new(presenter),
        );
        (controller, runner, events)
    }

    #[test]
    fn startup_before_deadline_enters_running() {
        let (mut controller, runner, _events) =
            controller(datetime!(2025-12-31 0:00 UTC), true);

        let outcome = controller
            .start(datetime!(2025-12-30 0:00 UTC))
            .expect("start in Starting phase");
        assert_eq!(outcome, StartOutcome::Running);
        assert_eq!(controller.phase(), LifecyclePhase::Running);
        assert!(runner.jobs().is_empty());
    }

    #[test]
    fn startup_after_deadline_destructs_once_and_exits() {
        let (mut controller, runner, events) =
            controller(datetime!(2025-12-31 0:00 UTC), true);

        let outcome = controller
            .start(datetime!(2026-01-01 0:00 UTC))
            .expect("start in Starting phase");
        assert_eq!(outcome, StartOutcome::Expired);
        assert_eq!(controller.phase(), LifecyclePhase::Terminated);
        assert_eq!(runner.jobs().len(), 1);

        let events = events.borrow();
        assert!(matches!(events[0], PresenterEvent::Fatal(_)));
        assert_eq!(*events.last().expect("events recorded"), PresenterEvent::Exit);
    }

    #[test]
    fn startup_after_deadline_with_destruct_disabled_runs() {
        let (mut controller, runner, _events) =
            controller(datetime!(2025-12-31 0:00 UTC), false);

        let outcome = controller
            .start(datetime!(2026-01-01 0:00 UTC))
            .expect("start in Starting phase");
        assert_eq!(outcome, StartOutcome::Running);
        assert!(runner.jobs().is_empty());
    }

    #[test]
    fn mid_session_expiry_is_terminal() {
        let (mut controller, runner, _events) =
            controller(datetime!(2025-12-31 0:00 UTC), true);
        controller
            .start(datetime!(2025-12-30 23:59:58 UTC))
            .expect("start in Starting phase");

        let outcome = controller.on_tick(datetime!(2025-12-31 0:00:02 UTC));
        assert_eq!(outcome, TickOutcome::Expired);
        assert_eq!(controller.phase(), LifecyclePhase::Terminated);
        assert_eq!(runner.jobs().len(), 1);

        // No later tick may observe Running again, and no second job may be
        // produced.
        let outcome = controller.on_tick(datetime!(2025-12-31 0:00:07 UTC));
        assert_eq!(outcome, TickOutcome::Idle);
        assert_eq!(runner.jobs().len(), 1);
    }

    #[test]
    fn tick_dispatches_probe_and_publishes_combined_snapshot() {
        let (mut controller, _runner, events) =
            controller(datetime!(2025-12-31 0:00 UTC), true);
        controller
            .start(datetime!(2025-12-30 0:00 UTC))
            .expect("start in Starting phase");

        let outcome = controller.on_tick(datetime!(2025-12-30 0:00 UTC));
        let TickOutcome::DispatchProbe { generation } = outcome else {
            panic!("expected probe dispatch, got {outcome:?}");
        };

        let connectivity =
            ConnectivitySnapshot::online("192.168.1.10", LatencyReading::Measured(20));
        controller.on_probe_result(generation, connectivity.clone());

        let events = events.borrow();
        assert_eq!(
            *events.first().expect("snapshot published"),
            PresenterEvent::Snapshot(StatusSnapshot {
                connectivity,
                remaining: RemainingTime::Remaining {
                    days: 1,
                    hours: 0,
                    minutes: 0,
                    seconds: 0
                },
            })
        );
    }

    #[test]
    fn tick_with_probe_in_flight_does_not_dispatch_again() {
        let (mut controller, _runner, _events) =
            controller(datetime!(2025-12-31 0:00 UTC), true);
        controller
            .start(datetime!(2025-12-30 0:00 UTC))
            .expect("start in Starting phase");

        let first = controller.on_tick(datetime!(2025-12-30 0:00 UTC));
        assert!(matches!(first, TickOutcome::DispatchProbe { .. }));

        let second = controller.on_tick(datetime!(2025-12-30 0:00:05 UTC));
        assert_eq!(second, TickOutcome::AwaitingProbe);
    }

    #[test]
    fn cancelled_session_discards_late_probe_results() {
        let (mut controller, _runner, events) =
            controller(datetime!(2025-12-31 0:00 UTC), true);
        controller
            .start(datetime!(2025-12-30 0:00 UTC))
            .expect("start in Starting phase");

        let TickOutcome::DispatchProbe { generation } =
            controller.on_tick(datetime!(2025-12-30 0:00 UTC))
        else {
            panic!("expected probe dispatch");
        };

        controller.cancel();
        assert_eq!(controller.phase(), LifecyclePhase::Terminating);

        controller.on_probe_result(generation, ConnectivitySnapshot::offline());
        assert!(events.borrow().is_empty());

        assert_eq!(
            controller.on_tick(datetime!(2025-12-30 0:00:05 UTC)),
            TickOutcome::Idle
        );
    }

    #[test]
    fn runner_failure_surfaces_fatal_notice_but_still_exits() {
        let runner = Arc::new(RecordingJobRunner::failing());
        let (presenter, events) = RecordingPresenter::shared();
        let mut controller = LifecycleController::new(
            config(datetime!(2025-12-31 0:00 UTC), true),
            Arc::clone(&runner) as Arc<dyn JobRunner>,
            Box::new(presenter),
        );

        let outcome = controller
            .start(datetime!(2026-01-01 0:00 UTC))
            .expect("start in Starting phase");
        assert_eq!(outcome, StartOutcome::Expired);

        let events = events.borrow();
        let fatal_count = events
            .iter()
            .filter(|event| matches!(event, PresenterEvent::Fatal(_)))
            .count();
        assert_eq!(fatal_count, 2);
        assert_eq!(*events.last().expect("events recorded"), PresenterEvent::Exit);
        assert_eq!(controller.phase(), LifecyclePhase::Terminated);
    }

    #[test]
    fn probe_worker_round_trips_generation_tags() {
        let probe = EnvironmentProbe::new(
            Arc::new(StaticInterfaceSource::new(Vec::new())),
            None,
        );
        let worker = ProbeWorker::spawn(Arc::new(probe)).expect("worker spawns");

        worker.request(7).expect("request accepted");
        let event = worker
            .poll_event(Duration::from_secs(5))
            .expect("worker alive")
            .expect("event within timeout");
        assert_eq!(
            event,
            ProbeEvent::Snapshot {
                generation: 7,
                connectivity: ConnectivitySnapshot::offline(),
            }
        );

        worker.shutdown();
    }
}
