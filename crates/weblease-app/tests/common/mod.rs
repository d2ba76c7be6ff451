//! Shared fixtures for app integration tests.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use time::OffsetDateTime;
use weblease_core::{ExpiryPolicy, OsFamily, StatusSnapshot};
use weblease_lifecycle::{LifecycleConfig, Presenter};

/// Events recorded by the shared presenter fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum PresenterEvent {
    Snapshot(StatusSnapshot),
    Fatal(String),
    Exit,
}

/// Presenter that records every call for later assertions.
pub struct RecordingPresenter {
    events: Rc<RefCell<Vec<PresenterEvent>>>,
}

impl RecordingPresenter {
    /// Creates the presenter plus a shared handle onto its event log.
    #[allow(dead_code)]
    pub fn shared() -> (Self, Rc<RefCell<Vec<PresenterEvent>>>) {
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

/// Deterministic lifecycle configuration over fixture directories.
#[allow(dead_code)]
pub fn fixture_config(
    deadline: OffsetDateTime,
    destruct_enabled: bool,
    refresh_period: Duration,
) -> LifecycleConfig {
    LifecycleConfig {
        policy: ExpiryPolicy::new(deadline, destruct_enabled),
        refresh_period,
        install_dir: PathBuf::from("/opt/weblease"),
        temp_dir: std::env::temp_dir(),
        os_family: OsFamily::Linux,
    }
}
