//! Integration tests for the recurring refresh loop.

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use common::{PresenterEvent, RecordingPresenter, fixture_config};
use time::OffsetDateTime;
use weblease_app::run_session;
use weblease_cleanup::{JobRunner, RecordingJobRunner};
use weblease_lifecycle::{SessionEnd, ShutdownFlag};
use weblease_probe::{
    ConnectivityProbe, EnvironmentProbe, InterfaceRecord, StaticInterfaceSource,
    StaticLatencyProbe,
};

fn online_probe() -> Arc<dyn ConnectivityProbe> {
    let source = StaticInterfaceSource::new(vec![InterfaceRecord {
        name: "eth0".to_string(),
        address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
    }]);
    Arc::new(EnvironmentProbe::new(
        Arc::new(source),
        Some(Arc::new(StaticLatencyProbe::measured(8))),
    ))
}

#[test]
fn refresh_loop_tests_publishes_snapshots_until_mid_session_expiry() {
    let runner = Arc::new(RecordingJobRunner::new());
    let (presenter, events) = RecordingPresenter::shared();
    let config = fixture_config(
        OffsetDateTime::now_utc() + time::Duration::milliseconds(400),
        true,
        Duration::from_millis(50),
    );

    let end = run_session(
        config,
        online_probe(),
        Arc::clone(&runner) as Arc<dyn JobRunner>,
        Box::new(presenter),
        &ShutdownFlag::new(),
    )
    .expect("session should complete");
    assert_eq!(end, SessionEnd::Expired);
    assert_eq!(runner.jobs().len(), 1);

    let events = events.borrow();
    let snapshots: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            PresenterEvent::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        })
        .collect();
    assert!(
        !snapshots.is_empty(),
        "at least one snapshot should publish before expiry"
    );
    for snapshot in &snapshots {
        assert!(snapshot.connectivity.connected);
        assert_eq!(snapshot.connectivity.local_address.as_deref(), Some("10.0.0.7"));
        assert!(!snapshot.remaining.is_expired());
    }

    let encoded = snapshots[0].to_json_bytes().expect("snapshot encodes");
    let decoded: serde_json::Value =
        serde_json::from_slice(&encoded).expect("snapshot JSON parses");
    assert_eq!(decoded["connectivity"]["connected"], true);
    assert_eq!(decoded["connectivity"]["local_address"], "10.0.0.7");

    // The expiry notice and exit request follow the last snapshot.
    assert_eq!(*events.last().expect("events recorded"), PresenterEvent::Exit);
}

#[test]
fn refresh_loop_tests_cancelled_session_never_publishes() {
    let runner = Arc::new(RecordingJobRunner::new());
    let (presenter, events) = RecordingPresenter::shared();
    let config = fixture_config(
        OffsetDateTime::now_utc() + time::Duration::days(30),
        true,
        Duration::from_millis(50),
    );

    let shutdown = ShutdownFlag::new();
    shutdown.set();

    let end = run_session(
        config,
        online_probe(),
        Arc::clone(&runner) as Arc<dyn JobRunner>,
        Box::new(presenter),
        &shutdown,
    )
    .expect("session should complete");
    assert_eq!(end, SessionEnd::Closed);
    assert!(events.borrow().is_empty());
    assert!(runner.jobs().is_empty());
}
