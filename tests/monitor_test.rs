//! Scheduling behaviour of the health monitor.

mod common;

use common::{watcher, Harness};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use warden::{DaemonSpec, DaemonState, HealthMonitor};

fn fast_daemon() -> DaemonSpec {
    DaemonSpec::new("poller", "poller").with_interval(Duration::from_secs(60))
}

#[tokio::test]
async fn every_daemon_starts_pending_and_is_checked_on_first_tick() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![watcher(), fast_daemon()]);
    let mut monitor = HealthMonitor::new(Arc::clone(&h.supervisor));

    assert_eq!(monitor.state("watcher"), Some(DaemonState::DeadPendingDecision));
    assert_eq!(monitor.state("poller"), Some(DaemonState::DeadPendingDecision));

    let checks = monitor.tick(Instant::now()).await;
    assert_eq!(checks.len(), 2);
    assert!(checks.iter().all(|c| !c.alive));
    assert_eq!(monitor.state("watcher"), Some(DaemonState::Running));
    assert_eq!(monitor.state("poller"), Some(DaemonState::Running));
    assert_eq!(h.launcher.spawn_count(), 2);
}

#[tokio::test]
async fn daemons_are_checked_on_their_own_interval() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![watcher(), fast_daemon()]);
    let mut monitor = HealthMonitor::new(Arc::clone(&h.supervisor));

    let t0 = Instant::now();
    monitor.tick(t0).await;
    assert_eq!(monitor.next_due(), Some(t0 + Duration::from_secs(60)));

    // Nothing is due yet
    assert!(monitor.tick(t0 + Duration::from_secs(30)).await.is_empty());

    let checks = monitor.tick(t0 + Duration::from_secs(61)).await;
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].daemon_name, "poller");
    assert!(checks[0].alive);

    let checks = monitor.tick(t0 + Duration::from_secs(301)).await;
    let names: Vec<_> = checks.iter().map(|c| c.daemon_name.as_str()).collect();
    assert!(names.contains(&"watcher"));
    assert!(names.contains(&"poller"));
    assert_eq!(h.launcher.spawn_count(), 2);
}

#[tokio::test]
async fn crash_moves_daemon_through_restart_to_running() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![fast_daemon()]);
    let mut monitor = HealthMonitor::new(Arc::clone(&h.supervisor));

    let t0 = Instant::now();
    monitor.tick(t0).await;
    let first = h.pid_of("poller").unwrap();
    h.table.kill(first);

    // Within cooldown: denied, then allowed one tick later
    h.clock.advance(Duration::from_secs(30));
    monitor.tick(t0 + Duration::from_secs(60)).await;
    assert_eq!(monitor.state("poller"), Some(DaemonState::DeniedWaiting));

    h.clock.advance(Duration::from_secs(60));
    monitor.tick(t0 + Duration::from_secs(120)).await;
    assert_eq!(monitor.state("poller"), Some(DaemonState::Running));
    assert_ne!(h.pid_of("poller"), Some(first));
    assert_eq!(
        h.supervisor.current_state("poller"),
        Some(DaemonState::Running)
    );
}

#[tokio::test]
async fn run_stops_when_shutdown_begins() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![watcher()]);
    let monitor = HealthMonitor::new(Arc::clone(&h.supervisor));

    let handle = tokio::spawn(monitor.run());
    tokio::time::sleep(Duration::from_millis(600)).await;
    h.supervisor.begin_shutdown();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor stops")
        .unwrap();
    assert_eq!(h.launcher.spawn_count(), 1);
}
