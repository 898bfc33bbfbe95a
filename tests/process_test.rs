//! Real-process tests: spawning, verification and stopping actual programs.
#![cfg(unix)]

use std::time::Duration;
use warden::{
    DaemonSpec, DaemonState, Liveness, Registry, RotationPolicy, StatusState, Supervisor,
    SystemInspector,
};

fn supervisor(state_dir: &std::path::Path, specs: Vec<DaemonSpec>) -> Supervisor {
    Supervisor::builder(Registry::new(specs).unwrap())
        .state_dir(state_dir)
        .work_dir(state_dir)
        .grace_period(Duration::from_secs(1))
        .build()
        .unwrap()
}

#[tokio::test]
async fn sleep_daemon_runs_detached_and_stops_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(
        dir.path(),
        vec![DaemonSpec::new("sleeper", "sleep").with_args(["300"])],
    );

    let eval = sup
        .evaluate("sleeper", DaemonState::DeadPendingDecision)
        .await;
    let pid = eval.spawned_pid.expect("sleep should spawn");

    // Detached into its own process group
    let pgid = nix::unistd::getpgid(Some(nix::unistd::Pid::from_raw(pid as i32))).unwrap();
    assert_eq!(pgid.as_raw(), pid as i32);

    assert!(matches!(sup.pid_store().check("sleeper"), Liveness::Alive(_)));
    let status = &sup.status(Some("sleeper")).unwrap()[0];
    assert_eq!(status.state, StatusState::Running);
    assert_eq!(status.pid, Some(pid));

    let report = sup.shutdown().await;
    assert_eq!(report.stopped, vec!["sleeper"]);
    assert!(report.is_clean());
    assert!(!sup.pid_store().check("sleeper").is_alive());
}

#[tokio::test]
async fn daemon_ignoring_sigterm_is_force_killed() {
    let dir = tempfile::tempdir().unwrap();
    let spec = DaemonSpec::new("stubborn", "sh")
        .with_args(["-c", "trap '' TERM; while true; do sleep 1; done"])
        .with_grace_period(Duration::from_millis(500));
    let sup = supervisor(dir.path(), vec![spec]);

    sup.evaluate("stubborn", DaemonState::DeadPendingDecision)
        .await
        .spawned_pid
        .expect("sh should spawn");
    // Let the shell install its trap
    tokio::time::sleep(Duration::from_millis(300)).await;

    let report = sup.shutdown().await;
    assert_eq!(report.force_killed, vec!["stubborn"]);
    assert!(!report.is_clean());
    assert!(!sup.pid_store().check("stubborn").is_alive());
}

#[tokio::test]
async fn output_is_captured_in_daemon_log() {
    let dir = tempfile::tempdir().unwrap();
    let spec = DaemonSpec::new("chatty", "sh")
        .with_args(["-c", "echo hello from $WARDEN_DAEMON; echo oops >&2; sleep 300"]);
    let sup = supervisor(dir.path(), vec![spec]);

    sup.evaluate("chatty", DaemonState::DeadPendingDecision).await;

    let mut lines = Vec::new();
    for _ in 0..50 {
        lines = sup.logger().read_tail("chatty", 20).await.unwrap();
        if lines.iter().any(|l| l == "oops") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(lines.iter().any(|l| l == "hello from chatty"));
    assert!(lines.iter().any(|l| l == "oops"));

    sup.shutdown().await;
}

#[tokio::test]
async fn chatty_daemon_log_stays_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let spec = DaemonSpec::new("chatty", "sh").with_args([
        "-c",
        "yes x | head -c 200000; while true; do echo tick; sleep 0.05; done",
    ]);
    let sup = Supervisor::builder(Registry::new(vec![spec]).unwrap())
        .state_dir(dir.path())
        .work_dir(dir.path())
        .grace_period(Duration::from_secs(1))
        .rotation(RotationPolicy {
            max_bytes: 1000,
            backups: 2,
        })
        .build()
        .unwrap();
    let live = sup.logger().sink_path("chatty");
    let backup = warden::logger::backup_path(&live, 1);

    sup.evaluate("chatty", DaemonState::DeadPendingDecision)
        .await
        .spawned_pid
        .expect("sh should spawn");
    for _ in 0..50 {
        if std::fs::metadata(&live).map(|m| m.len()).unwrap_or(0) >= 200_000 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // The next health check rotates the sink the daemon is writing to
    let eval = sup.evaluate("chatty", DaemonState::Running).await;
    assert_eq!(eval.state, DaemonState::Running);
    let rotated = std::fs::metadata(&backup).unwrap().len();
    assert!(rotated >= 200_000);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let contents = std::fs::read_to_string(&live).unwrap();
    assert!(contents.contains("tick"));
    assert!((contents.len() as u64) < 1000);
    assert_eq!(std::fs::metadata(&backup).unwrap().len(), rotated);

    sup.shutdown().await;
}

#[tokio::test]
async fn our_own_pid_does_not_match_a_foreign_signature() {
    use warden::{CommandSignature, ProcessInspector};

    let live = SystemInspector
        .inspect(std::process::id())
        .expect("test process is visible");
    assert!(!live.zombie);
    assert!(!live.matches(&CommandSignature::new("unrelated-process", Vec::<String>::new())));
}
