//! Integration tests for the Manager over the in-memory backend

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tmaxhoc::config;
use tmaxhoc::manager::{Manager, ManagerError, UnitStatus};
use tmaxhoc::supervisor::fake::FakeBackend;
use tmaxhoc::supervisor::Supervisor;
use tokio_test::{assert_err, assert_ok};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_test_dir() -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = PathBuf::from(format!("/tmp/tmaxhoc-test-{}-{}", std::process::id(), id));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const UNITS: &str = r#"
[[units]]
name = "alpha"
[units.service]
start_command = ["sleep", "100"]
stop_input = ["stop", "Enter"]

[[units]]
name = "beta"
[units.service]
start_command = "sleep 200"
stop_input = "quit Enter"

[[units]]
name = "bundle"
[units.group]
requires = ["alpha", "beta"]
"#;

async fn manager_from(toml: &str) -> (Manager<FakeBackend>, FakeBackend) {
    let graph = config::parse(toml).unwrap().build_graph().unwrap();
    let backend = FakeBackend::new();
    let supervisor = Supervisor::new(backend.clone());
    supervisor.init().await.unwrap();
    (Manager::new(graph, supervisor), backend)
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_service_start_stop_confirm() {
    let (mut mgr, backend) = manager_from(UNITS).await;

    assert_ok!(mgr.start("alpha").await);
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Running));
    let containers = backend.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, "alpha");
    assert_eq!(containers[0].argv, argv(&["sleep", "100"]));

    let escalations = assert_ok!(mgr.stop("alpha").await);
    assert!(escalations.is_empty());
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Stopping));
    assert_eq!(
        backend.inputs_for(&containers[0].id),
        vec![argv(&["stop", "Enter"])]
    );
    assert!(mgr.processes_of("alpha")[0].is_stopping());

    // still alive: nothing changes
    assert_ok!(mgr.poll().await);
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Stopping));

    backend.exit(&containers[0].id);
    let report = assert_ok!(mgr.poll().await);
    assert_eq!(report.stopped, vec![containers[0].id.clone()]);
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Stopped));
    assert!(mgr.processes_of("alpha").is_empty());
}

#[tokio::test]
async fn test_crash_is_detected() {
    let (mut mgr, backend) = manager_from(UNITS).await;
    assert_ok!(mgr.start("beta").await);
    assert_eq!(backend.containers()[0].argv, argv(&["sleep", "200"]));

    backend.exit_named("beta");
    let report = assert_ok!(mgr.poll().await);
    assert_eq!(report.crashed.len(), 1);
    assert_eq!(mgr.status("beta"), Some(UnitStatus::Stopped));

    // a crashed unit can be started again
    assert_ok!(mgr.start("beta").await);
    assert_eq!(mgr.status("beta"), Some(UnitStatus::Running));
}

#[tokio::test]
async fn test_group_starts_requirements_in_order() {
    let (mut mgr, backend) = manager_from(UNITS).await;

    assert_ok!(mgr.start("bundle").await);
    let names: Vec<String> = backend.containers().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(mgr.status("bundle"), Some(UnitStatus::Running));

    // Running while either requirement runs
    assert_ok!(mgr.stop("alpha").await);
    backend.exit_named("alpha");
    assert_ok!(mgr.poll().await);
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Stopped));
    assert_eq!(mgr.status("bundle"), Some(UnitStatus::Running));
}

#[tokio::test]
async fn test_group_start_stops_at_first_failure() {
    let (mut mgr, backend) = manager_from(UNITS).await;
    backend.fail_spawns_named("alpha");

    let err = assert_err!(mgr.start("bundle").await);
    match err {
        ManagerError::Start { unit, .. } => assert_eq!(unit, "alpha"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(backend.containers().is_empty());
    assert_eq!(mgr.status("beta"), Some(UnitStatus::Stopped));
    assert_eq!(mgr.status("bundle"), Some(UnitStatus::Stopped));
}

#[tokio::test]
async fn test_group_partial_start_is_kept() {
    let (mut mgr, backend) = manager_from(UNITS).await;
    backend.fail_spawns_named("beta");

    assert_err!(mgr.start("bundle").await);
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Running));
    assert_eq!(mgr.status("bundle"), Some(UnitStatus::Running));
}

#[tokio::test]
async fn test_group_stop_is_best_effort() {
    let dir = unique_test_dir();
    let failing = write_script(&dir, "stop.sh", "exit 3\n");
    let toml = format!(
        r#"
        [[units]]
        name = "alpha"
        [units.service]
        start_command = "sleep 100"
        stop_script = ["{}"]

        [[units]]
        name = "beta"
        [units.service]
        start_command = "sleep 100"
        stop_input = ["quit", "Enter"]

        [[units]]
        name = "bundle"
        [units.group]
        requires = ["alpha", "beta"]
        "#,
        failing.display()
    );
    let (mut mgr, backend) = manager_from(&toml).await;
    assert_ok!(mgr.start("bundle").await);

    // the failing stop script does not keep beta from stopping
    assert_ok!(mgr.stop("bundle").await);
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Stopping));
    assert_eq!(mgr.status("beta"), Some(UnitStatus::Stopping));
    assert_eq!(mgr.status("bundle"), Some(UnitStatus::Stopping));
    let beta = mgr.processes_of("beta")[0].id.clone();
    assert_eq!(backend.inputs_for(&beta), vec![argv(&["quit", "Enter"])]);

    // stopping the service directly surfaces the script failure
    assert!(matches!(
        mgr.stop("alpha").await,
        Err(ManagerError::Stop { .. })
    ));
}

#[tokio::test]
async fn test_unknown_container_is_adopted() {
    let (mut mgr, backend) = manager_from(UNITS).await;
    let (id, pid) = backend.inject("alpha");

    let report = assert_ok!(mgr.poll().await);
    assert_eq!(report.adopted, vec![id.clone()]);
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Running));

    let procs = mgr.processes_of("alpha");
    assert_eq!(procs.len(), 1);
    assert!(procs[0].adopted);
    assert_eq!(procs[0].pid, pid);

    // starting an adopted unit spawns nothing
    assert_ok!(mgr.start("alpha").await);
    assert_eq!(backend.containers().len(), 1);
}

#[tokio::test]
async fn test_unmatched_container_is_tracked_but_unowned() {
    let (mut mgr, backend) = manager_from(UNITS).await;
    backend.inject("someone-elses-shell");

    assert_ok!(mgr.poll().await);
    assert_eq!(mgr.supervisor().tracked_count(), 1);
    assert_eq!(mgr.running_services(), 0);
}

#[tokio::test]
async fn test_force_stop_while_running_is_rejected() {
    let (mut mgr, backend) = manager_from(UNITS).await;
    assert_ok!(mgr.start("alpha").await);

    assert!(!mgr.force_stop_allowed("alpha"));
    let err = assert_err!(mgr.force_stop("alpha"));
    assert!(matches!(err, ManagerError::ForceStopNotAllowed { .. }));
    assert!(backend.killed().is_empty());
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Running));
}

#[tokio::test]
async fn test_processes_survive_supervisor_restart() {
    let (mut mgr, backend) = manager_from(UNITS).await;
    assert_ok!(mgr.start("bundle").await);
    assert_ok!(mgr.shutdown().await);
    assert!(backend.session_exists());
    drop(mgr);

    // a new supervisor over the same session picks everything up again
    let graph = config::parse(UNITS).unwrap().build_graph().unwrap();
    let supervisor = Supervisor::new(backend.clone());
    assert_ok!(supervisor.init().await);
    let mut mgr = Manager::new(graph, supervisor);

    let report = assert_ok!(mgr.poll().await);
    assert_eq!(report.adopted.len(), 2);
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Running));
    assert_eq!(mgr.status("beta"), Some(UnitStatus::Running));
}

#[tokio::test]
async fn test_scripted_start_and_stop() {
    let dir = unique_test_dir();
    let session_file = dir.join("session");
    let stop_args = dir.join("stop-args");
    let start = write_script(
        &dir,
        "start.sh",
        &format!(
            "echo \"$1\" > {}\nprintf '%%41\\t5001\\n'\necho 'garbage line'\nprintf '%%42\\t5002\\n'\n",
            session_file.display()
        ),
    );
    let stop = write_script(
        &dir,
        "stop.sh",
        &format!("echo \"$@\" > {}\n", stop_args.display()),
    );

    let toml = format!(
        r#"
        [[units]]
        name = "factorio"
        [units.service]
        start_script = ["{}"]
        stop_script = ["{}", "--now"]
        "#,
        start.display(),
        stop.display()
    );
    let (mut mgr, _backend) = manager_from(&toml).await;

    assert_ok!(mgr.start("factorio").await);
    assert_eq!(fs::read_to_string(&session_file).unwrap().trim(), "fake");

    let procs = mgr.processes_of("factorio");
    let ids: Vec<&str> = procs.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["%41", "%42"]);
    assert!(procs.iter().all(|p| p.name == "factorio" && !p.adopted));

    assert_ok!(mgr.stop("factorio").await);
    assert_eq!(
        fs::read_to_string(&stop_args).unwrap().trim(),
        "--now %41 5001 %42 5002"
    );
    assert_eq!(mgr.status("factorio"), Some(UnitStatus::Stopping));

    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_scripted_start_without_output_fails() {
    let dir = unique_test_dir();
    let start = write_script(&dir, "start.sh", "exit 0\n");
    let toml = format!(
        "[[units]]\nname = \"x\"\n[units.service]\nstart_script = [\"{}\"]\n",
        start.display()
    );
    let (mut mgr, _backend) = manager_from(&toml).await;

    assert_err!(mgr.start("x").await);
    assert_eq!(mgr.status("x"), Some(UnitStatus::Stopped));

    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_failed_start_script_keeps_reported_processes() {
    let dir = unique_test_dir();
    let start = write_script(&dir, "start.sh", "printf '%%41\\t5001\\n'\nexit 1\n");
    let toml = format!(
        "[[units]]\nname = \"x\"\n[units.service]\nstart_script = [\"{}\"]\nstop_input = \"stop Enter\"\n",
        start.display()
    );
    let (mut mgr, _backend) = manager_from(&toml).await;

    let err = assert_err!(mgr.start("x").await);
    assert!(matches!(err, ManagerError::Start { .. }));
    assert_eq!(mgr.supervisor().tracked_count(), 1);
    assert_eq!(mgr.status("x"), Some(UnitStatus::Running));
    let ids: Vec<String> = mgr
        .processes_of("x")
        .iter()
        .map(|p| p.id.to_string())
        .collect();
    assert_eq!(ids, vec!["%41"]);

    // a retry does not start a second copy
    assert_ok!(mgr.start("x").await);
    assert_eq!(mgr.supervisor().tracked_count(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_adopted_process_ends_stale_stop() {
    let (mut mgr, backend) = manager_from(UNITS).await;
    assert_ok!(mgr.start("alpha").await);
    let old = backend.containers()[0].id.clone();
    assert_ok!(mgr.stop("alpha").await);

    // someone starts a fresh alpha by hand while the old one shuts down
    let (fresh, _) = backend.inject("alpha");
    backend.exit(&old);
    let report = assert_ok!(mgr.poll().await);
    assert_eq!(report.stopped, vec![old]);
    assert_eq!(report.adopted, vec![fresh.clone()]);

    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Running));
    let procs = mgr.processes_of("alpha");
    assert_eq!(procs.len(), 1);
    assert_eq!(procs[0].id, fresh);
    assert!(!procs[0].is_stopping());
}

#[tokio::test(start_paused = true)]
async fn test_force_stop_spares_processes_never_asked_to_stop() {
    let (mut mgr, backend) = manager_from(UNITS).await;
    assert_ok!(mgr.start("alpha").await);
    let old_pid = backend.containers()[0].pid;
    assert_ok!(mgr.stop("alpha").await);

    let (_, fresh_pid) = backend.inject("alpha");
    assert_ok!(mgr.poll().await);
    assert_eq!(mgr.processes_of("alpha").len(), 2);
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Stopping));

    tokio::time::advance(std::time::Duration::from_secs(11)).await;
    assert_ok!(mgr.force_stop("alpha"));
    assert_eq!(backend.killed(), vec![old_pid]);
    assert!(!backend.killed().contains(&fresh_pid));

    assert_ok!(mgr.poll().await);
    assert_eq!(mgr.status("alpha"), Some(UnitStatus::Running));
}
