//! End-to-end tests driving real short-lived child processes through the supervisor.
//!
//! These share the one process-wide SIGCHLD stream, so they serialize on `SERIAL_GUARD`
//! rather than relying on `cargo test`'s default thread-per-test parallelism.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use taskmaster_core::config::Config;
use taskmaster_core::spec::{ProgramSpec, RawProgramSpec};
use taskmaster_sup::dispatcher;
use taskmaster_sup::process::ProcessState;
use taskmaster_sup::supervisor::Supervisor;

fn serial_guard() -> &'static Mutex<()> {
    static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
    GUARD.get_or_init(|| Mutex::new(()))
}

fn program(name: &str, raw: RawProgramSpec) -> ProgramSpec {
    ProgramSpec::from_raw(name, raw).unwrap()
}

fn supervisor_with(programs: Vec<(&str, RawProgramSpec)>) -> Arc<Supervisor> {
    let mut config = Config::default();
    for (name, raw) in programs {
        config.programs.insert(name.to_string(), program(name, raw));
    }
    let supervisor = Supervisor::new(std::path::PathBuf::from("test.yaml"), config);
    let supervisor = Arc::new(supervisor);
    taskmaster_sup::reaper::spawn(Arc::clone(&supervisor.registry)).unwrap();
    supervisor
}

fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}

#[test]
fn autostart_then_graceful_stop() {
    let _guard = serial_guard().lock().unwrap();
    let supervisor = supervisor_with(vec![(
        "sleeper",
        RawProgramSpec {
            command: vec!["sleep".to_string(), "30".to_string()],
            autostart: Some(true),
            startsecs: Some(0),
            stopwaitsecs: Some(3),
            ..Default::default()
        },
    )]);

    supervisor.start_autostart();
    assert!(wait_until(
        || supervisor
            .with_group("sleeper", |g| g.processes[0].state() == ProcessState::Running)
            .unwrap(),
        Duration::from_secs(2)
    ));

    let reply = dispatcher::dispatch(&supervisor, "stop sleeper");
    assert!(reply.contains("sleeper0: stopped pid"));
    assert_eq!(
        supervisor.with_group("sleeper", |g| g.processes[0].state()).unwrap(),
        ProcessState::Stopped
    );
}

#[test]
fn exits_with_unexpected_code_trigger_restart_until_fatal() {
    let _guard = serial_guard().lock().unwrap();
    let supervisor = supervisor_with(vec![(
        "flaky",
        RawProgramSpec {
            command: vec!["false".to_string()],
            autostart: Some(true),
            startsecs: Some(1),
            startretries: Some(2),
            ..Default::default()
        },
    )]);

    supervisor.start_autostart();
    // A real start-up window means every failed attempt sits in `backoff` for
    // `attempt` seconds (1s, then 2s) before the next try, per spec.md §4.1.
    assert!(wait_until(
        || supervisor
            .with_group("flaky", |g| g.processes[0].state() == ProcessState::Fatal)
            .unwrap(),
        Duration::from_secs(8)
    ));
    assert_eq!(
        supervisor.with_group("flaky", |g| g.processes[0].state()).unwrap(),
        ProcessState::Fatal
    );
}

#[test]
fn expected_exit_code_does_not_restart() {
    let _guard = serial_guard().lock().unwrap();
    let supervisor = supervisor_with(vec![(
        "oneshot",
        RawProgramSpec {
            command: vec!["true".to_string()],
            autostart: Some(true),
            startsecs: Some(0),
            autorestart: Some("unexpected".to_string()),
            exitcodes: Some(vec![0]),
            ..Default::default()
        },
    )]);

    supervisor.start_autostart();
    assert!(wait_until(
        || supervisor
            .with_group("oneshot", |g| g.processes[0].state() == ProcessState::Exited)
            .unwrap(),
        Duration::from_secs(2)
    ));
}

#[test]
fn zero_startsecs_skips_the_readiness_window_even_on_an_unexpected_exit() {
    let _guard = serial_guard().lock().unwrap();
    let supervisor = supervisor_with(vec![(
        "instant",
        RawProgramSpec {
            command: vec!["false".to_string()],
            autostart: Some(true),
            startsecs: Some(0),
            autorestart: Some("never".to_string()),
            ..Default::default()
        },
    )]);

    supervisor.start_autostart();
    // Per spec.md §8's boundary behaviour, `startsecs = 0` drives a same-instant exit
    // through `running -> exited`, never `starting -> backoff`.
    assert!(wait_until(
        || supervisor
            .with_group("instant", |g| g.processes[0].state() == ProcessState::Exited)
            .unwrap(),
        Duration::from_secs(2)
    ));
    assert_eq!(
        supervisor.with_group("instant", |g| g.processes[0].state()).unwrap(),
        ProcessState::Exited
    );
}

#[test]
fn forced_kill_after_stopwaitsecs_elapses() {
    let _guard = serial_guard().lock().unwrap();
    let supervisor = supervisor_with(vec![(
        "stubborn",
        RawProgramSpec {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "trap '' TERM; sleep 30".to_string(),
            ],
            autostart: Some(true),
            startsecs: Some(0),
            stopwaitsecs: Some(1),
            ..Default::default()
        },
    )]);

    supervisor.start_autostart();
    assert!(wait_until(
        || supervisor
            .with_group("stubborn", |g| g.processes[0].state() == ProcessState::Running)
            .unwrap(),
        Duration::from_secs(2)
    ));

    supervisor.with_group("stubborn", |g| g.stop_all());
    assert!(wait_until(
        || supervisor
            .with_group("stubborn", |g| g.processes[0].state() == ProcessState::Stopped)
            .unwrap(),
        Duration::from_secs(4)
    ));
}

#[test]
fn reload_diffs_added_changed_and_removed_groups() {
    let _guard = serial_guard().lock().unwrap();
    let mut config = Config::default();
    config.programs.insert(
        "keep".to_string(),
        program(
            "keep",
            RawProgramSpec {
                command: vec!["sleep".to_string(), "30".to_string()],
                autostart: Some(false),
                ..Default::default()
            },
        ),
    );
    config.programs.insert(
        "drop_me".to_string(),
        program(
            "drop_me",
            RawProgramSpec {
                command: vec!["sleep".to_string(), "30".to_string()],
                autostart: Some(false),
                ..Default::default()
            },
        ),
    );

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("taskmaster.yaml");
    std::fs::write(
        &config_path,
        "programs:\n  keep:\n    command: [\"sleep\", \"30\"]\n    autostart: false\n  drop_me:\n    command: [\"sleep\", \"30\"]\n    autostart: false\n",
    )
    .unwrap();

    let supervisor = Supervisor::new(config_path.clone(), config);
    let supervisor = Arc::new(supervisor);
    taskmaster_sup::reaper::spawn(Arc::clone(&supervisor.registry)).unwrap();

    std::fs::write(
        &config_path,
        "programs:\n  keep:\n    command: [\"sleep\", \"30\"]\n    autostart: false\n  added:\n    command: [\"sleep\", \"30\"]\n    autostart: false\n",
    )
    .unwrap();

    let report = supervisor.reload().unwrap();
    assert_eq!(report.added, vec!["added".to_string()]);
    assert_eq!(report.removed, vec!["drop_me".to_string()]);
    assert!(report.changed.is_empty());
    assert_eq!(supervisor.group_names(), vec!["added", "keep"]);
}

#[test]
fn sigchld_storm_reaps_every_sibling() {
    let _guard = serial_guard().lock().unwrap();
    let supervisor = supervisor_with(vec![(
        "burst",
        RawProgramSpec {
            command: vec!["true".to_string()],
            numprocs: Some(8),
            autostart: Some(true),
            startsecs: Some(0),
            autorestart: Some("never".to_string()),
            ..Default::default()
        },
    )]);

    supervisor.start_autostart();
    assert!(wait_until(
        || supervisor
            .with_group("burst", |g| g
                .processes
                .iter()
                .all(|p| p.state() == ProcessState::Exited))
            .unwrap(),
        Duration::from_secs(3)
    ));
}
