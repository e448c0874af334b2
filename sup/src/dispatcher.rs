//! Parses line-oriented control commands and dispatches them against a `Supervisor`.
//!
//! Commands that affect several processes at once (`start`/`stop`/`restart` on a group or
//! the bare `reload`) need to report back only once every affected process has actually
//! settled; `Countdown` is the condvar-based barrier that makes that blocking wait safe to
//! do from the dispatcher thread without holding any process lock. Targets follow
//! supervisorctl's own `group:process` / `group:` / `all` convention (spec.md §4.5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use taskmaster_core::PidRegistry;
use taskmaster_core::Signal;

use crate::group::Group;
use crate::process::{Process, ProcessState};
use crate::supervisor::Supervisor;

const COMMANDS: &[(&str, &str)] = &[
    ("start", "start <group:process>|<group:>|all -- spawn one or more processes"),
    ("stop", "stop <group:process>|<group:>|all -- gracefully stop one or more processes"),
    ("restart", "restart <group:process>|<group:>|all -- stop then start one or more processes"),
    ("status", "status [<group:process>|<group:>] -- show process states"),
    ("pid", "pid <group:process>|<group:> -- show the current child pid, or -1 if unknown"),
    ("attach", "attach <group:process> -- stream appended stdout log bytes until disconnected"),
    ("reload", "reload -- re-read and apply the configuration file"),
    ("config", "config <path> -- stage a configuration path for the next reload"),
    ("signal", "signal <group:process>|<group:> <SIG> -- send an arbitrary signal"),
    ("version", "version -- print the daemon version"),
    ("help", "help [command] -- list commands or show one command's usage"),
    ("quit", "quit -- close this control session"),
    ("exit", "exit -- close this control session"),
];

#[derive(Clone, Copy)]
enum Action {
    Start,
    Stop,
    Restart,
}

/// A bulk reply's per-process result: the last pid it held when it settled, and whether
/// it reached the action's target state (spec.md §4.3: "the reply map contains exactly
/// one entry" per addressed process).
type Settled = (i32, bool);

/// The condvar-based barrier a bulk `start`/`stop`/`restart` blocks on until every
/// addressed process has settled. Unlike a bare counter, each settle callback records its
/// process's own `(pid, success)` outcome, so the bulk reply can name every process
/// individually instead of collapsing to one group-wide line.
pub struct Countdown {
    expected: usize,
    inner: Arc<(Mutex<HashMap<String, Settled>>, Condvar)>,
}

impl Countdown {
    pub fn new(expected: usize) -> Countdown {
        Countdown {
            expected,
            inner: Arc::new((Mutex::new(HashMap::with_capacity(expected)), Condvar::new())),
        }
    }

    /// A one-shot callback suitable for `Process::on_next_settle`. Reads `process`'s pid
    /// and state at the moment it settles (before `Process::on_exit` clears a dead pid),
    /// records whether it reached `action`'s target state, and wakes any waiter once
    /// every expected process has reported in.
    pub fn callback(&self, name: String, process: Arc<Process>, action: Action) -> impl FnOnce() + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let expected = self.expected;
        move || {
            let pid = process.pid().unwrap_or(-1);
            let success = matches!(
                (action, process.state()),
                (Action::Start | Action::Restart, ProcessState::Running | ProcessState::Starting)
                    | (Action::Stop, ProcessState::Stopped)
            );
            let (lock, cvar) = &*inner;
            let mut results = lock.lock().expect("countdown lock poisoned");
            results.insert(name, (pid, success));
            if results.len() >= expected {
                cvar.notify_all();
            }
        }
    }

    /// Block until every registered callback has fired, or `timeout` elapses, then return
    /// whatever results have been recorded so far.
    pub fn wait(&self, timeout: Duration) -> HashMap<String, Settled> {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().expect("countdown lock poisoned");
        let expected = self.expected;
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |results| results.len() < expected)
            .expect("countdown lock poisoned");
        guard.clone()
    }
}

/// A target resolved from the wire syntax: `group:process` addresses one process,
/// `group:` (or a bare `all`, expanded to every group) addresses a whole group.
struct ResolvedTarget {
    group: String,
    process: Option<String>,
}

/// Split `all` / `group:` / `group:process` into one or more resolved targets.
/// Malformed input (no colon and not `all`) is reported with a specific error string per
/// spec.md §4.5.
fn resolve_targets(supervisor: &Supervisor, target: &str) -> Result<Vec<ResolvedTarget>, String> {
    if target == "all" {
        return Ok(supervisor
            .group_names()
            .into_iter()
            .map(|group| ResolvedTarget { group, process: None })
            .collect());
    }
    match target.split_once(':') {
        Some((group, process)) if !group.is_empty() => {
            let process = if process.is_empty() { None } else { Some(process.to_string()) };
            Ok(vec![ResolvedTarget {
                group: group.to_string(),
                process,
            }])
        }
        _ => Err(format!(
            "*** Bad target name {target} (expected group:process, group:, or all)"
        )),
    }
}

pub fn dispatch(supervisor: &Supervisor, line: &str) -> String {
    let mut parts = line.trim().split_whitespace();
    let command = match parts.next() {
        Some(c) => c,
        None => return "error: empty command\n".to_string(),
    };
    let args: Vec<&str> = parts.collect();

    match command {
        "start" => handle_bulk(supervisor, &args, Action::Start),
        "stop" => handle_bulk(supervisor, &args, Action::Stop),
        "restart" => handle_bulk(supervisor, &args, Action::Restart),
        "status" => handle_status(supervisor, &args),
        "pid" => handle_pid(supervisor, &args),
        "attach" => "*** attach must be issued as the first word on its own line; the control \
                     endpoint hands the connection off to a log tail, not a one-line reply\n"
            .to_string(),
        "reload" => handle_reload(supervisor),
        "config" => handle_config(supervisor, &args),
        "signal" => handle_signal(supervisor, &args),
        "version" => format!("{}\n", env!("CARGO_PKG_VERSION")),
        "help" => handle_help(&args),
        "quit" | "exit" => "goodbye\n".to_string(),
        other => format!("*** Unknown syntax: {other}\n"),
    }
}

/// Resolve an `attach` command's target to the stdout logfile path to tail, without
/// producing a reply -- the control endpoint hands the connection itself off to a
/// dedicated tail loop on success (spec.md §4.3 `attach`, SPEC_FULL.md §4.6).
pub fn resolve_attach(supervisor: &Supervisor, target: &str) -> Result<PathBuf, String> {
    let (group, process) = target
        .split_once(':')
        .ok_or_else(|| format!("*** Bad target name {target} (expected group:process)"))?;
    if process.is_empty() {
        return Err("*** attach requires a single process, not a whole group\n".to_string());
    }
    supervisor
        .with_group(group, |g| g.find(process).and_then(|p| p.stdout_log_path()))
        .flatten()
        .ok_or_else(|| format!("*** no stdout log available for {group}:{process}"))
}

fn handle_bulk(supervisor: &Supervisor, args: &[&str], action: Action) -> String {
    let target = match args.first() {
        Some(t) => *t,
        None => return "*** expected a target (group:process, group:, or all)\n".to_string(),
    };

    let targets = match resolve_targets(supervisor, target) {
        Ok(t) => t,
        Err(e) => return format!("{e}\n"),
    };

    let mut out = String::new();
    for rt in &targets {
        let reply = supervisor.with_group(&rt.group, |group| match &rt.process {
            None => bulk_group(group, &supervisor.registry, action),
            Some(pname) => match group.find(pname) {
                Some(process) => bulk_process(process, &supervisor.registry, action),
                None => format!("{}:{pname}: no such process\n", rt.group),
            },
        });
        out.push_str(&reply.unwrap_or_else(|| format!("{}: no such program\n", rt.group)));
    }
    out
}

/// Format one line per addressed process naming its last pid and whether it reached
/// `verb`'s target state, in `processes`' own order (a `HashMap`'s iteration order is not
/// the wire-reply order spec.md §4.3's scenarios expect).
fn format_bulk_reply(processes: &[&Arc<Process>], results: &HashMap<String, Settled>, verb: &str) -> String {
    let mut out = String::new();
    for process in processes {
        match results.get(&process.name) {
            Some((pid, true)) => out.push_str(&format!("{}: {verb} pid {pid}\n", process.name)),
            Some((pid, false)) => out.push_str(&format!("{}: {verb} failed, last pid {pid}\n", process.name)),
            None => out.push_str(&format!("{}: no response within timeout\n", process.name)),
        }
    }
    out
}

fn bulk_group(group: &Group, registry: &PidRegistry<Arc<Process>>, action: Action) -> String {
    let name = group.name();
    match action {
        Action::Start => {
            let eligible: Vec<&Arc<Process>> = group
                .processes
                .iter()
                .filter(|p| matches!(p.state(), ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal))
                .collect();
            if eligible.is_empty() {
                return format!("{name}: already running\n");
            }
            let countdown = Countdown::new(eligible.len());
            for process in &eligible {
                process.on_next_settle(countdown.callback(process.name.clone(), Arc::clone(process), Action::Start));
            }
            group.start_all(registry, true);
            let results = countdown.wait(Duration::from_secs(group.spec.startsecs + 2));
            format_bulk_reply(&eligible, &results, "started")
        }
        Action::Stop => {
            let eligible: Vec<&Arc<Process>> =
                group.processes.iter().filter(|p| p.state() != ProcessState::Stopped).collect();
            if eligible.is_empty() {
                return format!("{name}: not running\n");
            }
            let countdown = Countdown::new(eligible.len());
            for process in &eligible {
                process.on_next_settle(countdown.callback(process.name.clone(), Arc::clone(process), Action::Stop));
            }
            group.stop_all();
            let results = countdown.wait(Duration::from_secs(group.spec.stopwaitsecs + 2));
            format_bulk_reply(&eligible, &results, "stopped")
        }
        Action::Restart => {
            let live: Vec<&Arc<Process>> = group
                .processes
                .iter()
                .filter(|p| !matches!(p.state(), ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal))
                .collect();
            if !live.is_empty() {
                let stop_countdown = Countdown::new(live.len());
                for process in &live {
                    process.on_next_settle(stop_countdown.callback(process.name.clone(), Arc::clone(process), Action::Stop));
                }
                group.stop_all();
                stop_countdown.wait(Duration::from_secs(group.spec.stopwaitsecs + 2));
            }
            let all: Vec<&Arc<Process>> = group.processes.iter().collect();
            let start_countdown = Countdown::new(all.len());
            for process in &all {
                process.on_next_settle(start_countdown.callback(process.name.clone(), Arc::clone(process), Action::Restart));
            }
            group.start_all(registry, true);
            let results = start_countdown.wait(Duration::from_secs(group.spec.startsecs + 2));
            format_bulk_reply(&all, &results, "restarted")
        }
    }
}

fn bulk_process(process: &Arc<Process>, registry: &PidRegistry<Arc<Process>>, action: Action) -> String {
    let name = &process.name;
    match action {
        Action::Start => {
            if !matches!(process.state(), ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal) {
                return format!("{name}: already running\n");
            }
            let countdown = Countdown::new(1);
            process.on_next_settle(countdown.callback(process.name.clone(), Arc::clone(process), Action::Start));
            process.spawn(registry);
            let results = countdown.wait(Duration::from_secs(process.spec.startsecs + 2));
            format_bulk_reply(&[process], &results, "started")
        }
        Action::Stop => {
            if process.state() == ProcessState::Stopped {
                return format!("{name}: not running\n");
            }
            let countdown = Countdown::new(1);
            process.on_next_settle(countdown.callback(process.name.clone(), Arc::clone(process), Action::Stop));
            process.stop();
            let results = countdown.wait(Duration::from_secs(process.spec.stopwaitsecs + 2));
            format_bulk_reply(&[process], &results, "stopped")
        }
        Action::Restart => {
            if !matches!(process.state(), ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal) {
                let stop_countdown = Countdown::new(1);
                process.on_next_settle(stop_countdown.callback(process.name.clone(), Arc::clone(process), Action::Stop));
                process.stop();
                stop_countdown.wait(Duration::from_secs(process.spec.stopwaitsecs + 2));
            }
            let start_countdown = Countdown::new(1);
            process.on_next_settle(start_countdown.callback(process.name.clone(), Arc::clone(process), Action::Restart));
            process.spawn(registry);
            let results = start_countdown.wait(Duration::from_secs(process.spec.startsecs + 2));
            format_bulk_reply(&[process], &results, "restarted")
        }
    }
}

fn handle_status(supervisor: &Supervisor, args: &[&str]) -> String {
    let targets = match args.first() {
        None => supervisor
            .group_names()
            .into_iter()
            .map(|group| ResolvedTarget { group, process: None })
            .collect(),
        Some(t) => match resolve_targets(supervisor, t) {
            Ok(targets) => targets,
            Err(e) => return format!("{e}\n"),
        },
    };

    let mut lines = Vec::new();
    for rt in &targets {
        let found = supervisor.with_group(&rt.group, |group| match &rt.process {
            None => {
                for process in &group.processes {
                    lines.push(format_status_line(process));
                }
            }
            Some(pname) => match group.find(pname) {
                Some(process) => lines.push(format_status_line(process)),
                None => lines.push(format!("{}:{pname}: no such process", rt.group)),
            },
        });
        if found.is_none() {
            lines.push(format!("{}: no such program", rt.group));
        }
    }
    if lines.is_empty() {
        "no programs configured\n".to_string()
    } else {
        lines.join("\n") + "\n"
    }
}

fn format_status_line(process: &Arc<Process>) -> String {
    let pid_desc = process.pid().map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
    format!("{:<16} {:<10} pid={}", process.name, process.state().as_str(), pid_desc)
}

fn handle_pid(supervisor: &Supervisor, args: &[&str]) -> String {
    let target = match args.first() {
        Some(t) => *t,
        None => return "*** expected a target (group:process or group:)\n".to_string(),
    };
    let targets = match resolve_targets(supervisor, target) {
        Ok(t) => t,
        Err(e) => return format!("{e}\n"),
    };

    let mut lines = Vec::new();
    for rt in &targets {
        let found = supervisor.with_group(&rt.group, |group| match &rt.process {
            None => {
                for process in &group.processes {
                    lines.push(format_pid_line(process));
                }
            }
            Some(pname) => match group.find(pname) {
                Some(process) => lines.push(format_pid_line(process)),
                None => lines.push(format!("{}:{pname}: no such process", rt.group)),
            },
        });
        if found.is_none() {
            lines.push(format!("{}: no such program", rt.group));
        }
    }
    if lines.is_empty() {
        "no programs configured\n".to_string()
    } else {
        lines.join("\n") + "\n"
    }
}

fn format_pid_line(process: &Arc<Process>) -> String {
    format!("{}: {}", process.name, process.pid().map(|p| p.to_string()).unwrap_or_else(|| "-1".to_string()))
}

fn handle_reload(supervisor: &Supervisor) -> String {
    match supervisor.reload() {
        Ok(report) if report.is_empty() => "ok: no changes\n".to_string(),
        Ok(report) => format!(
            "ok: added [{}], changed [{}], removed [{}]\n",
            report.added.join(", "),
            report.changed.join(", "),
            report.removed.join(", ")
        ),
        Err(e) => format!("error: {e}\n"),
    }
}

fn handle_config(supervisor: &Supervisor, args: &[&str]) -> String {
    let path = match args.first() {
        Some(p) => std::path::PathBuf::from(p),
        None => return "error: expected a path\n".to_string(),
    };
    match supervisor.stage_config_path(path.clone()) {
        Ok(()) => format!("Configuration path staged: {}\n", path.display()),
        Err(e) => format!("error: {e}\n"),
    }
}

fn handle_signal(supervisor: &Supervisor, args: &[&str]) -> String {
    let (target, signal_name) = match (args.first(), args.get(1)) {
        (Some(t), Some(s)) => (*t, *s),
        _ => return "*** expected <group:process>|<group:> <signal>\n".to_string(),
    };
    let signal = match Signal::parse(signal_name) {
        Some(s) => s,
        None => return format!("error: unrecognized signal '{signal_name}'\n"),
    };
    let targets = match resolve_targets(supervisor, target) {
        Ok(t) => t,
        Err(e) => return format!("{e}\n"),
    };

    let mut delivered = 0;
    let mut missing = Vec::new();
    for rt in &targets {
        let found = supervisor.with_group(&rt.group, |group| {
            let processes: Vec<&Arc<Process>> = match &rt.process {
                None => group.processes.iter().collect(),
                Some(pname) => group.find(pname).into_iter().collect(),
            };
            for process in processes {
                if process.state() == ProcessState::Running {
                    if let Some(pid) = process.pid() {
                        if taskmaster_core::signal::send_signal(pid, signal).is_ok() {
                            delivered += 1;
                        }
                    }
                }
            }
        });
        if found.is_none() {
            missing.push(rt.group.clone());
        }
    }

    if !missing.is_empty() {
        return format!("error: no such program(s): {}\n", missing.join(", "));
    }
    format!("ok: delivered {signal} to {delivered} process(es)\n")
}

fn handle_help(args: &[&str]) -> String {
    match args.first() {
        Some(topic) => COMMANDS
            .iter()
            .find(|(name, _)| name == topic)
            .map(|(_, usage)| format!("{usage}\n"))
            .unwrap_or_else(|| format!("error: no such command '{topic}'\n")),
        None => {
            let mut lines: Vec<String> = COMMANDS.iter().map(|(name, _)| name.to_string()).collect();
            lines.push(String::new());
            lines.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_without_topic_lists_commands() {
        let output = handle_help(&[]);
        assert!(output.contains("start"));
        assert!(output.contains("status"));
        assert!(output.contains("pid"));
    }

    #[test]
    fn help_with_unknown_topic_errors() {
        let output = handle_help(&["bogus"]);
        assert!(output.starts_with("error:"));
    }

    fn stopped_process() -> Arc<Process> {
        let spec = Arc::new(
            taskmaster_core::spec::ProgramSpec::from_raw(
                "alpha",
                taskmaster_core::spec::RawProgramSpec {
                    command: vec!["true".to_string()],
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        Process::new(spec.process_name(0), spec)
    }

    #[test]
    fn countdown_releases_waiter_once_drained_and_records_each_result() {
        let one = stopped_process();
        let two = stopped_process();
        let countdown = Countdown::new(2);
        let cb1 = countdown.callback(one.name.clone(), Arc::clone(&one), Action::Stop);
        let cb2 = countdown.callback(two.name.clone(), Arc::clone(&two), Action::Stop);
        std::thread::spawn(move || {
            cb1();
            cb2();
        });
        let results = countdown.wait(Duration::from_secs(2));
        assert_eq!(results.len(), 2);
        assert!(results.get(&one.name).unwrap().1);
        assert!(results.get(&two.name).unwrap().1);
    }

    #[test]
    fn resolve_targets_rejects_colonless_input() {
        let mut config = taskmaster_core::config::Config::default();
        config.programs.insert(
            "alpha".to_string(),
            taskmaster_core::spec::ProgramSpec::from_raw(
                "alpha",
                taskmaster_core::spec::RawProgramSpec {
                    command: vec!["true".to_string()],
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let supervisor = Supervisor::new(std::path::PathBuf::from("test.yaml"), config);
        let err = resolve_targets(&supervisor, "alpha").unwrap_err();
        assert!(err.starts_with("*** Bad target name"));
    }

    #[test]
    fn resolve_targets_expands_bare_group_colon() {
        let mut config = taskmaster_core::config::Config::default();
        config.programs.insert(
            "alpha".to_string(),
            taskmaster_core::spec::ProgramSpec::from_raw(
                "alpha",
                taskmaster_core::spec::RawProgramSpec {
                    command: vec!["true".to_string()],
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let supervisor = Supervisor::new(std::path::PathBuf::from("test.yaml"), config);
        let targets = resolve_targets(&supervisor, "alpha:").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].group, "alpha");
        assert!(targets[0].process.is_none());
    }
}
