//! The per-process state machine: spawn, readiness, graceful stop, forced kill, and
//! restart-on-exit decisions for a single managed child.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, close, dup2, execvp, fork, setsid, ForkResult};
use taskmaster_core::spec::ProgramSpec;
use taskmaster_core::Signal;

use crate::logpipe;
use crate::timer::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Backoff,
    Stopping,
    Exited,
    Fatal,
    Unknown,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Backoff => "backoff",
            ProcessState::Stopping => "stopping",
            ProcessState::Exited => "exited",
            ProcessState::Fatal => "fatal",
            ProcessState::Unknown => "unknown",
        }
    }
}

/// Mutable, lock-protected fields of a managed process. `pid` is mirrored in an
/// `AtomicI32` on `Process` so the reaper thread can route a SIGCHLD notification to the
/// right handle without taking this lock first.
struct Inner {
    state: ProcessState,
    retries: u32,
    started_at: Option<Instant>,
    /// Set when the operator (or a group stop) asked this process to stop, so that its
    /// eventual exit is not mistaken for an unexpected crash.
    stop_requested: bool,
    /// Invoked once the process has left a transient state (stopping -> stopped/exited)
    /// as part of a bulk operation; see `dispatcher::Countdown`.
    on_settle: Option<Box<dyn FnOnce() + Send>>,
}

/// One managed child: one of a program's `numprocs` siblings.
pub struct Process {
    pub name: String,
    pub spec: Arc<ProgramSpec>,
    pid: AtomicI32,
    inner: Mutex<Inner>,
    start_timer: Timer,
    stop_timer: Timer,
    /// Arms the linear-back-off re-spawn ("retries seconds" after a starting-window
    /// exit) scheduled by `on_exit`; a fresh `spawn()` or an operator `stop()` issued
    /// while a restart is pending supersedes or cancels it.
    backoff_timer: Timer,
    /// Path of the most recently opened stdout destination, when it resolved to a real
    /// file on disk (`AUTO` or a literal path). `attach` tails this.
    stdout_log_path: Mutex<Option<std::path::PathBuf>>,
}

const NO_PID: i32 = -1;

impl Process {
    pub fn new(name: String, spec: Arc<ProgramSpec>) -> Arc<Process> {
        Arc::new(Process {
            name,
            spec,
            pid: AtomicI32::new(NO_PID),
            inner: Mutex::new(Inner {
                state: ProcessState::Stopped,
                retries: 0,
                started_at: None,
                stop_requested: false,
                on_settle: None,
            }),
            start_timer: Timer::new(),
            stop_timer: Timer::new(),
            backoff_timer: Timer::new(),
            stdout_log_path: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().expect("process lock poisoned").state
    }

    pub fn pid(&self) -> Option<libc::pid_t> {
        match self.pid.load(Ordering::SeqCst) {
            NO_PID => None,
            pid => Some(pid),
        }
    }

    /// The path `attach` should tail, if the configured stdout destination resolved to a
    /// real file (`AUTO` or a literal path) the last time this process was spawned.
    pub fn stdout_log_path(&self) -> Option<std::path::PathBuf> {
        self.stdout_log_path
            .lock()
            .expect("stdout log path lock poisoned")
            .clone()
    }

    fn set_state(&self, state: ProcessState) {
        self.inner.lock().expect("process lock poisoned").state = state;
    }

    /// Fork and exec this process's command, redirecting stdout/stderr per its spec and
    /// arming the readiness timer. Called with the process already known to be stopped.
    ///
    /// `startsecs = 0` is a boundary case (spec.md §8): the process is considered ready
    /// the instant fork succeeds, with no asynchronous readiness window at all -- so a
    /// same-instant exit is driven through the `running` path (-> `exited`), never
    /// through `starting`/`backoff`.
    pub fn spawn(self: &Arc<Self>, registry: &taskmaster_core::PidRegistry<Arc<Process>>) {
        self.backoff_timer.cancel();
        let skip_readiness_window = self.spec.startsecs == 0;

        {
            let mut guard = self.inner.lock().expect("process lock poisoned");
            guard.state = if skip_readiness_window {
                ProcessState::Running
            } else {
                ProcessState::Starting
            };
            guard.started_at = Some(Instant::now());
            guard.stop_requested = false;
            if skip_readiness_window {
                guard.retries = 0;
            }
        }

        let (stdout_fd, stdout_path) = logpipe::open_destination(&self.spec.stdout_logfile, &self.name, "stdout");
        let (stderr_fd, _stderr_path) = logpipe::open_destination(&self.spec.stderr_logfile, &self.name, "stderr");
        *self.stdout_log_path.lock().expect("stdout log path lock poisoned") = stdout_path;

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child, .. }) => {
                let _ = close(stdout_fd);
                let _ = close(stderr_fd);
                self.pid.store(child.as_raw(), Ordering::SeqCst);
                registry.insert(child.as_raw(), Arc::clone(self));
                info!("{}: spawned pid {}", self.name, child.as_raw());

                if skip_readiness_window {
                    info!("{}: startsecs=0, entering running state immediately", self.name);
                    self.fire_settle();
                } else {
                    let this = Arc::clone(self);
                    self.start_timer.schedule(Duration::from_secs(self.spec.startsecs), move || {
                        this.on_startsecs_elapsed();
                    });
                }
            }
            Ok(ForkResult::Child) => {
                child_exec(&self.spec, stdout_fd, stderr_fd);
            }
            Err(e) => {
                error!("{}: fork failed: {}", self.name, e);
                self.set_state(ProcessState::Backoff);
            }
        }
    }

    /// Fire and clear the pending `on_next_settle` callback, if any.
    fn fire_settle(&self) {
        let mut guard = self.inner.lock().expect("process lock poisoned");
        if let Some(cb) = guard.on_settle.take() {
            drop(guard);
            cb();
        }
    }

    /// The process survived `startsecs` without exiting: it is considered `running` and
    /// its retry counter resets. This is this process's analogue of spec.md's `on_spawn`
    /// continuation -- a bulk `start` waiting on `on_next_settle` unblocks here rather
    /// than waiting for the process to eventually exit.
    fn on_startsecs_elapsed(self: &Arc<Self>) {
        let mut guard = self.inner.lock().expect("process lock poisoned");
        if guard.state == ProcessState::Starting {
            guard.state = ProcessState::Running;
            guard.retries = 0;
            info!("{}: entered running state", self.name);
            if let Some(cb) = guard.on_settle.take() {
                drop(guard);
                cb();
            }
        }
    }

    /// Called by the reaper when this process's pid has exited, with the normalized exit
    /// code (see `taskmaster_core::process::try_reap_any`). Drives the restart decision
    /// from spec.md §4.1's `on_sigchld` table, including the linear (`retries` seconds)
    /// back-off re-spawn for a starting-window exit.
    ///
    /// The dead pid is kept readable (`self.pid()`) until after the settle callback has
    /// fired, since a bulk `stop`/`restart` reply needs each process's *last* pid -- it is
    /// only cleared once settle has observed it.
    pub fn on_exit(self: &Arc<Self>, exit_code: i32, registry: &Arc<taskmaster_core::PidRegistry<Arc<Process>>>) {
        self.start_timer.cancel();
        self.stop_timer.cancel();

        let mut guard = self.inner.lock().expect("process lock poisoned");
        let was_stopping = guard.state == ProcessState::Stopping;
        let stop_requested = guard.stop_requested;
        let was_starting = guard.state == ProcessState::Starting;

        // `Some(delay)` arms the linear back-off re-spawn once settle has fired and the
        // dead pid has been cleared; `should_restart` triggers the unconditional
        // (non-delayed) restart-after-running-exit path instead.
        let mut backoff_delay: Option<Duration> = None;
        let mut should_restart = false;

        if stop_requested || was_stopping {
            guard.state = ProcessState::Stopped;
            info!("{}: stopped (pid exited with code {})", self.name, exit_code);
        } else if was_starting {
            guard.retries += 1;
            if guard.retries > self.spec.startretries {
                let attempts = guard.retries;
                guard.state = ProcessState::Fatal;
                guard.retries = 0;
                error!(
                    "{}: exited during startup {} times, exceeding startretries={}; giving up",
                    self.name, attempts, self.spec.startretries
                );
            } else {
                let delay_secs = u64::from(guard.retries);
                guard.state = ProcessState::Backoff;
                warn!(
                    "{}: exited during startup with code {} (attempt {}/{}), retrying in {}s",
                    self.name, exit_code, guard.retries, self.spec.startretries, delay_secs
                );
                backoff_delay = Some(Duration::from_secs(delay_secs));
            }
        } else {
            let expected = self.spec.is_expected_exit(exit_code);
            guard.state = ProcessState::Exited;
            info!("{}: exited with code {} (expected={})", self.name, exit_code, expected);
            should_restart = match self.spec.autorestart {
                taskmaster_core::AutoRestart::Always => true,
                taskmaster_core::AutoRestart::Never => false,
                taskmaster_core::AutoRestart::Unexpected => !expected,
            };
        }

        self.fire_settle_locked(guard);
        self.pid.store(NO_PID, Ordering::SeqCst);

        if let Some(delay) = backoff_delay {
            self.schedule_backoff_restart(delay, registry);
        } else if should_restart {
            info!("{}: restarting after unexpected exit", self.name);
            self.spawn(registry);
        }
    }

    /// Fire and clear an already-locked pending `on_next_settle` callback, if any.
    fn fire_settle_locked(&self, mut guard: std::sync::MutexGuard<'_, Inner>) {
        if let Some(cb) = guard.on_settle.take() {
            drop(guard);
            cb();
        }
    }

    /// Arm the linear-back-off timer for a starting-window exit: re-`spawn` after
    /// `delay`, unless something else (an operator `stop`, or a newer `spawn`) has moved
    /// the process out of `backoff` in the meantime.
    fn schedule_backoff_restart(self: &Arc<Self>, delay: Duration, registry: &Arc<taskmaster_core::PidRegistry<Arc<Process>>>) {
        let this = Arc::clone(self);
        let registry = Arc::clone(registry);
        self.backoff_timer.schedule(delay, move || {
            if this.state() == ProcessState::Backoff {
                this.spawn(&registry);
            }
        });
    }

    /// Begin a graceful stop: send `stopsignal`, and arm a forced `SIGKILL` after
    /// `stopwaitsecs` if the process has not exited by then.
    pub fn stop(self: &Arc<Self>) {
        self.start_timer.cancel();
        self.backoff_timer.cancel();
        let pid = match self.pid() {
            Some(pid) => pid,
            None => {
                let mut guard = self.inner.lock().expect("process lock poisoned");
                guard.state = ProcessState::Stopped;
                if let Some(cb) = guard.on_settle.take() {
                    drop(guard);
                    cb();
                }
                return;
            }
        };

        {
            let mut guard = self.inner.lock().expect("process lock poisoned");
            guard.state = ProcessState::Stopping;
            guard.stop_requested = true;
        }

        if let Err(e) = taskmaster_core::signal::send_signal(pid, self.spec.stopsignal) {
            warn!("{}: failed to deliver {}: {}", self.name, self.spec.stopsignal, e);
        }

        let this = Arc::clone(self);
        self.stop_timer
            .schedule(Duration::from_secs(self.spec.stopwaitsecs), move || {
                this.force_kill(pid);
            });
    }

    fn force_kill(&self, expected_pid: libc::pid_t) {
        if self.pid() != Some(expected_pid) {
            return;
        }
        warn!(
            "{}: did not exit within stopwaitsecs={}, sending SIGKILL",
            self.name, self.spec.stopwaitsecs
        );
        if let Err(e) = taskmaster_core::signal::send_signal(expected_pid, Signal::KILL) {
            error!("{}: failed to deliver SIGKILL: {}", self.name, e);
        }
    }

    /// Register a one-shot callback fired the next time this process settles
    /// (transitions out of a transient start/stop) -- used by bulk operations to know
    /// when every affected process has finished reacting.
    pub fn on_next_settle<F: FnOnce() + Send + 'static>(&self, callback: F) {
        self.inner.lock().expect("process lock poisoned").on_settle = Some(Box::new(callback));
    }
}

fn child_exec(spec: &ProgramSpec, stdout_fd: RawFd, stderr_fd: RawFd) -> ! {
    let _ = setsid();
    let _ = dup2(stdout_fd, libc::STDOUT_FILENO);
    let _ = dup2(stderr_fd, libc::STDERR_FILENO);
    let _ = close(stdout_fd);
    let _ = close(stderr_fd);

    if let Some(dir) = &spec.directory {
        if chdir(dir.as_path()).is_err() {
            std::process::exit(127);
        }
    }

    if let Some(mask) = spec.umask {
        umask(Mode::from_bits_truncate(mask));
    }

    for (key, value) in &spec.environment {
        std::env::set_var(key, value);
    }

    let c_args: Vec<CString> = spec
        .command
        .iter()
        .map(|arg| CString::new(arg.as_str()).unwrap_or_else(|_| CString::new("").unwrap()))
        .collect();

    let _ = execvp(&c_args[0], &c_args);
    std::process::exit(127);
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmaster_core::spec::RawProgramSpec;
    use taskmaster_core::PidRegistry;

    fn process(raw: RawProgramSpec) -> Arc<Process> {
        let spec = Arc::new(ProgramSpec::from_raw("alpha", raw).unwrap());
        Process::new(spec.process_name(0), spec)
    }

    /// Reap `process`'s current child synchronously (bypassing `SIGCHLD`/the reaper
    /// thread entirely) and drive its `on_exit` with the real exit code, to unit test
    /// the restart decision without a signal-handling stack.
    fn reap_and_drive(process: &Arc<Process>, registry: &Arc<PidRegistry<Arc<Process>>>) {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::Pid;
        let pid = process.pid().expect("process should have a live pid to reap");
        match waitpid(Pid::from_raw(pid), None).expect("waitpid") {
            WaitStatus::Exited(_, code) => process.on_exit(code, registry),
            WaitStatus::Signaled(_, signal, _) => process.on_exit(128 + signal as i32, registry),
            other => panic!("unexpected wait status: {other:?}"),
        }
    }

    #[test]
    fn zero_startsecs_enters_running_synchronously() {
        let registry = Arc::new(PidRegistry::new());
        let proc = process(RawProgramSpec {
            command: vec!["true".to_string()],
            startsecs: Some(0),
            ..Default::default()
        });
        proc.spawn(&registry);
        // No async readiness window exists for startsecs=0: the state is Running the
        // instant `spawn` returns, not eventually-via-timer.
        assert_eq!(proc.state(), ProcessState::Running);
        reap_and_drive(&proc, &registry);
    }

    #[test]
    fn starting_window_exit_enters_backoff_before_respawning() {
        let registry = Arc::new(PidRegistry::new());
        let proc = process(RawProgramSpec {
            command: vec!["true".to_string()],
            startsecs: Some(5),
            startretries: Some(1),
            ..Default::default()
        });
        proc.spawn(&registry);
        assert_eq!(proc.state(), ProcessState::Starting);

        let first_pid = proc.pid().unwrap();
        reap_and_drive(&proc, &registry);
        assert_eq!(proc.state(), ProcessState::Backoff);

        // The re-spawn is delayed by the linear back-off, not immediate.
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(proc.state(), ProcessState::Backoff);

        let respawned = (0..20).any(|_| {
            std::thread::sleep(Duration::from_millis(100));
            proc.pid().map(|p| p != first_pid).unwrap_or(false)
        });
        assert!(respawned, "process should have re-spawned with a new pid after the back-off delay");
        assert_eq!(proc.state(), ProcessState::Starting);
        reap_and_drive(&proc, &registry);
    }

    #[test]
    fn exhausting_startretries_reaches_fatal_and_resets_retries() {
        let registry = Arc::new(PidRegistry::new());
        let proc = process(RawProgramSpec {
            command: vec!["true".to_string()],
            startsecs: Some(5),
            startretries: Some(0),
            ..Default::default()
        });
        proc.spawn(&registry);
        reap_and_drive(&proc, &registry);
        assert_eq!(proc.state(), ProcessState::Fatal);
    }

    #[test]
    fn stop_on_a_pidless_process_settles_immediately() {
        let registry = Arc::new(PidRegistry::new());
        let proc = process(RawProgramSpec {
            command: vec!["true".to_string()],
            ..Default::default()
        });
        assert_eq!(proc.state(), ProcessState::Stopped);
        proc.stop();
        assert_eq!(proc.state(), ProcessState::Stopped);
        let _ = &registry;
    }
}
